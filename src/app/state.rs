//! Application state management.
//!
//! This module provides the shared application state that is
//! accessible to all request handlers via Axum's State extractor.

use std::sync::Arc;

use crate::infra::PrometheusHandle;

use super::service::AppService;

/// Shared application state for the Axum web server.
///
/// # Example
///
/// ```ignore
/// let service = Arc::new(AppService::new(runner, repositories, publisher));
/// let state = AppState::new(service).with_metrics(init_metrics_handle());
///
/// let router = create_router(Arc::new(state), Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct AppState {
    /// The application service containing business logic.
    pub service: Arc<AppService>,

    /// Renders `/metrics`. `None` when no recorder is installed.
    pub metrics_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<AppService>) -> Self {
        Self {
            service,
            metrics_handle: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: Option<Arc<PrometheusHandle>>) -> Self {
        self.metrics_handle = handle;
        self
    }
}
