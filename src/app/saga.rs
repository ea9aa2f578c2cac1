//! Compensation log for work that spans more than the storage transaction.
//!
//! A [`Saga`] records one [`Step`] per side effect. If the surrounding unit
//! of work fails, [`Saga::abort`] undoes the recorded effects newest first.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::domain::{AppError, MultiError};

/// Boxed future returned by a compensation.
pub type CompensateFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send>>;

/// Undo action for one step.
pub type CompensateFn = Box<dyn FnOnce() -> CompensateFuture + Send>;

/// A named, optional compensation.
pub struct Step {
    pub name: String,
    pub compensate: Option<CompensateFn>,
}

impl Step {
    pub fn new<F, Fut>(name: impl Into<String>, compensate: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            compensate: Some(Box::new(move || Box::pin(compensate()))),
        }
    }

    /// A step with nothing to undo. Skipped on abort.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compensate: None,
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("has_compensation", &self.compensate.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct Saga {
    name: String,
    steps: Vec<Step>,
}

impl Saga {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Runs every recorded compensation, last registered first.
    ///
    /// A failing compensation does not stop the ones after it. All failures
    /// are returned together.
    pub async fn abort(&mut self) -> Result<(), MultiError> {
        if self.steps.is_empty() {
            return Ok(());
        }

        let mut errors = Vec::new();
        while let Some(step) = self.steps.pop() {
            let Some(compensate) = step.compensate else {
                continue;
            };
            debug!(saga = %self.name, step = %step.name, "Running compensation");
            metrics::counter!("saga_compensations_total").increment(1);
            if let Err(e) = compensate().await {
                warn!(saga = %self.name, step = %step.name, error = %e, "Compensation failed");
                metrics::counter!("saga_compensation_failures_total").increment(1);
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MultiError(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_step(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Step {
        let log = Arc::clone(log);
        Step::new(name, move || async move {
            log.lock().unwrap().push(name);
            if fail {
                Err(AppError::Internal(format!("{name} could not be undone")))
            } else {
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_abort_empty_saga_is_ok() {
        let mut saga = Saga::new("Empty");
        assert!(saga.abort().await.is_ok());
    }

    #[tokio::test]
    async fn test_abort_runs_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("Ordered");
        saga.add_step(recording_step("first", &log, false));
        saga.add_step(recording_step("second", &log, false));
        saga.add_step(recording_step("third", &log, false));

        assert!(saga.abort().await.is_ok());
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_abort_continues_past_failures_and_counts_them() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("Partial");
        saga.add_step(recording_step("a", &log, true));
        saga.add_step(recording_step("b", &log, false));
        saga.add_step(recording_step("c", &log, true));
        saga.add_step(recording_step("d", &log, false));

        let err = saga.abort().await.unwrap_err();

        assert_eq!(err.len(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["d", "c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_abort_skips_empty_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("Sparse");
        saga.add_step(recording_step("kept", &log, false));
        saga.add_step(Step::empty("nothing-to-undo"));

        assert!(saga.abort().await.is_ok());
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_each_compensation_runs_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("Once");
        saga.add_step(recording_step("only", &log, false));

        assert!(saga.abort().await.is_ok());
        assert!(saga.abort().await.is_ok());
        assert!(saga.is_empty());
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
