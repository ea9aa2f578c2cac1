//! Item events: what gets published, how it is consumed.
//!
//! Publishing goes through [`EventPublisher`]. Consumption goes through
//! either the [`EventRouter`] (one handler per topic behind a middleware
//! pipeline) or the hand-rolled [`ItemSubscriber`] loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::domain::{AppError, Envelope};

pub mod handlers;
pub mod messages;
pub mod middleware;
pub mod publisher;
pub mod router;
pub mod subscriber;

pub use handlers::ItemHandler;
pub use messages::{DeliverItemMessage, OrderItemMessage};
pub use middleware::{CORRELATION_ID_KEY, RetryConfig, correlation_id, recoverer, retry};
pub use publisher::{EventPublisher, ItemPublisher};
pub use router::EventRouter;
pub use subscriber::{ItemSubscriber, spawn_item_subscriber};

/// Topic carrying [`OrderItemMessage`].
pub const ORDER_ITEM: &str = "order_item";
/// Topic carrying [`DeliverItemMessage`].
pub const DELIVER_ITEM: &str = "deliver_item";

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send>>;

/// A message handler. May be called more than once per message.
pub type HandlerFunc = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Wraps a handler into another handler.
pub type Middleware = Arc<dyn Fn(HandlerFunc) -> HandlerFunc + Send + Sync>;

/// Boxes an async closure into a [`HandlerFunc`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFunc
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    Arc::new(move |envelope| Box::pin(f(envelope)))
}
