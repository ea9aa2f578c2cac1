//! Routes each topic's messages to its handler through the middleware
//! pipeline, then settles them with the broker.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, field, info, info_span, warn};

use crate::domain::{AppError, BrokerError, Delivery, MessageSubscriber, Subscription};

use super::middleware::{RetryConfig, correlation_id, recoverer, retry};
use super::{HandlerFunc, Middleware};

struct Route {
    name: String,
    handler: HandlerFunc,
}

/// Message router with one handler per topic.
///
/// Handlers and middleware are bound before [`run`](Self::run). A handler
/// that returns `Ok` gets its message acked; any error left after the
/// middleware is done turns into a nack.
pub struct EventRouter {
    subscriber: Arc<dyn MessageSubscriber>,
    routes: HashMap<String, Route>,
    middlewares: Vec<Middleware>,
}

impl EventRouter {
    #[must_use]
    pub fn new(subscriber: Arc<dyn MessageSubscriber>) -> Self {
        Self {
            subscriber,
            routes: HashMap::new(),
            middlewares: Vec::new(),
        }
    }

    /// Router with the standard pipeline: correlation id, retry, recoverer.
    #[must_use]
    pub fn with_default_middleware(subscriber: Arc<dyn MessageSubscriber>, retry_config: RetryConfig) -> Self {
        let mut router = Self::new(subscriber);
        router.add_middleware(correlation_id());
        router.add_middleware(retry(retry_config));
        router.add_middleware(recoverer());
        router
    }

    /// Adds a middleware. The first one added sees the message first.
    pub fn add_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    /// Binds `handler` to `topic`.
    ///
    /// # Errors
    /// [`BrokerError::DuplicateHandler`] if the topic already has a handler.
    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        topic: impl Into<String>,
        handler: HandlerFunc,
    ) -> Result<(), AppError> {
        let topic = topic.into();
        if self.routes.contains_key(&topic) {
            return Err(BrokerError::DuplicateHandler(topic).into());
        }
        self.routes.insert(
            topic,
            Route {
                name: name.into(),
                handler,
            },
        );
        Ok(())
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    fn compose(&self, handler: HandlerFunc) -> HandlerFunc {
        self.middlewares
            .iter()
            .rev()
            .fold(handler, |next, middleware| middleware(next))
    }

    /// Subscribes every bound topic and consumes until `shutdown` flips to
    /// true. Messages already being handled are finished and settled before
    /// this returns.
    ///
    /// # Errors
    /// Returns the first subscription failure; nothing is consumed then.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let mut subscriptions = Vec::with_capacity(self.routes.len());
        for (topic, route) in &self.routes {
            let subscription = self.subscriber.subscribe(topic).await?;
            subscriptions.push((topic.clone(), route.name.clone(), self.compose(Arc::clone(&route.handler)), subscription));
        }

        info!(handlers = subscriptions.len(), "Event router running");

        let mut tasks = JoinSet::new();
        for (topic, name, handler, subscription) in subscriptions {
            let span = info_span!("event_route", handler = %name, topic = %topic);
            tasks.spawn(consume(subscription, handler, shutdown.clone()).instrument(span));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Route task failed");
            }
        }

        info!("Event router stopped");
        Ok(())
    }
}

async fn consume(mut subscription: Subscription, handler: HandlerFunc, mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }

    loop {
        tokio::select! {
            delivery = subscription.recv() => match delivery {
                Some(delivery) => process(delivery, &handler).await,
                None => {
                    warn!("Subscription closed by broker");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Route shutting down");
                    break;
                }
            }
        }
    }
}

async fn process(delivery: Delivery, handler: &HandlerFunc) {
    let span = info_span!(
        "message",
        message_uuid = %delivery.envelope.uuid,
        correlation_id = field::Empty,
    );

    async move {
        let topic = delivery.topic.clone();
        match handler(delivery.envelope.clone()).await {
            Ok(()) => {
                metrics::counter!("events_acked_total", "topic" => topic).increment(1);
                if let Err(e) = delivery.ack().await {
                    error!(error = %e, "Failed to ack message");
                }
            }
            Err(e) => {
                warn!(error = %e, "Handler failed, nacking message");
                metrics::counter!("events_nacked_total", "topic" => topic).increment(1);
                if let Err(e) = delivery.nack().await {
                    error!(error = %e, "Failed to nack message");
                }
            }
        }
    }
    .instrument(span)
    .await;
}
