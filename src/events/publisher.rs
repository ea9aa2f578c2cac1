//! Serializes messages and hands them to the broker.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{AppError, Envelope, MessagePublisher};

use super::messages::{DeliverItemMessage, OrderItemMessage};
use super::{DELIVER_ITEM, ORDER_ITEM};

/// Typed publishing surface used by the business layer.
#[async_trait]
pub trait ItemPublisher: Send + Sync {
    async fn publish_order_item(&self, message: &OrderItemMessage) -> Result<Uuid, AppError>;

    async fn publish_deliver_item(&self, message: &DeliverItemMessage) -> Result<Uuid, AppError>;

    /// Check broker connectivity
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn MessagePublisher>,
}

impl EventPublisher {
    #[must_use]
    pub fn new(broker: Arc<dyn MessagePublisher>) -> Self {
        Self { broker }
    }

    /// Publishes `message` as JSON on `topic`, returning the envelope id.
    ///
    /// Serialization failures never reach the broker. Broker errors are
    /// returned unchanged; nothing is retried here.
    #[instrument(skip(self, message))]
    pub async fn publish<M>(&self, topic: &str, message: &M) -> Result<Uuid, AppError>
    where
        M: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_vec(message)?;
        let envelope = Envelope::new(payload);
        let uuid = envelope.uuid;

        self.broker.publish(topic, envelope).await?;

        metrics::counter!("events_published_total", "topic" => topic.to_string()).increment(1);
        debug!(message_uuid = %uuid, "Event published");
        Ok(uuid)
    }
}

#[async_trait]
impl ItemPublisher for EventPublisher {
    async fn publish_order_item(&self, message: &OrderItemMessage) -> Result<Uuid, AppError> {
        self.publish(ORDER_ITEM, message).await
    }

    async fn publish_deliver_item(&self, message: &DeliverItemMessage) -> Result<Uuid, AppError> {
        self.publish(DELIVER_ITEM, message).await
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.broker.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BrokerError;
    use crate::test_utils::MockPublisher;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_publish_wraps_payload_in_fresh_envelope() {
        let broker = Arc::new(MockPublisher::new());
        let publisher = EventPublisher::new(broker.clone());
        let message = OrderItemMessage {
            creation_id: "c-1".to_string(),
            contract: "0xC0".to_string(),
            amount: 1,
        };

        let first = publisher.publish_order_item(&message).await.unwrap();
        let second = publisher.publish_order_item(&message).await.unwrap();

        assert_ne!(first, second);
        let published = broker.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, ORDER_ITEM);
        assert_eq!(published[0].1.uuid, first);
        assert_eq!(published[0].1.payload, serde_json::to_vec(&message).unwrap());
    }

    #[tokio::test]
    async fn test_unserializable_message_never_reaches_broker() {
        let broker = Arc::new(MockPublisher::new());
        let publisher = EventPublisher::new(broker.clone());

        let mut bad: HashMap<(i32, i32), i32> = HashMap::new();
        bad.insert((1, 2), 3);

        let result = publisher.publish("anything", &bad).await;

        assert!(matches!(result, Err(AppError::Serialization(_))));
        assert_eq!(broker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_broker_error_is_returned_unchanged() {
        let broker = Arc::new(MockPublisher::failing("exchange gone"));
        let publisher = EventPublisher::new(broker.clone());
        let message = DeliverItemMessage {
            creation_id: "c-1".to_string(),
            contract: "0xC0".to_string(),
            token: "1".to_string(),
        };

        let result = publisher.publish_deliver_item(&message).await;

        match result {
            Err(AppError::Broker(BrokerError::Publish(msg))) => assert_eq!(msg, "exchange gone"),
            other => panic!("expected publish error, got {other:?}"),
        }
        assert_eq!(broker.call_count(), 1);
    }
}
