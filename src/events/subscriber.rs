//! Hand-rolled consumer loop for the item topics.
//!
//! Unlike [`EventRouter`](super::EventRouter) there is no middleware here:
//! each message is handled once and settled directly.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::{AppError, Delivery, MessageSubscriber, Subscription};

use super::handlers::ItemHandler;
use super::{DELIVER_ITEM, ORDER_ITEM};

pub struct ItemSubscriber {
    handler: Arc<ItemHandler>,
    order_items: Subscription,
    deliver_items: Subscription,
    shutdown_rx: watch::Receiver<bool>,
}

impl ItemSubscriber {
    /// Subscribes to both item topics.
    pub async fn new(
        subscriber: &dyn MessageSubscriber,
        handler: Arc<ItemHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, AppError> {
        let order_items = subscriber.subscribe(ORDER_ITEM).await?;
        let deliver_items = subscriber.subscribe(DELIVER_ITEM).await?;
        Ok(Self {
            handler,
            order_items,
            deliver_items,
            shutdown_rx,
        })
    }

    /// Consumes until the shutdown channel flips to true or a subscription
    /// closes.
    pub async fn run(mut self) {
        info!("Starting item subscriber");

        loop {
            tokio::select! {
                delivery = self.order_items.recv() => {
                    let Some(delivery) = delivery else {
                        warn!(topic = ORDER_ITEM, "Subscription closed");
                        break;
                    };
                    let result = self.handler.listen_order_item(&delivery.envelope).await;
                    settle(delivery, result).await;
                }
                delivery = self.deliver_items.recv() => {
                    let Some(delivery) = delivery else {
                        warn!(topic = DELIVER_ITEM, "Subscription closed");
                        break;
                    };
                    let result = self.handler.listen_deliver_item(&delivery.envelope).await;
                    settle(delivery, result).await;
                }
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        info!("Item subscriber shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn settle(delivery: Delivery, result: Result<(), AppError>) {
    let uuid = delivery.envelope.uuid;
    let outcome = match result {
        Ok(()) => delivery.ack().await,
        Err(e) => {
            warn!(message_uuid = %uuid, error = %e, "Handler failed, nacking message");
            delivery.nack().await
        }
    };
    if let Err(e) = outcome {
        error!(message_uuid = %uuid, error = %e, "Failed to settle message");
    }
}

/// Spawn the subscriber as a tokio task. Send `true` on the returned
/// sender to stop it.
pub async fn spawn_item_subscriber(
    subscriber: &dyn MessageSubscriber,
    handler: Arc<ItemHandler>,
) -> Result<(tokio::task::JoinHandle<()>, watch::Sender<bool>), AppError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let item_subscriber = ItemSubscriber::new(subscriber, handler, shutdown_rx).await?;
    let handle = tokio::spawn(item_subscriber.run());
    Ok((handle, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BrokerError, Creation, Envelope, MessagePublisher};
    use crate::events::DeliverItemMessage;
    use crate::infra::InMemoryBroker;
    use crate::test_utils::{MockItemRepository, MockRepos};
    use std::time::Duration;

    fn handler_for(mocks: &MockRepos) -> Arc<ItemHandler> {
        Arc::new(ItemHandler::new(Arc::new(mocks.service())))
    }

    fn delivery_for(creation: &Creation, token: &str) -> Envelope {
        let message = DeliverItemMessage {
            creation_id: creation.id.clone(),
            contract: creation.contract_address.clone(),
            token: token.to_string(),
        };
        Envelope::new(serde_json::to_vec(&message).unwrap())
    }

    async fn settled(broker: &InMemoryBroker, expected: usize) {
        for _ in 0..200 {
            if broker.acked().await.len() + broker.nacked().await.len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("messages were not settled in time");
    }

    #[tokio::test]
    async fn test_messages_are_acked_after_handling() {
        let mocks = MockRepos::new();
        let creation = Creation::new("Genesis", "brand-1", 100, 10, "0xC0FFEE");
        mocks.creations.insert(creation.clone());
        let broker = Arc::new(InMemoryBroker::with_redelivery_delay(Duration::from_secs(60)));

        let (handle, shutdown_tx) = spawn_item_subscriber(&*broker, handler_for(&mocks))
            .await
            .unwrap();

        broker.publish(DELIVER_ITEM, delivery_for(&creation, "1")).await.unwrap();
        broker
            .publish(ORDER_ITEM, Envelope::new(b"not json".to_vec()))
            .await
            .unwrap();
        settled(&broker, 2).await;

        assert_eq!(broker.acked().await.len(), 2);
        assert_eq!(mocks.items.get_all_items().len(), 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_infrastructure_failure_is_nacked() {
        let mut mocks = MockRepos::new();
        mocks.items = Arc::new(MockItemRepository::failing("disk full"));
        let creation = Creation::new("Genesis", "brand-1", 100, 10, "0xC0FFEE");
        mocks.creations.insert(creation.clone());
        let broker = Arc::new(InMemoryBroker::with_redelivery_delay(Duration::from_secs(60)));

        let (handle, shutdown_tx) = spawn_item_subscriber(&*broker, handler_for(&mocks))
            .await
            .unwrap();

        broker.publish(DELIVER_ITEM, delivery_for(&creation, "1")).await.unwrap();
        settled(&broker, 1).await;

        assert_eq!(broker.nacked().await.len(), 1);
        assert!(broker.acked().await.is_empty());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_exits_the_loop() {
        let mocks = MockRepos::new();
        let broker = InMemoryBroker::new();
        let (handle, shutdown_tx) = spawn_item_subscriber(&broker, handler_for(&mocks)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "subscriber should stop within 1 second");
    }

    #[tokio::test]
    async fn test_second_subscriber_on_same_broker_is_rejected() {
        let mocks = MockRepos::new();
        let broker = InMemoryBroker::new();
        let (_handle, _shutdown_tx) = spawn_item_subscriber(&broker, handler_for(&mocks)).await.unwrap();

        let result = spawn_item_subscriber(&broker, handler_for(&mocks)).await;

        assert!(matches!(
            result,
            Err(AppError::Broker(BrokerError::AlreadySubscribed(_)))
        ));
    }
}
