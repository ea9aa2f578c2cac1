//! Consumers for the item topics.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::app::AppService;
use crate::domain::{AppError, Envelope};

use super::messages::{DeliverItemMessage, OrderItemMessage, decode};
use super::router::EventRouter;
use super::{DELIVER_ITEM, ORDER_ITEM, handler_fn};

pub struct ItemHandler {
    service: Arc<AppService>,
}

impl ItemHandler {
    #[must_use]
    pub fn new(service: Arc<AppService>) -> Self {
        Self { service }
    }

    /// Binds both item topics on `router`.
    pub fn register(self: &Arc<Self>, router: &mut EventRouter) -> Result<(), AppError> {
        let handler = Arc::clone(self);
        router.add_handler(
            "DeliverItem",
            DELIVER_ITEM,
            handler_fn(move |envelope| {
                let handler = Arc::clone(&handler);
                async move { handler.listen_deliver_item(&envelope).await }
            }),
        )?;

        let handler = Arc::clone(self);
        router.add_handler(
            "OrderItem",
            ORDER_ITEM,
            handler_fn(move |envelope| {
                let handler = Arc::clone(&handler);
                async move { handler.listen_order_item(&envelope).await }
            }),
        )
    }

    /// Hand-off point for fulfillment: logs the order.
    ///
    /// Undecodable payloads are logged and dropped.
    #[instrument(skip_all, fields(message_uuid = %envelope.uuid))]
    pub async fn listen_order_item(&self, envelope: &Envelope) -> Result<(), AppError> {
        let message: OrderItemMessage = match decode(envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable order message");
                return Ok(());
            }
        };

        info!(
            creation_id = %message.creation_id,
            contract = %message.contract,
            amount = message.amount,
            "Order item received"
        );
        Ok(())
    }

    /// Records a delivered token.
    ///
    /// Undecodable payloads and business rejections are logged and
    /// acknowledged. Infrastructure errors are returned so the message is
    /// retried.
    #[instrument(skip_all, fields(message_uuid = %envelope.uuid))]
    pub async fn listen_deliver_item(&self, envelope: &Envelope) -> Result<(), AppError> {
        let message: DeliverItemMessage = match decode(envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable delivery message");
                return Ok(());
            }
        };

        match self.service.deliver_item(&message).await {
            Ok(item) => {
                info!(contract = %item.contract, token = %item.token, "Item received");
                Ok(())
            }
            Err(e) if e.is_business() => {
                warn!(error = %e, "Delivery rejected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Creation;
    use crate::test_utils::{MockItemRepository, MockRepos};

    fn handler_for(mocks: &MockRepos) -> ItemHandler {
        ItemHandler::new(Arc::new(mocks.service()))
    }

    fn deliver_envelope(creation_id: &str) -> Envelope {
        let message = DeliverItemMessage {
            creation_id: creation_id.to_string(),
            contract: "0xC0FFEE".to_string(),
            token: "9".to_string(),
        };
        Envelope::new(serde_json::to_vec(&message).unwrap())
    }

    #[tokio::test]
    async fn test_deliver_item_records_item() {
        let mocks = MockRepos::new();
        let creation = Creation::new("Genesis", "brand-1", 100, 10, "0xC0FFEE");
        mocks.creations.insert(creation.clone());
        let handler = handler_for(&mocks);

        handler.listen_deliver_item(&deliver_envelope(&creation.id)).await.unwrap();

        let items = mocks.items.get_all_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].token, "9");
    }

    #[tokio::test]
    async fn test_deliver_item_business_error_is_swallowed() {
        let mocks = MockRepos::new();
        let handler = handler_for(&mocks);

        let result = handler.listen_deliver_item(&deliver_envelope("missing")).await;

        assert!(result.is_ok());
        assert!(mocks.items.get_all_items().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_item_infrastructure_error_is_returned() {
        let mut mocks = MockRepos::new();
        mocks.items = Arc::new(MockItemRepository::failing("disk full"));
        let creation = Creation::new("Genesis", "brand-1", 100, 10, "0xC0FFEE");
        mocks.creations.insert(creation.clone());
        let handler = handler_for(&mocks);

        let result = handler.listen_deliver_item(&deliver_envelope(&creation.id)).await;

        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn test_garbage_payloads_are_dropped() {
        let mocks = MockRepos::new();
        let handler = handler_for(&mocks);
        let garbage = Envelope::new(b"{{{".to_vec());

        assert!(handler.listen_deliver_item(&garbage).await.is_ok());
        assert!(handler.listen_order_item(&garbage).await.is_ok());
    }

    #[tokio::test]
    async fn test_order_item_is_accepted() {
        let mocks = MockRepos::new();
        let handler = handler_for(&mocks);
        let message = OrderItemMessage {
            creation_id: "c-1".to_string(),
            contract: "0xC0".to_string(),
            amount: 2,
        };

        let result = handler
            .listen_order_item(&Envelope::new(serde_json::to_vec(&message).unwrap()))
            .await;

        assert!(result.is_ok());
    }

    #[test]
    fn test_register_binds_both_topics() {
        let mocks = MockRepos::new();
        let handler = Arc::new(handler_for(&mocks));
        let mut router = EventRouter::new(Arc::new(crate::infra::InMemoryBroker::new()));

        handler.register(&mut router).unwrap();

        let mut topics: Vec<&str> = router.topics().collect();
        topics.sort_unstable();
        assert_eq!(topics, vec![DELIVER_ITEM, ORDER_ITEM]);
        assert!(handler.register(&mut router).is_err());
    }
}
