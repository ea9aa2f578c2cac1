//! Domain traits defining contracts for external systems.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgConnection;
use tokio::sync::mpsc;

use super::error::AppError;
use super::types::{
    Brand, BrandFilter, Creation, CreationFilter, Envelope, Item, ItemFilter, PaginatedResponse,
    PaginationParams, Trade, TradeFilter, User,
};

/// A storage session able to run one atomic transaction.
///
/// `start` begins the transaction, exactly one of `commit`/`abort` ends it,
/// and `end` releases the session. Repository calls made with this session
/// participate in the open transaction.
#[async_trait]
pub trait TransactionalSession: Send {
    async fn start(&mut self) -> Result<(), AppError>;

    async fn commit(&mut self) -> Result<(), AppError>;

    async fn abort(&mut self) -> Result<(), AppError>;

    async fn end(&mut self);

    /// Connection bound to the open transaction, if the backend has one.
    fn connection(&mut self) -> Option<&mut PgConnection> {
        None
    }
}

/// Opens sessions from a shared, concurrency-safe client.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn TransactionalSession>, AppError>;

    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError>;

    async fn find_by_account(
        &self,
        session: Option<&mut dyn TransactionalSession>,
        account: &str,
    ) -> Result<Option<User>, AppError>;

    async fn exists_by_id(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<bool, AppError>;

    async fn create(&self, session: Option<&mut dyn TransactionalSession>, user: &User) -> Result<(), AppError>;

    /// Returns `DatabaseError::NotFound` when no user has this id.
    async fn delete(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait BrandRepository: Send + Sync {
    async fn find_by_id(
        &self,
        session: Option<&mut dyn TransactionalSession>,
        id: &str,
    ) -> Result<Option<Brand>, AppError>;

    async fn exists_by_id(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<bool, AppError>;

    async fn create(&self, session: Option<&mut dyn TransactionalSession>, brand: &Brand) -> Result<(), AppError>;

    /// Overwrites the stored brand. Returns `DatabaseError::NotFound` when it does not exist.
    async fn update(&self, session: Option<&mut dyn TransactionalSession>, brand: &Brand) -> Result<(), AppError>;

    /// Returns `DatabaseError::NotFound` when no brand has this id.
    async fn delete(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError>;

    async fn find_all_by_filter_and_page(
        &self,
        filter: &BrandFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Brand>, AppError>;
}

#[async_trait]
pub trait CreationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        session: Option<&mut dyn TransactionalSession>,
        id: &str,
    ) -> Result<Option<Creation>, AppError>;

    async fn create(&self, session: Option<&mut dyn TransactionalSession>, creation: &Creation) -> Result<(), AppError>;

    /// Takes `amount` units out of stock, returning the remaining stock.
    async fn reserve_amount(
        &self,
        session: Option<&mut dyn TransactionalSession>,
        id: &str,
        amount: i64,
    ) -> Result<i64, AppError>;

    /// Overwrites name and description. Returns `DatabaseError::NotFound` when it does not exist.
    async fn update(&self, session: Option<&mut dyn TransactionalSession>, creation: &Creation) -> Result<(), AppError>;

    /// Returns `DatabaseError::NotFound` when no creation has this id.
    async fn delete(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError>;

    async fn find_all_by_filter_and_page(
        &self,
        filter: &CreationFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Creation>, AppError>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Trade>, AppError>;

    async fn create(&self, session: Option<&mut dyn TransactionalSession>, trade: &Trade) -> Result<(), AppError>;

    /// Returns `DatabaseError::NotFound` when no trade has this id.
    async fn delete(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError>;

    async fn find_all_by_filter(&self, filter: &TradeFilter) -> Result<Vec<Trade>, AppError>;

    async fn find_all_by_filter_and_page(
        &self,
        filter: &TradeFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Trade>, AppError>;
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn find(&self, contract: &str, token: &str) -> Result<Option<Item>, AppError>;

    async fn create(&self, session: Option<&mut dyn TransactionalSession>, item: &Item) -> Result<(), AppError>;

    async fn find_all_by_filter(&self, filter: &ItemFilter) -> Result<Vec<Item>, AppError>;

    async fn find_all_by_filter_and_page(
        &self,
        filter: &ItemFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Item>, AppError>;

    /// Number of items whose brand owner is `brand_id`.
    async fn count_by_brand_owner(&self, brand_id: &str) -> Result<u64, AppError>;
}

/// Broker client used on the publishing side.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Durably enqueue `envelope` on `topic`.
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), AppError>;

    /// Check broker connectivity
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Broker client used on the consuming side.
#[async_trait]
pub trait MessageSubscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, AppError>;
}

/// Settles a delivered message with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Remove the message from the queue for good.
    async fn ack(&self, topic: &str, envelope: &Envelope) -> Result<(), AppError>;

    /// Hand the message back to the broker for redelivery.
    async fn nack(&self, topic: &str, envelope: Envelope) -> Result<(), AppError>;
}

/// A message handed to a consumer, awaiting ack or nack.
pub struct Delivery {
    pub topic: String,
    pub envelope: Envelope,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, envelope: Envelope, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            topic: topic.into(),
            envelope,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), AppError> {
        self.acker.ack(&self.topic, &self.envelope).await
    }

    pub async fn nack(self) -> Result<(), AppError> {
        self.acker.nack(&self.topic, self.envelope).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("uuid", &self.envelope.uuid)
            .finish()
    }
}

/// Stream of deliveries for one topic. Closes when the broker side is dropped.
pub struct Subscription {
    feed: Feed,
}

enum Feed {
    Unbounded(mpsc::UnboundedReceiver<Delivery>),
    Bounded(mpsc::Receiver<Delivery>),
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            feed: Feed::Unbounded(rx),
        }
    }

    /// A subscription over a bounded channel. The broker stays at most the
    /// channel's capacity ahead of the consumer.
    pub fn bounded(rx: mpsc::Receiver<Delivery>) -> Self {
        Self {
            feed: Feed::Bounded(rx),
        }
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        match &mut self.feed {
            Feed::Unbounded(rx) => rx.recv().await,
            Feed::Bounded(rx) => rx.recv().await,
        }
    }
}
