//! Infrastructure layer implementations.

pub mod broker;
pub mod database;
pub mod observability;

pub use broker::{InMemoryBroker, PgMessageQueue, PgQueueConfig};
pub use database::{
    PgBrandRepository, PgCreationRepository, PgItemRepository, PgSession, PgSessionFactory,
    PgTradeRepository, PgUserRepository, PostgresConfig,
};
pub use observability::{PrometheusHandle, init_metrics, init_metrics_handle, init_tracing};
