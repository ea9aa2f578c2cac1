//! Message broker implementations.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryBroker;
pub use postgres::{PgMessageQueue, PgQueueConfig};
