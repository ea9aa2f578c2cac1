//! Application layer containing business logic and shared state.

pub mod saga;
pub mod service;
pub mod state;
pub mod unit_of_work;

pub use saga::{CompensateFn, CompensateFuture, Saga, Step};
pub use service::{AppService, Repositories};
pub use state::AppState;
pub use unit_of_work::{TransactionRunner, UnitOfWorkConfig, UowContext, UowFuture};
