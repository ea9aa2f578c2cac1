//! NFT shopping store backend.
//!
//! Users trade units of tokenized creations. Every multi-write business
//! operation runs as a unit of work: one storage transaction plus a saga of
//! compensations for the effects the transaction cannot roll back. Item
//! fulfillment is decoupled through queued events.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   API Layer                  │
//! │      HTTP handlers, routing, error codes     │
//! ├─────────────────────────────────────────────┤
//! │        Application Layer   │  Events Layer   │
//! │  service, unit of work,    │ publisher,      │
//! │  saga                      │ router, handlers│
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │      Traits, types, errors, business codes   │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │  Postgres sessions/repositories, brokers,    │
//! │  tracing and metrics setup                   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let sessions = Arc::new(PgSessionFactory::connect(&url, &PostgresConfig::default()).await?);
//! let runner = TransactionRunner::new(sessions.clone(), UnitOfWorkConfig::default());
//! let publisher = Arc::new(EventPublisher::new(broker.clone()));
//! let service = Arc::new(AppService::new(runner, repositories, publisher));
//!
//! let trade = service.trade_in_creation(&request).await?;
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod events;
pub mod infra;

// Test utilities are available in tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
