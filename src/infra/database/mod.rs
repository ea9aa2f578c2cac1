//! Postgres-backed sessions and repositories.

pub mod postgres;

pub use postgres::{
    PgBrandRepository, PgCreationRepository, PgItemRepository, PgSession, PgSessionFactory,
    PgTradeRepository, PgUserRepository, PostgresConfig,
};
