//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::app::UnitOfWorkConfig;
use crate::domain::ConfigError;
use crate::events::RetryConfig;
use crate::infra::{PgQueueConfig, PostgresConfig};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue {
                key: "LOG_FORMAT".to_string(),
                message: format!("unknown format '{other}'"),
            }),
        }
    }
}

/// Which broker carries the item events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    /// Durable queue table in the same Postgres database.
    Postgres,
    /// Process-local queues. Messages are lost on restart.
    Memory,
}

impl FromStr for BrokerBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "BROKER_BACKEND".to_string(),
                message: format!("unknown backend '{other}'"),
            }),
        }
    }
}

/// How item events are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerMode {
    /// [`EventRouter`](crate::events::EventRouter) with the middleware pipeline.
    Router,
    /// Plain [`ItemSubscriber`](crate::events::ItemSubscriber) loop, no retries.
    Subscriber,
}

impl FromStr for ConsumerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "router" => Ok(Self::Router),
            "subscriber" => Ok(Self::Subscriber),
            other => Err(ConfigError::InvalidValue {
                key: "EVENT_CONSUMER".to_string(),
                message: format!("unknown consumer '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-request timeout applied by the HTTP layer.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Process-wide configuration.
///
/// Reads from environment variables:
/// - `DATABASE_URL` (required)
/// - `HOST`, `PORT`, `REQUEST_TIMEOUT_SECS`
/// - `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`
/// - `UOW_TIMEOUT_SECS`
/// - `EVENT_RETRY_MAX_ATTEMPTS`, `EVENT_RETRY_INTERVAL_MS`
/// - `BROKER_BACKEND` (`postgres` | `memory`)
/// - `QUEUE_POLL_INTERVAL_MS`, `QUEUE_BATCH_SIZE`, `QUEUE_VISIBILITY_TIMEOUT_SECS`,
///   `QUEUE_REDELIVERY_DELAY_MS`
/// - `EVENT_CONSUMER` (`router` | `subscriber`)
/// - `LOG_FORMAT` (`pretty` | `json`)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: SecretString,
    pub server: ServerConfig,
    pub database: PostgresConfig,
    pub unit_of_work: UnitOfWorkConfig,
    pub retry: RetryConfig,
    pub broker: BrokerBackend,
    pub queue: PgQueueConfig,
    pub consumer: ConsumerMode,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    /// Fails when `DATABASE_URL` is missing or a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
        Self::from_lookup(database_url, |key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(database_url: String, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_defaults = ServerConfig::default();
        let db_defaults = PostgresConfig::default();
        let retry_defaults = RetryConfig::default();
        let queue_defaults = PgQueueConfig::default();

        let server = ServerConfig {
            host: lookup("HOST").unwrap_or(server_defaults.host),
            port: parse_or(&lookup, "PORT", server_defaults.port)?,
            request_timeout: secs_or(&lookup, "REQUEST_TIMEOUT_SECS", server_defaults.request_timeout)?,
        };

        let database = PostgresConfig {
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", db_defaults.max_connections)?,
            min_connections: parse_or(&lookup, "DB_MIN_CONNECTIONS", db_defaults.min_connections)?,
            ..db_defaults
        };

        let unit_of_work = UnitOfWorkConfig {
            timeout: secs_or(&lookup, "UOW_TIMEOUT_SECS", UnitOfWorkConfig::default().timeout)?,
        };

        let retry = RetryConfig {
            max_attempts: parse_or(&lookup, "EVENT_RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
            initial_interval: millis_or(&lookup, "EVENT_RETRY_INTERVAL_MS", retry_defaults.initial_interval)?,
            ..retry_defaults
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EVENT_RETRY_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let queue = PgQueueConfig {
            poll_interval: millis_or(&lookup, "QUEUE_POLL_INTERVAL_MS", queue_defaults.poll_interval)?,
            batch_size: parse_or(&lookup, "QUEUE_BATCH_SIZE", queue_defaults.batch_size)?,
            visibility_timeout: secs_or(
                &lookup,
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                queue_defaults.visibility_timeout,
            )?,
            redelivery_delay: millis_or(
                &lookup,
                "QUEUE_REDELIVERY_DELAY_MS",
                queue_defaults.redelivery_delay,
            )?,
        };
        if queue.batch_size < 1 {
            return Err(ConfigError::InvalidValue {
                key: "QUEUE_BATCH_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url: SecretString::from(database_url),
            server,
            database,
            unit_of_work,
            retry,
            broker: parse_or(&lookup, "BROKER_BACKEND", BrokerBackend::Postgres)?,
            queue,
            consumer: parse_or(&lookup, "EVENT_CONSUMER", ConsumerMode::Router)?,
            log_format: parse_or(&lookup, "LOG_FORMAT", LogFormat::Pretty)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}
