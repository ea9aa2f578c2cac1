//! Application error types with proper error chaining.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Query execution failed: {0}")]
    Query(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Transaction failed: {0}")]
    Transaction(String),
}

#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Acknowledgement failed: {0}")]
    Acknowledge(String),
    #[error("Topic '{0}' already has a subscriber")]
    AlreadySubscribed(String),
    #[error("Topic '{0}' already has a handler")]
    DuplicateHandler(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// Business rule violations, tagged with a stable numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    UserNotFound,
    UserRegistered,
    CreationNotFound,
    InsufficientStock,
    BrandNotFound,
    ContractDuplicate,
}

impl ServiceErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::UserNotFound => 201,
            Self::UserRegistered => 202,
            Self::CreationNotFound => 301,
            Self::InsufficientStock => 302,
            Self::BrandNotFound => 401,
            Self::ContractDuplicate => 601,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::UserNotFound => "user not found",
            Self::UserRegistered => "user has registered",
            Self::CreationNotFound => "creation not found",
            Self::InsufficientStock => "creation does not have enough stock",
            Self::BrandNotFound => "brand not found",
            Self::ContractDuplicate => "contract is duplicate",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("code({}): {}: {}", .kind.code(), .service, .kind.message())]
pub struct ServiceError {
    pub service: &'static str,
    pub kind: ServiceErrorKind,
}

impl ServiceError {
    pub fn new(service: &'static str, kind: ServiceErrorKind) -> Self {
        Self { service, kind }
    }

    pub fn code(&self) -> u16 {
        self.kind.code()
    }
}

/// Every compensation failure collected by a single saga abort.
#[derive(Error, Debug, Default)]
#[error("{}", render_all(.0))]
pub struct MultiError(pub Vec<AppError>);

impl MultiError {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[AppError] {
        &self.0
    }
}

fn render_all(errors: &[AppError]) -> String {
    let mut out = format!("{} error(s) occurred", errors.len());
    for (i, err) in errors.iter().enumerate() {
        out.push_str(&format!("\n  [{}] {}", i + 1, err));
    }
    out
}

/// Raised when a commit failed and the cleanup that followed failed too.
#[derive(Error, Debug)]
#[error("session error: {}, saga error: {}", render_opt(.session), render_opt(.saga))]
pub struct TransactionError {
    pub session: Option<Box<AppError>>,
    pub saga: Option<MultiError>,
}

fn render_opt<E: std::fmt::Display>(err: &Option<E>) -> String {
    err.as_ref().map(ToString::to_string).unwrap_or_default()
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Compensation failed: {0}")]
    Compensation(MultiError),
    #[error("Transaction cleanup failed: {0}")]
    Transaction(TransactionError),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for business rule violations, as opposed to infrastructure failures.
    pub fn is_business(&self) -> bool {
        matches!(self, AppError::Service(_) | AppError::Validation(_))
    }
}

impl From<MultiError> for AppError {
    fn from(err: MultiError) -> Self {
        AppError::Compensation(err)
    }
}

impl From<TransactionError> for AppError {
    fn from(err: TransactionError) -> Self {
        AppError::Transaction(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(ValidationError::Multiple(err.to_string()))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted("Pool timed out".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.code().is_some_and(|code| code == "23505") {
                    return DatabaseError::Duplicate(db_err.message().to_string());
                }
                DatabaseError::Query(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(DatabaseError::from(err))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(DatabaseError::Migration(err.to_string()))
    }
}
