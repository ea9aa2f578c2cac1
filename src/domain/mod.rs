//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, BrokerError, ConfigError, DatabaseError, MultiError, ServiceError, ServiceErrorKind,
    TransactionError, ValidationError,
};
pub use traits::{
    Acknowledger, BrandRepository, CreationRepository, Delivery, ItemRepository, MessagePublisher,
    MessageSubscriber, SessionFactory, Subscription, TradeRepository, TransactionalSession,
    UserRepository,
};
pub use types::{
    Brand, BrandFilter, CreateBrandRequest, CreateCreationRequest, Creation, CreationFilter,
    EntityId, Envelope, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus, Item, ItemFilter,
    OrderItemRequest, PaginatedResponse, PaginationParams, RegisterUserRequest, Trade, TradeFilter,
    TradeInCreationRequest, UpdateBrandRequest, UpdateCreationRequest, User, new_entity_id,
};
