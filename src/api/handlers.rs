//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::{
    AppError, Brand, BrandFilter, BrokerError, CreateBrandRequest, CreateCreationRequest, Creation,
    CreationFilter, DatabaseError, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus, Item,
    ItemFilter, OrderItemRequest, PaginatedResponse, PaginationParams, RegisterUserRequest,
    ServiceError, ServiceErrorKind, Trade, TradeFilter, TradeInCreationRequest, UpdateBrandRequest,
    UpdateCreationRequest, User,
};
use crate::events::DeliverItemMessage;

/// Query string accepted by `GET /api/trades`.
#[derive(Debug, Default, Deserialize)]
pub struct TradeQuery {
    pub creation_id: Option<String>,
    pub brand_id: Option<String>,
    pub buyer: Option<String>,
    pub seller: Option<String>,
    pub traded_before: Option<DateTime<Utc>>,
    pub traded_after: Option<DateTime<Utc>>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn page_params(page: Option<u32>, per_page: Option<u32>) -> PaginationParams {
    let defaults = PaginationParams::default();
    PaginationParams {
        page: page.unwrap_or(defaults.page).max(1),
        per_page: per_page.unwrap_or(defaults.per_page).clamp(1, 100),
    }
}

impl TradeQuery {
    fn into_parts(self) -> (TradeFilter, PaginationParams) {
        let page = page_params(self.page, self.per_page);
        let filter = TradeFilter {
            creation_id: self.creation_id,
            brand_id: self.brand_id,
            buyer: self.buyer,
            seller: self.seller,
            traded_before: self.traded_before,
            traded_after: self.traded_after,
            min_price: self.min_price,
            max_price: self.max_price,
        };
        (filter, page)
    }
}

/// Query string accepted by `GET /api/brands`.
#[derive(Debug, Default, Deserialize)]
pub struct BrandQuery {
    pub name: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl BrandQuery {
    fn into_parts(self) -> (BrandFilter, PaginationParams) {
        let page = page_params(self.page, self.per_page);
        let filter = BrandFilter {
            name: self.name,
            created_after: self.created_after,
            created_before: self.created_before,
        };
        (filter, page)
    }
}

/// Query string accepted by `GET /api/creations`.
#[derive(Debug, Default, Deserialize)]
pub struct CreationQuery {
    pub name: Option<String>,
    pub brand_id: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl CreationQuery {
    fn into_parts(self) -> (CreationFilter, PaginationParams) {
        let page = page_params(self.page, self.per_page);
        let filter = CreationFilter {
            name: self.name,
            brand_id: self.brand_id,
            min_price: self.min_price,
            max_price: self.max_price,
        };
        (filter, page)
    }
}

/// Query string accepted by `GET /api/items`.
#[derive(Debug, Default, Deserialize)]
pub struct ItemQuery {
    pub owner: Option<String>,
    pub brand_owner: Option<String>,
    pub creation_id: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ItemQuery {
    fn into_parts(self) -> (ItemFilter, PaginationParams) {
        let page = page_params(self.page, self.per_page);
        let filter = ItemFilter {
            owner: self.owner,
            brand_owner: self.brand_owner,
            creation_id: self.creation_id,
        };
        (filter, page)
    }
}

/// Body returned by the brand item count.
#[derive(Debug, Serialize, Deserialize)]
pub struct BrandItemCount {
    pub brand_id: String,
    pub amount: u64,
}

/// Body returned once an order event is queued.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderAccepted {
    pub event_id: Uuid,
}

/// Register a user account
pub async fn register_user_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.service.register_user(&payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    let user = state
        .service
        .find_user(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    Ok(Json(user))
}

/// Items currently owned by a user
pub async fn get_user_items_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Item>>, AppError> {
    let items = state.service.find_items_by_owner(&id).await?;
    Ok(Json(items))
}

/// Register a brand
pub async fn create_brand_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBrandRequest>,
) -> Result<(StatusCode, Json<Brand>), AppError> {
    let brand = state.service.post_brand(&payload).await?;
    Ok((StatusCode::CREATED, Json(brand)))
}

pub async fn get_brand_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Brand>, AppError> {
    let brand = state
        .service
        .find_brand(&id)
        .await?
        .ok_or_else(|| ServiceError::new("BrandService", ServiceErrorKind::BrandNotFound))?;
    Ok(Json(brand))
}

pub async fn list_brands_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrandQuery>,
) -> Result<Json<PaginatedResponse<Brand>>, AppError> {
    let (filter, page) = query.into_parts();
    let brands = state.service.find_brands(&filter, &page).await?;
    Ok(Json(brands))
}

pub async fn update_brand_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateBrandRequest>,
) -> Result<Json<Brand>, AppError> {
    let brand = state.service.update_brand(&id, &payload).await?;
    Ok(Json(brand))
}

pub async fn delete_brand_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.service.delete_brand(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Number of items a brand owns
pub async fn brand_item_count_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BrandItemCount>, AppError> {
    let amount = state.service.amount_of_items_by_brand(&id).await?;
    Ok(Json(BrandItemCount { brand_id: id, amount }))
}

/// List a creation under an existing brand
pub async fn create_creation_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCreationRequest>,
) -> Result<(StatusCode, Json<Creation>), AppError> {
    let creation = state.service.post_creation(&payload).await?;
    Ok((StatusCode::CREATED, Json(creation)))
}

pub async fn get_creation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Creation>, AppError> {
    let creation = state
        .service
        .find_creation(&id)
        .await?
        .ok_or_else(|| ServiceError::new("CreationService", ServiceErrorKind::CreationNotFound))?;
    Ok(Json(creation))
}

/// List creations matching the query, newest first
pub async fn list_creations_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CreationQuery>,
) -> Result<Json<PaginatedResponse<Creation>>, AppError> {
    let (filter, page) = query.into_parts();
    let creations = state.service.find_creations(&filter, &page).await?;
    Ok(Json(creations))
}

pub async fn update_creation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateCreationRequest>,
) -> Result<Json<Creation>, AppError> {
    let creation = state.service.update_creation(&id, &payload).await?;
    Ok(Json(creation))
}

pub async fn delete_creation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.service.delete_creation(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Trade units of a creation between two users
pub async fn trade_in_creation_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TradeInCreationRequest>,
) -> Result<(StatusCode, Json<Trade>), AppError> {
    let trade = state.service.trade_in_creation(&payload).await?;
    Ok((StatusCode::CREATED, Json(trade)))
}

pub async fn get_trade_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Trade>, AppError> {
    let trade = state
        .service
        .find_trade(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    Ok(Json(trade))
}

/// List trades matching the query, newest first
pub async fn list_trades_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TradeQuery>,
) -> Result<Json<PaginatedResponse<Trade>>, AppError> {
    let (filter, page) = query.into_parts();
    let trades = state.service.find_trades(&filter, &page).await?;
    Ok(Json(trades))
}

/// Queue an order for new items of a creation
pub async fn order_item_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OrderItemRequest>,
) -> Result<(StatusCode, Json<OrderAccepted>), AppError> {
    let event_id = state.service.order_item(&payload).await?;
    Ok((StatusCode::ACCEPTED, Json(OrderAccepted { event_id })))
}

/// Record a minted token as a brand-owned item
pub async fn deliver_item_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DeliverItemMessage>,
) -> Result<(StatusCode, Json<Item>), AppError> {
    let item = state.service.deliver_item(&payload).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// List items by owner, brand owner or creation
pub async fn list_items_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ItemQuery>,
) -> Result<Json<PaginatedResponse<Item>>, AppError> {
    let (filter, page) = query.into_parts();
    let items = state.service.find_items(&filter, &page).await?;
    Ok(Json(items))
}

pub async fn get_item_handler(
    State(state): State<Arc<AppState>>,
    Path((contract, token)): Path<(String, String)>,
) -> Result<Json<Item>, AppError> {
    let item = state
        .service
        .find_item(&contract, &token)
        .await?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("item {contract}/{token}"))))?;
    Ok(Json(item))
}

/// Detailed health check
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness check
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness check
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

fn service_status(kind: ServiceErrorKind) -> StatusCode {
    match kind {
        ServiceErrorKind::UserNotFound
        | ServiceErrorKind::CreationNotFound
        | ServiceErrorKind::BrandNotFound => StatusCode::NOT_FOUND,
        ServiceErrorKind::UserRegistered | ServiceErrorKind::ContractDuplicate => StatusCode::CONFLICT,
        ServiceErrorKind::InsufficientStock => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, code) = match &self {
            AppError::Service(err) => (service_status(err.kind), "service_error", Some(err.code())),
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) | DatabaseError::PoolExhausted(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "database_error", None)
                }
                DatabaseError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
                DatabaseError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate", None),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None),
            },
            AppError::Broker(broker_err) => match broker_err {
                BrokerError::Connection(_) | BrokerError::Publish(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "broker_error", None)
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "broker_error", None),
            },
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error", None),
            AppError::Deserialization(_) => (StatusCode::BAD_REQUEST, "deserialization_error", None),
            AppError::Compensation(_) | AppError::Transaction(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "transaction_error", None)
            }
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout", None),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error", None),
            AppError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
        };

        let message = self.to_string();
        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
                code,
            },
        });

        (status, body).into_response()
    }
}
