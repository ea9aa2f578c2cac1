use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Represents a unique identifier for domain entities.
pub type EntityId = String;

/// Generates a new entity identifier.
pub fn new_entity_id() -> EntityId {
    Uuid::new_v4().to_string()
}

/// A registered trader, identified by their wallet account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: EntityId,
    pub account: String,
}

impl User {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            id: new_entity_id(),
            account: account.into(),
        }
    }
}

/// A tokenized collectible listed for sale by a brand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Creation {
    pub id: EntityId,
    pub name: String,
    pub brand_id: EntityId,
    pub description: Option<String>,
    pub price: i64,
    /// Units still available for sale.
    pub amount: i64,
    pub contract_address: String,
    pub created_at: DateTime<Utc>,
}

impl Creation {
    pub fn new(
        name: impl Into<String>,
        brand_id: impl Into<String>,
        price: i64,
        amount: i64,
        contract_address: impl Into<String>,
    ) -> Self {
        Self {
            id: new_entity_id(),
            name: name.into(),
            brand_id: brand_id.into(),
            description: None,
            price,
            amount,
            contract_address: contract_address.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }
}

/// A brand publishing creations. The brand name doubles as its id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Brand {
    pub id: EntityId,
    pub name: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Brand {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            image_url: None,
            description: None,
            created_at: Utc::now(),
        }
    }
}

/// A settled trade of a creation between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trade {
    pub id: EntityId,
    pub creation_id: EntityId,
    pub brand_id: EntityId,
    pub buyer: EntityId,
    pub seller: EntityId,
    pub amount: i64,
    pub price: i64,
    pub trade_at: DateTime<Utc>,
}

impl Trade {
    /// Prices the trade from the creation's unit price.
    pub fn settle(request: &TradeInCreationRequest, creation: &Creation) -> Self {
        Self {
            id: new_entity_id(),
            creation_id: creation.id.clone(),
            brand_id: creation.brand_id.clone(),
            buyer: request.buyer.clone(),
            seller: request.seller.clone(),
            amount: request.amount,
            price: creation.price * request.amount,
            trade_at: Utc::now(),
        }
    }
}

/// A minted token of a creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub contract: String,
    pub token: String,
    pub creation_id: EntityId,
    pub owner: Option<EntityId>,
    pub brand_owner: EntityId,
}

/// Request payload for registering a user.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterUserRequest {
    #[validate(length(min = 1, max = 128))]
    pub account: String,
}

impl RegisterUserRequest {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

/// Request payload for trading units of a creation.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TradeInCreationRequest {
    #[validate(length(min = 1))]
    pub creation_id: EntityId,
    #[validate(length(min = 1))]
    pub buyer: EntityId,
    #[validate(length(min = 1))]
    pub seller: EntityId,
    #[validate(range(min = 1))]
    pub amount: i64,
}

/// Request payload for ordering newly minted items.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderItemRequest {
    #[validate(length(min = 1))]
    pub creation_id: EntityId,
    #[validate(range(min = 1))]
    pub amount: i64,
}

/// Request payload for registering a brand.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBrandRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(url)]
    pub image_url: Option<String>,
    pub description: Option<String>,
}

impl CreateBrandRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_url: None,
            description: None,
        }
    }

    pub fn into_brand(self) -> Brand {
        Brand {
            image_url: self.image_url,
            description: self.description,
            ..Brand::new(self.name)
        }
    }
}

/// Fields of a brand that may change after registration. Unset fields are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateBrandRequest {
    #[validate(url)]
    pub image_url: Option<String>,
    pub description: Option<String>,
}

impl UpdateBrandRequest {
    pub fn apply(self, brand: &mut Brand) {
        if let Some(image_url) = self.image_url {
            brand.image_url = Some(image_url);
        }
        if let Some(description) = self.description {
            brand.description = Some(description);
        }
    }
}

/// Request payload for listing a new creation under an existing brand.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCreationRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[validate(length(min = 1))]
    pub brand_id: EntityId,
    pub description: Option<String>,
    #[validate(range(min = 0))]
    pub price: i64,
    #[validate(range(min = 0))]
    pub amount: i64,
    #[validate(length(min = 1))]
    pub contract_address: String,
}

impl CreateCreationRequest {
    pub fn into_creation(self) -> Creation {
        Creation {
            description: self.description,
            ..Creation::new(self.name, self.brand_id, self.price, self.amount, self.contract_address)
        }
    }
}

/// Fields of a creation that may change after listing. Unset fields are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateCreationRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,
    pub description: Option<String>,
}

impl UpdateCreationRequest {
    pub fn apply(self, creation: &mut Creation) {
        if let Some(name) = self.name {
            creation.name = name;
        }
        if let Some(description) = self.description {
            creation.description = Some(description);
        }
    }
}

/// Selector for brand queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrandFilter {
    pub name: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl BrandFilter {
    pub fn matches(&self, brand: &Brand) -> bool {
        self.name.as_ref().is_none_or(|v| *v == brand.name)
            && self.created_after.is_none_or(|v| brand.created_at >= v)
            && self.created_before.is_none_or(|v| brand.created_at <= v)
    }
}

/// Selector for creation queries. Prices bound the unit price.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreationFilter {
    pub name: Option<String>,
    pub brand_id: Option<EntityId>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
}

impl CreationFilter {
    pub fn matches(&self, creation: &Creation) -> bool {
        self.name.as_ref().is_none_or(|v| *v == creation.name)
            && self.brand_id.as_ref().is_none_or(|v| *v == creation.brand_id)
            && self.min_price.is_none_or(|v| creation.price >= v)
            && self.max_price.is_none_or(|v| creation.price <= v)
    }
}

/// Selector for item queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilter {
    pub owner: Option<EntityId>,
    pub brand_owner: Option<EntityId>,
    pub creation_id: Option<EntityId>,
}

impl ItemFilter {
    pub fn matches(&self, item: &Item) -> bool {
        self.owner.as_ref().is_none_or(|v| item.owner.as_ref() == Some(v))
            && self.brand_owner.as_ref().is_none_or(|v| *v == item.brand_owner)
            && self.creation_id.as_ref().is_none_or(|v| *v == item.creation_id)
    }
}

/// Selector for trade queries. Every set field narrows the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeFilter {
    pub creation_id: Option<EntityId>,
    pub brand_id: Option<EntityId>,
    pub buyer: Option<EntityId>,
    pub seller: Option<EntityId>,
    pub traded_before: Option<DateTime<Utc>>,
    pub traded_after: Option<DateTime<Utc>>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
}

impl TradeFilter {
    pub fn matches(&self, trade: &Trade) -> bool {
        self.creation_id.as_ref().is_none_or(|v| *v == trade.creation_id)
            && self.brand_id.as_ref().is_none_or(|v| *v == trade.brand_id)
            && self.buyer.as_ref().is_none_or(|v| *v == trade.buyer)
            && self.seller.as_ref().is_none_or(|v| *v == trade.seller)
            && self.traded_before.is_none_or(|v| trade.trade_at <= v)
            && self.traded_after.is_none_or(|v| trade.trade_at >= v)
            && self.min_price.is_none_or(|v| trade.price >= v)
            && self.max_price.is_none_or(|v| trade.price <= v)
    }
}

/// A message as it travels through the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Unique per publish call, independent of the payload.
    pub uuid: Uuid,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl Envelope {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    pub fn offset(&self) -> u32 {
        (self.page.saturating_sub(1)) * self.per_page
    }
}

/// Paginated response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, params: &PaginationParams) -> Self {
        let total_pages = if params.per_page == 0 {
            0
        } else {
            total.div_ceil(u64::from(params.per_page)) as u32
        };
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
            total_pages,
        }
    }
}

/// Error body returned by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub r#type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

/// Health check status for services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub broker: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    pub fn new(database: HealthStatus, broker: HealthStatus) -> Self {
        let status = match (&database, &broker) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };

        Self {
            status,
            database,
            broker,
            timestamp: Utc::now(),
        }
    }
}
