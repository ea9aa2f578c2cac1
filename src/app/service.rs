//! Application service layer.
//!
//! This module contains the business operations. Operations that write more
//! than once run inside a unit of work; operations that hand work to another
//! subsystem publish an event instead of calling it.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use validator::Validate;

use crate::domain::{
    AppError, Brand, BrandFilter, BrandRepository, CreateBrandRequest, CreateCreationRequest,
    Creation, CreationFilter, CreationRepository, DatabaseError, HealthResponse, HealthStatus, Item,
    ItemFilter, ItemRepository, OrderItemRequest, PaginatedResponse, PaginationParams,
    RegisterUserRequest, ServiceError, ServiceErrorKind, Trade, TradeFilter,
    TradeInCreationRequest, TradeRepository, UpdateBrandRequest, UpdateCreationRequest, User,
    UserRepository,
};
use crate::events::{DeliverItemMessage, ItemPublisher, OrderItemMessage};

use super::unit_of_work::TransactionRunner;

const USER_SERVICE: &str = "UserService";
const BRAND_SERVICE: &str = "BrandService";
const CREATION_SERVICE: &str = "CreationService";
const TRADE_SERVICE: &str = "TradeService";
const ITEM_SERVICE: &str = "ItemService";

/// Repository handles the service depends on.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub brands: Arc<dyn BrandRepository>,
    pub creations: Arc<dyn CreationRepository>,
    pub trades: Arc<dyn TradeRepository>,
    pub items: Arc<dyn ItemRepository>,
}

/// Turns a storage miss into the service's own not-found error.
fn not_found_as(service: &'static str, kind: ServiceErrorKind) -> impl FnOnce(AppError) -> AppError {
    move |err| match err {
        AppError::Database(DatabaseError::NotFound(_)) => ServiceError::new(service, kind).into(),
        other => other,
    }
}

/// Application service containing core business logic.
///
/// All collaborators arrive through the constructor, so tests can swap any
/// of them for a mock.
///
/// # Example
///
/// ```ignore
/// let runner = TransactionRunner::new(sessions, UnitOfWorkConfig::default());
/// let service = AppService::new(runner, repositories, publisher);
///
/// let user = service.register_user(&RegisterUserRequest::new("0xABC")).await?;
/// ```
pub struct AppService {
    runner: TransactionRunner,
    repos: Repositories,
    publisher: Arc<dyn ItemPublisher>,
}

impl AppService {
    #[must_use]
    pub fn new(runner: TransactionRunner, repos: Repositories, publisher: Arc<dyn ItemPublisher>) -> Self {
        Self {
            runner,
            repos,
            publisher,
        }
    }

    /// Registers a new account.
    ///
    /// # Errors
    ///
    /// - `ServiceError(UserRegistered)` if the account is taken
    /// - `AppError::Validation` for an empty account
    #[instrument(skip(self, request), fields(account = %request.account))]
    pub async fn register_user(&self, request: &RegisterUserRequest) -> Result<User, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed for register request");
            AppError::from(e)
        })?;

        let users = Arc::clone(&self.repos.users);
        let account = request.account.clone();
        let user = self
            .runner
            .run("Register", move |uow| {
                Box::pin(async move {
                    if users.find_by_account(Some(uow.session()), &account).await?.is_some() {
                        return Err(ServiceError::new(USER_SERVICE, ServiceErrorKind::UserRegistered).into());
                    }
                    let user = User::new(account);
                    users.create(Some(uow.session()), &user).await?;
                    Ok::<_, AppError>(user)
                })
            })
            .await?;

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Registers a brand under its name.
    ///
    /// # Errors
    ///
    /// - `DatabaseError::Duplicate` if the name is taken
    /// - `AppError::Validation` for an empty name or a malformed image url
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn post_brand(&self, request: &CreateBrandRequest) -> Result<Brand, AppError> {
        request.validate()?;

        let brand = request.clone().into_brand();
        self.repos.brands.create(None, &brand).await?;

        info!(brand_id = %brand.id, "Brand registered");
        Ok(brand)
    }

    #[instrument(skip(self))]
    pub async fn find_brand(&self, id: &str) -> Result<Option<Brand>, AppError> {
        self.repos.brands.find_by_id(None, id).await
    }

    #[instrument(skip(self, filter, page))]
    pub async fn find_brands(
        &self,
        filter: &BrandFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Brand>, AppError> {
        self.repos.brands.find_all_by_filter_and_page(filter, page).await
    }

    #[instrument(skip(self, request))]
    pub async fn update_brand(&self, id: &str, request: &UpdateBrandRequest) -> Result<Brand, AppError> {
        request.validate()?;

        let brands = Arc::clone(&self.repos.brands);
        let id = id.to_string();
        let request = request.clone();
        self.runner
            .run("UpdateBrand", move |uow| {
                Box::pin(async move {
                    let mut brand = brands
                        .find_by_id(Some(uow.session()), &id)
                        .await?
                        .ok_or_else(|| ServiceError::new(BRAND_SERVICE, ServiceErrorKind::BrandNotFound))?;
                    request.apply(&mut brand);
                    brands.update(Some(uow.session()), &brand).await?;
                    Ok::<_, AppError>(brand)
                })
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_brand(&self, id: &str) -> Result<(), AppError> {
        self.repos
            .brands
            .delete(None, id)
            .await
            .map_err(not_found_as(BRAND_SERVICE, ServiceErrorKind::BrandNotFound))?;
        info!(brand_id = %id, "Brand deleted");
        Ok(())
    }

    /// Lists a new creation. The brand must already be registered.
    ///
    /// # Errors
    ///
    /// - `ServiceError(BrandNotFound)` for an unknown brand
    /// - `AppError::Validation` for a negative price or amount
    #[instrument(skip(self, request), fields(brand_id = %request.brand_id))]
    pub async fn post_creation(&self, request: &CreateCreationRequest) -> Result<Creation, AppError> {
        request.validate()?;

        let repos = self.repos.clone();
        let request = request.clone();
        let creation = self
            .runner
            .run("PostCreation", move |uow| {
                Box::pin(async move {
                    if !repos.brands.exists_by_id(Some(uow.session()), &request.brand_id).await? {
                        return Err(ServiceError::new(CREATION_SERVICE, ServiceErrorKind::BrandNotFound).into());
                    }
                    let creation = request.into_creation();
                    repos.creations.create(Some(uow.session()), &creation).await?;
                    Ok::<_, AppError>(creation)
                })
            })
            .await?;

        info!(creation_id = %creation.id, "Creation listed");
        Ok(creation)
    }

    #[instrument(skip(self))]
    pub async fn find_creation(&self, id: &str) -> Result<Option<Creation>, AppError> {
        self.repos.creations.find_by_id(None, id).await
    }

    #[instrument(skip(self, filter, page))]
    pub async fn find_creations(
        &self,
        filter: &CreationFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Creation>, AppError> {
        self.repos.creations.find_all_by_filter_and_page(filter, page).await
    }

    #[instrument(skip(self, request))]
    pub async fn update_creation(&self, id: &str, request: &UpdateCreationRequest) -> Result<Creation, AppError> {
        request.validate()?;

        let creations = Arc::clone(&self.repos.creations);
        let id = id.to_string();
        let request = request.clone();
        self.runner
            .run("UpdateCreation", move |uow| {
                Box::pin(async move {
                    let mut creation = creations
                        .find_by_id(Some(uow.session()), &id)
                        .await?
                        .ok_or_else(|| ServiceError::new(CREATION_SERVICE, ServiceErrorKind::CreationNotFound))?;
                    request.apply(&mut creation);
                    creations.update(Some(uow.session()), &creation).await?;
                    Ok::<_, AppError>(creation)
                })
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_creation(&self, id: &str) -> Result<(), AppError> {
        self.repos
            .creations
            .delete(None, id)
            .await
            .map_err(not_found_as(CREATION_SERVICE, ServiceErrorKind::CreationNotFound))?;
        info!(creation_id = %id, "Creation deleted");
        Ok(())
    }

    /// Records a trade and takes the traded units out of stock.
    ///
    /// The trade record is written first with a compensation that deletes
    /// it, then stock is reserved. If the reservation fails the trade is
    /// undone and the reservation error is returned.
    #[instrument(skip(self, request), fields(creation_id = %request.creation_id, amount = request.amount))]
    pub async fn trade_in_creation(&self, request: &TradeInCreationRequest) -> Result<Trade, AppError> {
        request.validate()?;

        let repos = self.repos.clone();
        let request = request.clone();
        let trade = self
            .runner
            .run("TradeInCreation", move |uow| {
                Box::pin(async move {
                    for party in [&request.buyer, &request.seller] {
                        if !repos.users.exists_by_id(Some(uow.session()), party).await? {
                            return Err(ServiceError::new(TRADE_SERVICE, ServiceErrorKind::UserNotFound).into());
                        }
                    }

                    let creation = repos
                        .creations
                        .find_by_id(Some(uow.session()), &request.creation_id)
                        .await?
                        .ok_or_else(|| ServiceError::new(TRADE_SERVICE, ServiceErrorKind::CreationNotFound))?;

                    let trade = Trade::settle(&request, &creation);
                    repos.trades.create(Some(uow.session()), &trade).await?;

                    let trades = Arc::clone(&repos.trades);
                    let trade_id = trade.id.clone();
                    uow.add_compensation("DeleteTrade", move || async move {
                        match trades.delete(None, &trade_id).await {
                            // Already gone with the rolled back transaction.
                            Err(AppError::Database(DatabaseError::NotFound(_))) => Ok(()),
                            other => other,
                        }
                    });

                    let remaining = repos
                        .creations
                        .reserve_amount(Some(uow.session()), &creation.id, request.amount)
                        .await?;
                    info!(remaining, "Stock reserved");

                    Ok::<_, AppError>(trade)
                })
            })
            .await?;

        info!(trade_id = %trade.id, price = trade.price, "Trade settled");
        Ok(trade)
    }

    /// Asks fulfillment to mint items for a creation. Returns the event id.
    #[instrument(skip(self, request), fields(creation_id = %request.creation_id))]
    pub async fn order_item(&self, request: &OrderItemRequest) -> Result<uuid::Uuid, AppError> {
        request.validate()?;

        let creation = self
            .repos
            .creations
            .find_by_id(None, &request.creation_id)
            .await?
            .ok_or_else(|| ServiceError::new(ITEM_SERVICE, ServiceErrorKind::CreationNotFound))?;

        let message = OrderItemMessage {
            creation_id: creation.id,
            contract: creation.contract_address,
            amount: request.amount,
        };
        let event_id = self.publisher.publish_order_item(&message).await?;
        info!(event_id = %event_id, "Item ordered");
        Ok(event_id)
    }

    /// Records a minted token as an item owned by the creation's brand.
    #[instrument(skip(self, message), fields(contract = %message.contract, token = %message.token))]
    pub async fn deliver_item(&self, message: &DeliverItemMessage) -> Result<Item, AppError> {
        let creation = self
            .repos
            .creations
            .find_by_id(None, &message.creation_id)
            .await?
            .ok_or_else(|| ServiceError::new(ITEM_SERVICE, ServiceErrorKind::CreationNotFound))?;

        let item = Item {
            contract: message.contract.clone(),
            token: message.token.clone(),
            creation_id: creation.id,
            owner: None,
            brand_owner: creation.brand_id,
        };

        match self.repos.items.create(None, &item).await {
            Ok(()) => {}
            Err(AppError::Database(DatabaseError::Duplicate(_))) => {
                return Err(ServiceError::new(ITEM_SERVICE, ServiceErrorKind::ContractDuplicate).into());
            }
            Err(e) => return Err(e),
        }

        info!("Item delivered");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn find_user(&self, id: &str) -> Result<Option<User>, AppError> {
        self.repos.users.find_by_id(id).await
    }

    #[instrument(skip(self))]
    pub async fn find_trade(&self, id: &str) -> Result<Option<Trade>, AppError> {
        self.repos.trades.find(id).await
    }

    #[instrument(skip(self, filter, page))]
    pub async fn find_trades(
        &self,
        filter: &TradeFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Trade>, AppError> {
        self.repos.trades.find_all_by_filter_and_page(filter, page).await
    }

    #[instrument(skip(self))]
    pub async fn find_item(&self, contract: &str, token: &str) -> Result<Option<Item>, AppError> {
        self.repos.items.find(contract, token).await
    }

    #[instrument(skip(self))]
    pub async fn find_items_by_owner(&self, owner: &str) -> Result<Vec<Item>, AppError> {
        let filter = ItemFilter {
            owner: Some(owner.to_string()),
            ..Default::default()
        };
        self.repos.items.find_all_by_filter(&filter).await
    }

    #[instrument(skip(self, filter, page))]
    pub async fn find_items(
        &self,
        filter: &ItemFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Item>, AppError> {
        self.repos.items.find_all_by_filter_and_page(filter, page).await
    }

    /// Counts the items a brand owns.
    ///
    /// # Errors
    ///
    /// - `ServiceError(BrandNotFound)` for an unknown brand
    #[instrument(skip(self))]
    pub async fn amount_of_items_by_brand(&self, brand_id: &str) -> Result<u64, AppError> {
        if !self.repos.brands.exists_by_id(None, brand_id).await? {
            return Err(ServiceError::new(ITEM_SERVICE, ServiceErrorKind::BrandNotFound).into());
        }
        self.repos.items.count_by_brand_owner(brand_id).await
    }

    /// Performs a health check on storage and the broker.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.runner.sessions().health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };

        let broker_health = match self.publisher.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Broker health check failed");
                HealthStatus::Degraded
            }
        };

        HealthResponse::new(db_health, broker_health)
    }
}
