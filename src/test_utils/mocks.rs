//! Mock implementations for testing.
//!
//! These mocks provide in-memory implementations of domain traits
//! that can be configured to simulate various scenarios including
//! success, failure, and edge cases.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::app::service::Repositories;
use crate::app::{AppService, TransactionRunner, UnitOfWorkConfig};
use crate::domain::{
    AppError, Brand, BrandFilter, BrandRepository, BrokerError, Creation, CreationFilter,
    CreationRepository, DatabaseError, Envelope, Item, ItemFilter, ItemRepository,
    MessagePublisher, PaginatedResponse, PaginationParams, ServiceError, ServiceErrorKind,
    SessionFactory, Trade, TradeFilter, TradeRepository, TransactionalSession, User,
    UserRepository,
};
use crate::events::EventPublisher;

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// If true, operations will fail.
    pub should_fail: bool,
    /// Custom error message for failures.
    pub error_message: Option<String>,
}

impl MockConfig {
    /// Creates a config that always succeeds.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates a config that always fails.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn check(&self, fallback: &str) -> Result<(), AppError> {
        if self.should_fail {
            let msg = self
                .error_message
                .clone()
                .unwrap_or_else(|| fallback.to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }
}

fn paginate<T>(all: Vec<T>, page: &PaginationParams) -> PaginatedResponse<T> {
    let total = all.len() as u64;
    let items = all
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.per_page as usize)
        .collect();
    PaginatedResponse::new(items, total, page)
}

/// Which session operations should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFailures {
    pub open: bool,
    pub start: bool,
    pub commit: bool,
    pub abort: bool,
}

/// Counts of session calls across every session a factory opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub opens: u64,
    pub starts: u64,
    pub commits: u64,
    pub aborts: u64,
    pub ends: u64,
}

#[derive(Default)]
struct SessionCounters {
    opens: AtomicU64,
    starts: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    ends: AtomicU64,
}

/// Session that records calls instead of talking to a database.
pub struct MockSession {
    counters: Arc<SessionCounters>,
    failures: SessionFailures,
}

#[async_trait]
impl TransactionalSession for MockSession {
    async fn start(&mut self) -> Result<(), AppError> {
        self.counters.starts.fetch_add(1, Ordering::Relaxed);
        if self.failures.start {
            return Err(DatabaseError::Transaction("mock start failure".to_string()).into());
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        if self.failures.commit {
            return Err(DatabaseError::Transaction("mock commit failure".to_string()).into());
        }
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), AppError> {
        self.counters.aborts.fetch_add(1, Ordering::Relaxed);
        if self.failures.abort {
            return Err(DatabaseError::Transaction("mock abort failure".to_string()).into());
        }
        Ok(())
    }

    async fn end(&mut self) {
        self.counters.ends.fetch_add(1, Ordering::Relaxed);
    }
}

/// Session factory whose sessions share one set of counters.
///
/// # Example
///
/// ```
/// use nft_shopping_store::test_utils::{MockSessionFactory, SessionFailures};
///
/// let healthy = MockSessionFactory::new();
/// let broken_commit = MockSessionFactory::with_failures(SessionFailures {
///     commit: true,
///     ..Default::default()
/// });
/// ```
pub struct MockSessionFactory {
    counters: Arc<SessionCounters>,
    failures: SessionFailures,
    is_healthy: AtomicBool,
}

impl MockSessionFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_failures(SessionFailures::default())
    }

    #[must_use]
    pub fn with_failures(failures: SessionFailures) -> Self {
        Self {
            counters: Arc::new(SessionCounters::default()),
            failures,
            is_healthy: AtomicBool::new(true),
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            opens: self.counters.opens.load(Ordering::Relaxed),
            starts: self.counters.starts.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            aborts: self.counters.aborts.load(Ordering::Relaxed),
            ends: self.counters.ends.load(Ordering::Relaxed),
        }
    }

    /// Sets the health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }
}

impl Default for MockSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open(&self) -> Result<Box<dyn TransactionalSession>, AppError> {
        if self.failures.open {
            return Err(DatabaseError::Connection("mock session unavailable".to_string()).into());
        }
        self.counters.opens.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockSession {
            counters: Arc::clone(&self.counters),
            failures: self.failures,
        }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(DatabaseError::Connection("Mock database unhealthy".to_string()).into());
        }
        Ok(())
    }
}

/// Mock user repository backed by a HashMap.
#[derive(Default)]
pub struct MockUserRepository {
    storage: Mutex<HashMap<String, User>>,
    config: MockConfig,
}

impl MockUserRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            storage: Mutex::new(HashMap::new()),
            config: MockConfig::failure(message),
        }
    }

    pub fn insert(&self, user: User) {
        self.storage.lock().unwrap().insert(user.id.clone(), user);
    }

    pub fn get_all_users(&self) -> Vec<User> {
        self.storage.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        self.config.check("Mock user repository error")?;
        Ok(self.storage.lock().unwrap().get(id).cloned())
    }

    async fn find_by_account(
        &self,
        _session: Option<&mut dyn TransactionalSession>,
        account: &str,
    ) -> Result<Option<User>, AppError> {
        self.config.check("Mock user repository error")?;
        let storage = self.storage.lock().unwrap();
        Ok(storage.values().find(|u| u.account == account).cloned())
    }

    async fn exists_by_id(&self, _session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<bool, AppError> {
        self.config.check("Mock user repository error")?;
        Ok(self.storage.lock().unwrap().contains_key(id))
    }

    async fn create(&self, _session: Option<&mut dyn TransactionalSession>, user: &User) -> Result<(), AppError> {
        self.config.check("Mock user repository error")?;
        let mut storage = self.storage.lock().unwrap();
        if storage.values().any(|u| u.account == user.account) {
            return Err(DatabaseError::Duplicate(user.account.clone()).into());
        }
        storage.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete(&self, _session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError> {
        self.config.check("Mock user repository error")?;
        match self.storage.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(DatabaseError::NotFound(format!("User {id} not found")).into()),
        }
    }
}

/// Mock brand repository backed by a HashMap.
#[derive(Default)]
pub struct MockBrandRepository {
    storage: Mutex<HashMap<String, Brand>>,
    config: MockConfig,
}

impl MockBrandRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, brand: Brand) {
        self.storage.lock().unwrap().insert(brand.id.clone(), brand);
    }

    pub fn get_all_brands(&self) -> Vec<Brand> {
        self.storage.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl BrandRepository for MockBrandRepository {
    async fn find_by_id(
        &self,
        _session: Option<&mut dyn TransactionalSession>,
        id: &str,
    ) -> Result<Option<Brand>, AppError> {
        self.config.check("Mock brand repository error")?;
        Ok(self.storage.lock().unwrap().get(id).cloned())
    }

    async fn exists_by_id(&self, _session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<bool, AppError> {
        self.config.check("Mock brand repository error")?;
        Ok(self.storage.lock().unwrap().contains_key(id))
    }

    async fn create(&self, _session: Option<&mut dyn TransactionalSession>, brand: &Brand) -> Result<(), AppError> {
        self.config.check("Mock brand repository error")?;
        let mut storage = self.storage.lock().unwrap();
        if storage.contains_key(&brand.id) {
            return Err(DatabaseError::Duplicate(brand.id.clone()).into());
        }
        storage.insert(brand.id.clone(), brand.clone());
        Ok(())
    }

    async fn update(&self, _session: Option<&mut dyn TransactionalSession>, brand: &Brand) -> Result<(), AppError> {
        self.config.check("Mock brand repository error")?;
        match self.storage.lock().unwrap().get_mut(&brand.id) {
            Some(stored) => {
                *stored = brand.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!("Brand {} not found", brand.id)).into()),
        }
    }

    async fn delete(&self, _session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError> {
        self.config.check("Mock brand repository error")?;
        match self.storage.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(DatabaseError::NotFound(format!("Brand {id} not found")).into()),
        }
    }

    async fn find_all_by_filter_and_page(
        &self,
        filter: &BrandFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Brand>, AppError> {
        self.config.check("Mock brand repository error")?;
        let mut brands: Vec<Brand> = self
            .storage
            .lock()
            .unwrap()
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        brands.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(brands, page))
    }
}

/// Mock creation repository backed by a HashMap.
#[derive(Default)]
pub struct MockCreationRepository {
    storage: Mutex<HashMap<String, Creation>>,
    config: MockConfig,
}

impl MockCreationRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, creation: Creation) {
        self.storage.lock().unwrap().insert(creation.id.clone(), creation);
    }

    pub fn stock_of(&self, id: &str) -> Option<i64> {
        self.storage.lock().unwrap().get(id).map(|c| c.amount)
    }
}

#[async_trait]
impl CreationRepository for MockCreationRepository {
    async fn find_by_id(
        &self,
        _session: Option<&mut dyn TransactionalSession>,
        id: &str,
    ) -> Result<Option<Creation>, AppError> {
        self.config.check("Mock creation repository error")?;
        Ok(self.storage.lock().unwrap().get(id).cloned())
    }

    async fn create(&self, _session: Option<&mut dyn TransactionalSession>, creation: &Creation) -> Result<(), AppError> {
        self.config.check("Mock creation repository error")?;
        self.insert(creation.clone());
        Ok(())
    }

    async fn reserve_amount(
        &self,
        _session: Option<&mut dyn TransactionalSession>,
        id: &str,
        amount: i64,
    ) -> Result<i64, AppError> {
        self.config.check("Mock creation repository error")?;
        let mut storage = self.storage.lock().unwrap();
        let creation = storage
            .get_mut(id)
            .ok_or_else(|| ServiceError::new("CreationRepository", ServiceErrorKind::CreationNotFound))?;
        if creation.amount < amount {
            return Err(ServiceError::new("CreationRepository", ServiceErrorKind::InsufficientStock).into());
        }
        creation.amount -= amount;
        Ok(creation.amount)
    }

    async fn update(&self, _session: Option<&mut dyn TransactionalSession>, creation: &Creation) -> Result<(), AppError> {
        self.config.check("Mock creation repository error")?;
        match self.storage.lock().unwrap().get_mut(&creation.id) {
            Some(stored) => {
                stored.name = creation.name.clone();
                stored.description = creation.description.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!("Creation {} not found", creation.id)).into()),
        }
    }

    async fn delete(&self, _session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError> {
        self.config.check("Mock creation repository error")?;
        match self.storage.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(DatabaseError::NotFound(format!("Creation {id} not found")).into()),
        }
    }

    async fn find_all_by_filter_and_page(
        &self,
        filter: &CreationFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Creation>, AppError> {
        self.config.check("Mock creation repository error")?;
        let mut creations: Vec<Creation> = self
            .storage
            .lock()
            .unwrap()
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        creations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(creations, page))
    }
}

/// Mock trade repository backed by a HashMap.
#[derive(Default)]
pub struct MockTradeRepository {
    storage: Mutex<HashMap<String, Trade>>,
    config: MockConfig,
    fail_deletes: AtomicBool,
    delete_calls: AtomicU64,
}

impl MockTradeRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `delete` fail, which breaks trade compensations.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::Relaxed);
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    pub fn get_all_trades(&self) -> Vec<Trade> {
        self.storage.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl TradeRepository for MockTradeRepository {
    async fn find(&self, id: &str) -> Result<Option<Trade>, AppError> {
        self.config.check("Mock trade repository error")?;
        Ok(self.storage.lock().unwrap().get(id).cloned())
    }

    async fn create(&self, _session: Option<&mut dyn TransactionalSession>, trade: &Trade) -> Result<(), AppError> {
        self.config.check("Mock trade repository error")?;
        self.storage.lock().unwrap().insert(trade.id.clone(), trade.clone());
        Ok(())
    }

    async fn delete(&self, _session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_deletes.load(Ordering::Relaxed) {
            return Err(DatabaseError::Query(format!("cannot delete trade {id}")).into());
        }
        match self.storage.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(DatabaseError::NotFound(format!("Trade {id} not found")).into()),
        }
    }

    async fn find_all_by_filter(&self, filter: &TradeFilter) -> Result<Vec<Trade>, AppError> {
        self.config.check("Mock trade repository error")?;
        let mut trades: Vec<Trade> = self
            .storage
            .lock()
            .unwrap()
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.trade_at.cmp(&a.trade_at));
        Ok(trades)
    }

    async fn find_all_by_filter_and_page(
        &self,
        filter: &TradeFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Trade>, AppError> {
        let all = self.find_all_by_filter(filter).await?;
        Ok(paginate(all, page))
    }
}

/// Mock item repository keyed by (contract, token).
#[derive(Default)]
pub struct MockItemRepository {
    storage: Mutex<HashMap<(String, String), Item>>,
    config: MockConfig,
}

impl MockItemRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            storage: Mutex::new(HashMap::new()),
            config: MockConfig::failure(message),
        }
    }

    pub fn insert(&self, item: Item) {
        self.storage
            .lock()
            .unwrap()
            .insert((item.contract.clone(), item.token.clone()), item);
    }

    pub fn get_all_items(&self) -> Vec<Item> {
        self.storage.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ItemRepository for MockItemRepository {
    async fn find(&self, contract: &str, token: &str) -> Result<Option<Item>, AppError> {
        self.config.check("Mock item repository error")?;
        let key = (contract.to_string(), token.to_string());
        Ok(self.storage.lock().unwrap().get(&key).cloned())
    }

    async fn create(&self, _session: Option<&mut dyn TransactionalSession>, item: &Item) -> Result<(), AppError> {
        self.config.check("Mock item repository error")?;
        let key = (item.contract.clone(), item.token.clone());
        let mut storage = self.storage.lock().unwrap();
        if storage.contains_key(&key) {
            return Err(DatabaseError::Duplicate(format!("{}/{}", item.contract, item.token)).into());
        }
        storage.insert(key, item.clone());
        Ok(())
    }

    async fn find_all_by_filter(&self, filter: &ItemFilter) -> Result<Vec<Item>, AppError> {
        self.config.check("Mock item repository error")?;
        let mut items: Vec<Item> = self
            .storage
            .lock()
            .unwrap()
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        items.sort_by(|a, b| (&a.contract, &a.token).cmp(&(&b.contract, &b.token)));
        Ok(items)
    }

    async fn find_all_by_filter_and_page(
        &self,
        filter: &ItemFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Item>, AppError> {
        let all = self.find_all_by_filter(filter).await?;
        Ok(paginate(all, page))
    }

    async fn count_by_brand_owner(&self, brand_id: &str) -> Result<u64, AppError> {
        self.config.check("Mock item repository error")?;
        let storage = self.storage.lock().unwrap();
        Ok(storage.values().filter(|i| i.brand_owner == brand_id).count() as u64)
    }
}

/// Mock broker client that records published envelopes.
pub struct MockPublisher {
    published: Mutex<Vec<(String, Envelope)>>,
    config: MockConfig,
    call_count: AtomicU64,
    is_healthy: AtomicBool,
}

impl MockPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            config,
            call_count: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Gets the number of times `publish` was called.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.published.lock().unwrap().clone()
    }

    /// Sets the health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePublisher for MockPublisher {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), AppError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock broker error".to_string());
            return Err(BrokerError::Publish(msg).into());
        }
        self.published.lock().unwrap().push((topic.to_string(), envelope));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(BrokerError::Connection("Mock broker unhealthy".to_string()).into());
        }
        Ok(())
    }
}

/// Every mock a service needs, sharing nothing but the test.
pub struct MockRepos {
    pub sessions: Arc<MockSessionFactory>,
    pub users: Arc<MockUserRepository>,
    pub brands: Arc<MockBrandRepository>,
    pub creations: Arc<MockCreationRepository>,
    pub trades: Arc<MockTradeRepository>,
    pub items: Arc<MockItemRepository>,
    pub publisher: Arc<MockPublisher>,
}

impl MockRepos {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(MockSessionFactory::new()),
            users: Arc::new(MockUserRepository::new()),
            brands: Arc::new(MockBrandRepository::new()),
            creations: Arc::new(MockCreationRepository::new()),
            trades: Arc::new(MockTradeRepository::new()),
            items: Arc::new(MockItemRepository::new()),
            publisher: Arc::new(MockPublisher::new()),
        }
    }

    /// The repository mocks as the service expects them.
    #[must_use]
    pub fn repositories(&self) -> Repositories {
        Repositories {
            users: self.users.clone(),
            brands: self.brands.clone(),
            creations: self.creations.clone(),
            trades: self.trades.clone(),
            items: self.items.clone(),
        }
    }

    /// A fully wired service on top of these mocks.
    #[must_use]
    pub fn service(&self) -> AppService {
        let runner = TransactionRunner::new(self.sessions.clone(), UnitOfWorkConfig::default());
        let publisher = Arc::new(EventPublisher::new(self.publisher.clone()));
        AppService::new(runner, self.repositories(), publisher)
    }
}

impl Default for MockRepos {
    fn default() -> Self {
        Self::new()
    }
}
