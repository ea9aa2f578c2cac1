//! PostgreSQL sessions and repositories.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, Brand, BrandFilter, BrandRepository, Creation, CreationFilter, CreationRepository,
    DatabaseError, Item, ItemFilter, ItemRepository, PaginatedResponse, PaginationParams,
    ServiceError, ServiceErrorKind, SessionFactory, Trade, TradeFilter, TradeRepository,
    TransactionalSession, User, UserRepository,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Opens [`PgSession`]s over a shared connection pool.
#[derive(Clone)]
pub struct PgSessionFactory {
    pool: PgPool,
}

impl PgSessionFactory {
    /// Connect with custom pool configuration
    pub async fn connect(database_url: &str, config: &PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    async fn open(&self) -> Result<Box<dyn TransactionalSession>, AppError> {
        Ok(Box::new(PgSession::new(self.pool.clone())))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }
}

/// One pooled connection holding at most one open transaction.
pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    fn take_tx(&mut self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.tx.take().ok_or_else(|| {
            AppError::Database(DatabaseError::Transaction(
                "no transaction in progress".to_string(),
            ))
        })
    }
}

#[async_trait]
impl TransactionalSession for PgSession {
    async fn start(&mut self) -> Result<(), AppError> {
        if self.tx.is_some() {
            return Err(AppError::Database(DatabaseError::Transaction(
                "transaction already started".to_string(),
            )));
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;
        // Snapshot reads for the whole unit of work.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;
        self.tx = Some(tx);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        self.take_tx()?
            .commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))
    }

    async fn abort(&mut self) -> Result<(), AppError> {
        match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string()))),
            // A failed commit already consumed the transaction.
            None => Ok(()),
        }
    }

    async fn end(&mut self) {
        if self.tx.take().is_some() {
            debug!("Session ended with an open transaction, rolling back");
        }
    }

    fn connection(&mut self) -> Option<&mut PgConnection> {
        self.tx.as_deref_mut()
    }
}

/// Connection for a write: the session's transaction if there is one,
/// otherwise a fresh pooled connection in autocommit mode.
enum WriteConn<'a> {
    Session(&'a mut PgConnection),
    Pooled(PoolConnection<Postgres>),
}

async fn write_conn<'a>(
    pool: &PgPool,
    session: Option<&'a mut dyn TransactionalSession>,
) -> Result<WriteConn<'a>, AppError> {
    match session.and_then(|s| s.connection()) {
        Some(conn) => Ok(WriteConn::Session(conn)),
        None => Ok(WriteConn::Pooled(pool.acquire().await?)),
    }
}

impl Deref for WriteConn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            WriteConn::Session(conn) => &**conn,
            WriteConn::Pooled(conn) => &**conn,
        }
    }
}

impl DerefMut for WriteConn<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            WriteConn::Session(conn) => &mut **conn,
            WriteConn::Pooled(conn) => &mut **conn,
        }
    }
}

fn row_to_user(row: &PgRow) -> Result<User, AppError> {
    Ok(User {
        id: row.try_get("id")?,
        account: row.try_get("account")?,
    })
}

fn row_to_brand(row: &PgRow) -> Result<Brand, AppError> {
    Ok(Brand {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        image_url: row.try_get("image_url")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_creation(row: &PgRow) -> Result<Creation, AppError> {
    Ok(Creation {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        brand_id: row.try_get("brand_id")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        amount: row.try_get("amount")?,
        contract_address: row.try_get("contract_address")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_trade(row: &PgRow) -> Result<Trade, AppError> {
    Ok(Trade {
        id: row.try_get("id")?,
        creation_id: row.try_get("creation_id")?,
        brand_id: row.try_get("brand_id")?,
        buyer: row.try_get("buyer")?,
        seller: row.try_get("seller")?,
        amount: row.try_get("amount")?,
        price: row.try_get("price")?,
        trade_at: row.try_get("trade_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<Item, AppError> {
    Ok(Item {
        contract: row.try_get("contract")?,
        token: row.try_get("token")?,
        creation_id: row.try_get("creation_id")?,
        owner: row.try_get("owner")?,
        brand_owner: row.try_get("brand_owner")?,
    })
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query("SELECT id, account FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    #[instrument(skip(self, session))]
    async fn find_by_account(
        &self,
        session: Option<&mut dyn TransactionalSession>,
        account: &str,
    ) -> Result<Option<User>, AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let row = sqlx::query("SELECT id, account FROM users WHERE account = $1")
            .bind(account)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    #[instrument(skip(self, session))]
    async fn exists_by_id(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<bool, AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self, session, user), fields(user_id = %user.id))]
    async fn create(&self, session: Option<&mut dyn TransactionalSession>, user: &User) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        sqlx::query("INSERT INTO users (id, account) VALUES ($1, $2)")
            .bind(&user.id)
            .bind(&user.account)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn delete(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("user {id}")).into());
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgBrandRepository {
    pool: PgPool,
}

impl PgBrandRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &BrandFilter) {
        builder.push(" WHERE TRUE");
        if let Some(name) = &filter.name {
            builder.push(" AND name = ").push_bind(name.clone());
        }
        if let Some(after) = filter.created_after {
            builder.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = filter.created_before {
            builder.push(" AND created_at <= ").push_bind(before);
        }
    }
}

const BRAND_COLUMNS: &str = "SELECT id, name, image_url, description, created_at FROM brands";

#[async_trait]
impl BrandRepository for PgBrandRepository {
    #[instrument(skip(self, session))]
    async fn find_by_id(
        &self,
        session: Option<&mut dyn TransactionalSession>,
        id: &str,
    ) -> Result<Option<Brand>, AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let row = sqlx::query("SELECT id, name, image_url, description, created_at FROM brands WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_brand).transpose()
    }

    #[instrument(skip(self, session))]
    async fn exists_by_id(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<bool, AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM brands WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self, session, brand), fields(brand_id = %brand.id))]
    async fn create(&self, session: Option<&mut dyn TransactionalSession>, brand: &Brand) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        sqlx::query(
            r#"
            INSERT INTO brands (id, name, image_url, description, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&brand.id)
        .bind(&brand.name)
        .bind(&brand.image_url)
        .bind(&brand.description)
        .bind(brand.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, session, brand), fields(brand_id = %brand.id))]
    async fn update(&self, session: Option<&mut dyn TransactionalSession>, brand: &Brand) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let result = sqlx::query("UPDATE brands SET image_url = $2, description = $3 WHERE id = $1")
            .bind(&brand.id)
            .bind(&brand.image_url)
            .bind(&brand.description)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("brand {}", brand.id)).into());
        }
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn delete(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let result = sqlx::query("DELETE FROM brands WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("brand {id}")).into());
        }
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn find_all_by_filter_and_page(
        &self,
        filter: &BrandFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Brand>, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM brands");
        Self::push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut builder = QueryBuilder::<Postgres>::new(BRAND_COLUMNS);
        Self::push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(i64::from(page.per_page))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset()));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let brands = rows.iter().map(row_to_brand).collect::<Result<Vec<_>, _>>()?;
        Ok(PaginatedResponse::new(brands, total.max(0) as u64, page))
    }
}

#[derive(Clone)]
pub struct PgCreationRepository {
    pool: PgPool,
}

impl PgCreationRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &CreationFilter) {
        builder.push(" WHERE TRUE");
        if let Some(name) = &filter.name {
            builder.push(" AND name = ").push_bind(name.clone());
        }
        if let Some(brand_id) = &filter.brand_id {
            builder.push(" AND brand_id = ").push_bind(brand_id.clone());
        }
        if let Some(min) = filter.min_price {
            builder.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            builder.push(" AND price <= ").push_bind(max);
        }
    }
}

const CREATION_COLUMNS: &str =
    "SELECT id, name, brand_id, description, price, amount, contract_address, created_at FROM creations";

#[async_trait]
impl CreationRepository for PgCreationRepository {
    #[instrument(skip(self, session))]
    async fn find_by_id(
        &self,
        session: Option<&mut dyn TransactionalSession>,
        id: &str,
    ) -> Result<Option<Creation>, AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let row = sqlx::query(
            r#"
            SELECT id, name, brand_id, description, price, amount, contract_address, created_at
            FROM creations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        row.as_ref().map(row_to_creation).transpose()
    }

    #[instrument(skip(self, session, creation), fields(creation_id = %creation.id))]
    async fn create(&self, session: Option<&mut dyn TransactionalSession>, creation: &Creation) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        sqlx::query(
            r#"
            INSERT INTO creations (id, name, brand_id, description, price, amount,
                                   contract_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&creation.id)
        .bind(&creation.name)
        .bind(&creation.brand_id)
        .bind(&creation.description)
        .bind(creation.price)
        .bind(creation.amount)
        .bind(&creation.contract_address)
        .bind(creation.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn reserve_amount(
        &self,
        session: Option<&mut dyn TransactionalSession>,
        id: &str,
        amount: i64,
    ) -> Result<i64, AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE creations
            SET amount = amount - $2
            WHERE id = $1 AND amount >= $2
            RETURNING amount
            "#,
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(remaining);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM creations WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        let kind = if exists {
            ServiceErrorKind::InsufficientStock
        } else {
            ServiceErrorKind::CreationNotFound
        };
        Err(ServiceError::new("CreationRepository", kind).into())
    }

    #[instrument(skip(self, session, creation), fields(creation_id = %creation.id))]
    async fn update(&self, session: Option<&mut dyn TransactionalSession>, creation: &Creation) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let result = sqlx::query("UPDATE creations SET name = $2, description = $3 WHERE id = $1")
            .bind(&creation.id)
            .bind(&creation.name)
            .bind(&creation.description)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("creation {}", creation.id)).into());
        }
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn delete(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let result = sqlx::query("DELETE FROM creations WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("creation {id}")).into());
        }
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn find_all_by_filter_and_page(
        &self,
        filter: &CreationFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Creation>, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM creations");
        Self::push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut builder = QueryBuilder::<Postgres>::new(CREATION_COLUMNS);
        Self::push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(i64::from(page.per_page))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset()));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let creations = rows.iter().map(row_to_creation).collect::<Result<Vec<_>, _>>()?;
        Ok(PaginatedResponse::new(creations, total.max(0) as u64, page))
    }
}

#[derive(Clone)]
pub struct PgTradeRepository {
    pool: PgPool,
}

impl PgTradeRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &TradeFilter) {
        builder.push(" WHERE TRUE");
        if let Some(creation_id) = &filter.creation_id {
            builder.push(" AND creation_id = ").push_bind(creation_id.clone());
        }
        if let Some(brand_id) = &filter.brand_id {
            builder.push(" AND brand_id = ").push_bind(brand_id.clone());
        }
        if let Some(buyer) = &filter.buyer {
            builder.push(" AND buyer = ").push_bind(buyer.clone());
        }
        if let Some(seller) = &filter.seller {
            builder.push(" AND seller = ").push_bind(seller.clone());
        }
        if let Some(before) = filter.traded_before {
            builder.push(" AND trade_at <= ").push_bind(before);
        }
        if let Some(after) = filter.traded_after {
            builder.push(" AND trade_at >= ").push_bind(after);
        }
        if let Some(min) = filter.min_price {
            builder.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            builder.push(" AND price <= ").push_bind(max);
        }
    }
}

const TRADE_COLUMNS: &str = "SELECT id, creation_id, brand_id, buyer, seller, amount, price, trade_at FROM trades";

#[async_trait]
impl TradeRepository for PgTradeRepository {
    #[instrument(skip(self))]
    async fn find(&self, id: &str) -> Result<Option<Trade>, AppError> {
        let row = sqlx::query(
            "SELECT id, creation_id, brand_id, buyer, seller, amount, price, trade_at FROM trades WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_trade).transpose()
    }

    #[instrument(skip(self, session, trade), fields(trade_id = %trade.id))]
    async fn create(&self, session: Option<&mut dyn TransactionalSession>, trade: &Trade) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        sqlx::query(
            r#"
            INSERT INTO trades (id, creation_id, brand_id, buyer, seller, amount, price, trade_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.creation_id)
        .bind(&trade.brand_id)
        .bind(&trade.buyer)
        .bind(&trade.seller)
        .bind(trade.amount)
        .bind(trade.price)
        .bind(trade.trade_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn delete(&self, session: Option<&mut dyn TransactionalSession>, id: &str) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        let result = sqlx::query("DELETE FROM trades WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("trade {id}")).into());
        }
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn find_all_by_filter(&self, filter: &TradeFilter) -> Result<Vec<Trade>, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new(TRADE_COLUMNS);
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY trade_at DESC, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_trade).collect()
    }

    #[instrument(skip(self, filter))]
    async fn find_all_by_filter_and_page(
        &self,
        filter: &TradeFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Trade>, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM trades");
        Self::push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut builder = QueryBuilder::<Postgres>::new(TRADE_COLUMNS);
        Self::push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY trade_at DESC, id LIMIT ")
            .push_bind(i64::from(page.per_page))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset()));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let trades = rows.iter().map(row_to_trade).collect::<Result<Vec<_>, _>>()?;
        Ok(PaginatedResponse::new(trades, total.max(0) as u64, page))
    }
}

#[derive(Clone)]
pub struct PgItemRepository {
    pool: PgPool,
}

impl PgItemRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ItemFilter) {
        builder.push(" WHERE TRUE");
        if let Some(owner) = &filter.owner {
            builder.push(" AND owner = ").push_bind(owner.clone());
        }
        if let Some(brand_owner) = &filter.brand_owner {
            builder.push(" AND brand_owner = ").push_bind(brand_owner.clone());
        }
        if let Some(creation_id) = &filter.creation_id {
            builder.push(" AND creation_id = ").push_bind(creation_id.clone());
        }
    }
}

const ITEM_COLUMNS: &str = "SELECT contract, token, creation_id, owner, brand_owner FROM items";

#[async_trait]
impl ItemRepository for PgItemRepository {
    #[instrument(skip(self))]
    async fn find(&self, contract: &str, token: &str) -> Result<Option<Item>, AppError> {
        let row = sqlx::query(
            "SELECT contract, token, creation_id, owner, brand_owner FROM items WHERE contract = $1 AND token = $2",
        )
        .bind(contract)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    #[instrument(skip(self, session, item), fields(contract = %item.contract, token = %item.token))]
    async fn create(&self, session: Option<&mut dyn TransactionalSession>, item: &Item) -> Result<(), AppError> {
        let mut conn = write_conn(&self.pool, session).await?;
        sqlx::query(
            r#"
            INSERT INTO items (contract, token, creation_id, owner, brand_owner)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&item.contract)
        .bind(&item.token)
        .bind(&item.creation_id)
        .bind(&item.owner)
        .bind(&item.brand_owner)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn find_all_by_filter(&self, filter: &ItemFilter) -> Result<Vec<Item>, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new(ITEM_COLUMNS);
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY contract, token");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_item).collect()
    }

    #[instrument(skip(self, filter))]
    async fn find_all_by_filter_and_page(
        &self,
        filter: &ItemFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Item>, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM items");
        Self::push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut builder = QueryBuilder::<Postgres>::new(ITEM_COLUMNS);
        Self::push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY contract, token LIMIT ")
            .push_bind(i64::from(page.per_page))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset()));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(row_to_item).collect::<Result<Vec<_>, _>>()?;
        Ok(PaginatedResponse::new(items, total.max(0) as u64, page))
    }

    #[instrument(skip(self))]
    async fn count_by_brand_owner(&self, brand_id: &str) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE brand_owner = $1")
            .bind(brand_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
