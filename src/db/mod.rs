pub mod account_repo;
pub mod memory;
pub mod order_repo;
pub mod pg_store;
pub mod position_repo;

pub use memory::MemoryStore;
pub use pg_store::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BotAccount, FillRecord, Order, Position, PositionStatus};

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A concurrent writer got there first (unique open position, order no
    /// longer pending, closed position).
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

/// Read side of the order/position store plus the entry point for writes.
///
/// All mutations go through a [`StoreTx`]; nothing is visible to other
/// readers until `commit` returns `Ok`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn find_open_position(&self, bot_id: i64, symbol: &str) -> Result<Option<Position>, StoreError>;

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError>;

    /// Newest first.
    async fn list_positions(
        &self,
        bot_id: Option<i64>,
        status: Option<PositionStatus>,
    ) -> Result<Vec<Position>, StoreError>;

    /// Newest first, at most `limit` rows.
    async fn list_orders(&self, bot_id: Option<i64>, limit: i64) -> Result<Vec<Order>, StoreError>;

    async fn account_balance(&self, account_id: i64) -> Result<Option<Decimal>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Mark orders left `pending` by an earlier process as `error`. Returns
    /// how many were swept.
    async fn expire_pending_orders(&self, message: &str) -> Result<u64, StoreError>;
}

/// One unit of work. Dropping it without `commit` discards every staged write.
#[async_trait]
pub trait StoreTx: Send {
    /// The open position for (bot, symbol), locked until the transaction ends.
    async fn open_position(&mut self, bot_id: i64, symbol: &str) -> Result<Option<Position>, StoreError>;

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Move a `pending` order to `filled`. Fails with `Conflict` when the
    /// order is no longer pending.
    async fn mark_order_filled(&mut self, order_id: Uuid, fill: &FillRecord) -> Result<Order, StoreError>;

    async fn mark_order_error(&mut self, order_id: Uuid, message: &str) -> Result<(), StoreError>;

    async fn mark_order_cancelled(&mut self, order_id: Uuid, message: &str) -> Result<(), StoreError>;

    async fn insert_position(&mut self, position: &Position) -> Result<(), StoreError>;

    /// Overwrite an open position. Closed rows are immutable.
    async fn update_position(&mut self, position: &Position) -> Result<(), StoreError>;

    async fn credit_account(&mut self, account_id: i64, amount: Decimal) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Resolves a bot id to the bot and its exchange account.
#[async_trait]
pub trait BotDirectory: Send + Sync {
    async fn find_bot(&self, bot_id: i64) -> Result<Option<BotAccount>, StoreError>;
}
