use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{BotAccount, FillRecord, Order, OrderStatus, Position, PositionStatus};

use super::{account_repo, order_repo, position_repo, BotDirectory, Store, StoreError, StoreTx};

/// Postgres-backed store and bot directory.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn find_open_position(&self, bot_id: i64, symbol: &str) -> Result<Option<Position>, StoreError> {
        Ok(position_repo::find_open_position(&self.pool, bot_id, symbol).await?)
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError> {
        Ok(position_repo::get_position(&self.pool, id).await?)
    }

    async fn list_positions(
        &self,
        bot_id: Option<i64>,
        status: Option<PositionStatus>,
    ) -> Result<Vec<Position>, StoreError> {
        Ok(position_repo::list_positions(&self.pool, bot_id, status).await?)
    }

    async fn list_orders(&self, bot_id: Option<i64>, limit: i64) -> Result<Vec<Order>, StoreError> {
        Ok(order_repo::list_orders(&self.pool, bot_id, limit).await?)
    }

    async fn account_balance(&self, account_id: i64) -> Result<Option<Decimal>, StoreError> {
        Ok(account_repo::get_balance(&self.pool, account_id).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn expire_pending_orders(&self, message: &str) -> Result<u64, StoreError> {
        Ok(order_repo::expire_pending(&self.pool, message).await?)
    }
}

#[async_trait]
impl BotDirectory for PgStore {
    async fn find_bot(&self, bot_id: i64) -> Result<Option<BotAccount>, StoreError> {
        Ok(account_repo::find_bot(&self.pool, bot_id).await?)
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn open_position(&mut self, bot_id: i64, symbol: &str) -> Result<Option<Position>, StoreError> {
        Ok(position_repo::lock_open_position(&mut *self.tx, bot_id, symbol).await?)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        order_repo::insert_order(&mut *self.tx, order).await?;
        Ok(())
    }

    async fn mark_order_filled(&mut self, order_id: Uuid, fill: &FillRecord) -> Result<Order, StoreError> {
        order_repo::fill_order(&mut *self.tx, order_id, fill)
            .await?
            .ok_or_else(|| StoreError::Conflict(format!("order {order_id} is no longer pending")))
    }

    async fn mark_order_error(&mut self, order_id: Uuid, message: &str) -> Result<(), StoreError> {
        finish(&mut self.tx, order_id, OrderStatus::Error, message).await
    }

    async fn mark_order_cancelled(&mut self, order_id: Uuid, message: &str) -> Result<(), StoreError> {
        finish(&mut self.tx, order_id, OrderStatus::Cancelled, message).await
    }

    async fn insert_position(&mut self, position: &Position) -> Result<(), StoreError> {
        position_repo::insert_position(&mut *self.tx, position).await?;
        Ok(())
    }

    async fn update_position(&mut self, position: &Position) -> Result<(), StoreError> {
        match position_repo::update_open_position(&mut *self.tx, position).await? {
            0 => Err(StoreError::Conflict(format!("position {} is not open", position.id))),
            _ => Ok(()),
        }
    }

    async fn credit_account(&mut self, account_id: i64, amount: Decimal) -> Result<(), StoreError> {
        match account_repo::credit_balance(&mut *self.tx, account_id, amount).await? {
            0 => Err(StoreError::NotFound(format!("exchange account {account_id}"))),
            _ => Ok(()),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn finish(
    tx: &mut Transaction<'static, Postgres>,
    order_id: Uuid,
    status: OrderStatus,
    message: &str,
) -> Result<(), StoreError> {
    match order_repo::finish_order(&mut **tx, order_id, status, message).await? {
        0 => Err(StoreError::Conflict(format!("order {order_id} is no longer pending"))),
        _ => Ok(()),
    }
}
