//! In-memory store for tests and embedding.
//!
//! Writes are staged on the transaction and applied under one lock at
//! commit, after the checks the database enforces: one open position per
//! (bot, symbol), order updates only from `pending`, closed positions
//! immutable, credits only to known accounts.
//!
//! There are no row locks. Where Postgres blocks a second reader on
//! `FOR UPDATE`, this store lets both read and fails the later commit with
//! `Conflict` if the position changed after it was read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{BotAccount, FillRecord, Order, OrderStatus, Position, PositionStatus};

use super::{BotDirectory, Store, StoreError, StoreTx};

#[derive(Default)]
struct Tables {
    bots: HashMap<i64, BotAccount>,
    balances: HashMap<i64, Decimal>,
    positions: HashMap<Uuid, Position>,
    orders: HashMap<Uuid, Order>,
    /// Insertion order of `orders`, used to break created_at ties.
    order_seq: Vec<Uuid>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a bot and its account with a starting balance.
    pub fn add_bot(&self, account: BotAccount, balance: Decimal) {
        let mut tables = self.tables();
        tables.balances.entry(account.account_id).or_insert(balance);
        tables.bots.insert(account.bot_id, account);
    }

    /// Make the next commit fail with `Unavailable`, discarding its writes.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// All orders, oldest first.
    pub fn orders(&self) -> Vec<Order> {
        let tables = self.tables();
        tables
            .order_seq
            .iter()
            .filter_map(|id| tables.orders.get(id).cloned())
            .collect()
    }

    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.tables().positions.values().cloned().collect();
        positions.sort_by_key(|p| p.created_at);
        positions
    }

    pub fn balance(&self, account_id: i64) -> Option<Decimal> {
        self.tables().balances.get(&account_id).copied()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            orders: HashMap::new(),
            new_orders: Vec::new(),
            positions: HashMap::new(),
            reads: HashMap::new(),
            credits: Vec::new(),
        }))
    }

    async fn find_open_position(&self, bot_id: i64, symbol: &str) -> Result<Option<Position>, StoreError> {
        Ok(self
            .tables()
            .positions
            .values()
            .find(|p| p.is_open() && p.bot_id == bot_id && p.symbol == symbol)
            .cloned())
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError> {
        Ok(self.tables().positions.get(&id).cloned())
    }

    async fn list_positions(
        &self,
        bot_id: Option<i64>,
        status: Option<PositionStatus>,
    ) -> Result<Vec<Position>, StoreError> {
        let mut positions: Vec<Position> = self
            .tables()
            .positions
            .values()
            .filter(|p| bot_id.map_or(true, |id| p.bot_id == id))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        positions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(positions)
    }

    async fn list_orders(&self, bot_id: Option<i64>, limit: i64) -> Result<Vec<Order>, StoreError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let mut orders: Vec<Order> = self
            .orders()
            .into_iter()
            .rev()
            .filter(|o| bot_id.map_or(true, |id| o.bot_id == id))
            .collect();
        // Stable sort keeps newer inserts first among equal timestamps.
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(limit);
        Ok(orders)
    }

    async fn account_balance(&self, account_id: i64) -> Result<Option<Decimal>, StoreError> {
        Ok(self.balance(account_id))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn expire_pending_orders(&self, message: &str) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut swept = 0;
        for order in self.tables().orders.values_mut() {
            if order.status == OrderStatus::Pending {
                order.status = OrderStatus::Error;
                order.error_message = Some(message.to_string());
                order.executed_at = Some(now);
                swept += 1;
            }
        }
        Ok(swept)
    }
}

#[async_trait]
impl BotDirectory for MemoryStore {
    async fn find_bot(&self, bot_id: i64) -> Result<Option<BotAccount>, StoreError> {
        Ok(self.tables().bots.get(&bot_id).cloned())
    }
}

/// Staged writes of one transaction.
pub struct MemoryTx {
    store: MemoryStore,
    /// Updated orders with the status they had when first read.
    orders: HashMap<Uuid, (OrderStatus, Order)>,
    new_orders: Vec<Order>,
    /// Written positions, plus whether they were inserted by this tx.
    positions: HashMap<Uuid, (bool, Position)>,
    /// Committed positions as this transaction first saw them.
    reads: HashMap<Uuid, Position>,
    credits: Vec<(i64, Decimal)>,
}

impl MemoryTx {
    /// Current view of an order: staged first, then committed.
    fn order_view(&self, order_id: Uuid) -> Option<(OrderStatus, Order)> {
        if let Some(order) = self.new_orders.iter().find(|o| o.id == order_id) {
            return Some((OrderStatus::Pending, order.clone()));
        }
        if let Some(staged) = self.orders.get(&order_id) {
            return Some(staged.clone());
        }
        self.store
            .tables()
            .orders
            .get(&order_id)
            .map(|o| (o.status, o.clone()))
    }

    fn stage_order(&mut self, original_status: OrderStatus, order: Order) {
        if let Some(pos) = self.new_orders.iter().position(|o| o.id == order.id) {
            self.new_orders[pos] = order;
        } else {
            self.orders.insert(order.id, (original_status, order));
        }
    }

    fn finish(&mut self, order_id: Uuid, status: OrderStatus, message: &str) -> Result<(), StoreError> {
        let (original, mut order) = self
            .order_view(order_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
        if order.status.is_terminal() {
            return Err(StoreError::Conflict(format!("order {order_id} is already {}", order.status)));
        }
        order.status = status;
        order.error_message = Some(message.to_string());
        order.executed_at = Some(Utc::now());
        self.stage_order(original, order);
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn open_position(&mut self, bot_id: i64, symbol: &str) -> Result<Option<Position>, StoreError> {
        let staged = self
            .positions
            .values()
            .map(|(_, p)| p)
            .find(|p| p.bot_id == bot_id && p.symbol == symbol && p.is_open())
            .cloned();
        if staged.is_some() {
            return Ok(staged);
        }

        let committed = self.store.find_open_position(bot_id, symbol).await?;
        // A row closed earlier in this transaction is no longer open.
        let committed = committed.filter(|p| !self.positions.contains_key(&p.id));
        if let Some(p) = &committed {
            self.reads.entry(p.id).or_insert_with(|| p.clone());
        }
        Ok(committed)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.order_view(order.id).is_some() {
            return Err(StoreError::Conflict(format!("order {} already exists", order.id)));
        }
        self.new_orders.push(order.clone());
        Ok(())
    }

    async fn mark_order_filled(&mut self, order_id: Uuid, fill: &FillRecord) -> Result<Order, StoreError> {
        let (original, mut order) = self
            .order_view(order_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
        if order.status != OrderStatus::Pending {
            return Err(StoreError::Conflict(format!("order {order_id} is no longer pending")));
        }

        order.status = OrderStatus::Filled;
        order.position_id = Some(fill.position_id);
        order.external_order_id = Some(fill.external_order_id.clone());
        order.quantity = fill.quantity;
        order.entry_price = fill.price;
        order.executed_at = Some(fill.executed_at);
        self.stage_order(original, order.clone());
        Ok(order)
    }

    async fn mark_order_error(&mut self, order_id: Uuid, message: &str) -> Result<(), StoreError> {
        self.finish(order_id, OrderStatus::Error, message)
    }

    async fn mark_order_cancelled(&mut self, order_id: Uuid, message: &str) -> Result<(), StoreError> {
        self.finish(order_id, OrderStatus::Cancelled, message)
    }

    async fn insert_position(&mut self, position: &Position) -> Result<(), StoreError> {
        if self.positions.contains_key(&position.id) {
            return Err(StoreError::Conflict(format!("position {} already exists", position.id)));
        }
        self.positions.insert(position.id, (true, position.clone()));
        Ok(())
    }

    async fn update_position(&mut self, position: &Position) -> Result<(), StoreError> {
        let current_open = match self.positions.get(&position.id) {
            Some((_, staged)) => staged.is_open(),
            None => {
                let committed = self.store.tables().positions.get(&position.id).cloned();
                match committed {
                    Some(p) => {
                        let open = p.is_open();
                        self.reads.entry(p.id).or_insert(p);
                        open
                    }
                    None => false,
                }
            }
        };
        if !current_open {
            return Err(StoreError::Conflict(format!("position {} is not open", position.id)));
        }

        let inserted = self.positions.get(&position.id).map(|(i, _)| *i).unwrap_or(false);
        self.positions.insert(position.id, (inserted, position.clone()));
        Ok(())
    }

    async fn credit_account(&mut self, account_id: i64, amount: Decimal) -> Result<(), StoreError> {
        if !self.store.tables().balances.contains_key(&account_id) {
            return Err(StoreError::NotFound(format!("exchange account {account_id}")));
        }
        self.credits.push((account_id, amount));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.store.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        let mut tables = self.store.tables();

        for (original, order) in self.orders.values() {
            match tables.orders.get(&order.id) {
                Some(committed) if committed.status == *original => {}
                _ => return Err(StoreError::Conflict(format!("order {} changed concurrently", order.id))),
            }
        }
        for order in &self.new_orders {
            if tables.orders.contains_key(&order.id) {
                return Err(StoreError::Conflict(format!("order {} already exists", order.id)));
            }
        }
        for (inserted, position) in self.positions.values() {
            if !inserted {
                let committed = tables.positions.get(&position.id);
                if !committed.map_or(false, Position::is_open) {
                    return Err(StoreError::Conflict(format!("position {} is not open", position.id)));
                }
                if committed != self.reads.get(&position.id) {
                    return Err(StoreError::Conflict(format!(
                        "position {} changed since it was read",
                        position.id
                    )));
                }
            }
            if position.is_open() {
                let closed_here = |id: &Uuid| self.positions.get(id).map_or(false, |(_, staged)| !staged.is_open());
                let clash = tables.positions.values().any(|p| {
                    p.is_open()
                        && p.id != position.id
                        && p.bot_id == position.bot_id
                        && p.symbol == position.symbol
                        && !closed_here(&p.id)
                });
                if clash {
                    return Err(StoreError::Conflict(format!(
                        "open position already exists for bot {} {}",
                        position.bot_id, position.symbol
                    )));
                }
            }
        }

        for order in &self.new_orders {
            tables.order_seq.push(order.id);
            tables.orders.insert(order.id, order.clone());
        }
        for (_, order) in self.orders.values() {
            tables.orders.insert(order.id, order.clone());
        }
        for (_, position) in self.positions.values() {
            tables.positions.insert(position.id, position.clone());
        }
        for (account_id, amount) in &self.credits {
            if let Some(balance) = tables.balances.get_mut(account_id) {
                *balance += *amount;
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
