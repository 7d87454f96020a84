use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::db::{BotDirectory, Store, StoreError, StoreTx};
use crate::exchange::{
    with_retry, AdapterError, AdapterProvider, ExchangeAdapter, ExchangeOrderStatus, OrderRequest, OrderState,
    RetryPolicy,
};
use crate::ingestion::signal_parser::{parse_signal, ValidationError};
use crate::models::{BotAccount, FillRecord, Order, OrderIntent, OrderStatus, Position};
use crate::money::{self, PRICE_SCALE, QUANTITY_SCALE};
use crate::services::notifier::{self, Notifier};

use super::key_lock::{KeyedLocks, PositionKey};
use super::ledger::{self, FeeSchedule, FillReport, LedgerError, LedgerOutcome, RealizedPnl, Transition};

/// Configuration for the signal dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub retry: RetryPolicy,
    /// Polls of `fetch_order` while the exchange reports the order resting.
    pub fill_confirm_attempts: u32,
    pub fill_confirm_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            fill_confirm_attempts: 3,
            fill_confirm_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid signal: {0}")]
    ValidationFailure(#[from] ValidationError),

    #[error("bot {0} not found")]
    BotNotFound(i64),

    #[error("exchange call failed: {0}")]
    AdapterFailure(#[from] AdapterError),

    #[error("persistence failed: {0}")]
    PersistenceFailure(#[from] StoreError),

    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("signal does not fit the current position: {0}")]
    PositionMismatch(LedgerError),

    #[error("order {0} was not filled")]
    NotFilled(String),
}

impl DispatchError {
    /// Stable error code returned to webhook callers.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::ValidationFailure(_) => "validation_failure",
            DispatchError::BotNotFound(_) => "bot_not_found",
            DispatchError::AdapterFailure(_) => "adapter_failure",
            DispatchError::PersistenceFailure(_) => "persistence_failure",
            DispatchError::CorruptState(_) => "corrupt_state",
            DispatchError::PositionMismatch(_) => "position_mismatch",
            DispatchError::NotFilled(_) => "not_filled",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            DispatchError::BotNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::PositionMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::AdapterFailure(AdapterError::Unsupported(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::AdapterFailure(_) | DispatchError::NotFilled(_) => StatusCode::BAD_GATEWAY,
            DispatchError::PersistenceFailure(_) | DispatchError::CorruptState(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<LedgerError> for DispatchError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::SizeMismatch { .. } | LedgerError::DirectionMismatch { .. } => {
                DispatchError::PositionMismatch(e)
            }
            LedgerError::CorruptState(msg) => DispatchError::CorruptState(msg),
            LedgerError::Math(m) => DispatchError::CorruptState(m.to_string()),
        }
    }
}

/// Result of a committed signal.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub order: Order,
    pub position: Position,
    pub transition: Transition,
    pub realized: Option<RealizedPnl>,
}

/// Turns signals into exchange orders and ledger updates.
///
/// Signals for the same (bot, symbol) run one at a time, in arrival order,
/// from the position read through the commit. Different keys run in
/// parallel.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    directory: Arc<dyn BotDirectory>,
    exchanges: Arc<dyn AdapterProvider>,
    locks: KeyedLocks<PositionKey>,
    config: DispatcherConfig,
    notifier: Option<Arc<Notifier>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn BotDirectory>,
        exchanges: Arc<dyn AdapterProvider>,
        config: DispatcherConfig,
        notifier: Option<Arc<Notifier>>,
    ) -> Self {
        Self {
            store,
            directory,
            exchanges,
            locks: KeyedLocks::new(),
            config,
            notifier,
        }
    }

    /// Keys with a signal in flight.
    pub fn active_keys(&self) -> usize {
        self.locks.active_keys()
    }

    /// Parse and execute one raw webhook payload.
    pub async fn handle(&self, payload: &Value) -> Result<DispatchOutcome, DispatchError> {
        counter!("signals_received").increment(1);
        let started = Instant::now();

        let intent = match parse_signal(payload) {
            Ok(intent) => intent,
            Err(e) => {
                counter!("signals_rejected").increment(1);
                tracing::warn!(error = %e, "Rejected malformed signal");
                return Err(e.into());
            }
        };

        let result = self.handle_intent(intent).await;
        histogram!("dispatch_latency_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    /// Execute an already validated intent.
    pub async fn handle_intent(&self, intent: OrderIntent) -> Result<DispatchOutcome, DispatchError> {
        tracing::info!(
            bot_id = intent.bot_id,
            symbol = %intent.symbol,
            side = %intent.side,
            quantity = %intent.quantity,
            price = %intent.price,
            hint = %intent.position_hint,
            correlation_id = %intent.correlation_id,
            "Processing signal"
        );

        // 1. Resolve bot and account
        let account = self
            .directory
            .find_bot(intent.bot_id)
            .await?
            .ok_or(DispatchError::BotNotFound(intent.bot_id))?;
        let fees = FeeSchedule::from_percent(account.maker_fee, account.taker_fee)
            .map_err(|e| DispatchError::CorruptState(format!("fee schedule for bot {}: {e}", account.bot_id)))?;

        // 2. Serialize on (bot, symbol) until this function returns
        let _key = self.locks.lock((intent.bot_id, intent.symbol.clone())).await;

        // 3. Check the transition before touching the exchange
        let current = self.store.find_open_position(intent.bot_id, &intent.symbol).await?;
        let preview = FillReport {
            quantity: intent.quantity,
            price: intent.price,
            at: Utc::now(),
        };
        if let Err(e) = ledger::apply_fill(current.as_ref(), &intent, &preview, &fees) {
            counter!("signals_rejected").increment(1);
            tracing::warn!(
                bot_id = intent.bot_id,
                symbol = %intent.symbol,
                error = %e,
                "Signal rejected by ledger pre-check"
            );
            return Err(e.into());
        }

        // 4. Record the attempt
        let order = Order::pending(&intent, &account.exchange);
        let mut tx = self.store.begin().await?;
        tx.insert_order(&order).await?;
        tx.commit().await?;
        tracing::info!(order_id = %order.id, "Order recorded");

        // 5. Place and confirm on the exchange
        let state = match self.execute_on_exchange(&account, &intent).await {
            Ok(state) => state,
            Err(e) => {
                counter!("orders_failed", "reason" => e.kind()).increment(1);
                self.finish_order(&order, OrderStatus::Error, &e.to_string()).await;
                return Err(e.into());
            }
        };

        match state.status {
            ExchangeOrderStatus::Rejected => {
                let reason = format!("exchange rejected order {}", state.exchange_order_id);
                counter!("orders_failed").increment(1);
                self.finish_order(&order, OrderStatus::Error, &reason).await;
                return Err(AdapterError::Rejected(reason).into());
            }
            _ if state.filled_quantity <= Decimal::ZERO => {
                counter!("orders_cancelled").increment(1);
                self.finish_order(&order, OrderStatus::Cancelled, "order not filled").await;
                return Err(DispatchError::NotFilled(state.exchange_order_id));
            }
            _ => {}
        }

        // 6. Apply the fill and commit order + position + balance together
        let fill = FillReport {
            quantity: money::quantize(state.filled_quantity, QUANTITY_SCALE),
            price: money::quantize(state.average_price.unwrap_or(intent.price), PRICE_SCALE),
            at: Utc::now(),
        };

        let (order, outcome) = match self.commit_fill(&intent, &account, &fees, &order, &state, &fill).await {
            Ok(committed) => committed,
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    exchange_order_id = %state.exchange_order_id,
                    bot_id = intent.bot_id,
                    symbol = %intent.symbol,
                    error = %e,
                    "Exchange filled but commit failed, position needs reconciliation"
                );
                counter!("orders_failed").increment(1);
                self.finish_order(&order, OrderStatus::Error, &format!("commit failed: {e}")).await;
                return Err(e);
            }
        };

        counter!("orders_filled").increment(1);
        match outcome.transition {
            Transition::Opened => counter!("positions_opened").increment(1),
            Transition::Closed => counter!("positions_closed").increment(1),
            Transition::Increased | Transition::Reduced => {}
        }

        tracing::info!(
            order_id = %order.id,
            position_id = %outcome.position.id,
            transition = ?outcome.transition,
            size = %outcome.position.position_size,
            avg_price = %outcome.position.average_entry_price,
            realized = ?outcome.realized.map(|r| r.net),
            "Signal committed"
        );

        self.notify_committed(&account, &order, &outcome);

        Ok(DispatchOutcome {
            order,
            position: outcome.position,
            transition: outcome.transition,
            realized: outcome.realized,
        })
    }

    async fn execute_on_exchange(&self, account: &BotAccount, intent: &OrderIntent) -> Result<OrderState, AdapterError> {
        let policy = &self.config.retry;
        let adapter = with_retry(policy, "initialize", || self.exchanges.adapter_for(account)).await?;

        let request = OrderRequest {
            symbol: intent.symbol.clone(),
            order_type: intent.order_type,
            side: intent.side,
            quantity: intent.quantity,
            price: Some(intent.price),
            client_order_id: intent.correlation_id.clone(),
        };
        let placed = match with_retry(policy, "place_order", || adapter.place_order(&request)).await {
            Ok(placed) => placed,
            Err(AdapterError::Unsupported(msg)) => return Err(AdapterError::Unsupported(msg)),
            Err(e) => self.find_landed_order(adapter.as_ref(), &request, e).await?,
        };

        tracing::info!(
            exchange = adapter.name(),
            exchange_order_id = %placed.exchange_order_id,
            status = ?placed.status,
            filled = %placed.filled_quantity,
            "Order placed"
        );

        self.confirm_fill(adapter.as_ref(), &intent.symbol, placed).await
    }

    /// After a failed placement, ask the exchange whether an earlier attempt
    /// landed anyway. A timed out request may still have been executed, and
    /// its retry then fails as a duplicate client order id.
    async fn find_landed_order(
        &self,
        adapter: &dyn ExchangeAdapter,
        request: &OrderRequest,
        place_error: AdapterError,
    ) -> Result<OrderState, AdapterError> {
        let lookup = with_retry(&self.config.retry, "find_order", || {
            adapter.fetch_order_by_client_id(&request.client_order_id, &request.symbol)
        })
        .await;

        match lookup {
            Ok(state) => {
                tracing::warn!(
                    client_order_id = %request.client_order_id,
                    exchange_order_id = %state.exchange_order_id,
                    place_error = %place_error,
                    "Placement reported failure but the order exists on the exchange"
                );
                counter!("orders_recovered").increment(1);
                Ok(state)
            }
            Err(AdapterError::NotFound(_)) => Err(place_error),
            Err(lookup_error) => {
                tracing::error!(
                    client_order_id = %request.client_order_id,
                    symbol = %request.symbol,
                    place_error = %place_error,
                    lookup_error = %lookup_error,
                    "Order outcome unknown, reconcile against the exchange"
                );
                Err(place_error)
            }
        }
    }

    /// Wait for a resting order to fill; cancel whatever is left afterwards.
    async fn confirm_fill(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        placed: OrderState,
    ) -> Result<OrderState, AdapterError> {
        let policy = &self.config.retry;
        let order_id = placed.exchange_order_id.clone();
        let mut state = placed;

        let mut polls = 0;
        while state.status == ExchangeOrderStatus::Open && polls < self.config.fill_confirm_attempts {
            tokio::time::sleep(self.config.fill_confirm_interval).await;
            state = with_retry(policy, "fetch_order", || adapter.fetch_order(&order_id, symbol)).await?;
            polls += 1;
        }

        if state.status != ExchangeOrderStatus::Open {
            return Ok(state);
        }

        tracing::warn!(
            exchange_order_id = %order_id,
            filled = %state.filled_quantity,
            "Order still resting after confirmation window, cancelling"
        );
        match with_retry(policy, "cancel_order", || adapter.cancel_order(&order_id, symbol)).await {
            Ok(_) | Err(AdapterError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        // The order may have filled further between the last poll and the cancel.
        let mut last = match with_retry(policy, "fetch_order", || adapter.fetch_order(&order_id, symbol)).await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!(exchange_order_id = %order_id, error = %e, "Post-cancel fetch failed, using last known fill");
                state
            }
        };
        if last.status == ExchangeOrderStatus::Open {
            last.status = ExchangeOrderStatus::Cancelled;
        }
        Ok(last)
    }

    async fn commit_fill(
        &self,
        intent: &OrderIntent,
        account: &BotAccount,
        fees: &FeeSchedule,
        order: &Order,
        state: &OrderState,
        fill: &FillReport,
    ) -> Result<(Order, LedgerOutcome), DispatchError> {
        let mut tx = self.store.begin().await?;

        match stage_fill(tx.as_mut(), intent, account, fees, order, state, fill).await {
            Ok(staged) => {
                tx.commit().await?;
                Ok(staged)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Move a pending order to a terminal failure status in its own transaction.
    async fn finish_order(&self, order: &Order, status: OrderStatus, message: &str) {
        let result = async {
            let mut tx = self.store.begin().await?;
            match status {
                OrderStatus::Cancelled => tx.mark_order_cancelled(order.id, message).await?,
                _ => tx.mark_order_error(order.id, message).await?,
            }
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => tracing::warn!(order_id = %order.id, status = %status, reason = message, "Order finished without fill"),
            Err(e) => tracing::error!(order_id = %order.id, error = %e, "Failed to record order failure"),
        }

        if let Some(n) = &self.notifier {
            let n = Arc::clone(n);
            let msg = notifier::format_order_failed(order, message);
            tokio::spawn(async move { n.send(&msg).await });
        }
    }

    fn notify_committed(&self, account: &BotAccount, order: &Order, outcome: &LedgerOutcome) {
        let Some(n) = &self.notifier else {
            return;
        };
        let msg = match &outcome.realized {
            Some(realized) => notifier::format_position_closed(&outcome.position, realized, &account.bot_name),
            None => notifier::format_order_filled(order, &account.bot_name),
        };
        let n = Arc::clone(n);
        tokio::spawn(async move { n.send(&msg).await });
    }
}

/// Read-modify-write of the position inside `tx`.
async fn stage_fill(
    tx: &mut dyn StoreTx,
    intent: &OrderIntent,
    account: &BotAccount,
    fees: &FeeSchedule,
    order: &Order,
    state: &OrderState,
    fill: &FillReport,
) -> Result<(Order, LedgerOutcome), DispatchError> {
    let current = tx.open_position(intent.bot_id, &intent.symbol).await?;
    let outcome = ledger::apply_fill(current.as_ref(), intent, fill, fees)?;

    if outcome.is_new() {
        tx.insert_position(&outcome.position).await?;
    } else {
        tx.update_position(&outcome.position).await?;
    }

    let record = FillRecord {
        position_id: outcome.position.id,
        external_order_id: state.exchange_order_id.clone(),
        quantity: fill.quantity,
        price: fill.price,
        executed_at: fill.at,
    };
    let filled = tx.mark_order_filled(order.id, &record).await?;

    if let Some(realized) = &outcome.realized {
        tx.credit_account(account.account_id, realized.net).await?;
    }

    Ok((filled, outcome))
}
