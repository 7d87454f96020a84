use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Direction, Side};
use crate::money::{self, MathError};

use super::session::SessionPool;
use super::{
    AdapterError, AdapterReady, CancelAck, ExchangeAdapter, ExchangeOrderStatus, ExchangePosition, Fill,
    OrderRequest, OrderState,
};

/// Orders remembered for `fetch_order`; older ones are forgotten.
const DEFAULT_ORDER_HISTORY: usize = 1_024;

/// Dry-run venue: every order fills in full at the requested price.
///
/// Keeps a signed net position per symbol so `fetch_positions` mirrors what a
/// real account would report.
pub struct PaperExchange {
    inner: Mutex<PaperBook>,
    sessions: SessionPool,
    order_history: usize,
}

#[derive(Default)]
struct PaperBook {
    orders: HashMap<String, OrderState>,
    by_client_id: HashMap<String, String>,
    /// (exchange id, client id), oldest first.
    history: VecDeque<(String, String)>,
    /// Signed net size and volume-weighted entry per symbol.
    positions: HashMap<String, (Decimal, Decimal)>,
}

impl PaperBook {
    fn remember(&mut self, state: &OrderState, client_order_id: &str, limit: usize) {
        self.orders.insert(state.exchange_order_id.clone(), state.clone());
        self.by_client_id
            .insert(client_order_id.to_string(), state.exchange_order_id.clone());
        self.history
            .push_back((state.exchange_order_id.clone(), client_order_id.to_string()));

        while self.history.len() > limit {
            if let Some((order_id, client_id)) = self.history.pop_front() {
                self.orders.remove(&order_id);
                self.by_client_id.remove(&client_id);
            }
        }
    }
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::with_order_history(DEFAULT_ORDER_HISTORY)
    }

    pub fn with_order_history(order_history: usize) -> Self {
        Self {
            inner: Mutex::new(PaperBook::default()),
            sessions: SessionPool::new(16),
            order_history: order_history.max(1),
        }
    }
}

/// Net and entry after adding `signed_qty` at `price`.
///
/// Entry re-weights only when the fill adds exposure on the same side; a
/// flip opens at the fill price.
fn apply_to_book(
    net: Decimal,
    entry: Decimal,
    signed_qty: Decimal,
    price: Decimal,
) -> Result<(Decimal, Decimal), MathError> {
    let new_net = money::add(net, signed_qty)?;

    let new_entry = if net.is_zero() || net.is_sign_positive() != new_net.is_sign_positive() {
        price
    } else if net.is_sign_positive() == signed_qty.is_sign_positive() {
        let cost = money::add(money::mul(entry, net.abs())?, money::mul(price, signed_qty.abs())?)?;
        money::div(cost, new_net.abs())?
    } else {
        entry
    };

    Ok((new_net, new_entry))
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn initialize(&self) -> Result<AdapterReady, AdapterError> {
        Ok(AdapterReady {
            exchange: self.name().into(),
            sandbox: true,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, AdapterError> {
        let _session = self.sessions.acquire().await?;

        let price = request
            .price
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| AdapterError::Rejected("paper fills need a reference price".into()))?;

        let mut book = self.inner.lock().await;
        if book.by_client_id.contains_key(&request.client_order_id) {
            return Err(AdapterError::Rejected(format!(
                "duplicate client order id {}",
                request.client_order_id
            )));
        }

        let signed_qty = match request.side {
            Side::Buy => request.quantity,
            Side::Sell => -request.quantity,
        };
        let (net, entry) = book
            .positions
            .get(&request.symbol)
            .copied()
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));
        let (new_net, new_entry) = apply_to_book(net, entry, signed_qty, price)
            .map_err(|e| AdapterError::Rejected(format!("paper book for {}: {e}", request.symbol)))?;

        if new_net.is_zero() {
            book.positions.remove(&request.symbol);
        } else {
            book.positions.insert(request.symbol.clone(), (new_net, new_entry));
        }

        let state = OrderState {
            exchange_order_id: format!("paper-{}", Uuid::new_v4()),
            status: ExchangeOrderStatus::Filled,
            filled_quantity: request.quantity,
            average_price: Some(price),
        };
        book.remember(&state, &request.client_order_id, self.order_history);

        tracing::info!(
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            price = %price,
            "[DRY-RUN] Paper order filled"
        );

        Ok(state)
    }

    async fn fetch_order(&self, exchange_order_id: &str, _symbol: &str) -> Result<OrderState, AdapterError> {
        let _session = self.sessions.acquire().await?;
        let book = self.inner.lock().await;
        book.orders
            .get(exchange_order_id)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(format!("order {exchange_order_id}")))
    }

    async fn fetch_order_by_client_id(&self, client_order_id: &str, _symbol: &str) -> Result<OrderState, AdapterError> {
        let _session = self.sessions.acquire().await?;
        let book = self.inner.lock().await;
        book.by_client_id
            .get(client_order_id)
            .and_then(|id| book.orders.get(id))
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(format!("client order {client_order_id}")))
    }

    async fn cancel_order(&self, exchange_order_id: &str, _symbol: &str) -> Result<CancelAck, AdapterError> {
        let _session = self.sessions.acquire().await?;
        let book = self.inner.lock().await;
        match book.orders.get(exchange_order_id) {
            None => Err(AdapterError::NotFound(format!("order {exchange_order_id}"))),
            Some(state) if state.status == ExchangeOrderStatus::Filled => {
                Err(AdapterError::Rejected("order already filled".into()))
            }
            Some(_) => Ok(CancelAck {
                exchange_order_id: exchange_order_id.to_string(),
            }),
        }
    }

    async fn fetch_positions(&self, symbols: Option<&[String]>) -> Result<Vec<ExchangePosition>, AdapterError> {
        let _session = self.sessions.acquire().await?;
        let book = self.inner.lock().await;

        let mut positions: Vec<ExchangePosition> = book
            .positions
            .iter()
            .filter(|(symbol, _)| symbols.map_or(true, |wanted| wanted.contains(*symbol)))
            .map(|(symbol, (net, entry))| ExchangePosition {
                symbol: symbol.clone(),
                direction: if net.is_sign_positive() {
                    Direction::Long
                } else {
                    Direction::Short
                },
                size: net.abs(),
                entry_price: Some(*entry),
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        Ok(positions)
    }
}
