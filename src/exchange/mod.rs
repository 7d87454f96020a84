//! Exchange adapter boundary.
//!
//! Each exchange account is driven through an [`ExchangeAdapter`]. Errors are
//! normalized into [`AdapterError`] so the dispatcher can decide what to retry
//! without knowing which exchange it is talking to.

pub mod binance;
pub mod paper;
pub mod registry;
pub mod retry;
pub mod session;

pub use binance::BinanceFutures;
pub use paper::PaperExchange;
pub use registry::{AdapterProvider, ExchangeRegistry};
pub use retry::{with_retry, RetryPolicy};
pub use session::{SessionGuard, SessionPool};

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Direction, OrderType, Side};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("rejected by exchange: {0}")]
    Rejected(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl AdapterError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::RateLimited { .. } | AdapterError::Network(_))
    }

    /// Stable short code for responses and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::NotFound(_) => "not_found",
            AdapterError::RateLimited { .. } => "rate_limited",
            AdapterError::Network(_) => "network",
            AdapterError::Rejected(_) => "rejected",
            AdapterError::Unsupported(_) => "unsupported",
        }
    }
}

/// Order as submitted to an exchange.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Decimal,
    /// Limit price; reference price for market orders on simulated venues.
    pub price: Option<Decimal>,
    /// Idempotency key forwarded to the exchange.
    pub client_order_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeOrderStatus {
    /// Accepted and resting, possibly partially filled.
    Open,
    Filled,
    Cancelled,
    Rejected,
}

/// Exchange view of one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderState {
    pub exchange_order_id: String,
    pub status: ExchangeOrderStatus,
    pub filled_quantity: Decimal,
    /// Volume-weighted fill price, when anything filled.
    pub average_price: Option<Decimal>,
}

/// Result of placing an order: the exchange's view right after acceptance.
pub type Fill = OrderState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAck {
    pub exchange_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterReady {
    pub exchange: String,
    pub sandbox: bool,
}

/// Net position as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub direction: Direction,
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
}

/// Client order ids exchanges accept without escaping: 1-36 characters
/// from `[.A-Za-z0-9:/_-]`.
pub fn is_valid_client_order_id(id: &str) -> bool {
    (1..=36).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '/' | '_' | '-'))
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange name as stored on the account row.
    fn name(&self) -> &str;

    /// Verify connectivity and credentials.
    async fn initialize(&self) -> Result<AdapterReady, AdapterError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, AdapterError>;

    async fn fetch_order(&self, exchange_order_id: &str, symbol: &str) -> Result<OrderState, AdapterError>;

    /// Look an order up by the idempotency key it was placed with.
    async fn fetch_order_by_client_id(&self, client_order_id: &str, symbol: &str) -> Result<OrderState, AdapterError>;

    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str) -> Result<CancelAck, AdapterError>;

    /// Open positions, optionally restricted to `symbols`.
    async fn fetch_positions(&self, symbols: Option<&[String]>) -> Result<Vec<ExchangePosition>, AdapterError>;
}
