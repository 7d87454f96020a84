use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{OrderType, PositionHint, Side};

/// A validated trade signal. Produced once by the signal parser; everything
/// downstream works on this type instead of the raw webhook payload.
#[derive(Debug, Clone, Serialize)]
pub struct OrderIntent {
    /// Exchange named by the alert (lower-case).
    pub exchange: String,
    /// Normalized symbol, perpetual suffix stripped.
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Order size, strictly positive.
    pub quantity: Decimal,
    /// Signal price, strictly positive.
    pub price: Decimal,
    /// Strategy's position direction after this signal.
    pub position_hint: PositionHint,
    /// Strategy's position size after this signal.
    pub position_size: Decimal,
    /// External correlation id, forwarded to the exchange as client order id.
    pub correlation_id: String,
    pub bot_id: i64,
    pub bot_name: Option<String>,
    pub timeframe: Option<String>,
    pub params: Option<serde_json::Value>,
    pub signal_time: DateTime<Utc>,
}
