use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use super::{OrderIntent, OrderType, Side};

/// Lifecycle of an order row. Every order ends in one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Error,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Error => write!(f, "error"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Database row for the orders table. One row per signal that reached the
/// exchange stage.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub external_order_id: Option<String>,
    pub client_order_id: String,
    pub position_id: Option<Uuid>,
    pub bot_id: i64,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub status: OrderStatus,
    pub error_message: Option<String>,
    pub exchange: String,
    pub timeframe: Option<String>,
    pub params: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// A fresh `pending` order for an intent, before the exchange sees it.
    pub fn pending(intent: &OrderIntent, exchange: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_order_id: None,
            client_order_id: intent.correlation_id.clone(),
            position_id: None,
            bot_id: intent.bot_id,
            symbol: intent.symbol.clone(),
            order_type: intent.order_type,
            side: intent.side,
            quantity: intent.quantity,
            entry_price: intent.price,
            status: OrderStatus::Pending,
            error_message: None,
            exchange: exchange.to_string(),
            timeframe: intent.timeframe.clone(),
            params: intent.params.clone(),
            created_at: intent.signal_time,
            executed_at: None,
        }
    }
}

/// Exchange-side details recorded when an order fills.
#[derive(Debug, Clone)]
pub struct FillRecord {
    pub position_id: Uuid,
    pub external_order_id: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
}
