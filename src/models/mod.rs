pub mod account;
pub mod order;
pub mod position;
pub mod signal;

pub use account::BotAccount;
pub use order::{FillRecord, Order, OrderStatus};
pub use position::{BotSummary, Position, PositionStatus};
pub use signal::OrderIntent;

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }

    /// Direction a fill on this side builds up.
    pub fn opens(self) -> Direction {
        match self {
            Side::Buy => Direction::Long,
            Side::Sell => Direction::Short,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

// ---------------------------------------------------------------------------
// PositionHint: the strategy's view of its position after the signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionHint {
    Long,
    Short,
    Flat,
}

impl PositionHint {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "long" => Some(PositionHint::Long),
            "short" => Some(PositionHint::Short),
            "flat" => Some(PositionHint::Flat),
            _ => None,
        }
    }

    pub fn direction(self) -> Option<Direction> {
        match self {
            PositionHint::Long => Some(Direction::Long),
            PositionHint::Short => Some(Direction::Short),
            PositionHint::Flat => None,
        }
    }
}

impl fmt::Display for PositionHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionHint::Long => write!(f, "long"),
            PositionHint::Short => write!(f, "short"),
            PositionHint::Flat => write!(f, "flat"),
        }
    }
}

// ---------------------------------------------------------------------------
// OrderType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "market" => Some(OrderType::Market),
            "limit" => Some(OrderType::Limit),
            _ => None,
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}
