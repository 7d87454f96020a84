use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use super::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(PositionStatus::Open),
            "closed" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Database row for the positions table. Sizes are magnitudes; the sign
/// lives in `direction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub bot_id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub status: PositionStatus,
    pub position_size: Decimal,
    /// Total size ever opened; the base for realized P&L.
    pub initial_size: Decimal,
    pub average_entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub profit_loss: Decimal,
    pub percent_profit_loss: Decimal,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Totals across a bot's positions, as shown on the bot overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BotSummary {
    pub bot_id: i64,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub winning_positions: usize,
    pub total_profit_loss: Decimal,
    pub total_percent_profit_loss: Decimal,
    pub account_balance: Option<Decimal>,
}

impl BotSummary {
    pub fn from_positions(bot_id: i64, positions: &[Position]) -> Self {
        let mut summary = BotSummary {
            bot_id,
            ..Default::default()
        };

        for pos in positions.iter().filter(|p| p.bot_id == bot_id) {
            match pos.status {
                PositionStatus::Open => summary.open_positions += 1,
                PositionStatus::Closed => {
                    summary.closed_positions += 1;
                    if pos.profit_loss > Decimal::ZERO {
                        summary.winning_positions += 1;
                    }
                    summary.total_profit_loss += pos.profit_loss;
                    summary.total_percent_profit_loss += pos.percent_profit_loss;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn closed(bot_id: i64, pnl: Decimal, pct: Decimal) -> Position {
        let now = Utc::now();
        Position {
            id: Uuid::new_v4(),
            bot_id,
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            status: PositionStatus::Closed,
            position_size: Decimal::ZERO,
            initial_size: dec!(1),
            average_entry_price: dec!(100),
            exit_price: Some(dec!(110)),
            profit_loss: pnl,
            percent_profit_loss: pct,
            created_at: now,
            closed_at: Some(now),
            updated_at: now,
        }
    }

    #[test]
    fn summary_totals_closed_positions_only() {
        let mut open = closed(7, dec!(0), dec!(0));
        open.status = PositionStatus::Open;
        open.closed_at = None;

        let positions = vec![
            closed(7, dec!(29.84), dec!(14.21)),
            closed(7, dec!(-5.10), dec!(-2.00)),
            closed(8, dec!(1000), dec!(50)),
            open,
        ];

        let summary = BotSummary::from_positions(7, &positions);
        assert_eq!(summary.open_positions, 1);
        assert_eq!(summary.closed_positions, 2);
        assert_eq!(summary.winning_positions, 1);
        assert_eq!(summary.total_profit_loss, dec!(24.74));
        assert_eq!(summary.total_percent_profit_loss, dec!(12.21));
    }
}
