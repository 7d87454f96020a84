//! Position ledger: the only place position transitions are decided.
//!
//! Sizes are magnitudes and the sign lives in `direction`. A fill on the side
//! that builds the current direction grows the position and re-weights the
//! average entry; a fill on the other side shrinks it and closes it once the
//! size reaches zero. Closure finalizes realized P&L net of fees.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Direction, OrderIntent, Position, PositionHint, PositionStatus};
use crate::money::{self, MathError, MONEY_SCALE, PERCENT_SCALE, PRICE_SCALE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("opening size {quantity} does not match position size {position_size}")]
    SizeMismatch {
        quantity: Decimal,
        position_size: Decimal,
    },

    #[error("{side} order cannot open a {hint} position")]
    DirectionMismatch { side: String, hint: PositionHint },

    #[error("corrupt position state: {0}")]
    CorruptState(String),

    #[error(transparent)]
    Math(#[from] MathError),
}

/// Fee rates as fractions (0.0002 for 0.02%).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Charged on the entry notional.
    pub maker_rate: Decimal,
    /// Charged on the exit notional.
    pub taker_rate: Decimal,
}

impl FeeSchedule {
    /// Build from percentages as stored on the account (0.02 meaning 0.02%).
    pub fn from_percent(maker_percent: Decimal, taker_percent: Decimal) -> Result<Self, MathError> {
        Ok(Self {
            maker_rate: money::percent_to_rate(maker_percent)?,
            taker_rate: money::percent_to_rate(taker_percent)?,
        })
    }
}

/// What actually executed on the exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillReport {
    pub quantity: Decimal,
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Opened,
    Increased,
    Reduced,
    Closed,
}

/// Realized result of a closed position. `net` and `percent` are quantized
/// for storage; the fee components are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RealizedPnl {
    pub gross: Decimal,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub net: Decimal,
    pub percent: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerOutcome {
    pub position: Position,
    pub transition: Transition,
    /// Present only when the fill closed the position.
    pub realized: Option<RealizedPnl>,
}

impl LedgerOutcome {
    /// The position row does not exist yet and must be inserted.
    pub fn is_new(&self) -> bool {
        self.transition == Transition::Opened
    }
}

/// Apply one fill to the current open position for (bot, symbol).
///
/// `current` must be the open row, or `None` when the pair has no open
/// position. The input is never mutated; the caller persists the returned
/// row.
pub fn apply_fill(
    current: Option<&Position>,
    intent: &OrderIntent,
    fill: &FillReport,
    fees: &FeeSchedule,
) -> Result<LedgerOutcome, LedgerError> {
    if fill.quantity <= Decimal::ZERO || fill.price <= Decimal::ZERO {
        return Err(LedgerError::CorruptState(format!(
            "fill of {} @ {} is not positive",
            fill.quantity, fill.price
        )));
    }

    match current {
        None => open_position(intent, fill),
        Some(position) if !position.is_open() => Err(LedgerError::CorruptState(format!(
            "position {} is already closed",
            position.id
        ))),
        Some(position) if position.position_size <= Decimal::ZERO || position.average_entry_price <= Decimal::ZERO => {
            Err(LedgerError::CorruptState(format!(
                "open position {} has size {} and average price {}",
                position.id, position.position_size, position.average_entry_price
            )))
        }
        Some(position) if intent.side.opens() == position.direction => increase_position(position, fill),
        Some(position) => reduce_position(position, fill, fees),
    }
}

fn open_position(intent: &OrderIntent, fill: &FillReport) -> Result<LedgerOutcome, LedgerError> {
    if intent.quantity != intent.position_size {
        return Err(LedgerError::SizeMismatch {
            quantity: intent.quantity,
            position_size: intent.position_size,
        });
    }

    let direction = match intent.position_hint.direction() {
        Some(direction) if direction == intent.side.opens() => direction,
        _ => {
            return Err(LedgerError::DirectionMismatch {
                side: intent.side.to_string(),
                hint: intent.position_hint,
            })
        }
    };

    let position = Position {
        id: Uuid::new_v4(),
        bot_id: intent.bot_id,
        symbol: intent.symbol.clone(),
        direction,
        status: PositionStatus::Open,
        position_size: fill.quantity,
        initial_size: fill.quantity,
        average_entry_price: money::quantize(fill.price, PRICE_SCALE),
        exit_price: None,
        profit_loss: Decimal::ZERO,
        percent_profit_loss: Decimal::ZERO,
        created_at: fill.at,
        closed_at: None,
        updated_at: fill.at,
    };

    Ok(LedgerOutcome {
        position,
        transition: Transition::Opened,
        realized: None,
    })
}

fn increase_position(current: &Position, fill: &FillReport) -> Result<LedgerOutcome, LedgerError> {
    let old_cost = money::mul(current.average_entry_price, current.position_size)?;
    let fill_cost = money::mul(fill.price, fill.quantity)?;
    let new_size = money::add(current.position_size, fill.quantity)?;
    let new_avg = money::div(money::add(old_cost, fill_cost)?, new_size)?;

    let mut position = current.clone();
    position.position_size = new_size;
    position.initial_size = money::add(current.initial_size, fill.quantity)?;
    position.average_entry_price = money::quantize(new_avg, PRICE_SCALE);
    position.updated_at = fill.at;

    Ok(LedgerOutcome {
        position,
        transition: Transition::Increased,
        realized: None,
    })
}

fn reduce_position(current: &Position, fill: &FillReport, fees: &FeeSchedule) -> Result<LedgerOutcome, LedgerError> {
    let remaining = money::sub(current.position_size, fill.quantity)?;
    let mut position = current.clone();
    position.updated_at = fill.at;

    if remaining > Decimal::ZERO {
        position.position_size = remaining;
        return Ok(LedgerOutcome {
            position,
            transition: Transition::Reduced,
            realized: None,
        });
    }

    if remaining < Decimal::ZERO {
        tracing::warn!(
            position_id = %current.id,
            open_size = %current.position_size,
            fill_size = %fill.quantity,
            "Closing fill exceeds open size, clamping to zero"
        );
    }

    let exit_price = money::quantize(fill.price, PRICE_SCALE);
    let realized = realize_pnl(
        current.direction,
        current.average_entry_price,
        exit_price,
        current.initial_size,
        fees,
    )?;

    position.position_size = Decimal::ZERO;
    position.status = PositionStatus::Closed;
    position.exit_price = Some(exit_price);
    position.closed_at = Some(fill.at);
    position.profit_loss = realized.net;
    position.percent_profit_loss = realized.percent;

    Ok(LedgerOutcome {
        position,
        transition: Transition::Closed,
        realized: Some(realized),
    })
}

/// Realized P&L of a position closed at `exit_price`, sized on `size`.
///
/// Entry is charged at the maker rate and exit at the taker rate. A zero
/// cost base means the row never opened properly and is reported as
/// `CorruptState`.
pub fn realize_pnl(
    direction: Direction,
    entry_price: Decimal,
    exit_price: Decimal,
    size: Decimal,
    fees: &FeeSchedule,
) -> Result<RealizedPnl, LedgerError> {
    let cost_base = money::mul(entry_price, size)?;
    if cost_base.is_zero() {
        return Err(LedgerError::CorruptState(
            "zero cost base at closure".into(),
        ));
    }

    let price_move = match direction {
        Direction::Long => money::sub(exit_price, entry_price)?,
        Direction::Short => money::sub(entry_price, exit_price)?,
    };
    let gross = money::mul(price_move, size)?;
    let entry_fee = money::mul(fees.maker_rate, cost_base)?;
    let exit_fee = money::mul(fees.taker_rate, money::mul(exit_price, size)?)?;
    let net = money::sub(money::sub(gross, entry_fee)?, exit_fee)?;
    let percent = money::mul(money::div(net, cost_base)?, Decimal::ONE_HUNDRED)?;

    Ok(RealizedPnl {
        gross,
        entry_fee,
        exit_fee,
        net: money::quantize(net, MONEY_SCALE),
        percent: money::quantize(percent, PERCENT_SCALE),
    })
}
