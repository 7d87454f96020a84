//! Fixed-precision decimal helpers used on every money and quantity path.
//!
//! `rust_decimal::Decimal` carries 28 significant digits, so intermediate
//! products are never rounded; rounding happens only through [`quantize`]
//! when a value is stored or presented.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Decimal places kept for prices.
pub const PRICE_SCALE: u32 = 8;
/// Decimal places kept for order and position sizes.
pub const QUANTITY_SCALE: u32 = 3;
/// Decimal places kept for realized P&L.
pub const MONEY_SCALE: u32 = 2;
/// Decimal places kept for percentage returns.
pub const PERCENT_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("decimal overflow")]
    Overflow,
}

pub fn add(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

pub fn sub(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_sub(b).ok_or(MathError::Overflow)
}

pub fn mul(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_mul(b).ok_or(MathError::Overflow)
}

/// Checked division. A zero denominator is an error, never infinity or zero.
pub fn div(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    if b.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    a.checked_div(b).ok_or(MathError::Overflow)
}

/// Round HALF_UP (midpoint away from zero) and pad to exactly `scale` places.
pub fn quantize(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

/// Convert a fee percentage (e.g. `0.02` meaning 0.02%) into a fraction.
pub fn percent_to_rate(percent: Decimal) -> Result<Decimal, MathError> {
    div(percent, Decimal::ONE_HUNDRED)
}

/// Parse a decimal literal, accepting scientific notation (`1e-7`).
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_rounds_half_up() {
        assert_eq!(quantize(dec!(29.838), 2), dec!(29.84));
        assert_eq!(quantize(dec!(2.345), 2), dec!(2.35));
        assert_eq!(quantize(dec!(2.344), 2), dec!(2.34));
        assert_eq!(quantize(dec!(-2.345), 2), dec!(-2.35));
    }

    #[test]
    fn quantize_pads_scale() {
        let q = quantize(dec!(105), PRICE_SCALE);
        assert_eq!(q.scale(), PRICE_SCALE);
        assert_eq!(q.to_string(), "105.00000000");
    }

    #[test]
    fn div_by_zero_is_an_error() {
        assert_eq!(div(dec!(1), Decimal::ZERO), Err(MathError::DivisionByZero));
        assert_eq!(div(dec!(10), dec!(4)), Ok(dec!(2.5)));
    }

    #[test]
    fn mul_overflow_is_reported() {
        assert_eq!(mul(Decimal::MAX, dec!(2)), Err(MathError::Overflow));
    }

    #[test]
    fn percent_to_rate_converts_fee_percentages() {
        assert_eq!(percent_to_rate(dec!(0.02)).unwrap(), dec!(0.0002));
        assert_eq!(percent_to_rate(dec!(0.05)).unwrap(), dec!(0.0005));
    }

    #[test]
    fn parse_decimal_accepts_plain_and_scientific() {
        assert_eq!(parse_decimal("100.5"), Some(dec!(100.5)));
        assert_eq!(parse_decimal(" 42 "), Some(dec!(42)));
        assert_eq!(parse_decimal("1e-7"), Some(dec!(0.0000001)));
        assert_eq!(parse_decimal("abc"), None);
    }
}
