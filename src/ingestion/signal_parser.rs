use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::exchange::is_valid_client_order_id;
use crate::models::{OrderIntent, OrderType, PositionHint, Side};
use crate::money::{self, PRICE_SCALE, QUANTITY_SCALE};

/// Suffix charting platforms append to perpetual-contract tickers.
const PERPETUAL_SUFFIX: &str = ".P";

/// Timestamp layout emitted by alert templates (`{{timenow}}`).
const ALERT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {0} is not a valid positive number")]
    InvalidNumber(&'static str),

    #[error("field {0} has an unrecognized value")]
    InvalidEnum(&'static str),

    #[error("field {0} is not a valid timestamp")]
    InvalidTimestamp(&'static str),

    #[error("field {0} must be 1-36 characters from [.A-Za-z0-9:/_-]")]
    InvalidIdentifier(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Validate a raw webhook payload into an [`OrderIntent`].
pub fn parse_signal(payload: &Value) -> Result<OrderIntent, ValidationError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ValidationError::Malformed("expected a JSON object".into()))?;
    let field = |name: &'static str| obj.get(name).filter(|v| !v.is_null());

    let exchange = required_str(field("exchange"), "exchange")?.to_lowercase();
    let symbol = normalize_symbol(required_str(field("symbol"), "symbol")?);
    if symbol.is_empty() {
        return Err(ValidationError::MissingField("symbol"));
    }

    let price = money::quantize(positive_decimal(field("order_price"), "order_price")?, PRICE_SCALE);
    if price.is_zero() {
        return Err(ValidationError::InvalidNumber("order_price"));
    }
    let quantity = money::quantize(positive_decimal(field("order_size"), "order_size")?, QUANTITY_SCALE);
    // Sizes below the quantity scale round away to nothing.
    if quantity.is_zero() {
        return Err(ValidationError::InvalidNumber("order_size"));
    }

    let side = Side::from_api_str(required_str(field("order_side"), "order_side")?)
        .ok_or(ValidationError::InvalidEnum("order_side"))?;

    let position_size = money::quantize(
        required_decimal(field("pos_size"), "pos_size")?.abs(),
        QUANTITY_SCALE,
    );
    let position_hint = PositionHint::from_api_str(required_str(field("pos_type"), "pos_type")?)
        .ok_or(ValidationError::InvalidEnum("pos_type"))?;

    let bot_id = parse_bot_id(field("bot_id").ok_or(ValidationError::MissingField("bot_id"))?)?;

    let order_type = match field("type") {
        None => OrderType::Market,
        Some(v) => v
            .as_str()
            .and_then(OrderType::from_api_str)
            .ok_or(ValidationError::InvalidEnum("type"))?,
    };

    let signal_time = parse_time(required_str(field("time"), "time")?)?;

    // Forwarded to the exchange as the client order id.
    let correlation_id = match field("order_id").and_then(value_to_string).filter(|s| !s.is_empty()) {
        Some(id) if !is_valid_client_order_id(&id) => return Err(ValidationError::InvalidIdentifier("order_id")),
        Some(id) => id,
        None => Uuid::new_v4().to_string(),
    };

    Ok(OrderIntent {
        exchange,
        symbol,
        side,
        order_type,
        quantity,
        price,
        position_hint,
        position_size,
        correlation_id,
        bot_id,
        bot_name: field("bot_name").and_then(value_to_string),
        timeframe: field("timeframe").and_then(value_to_string),
        params: field("params").cloned(),
        signal_time,
    })
}

/// Upper-case the ticker and strip the perpetual suffix (`BTCUSDT.P` → `BTCUSDT`).
pub fn normalize_symbol(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    upper
        .strip_suffix(PERPETUAL_SUFFIX)
        .map(str::to_string)
        .unwrap_or(upper)
}

fn required_str<'a>(value: Option<&'a Value>, name: &'static str) -> Result<&'a str, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField(name))?;
    let s = value.as_str().ok_or(ValidationError::InvalidEnum(name))?;
    if s.trim().is_empty() {
        return Err(ValidationError::MissingField(name));
    }
    Ok(s)
}

fn required_decimal(value: Option<&Value>, name: &'static str) -> Result<Decimal, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField(name))?;
    // JSON numbers go through their textual form so no binary float is involved.
    let parsed = match value {
        Value::String(s) => money::parse_decimal(s),
        Value::Number(n) => money::parse_decimal(&n.to_string()),
        _ => None,
    };
    parsed.ok_or(ValidationError::InvalidNumber(name))
}

fn positive_decimal(value: Option<&Value>, name: &'static str) -> Result<Decimal, ValidationError> {
    let d = required_decimal(value, name)?;
    if d <= Decimal::ZERO {
        return Err(ValidationError::InvalidNumber(name));
    }
    Ok(d)
}

fn parse_bot_id(value: &Value) -> Result<i64, ValidationError> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    id.filter(|id| *id > 0)
        .ok_or(ValidationError::InvalidNumber("bot_id"))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, ALERT_TIME_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp("time"))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "exchange": "Binance",
            "symbol": "BTCUSDT.P",
            "order_price": "100.123456789",
            "order_size": "1.0004",
            "order_side": "buy",
            "pos_size": "1.0004",
            "pos_type": "long",
            "bot_id": 7,
            "type": "market",
            "timeframe": "15",
            "params": { "leverage": 5 },
            "time": "2024-05-01T12:30:00Z",
            "order_id": "tv-123"
        })
    }

    #[test]
    fn parses_a_complete_payload() {
        let intent = parse_signal(&payload()).unwrap();

        assert_eq!(intent.exchange, "binance");
        assert_eq!(intent.symbol, "BTCUSDT");
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.order_type, OrderType::Market);
        assert_eq!(intent.price, dec!(100.12345679));
        assert_eq!(intent.quantity, dec!(1.000));
        assert_eq!(intent.position_size, dec!(1.000));
        assert_eq!(intent.position_hint, PositionHint::Long);
        assert_eq!(intent.bot_id, 7);
        assert_eq!(intent.correlation_id, "tv-123");
        assert_eq!(intent.timeframe.as_deref(), Some("15"));
        assert_eq!(intent.params, Some(json!({ "leverage": 5 })));
        assert_eq!(
            intent.signal_time,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn accepts_json_numbers_and_string_bot_id() {
        let mut p = payload();
        p["order_price"] = json!(64000.5);
        p["order_size"] = json!(2);
        p["pos_size"] = json!(0);
        p["pos_type"] = json!("flat");
        p["bot_id"] = json!("12");

        let intent = parse_signal(&p).unwrap();
        assert_eq!(intent.price, dec!(64000.5));
        assert_eq!(intent.quantity, dec!(2));
        assert_eq!(intent.position_size, Decimal::ZERO);
        assert_eq!(intent.position_hint, PositionHint::Flat);
        assert_eq!(intent.bot_id, 12);
    }

    #[test]
    fn generates_correlation_id_when_absent() {
        let mut p = payload();
        p.as_object_mut().unwrap().remove("order_id");
        let intent = parse_signal(&p).unwrap();
        assert!(Uuid::parse_str(&intent.correlation_id).is_ok());
    }

    #[test]
    fn order_ids_unsafe_for_the_exchange_are_rejected() {
        let too_long = "x".repeat(37);
        for bad in ["Long Entry", "id&side=SELL", "a=b", too_long.as_str()] {
            let mut p = payload();
            p["order_id"] = json!(bad);
            assert_eq!(
                parse_signal(&p).unwrap_err(),
                ValidationError::InvalidIdentifier("order_id"),
                "order_id {bad:?}"
            );
        }

        let mut p = payload();
        p["order_id"] = json!("Long_Entry:1h/v2.0");
        assert_eq!(parse_signal(&p).unwrap().correlation_id, "Long_Entry:1h/v2.0");
    }

    #[test]
    fn missing_fields_are_named() {
        for name in ["exchange", "symbol", "order_price", "order_size", "order_side", "pos_size", "pos_type", "bot_id", "time"] {
            let mut p = payload();
            p.as_object_mut().unwrap().remove(name);
            assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::MissingField(name), "field {name}");
        }
    }

    #[test]
    fn non_positive_numbers_are_rejected() {
        let mut p = payload();
        p["order_size"] = json!("0");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidNumber("order_size"));

        let mut p = payload();
        p["order_price"] = json!("-3");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidNumber("order_price"));

        let mut p = payload();
        p["order_size"] = json!("0.0001");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidNumber("order_size"));

        // Positive, but rounds to zero at price precision
        let mut p = payload();
        p["order_price"] = json!("0.000000001");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidNumber("order_price"));

        let mut p = payload();
        p["order_price"] = json!("ten");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidNumber("order_price"));
    }

    #[test]
    fn unknown_enums_are_rejected() {
        let mut p = payload();
        p["order_side"] = json!("hold");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidEnum("order_side"));

        let mut p = payload();
        p["pos_type"] = json!("sideways");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidEnum("pos_type"));

        let mut p = payload();
        p["type"] = json!("stop");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidEnum("type"));
    }

    #[test]
    fn bad_timestamps_and_shapes_are_rejected() {
        let mut p = payload();
        p["time"] = json!("yesterday");
        assert_eq!(parse_signal(&p).unwrap_err(), ValidationError::InvalidTimestamp("time"));

        assert!(matches!(
            parse_signal(&json!([1, 2, 3])),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn rfc3339_time_is_accepted() {
        let mut p = payload();
        p["time"] = json!("2024-05-01T14:30:00+02:00");
        let intent = parse_signal(&p).unwrap();
        assert_eq!(
            intent.signal_time,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn normalize_symbol_strips_perpetual_suffix() {
        assert_eq!(normalize_symbol("ethusdt.p"), "ETHUSDT");
        assert_eq!(normalize_symbol("BTCUSDT"), "BTCUSDT");
    }
}
