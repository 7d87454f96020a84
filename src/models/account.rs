use rust_decimal::Decimal;
use sqlx::FromRow;
use std::fmt;

/// A bot joined with the exchange account it trades on.
#[derive(Clone, FromRow)]
pub struct BotAccount {
    pub bot_id: i64,
    pub bot_name: String,
    pub account_id: i64,
    pub exchange: String,
    pub api_key: String,
    pub api_secret: String,
    pub password: Option<String>,
    pub sandbox_mode: bool,
    /// Maker fee in percent (0.02 means 0.02%).
    pub maker_fee: Decimal,
    /// Taker fee in percent.
    pub taker_fee: Decimal,
}

// Credentials stay out of logs.
impl fmt::Debug for BotAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotAccount")
            .field("bot_id", &self.bot_id)
            .field("bot_name", &self.bot_name)
            .field("account_id", &self.account_id)
            .field("exchange", &self.exchange)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("sandbox_mode", &self.sandbox_mode)
            .field("maker_fee", &self.maker_fee)
            .field("taker_fee", &self.taker_fee)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn debug_output_redacts_credentials() {
        let account = BotAccount {
            bot_id: 1,
            bot_name: "b".into(),
            account_id: 2,
            exchange: "binance".into(),
            api_key: "KEY123".into(),
            api_secret: "SECRET456".into(),
            password: None,
            sandbox_mode: true,
            maker_fee: dec!(0.02),
            taker_fee: dec!(0.05),
        };
        let rendered = format!("{account:?}");
        assert!(!rendered.contains("KEY123"));
        assert!(!rendered.contains("SECRET456"));
        assert!(rendered.contains("binance"));
    }
}
