use serde_json::json;

use crate::execution::ledger::RealizedPnl;
use crate::models::{Order, Position};

/// Telegram notification service. Failures are logged but never block the main flow.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }

    /// Send a Telegram message. Failures are logged as warnings.
    pub async fn send(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown",
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    tracing::warn!(
                        status = %resp.status(),
                        "Telegram sendMessage returned non-2xx"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send Telegram notification");
            }
        }
    }
}

/// Format a filled order that opened or changed a position.
pub fn format_order_filled(order: &Order, bot_name: &str) -> String {
    format!(
        "*Order Filled*\nBot: {}\nSymbol: `{}`\nSide: {}\nSize: {} @ {}",
        bot_name, order.symbol, order.side, order.quantity, order.entry_price,
    )
}

/// Format a closed position with its realized result.
pub fn format_position_closed(position: &Position, realized: &RealizedPnl, bot_name: &str) -> String {
    let exit = position
        .exit_price
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".into());

    format!(
        "*Position Closed*\nBot: {}\nSymbol: `{}`\nDirection: {}\nSize: {}\nEntry: {}\nExit: {}\nFees: {}\nP&L: {} ({}%)",
        bot_name,
        position.symbol,
        position.direction,
        position.initial_size,
        position.average_entry_price.normalize(),
        exit,
        (realized.entry_fee + realized.exit_fee).round_dp(4),
        realized.net,
        realized.percent,
    )
}

/// Format an order that ended in error or was cancelled.
pub fn format_order_failed(order: &Order, error: &str) -> String {
    format!(
        "*Order Failed*\nSymbol: `{}`\nSide: {}\nSize: {}\nExchange: {}\nError: {}",
        order.symbol, order.side, order.quantity, order.exchange, error,
    )
}
