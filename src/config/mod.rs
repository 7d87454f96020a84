use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::exchange::RetryPolicy;
use crate::execution::DispatcherConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    /// Shared secret every webhook payload must carry. Unset disables the check.
    pub webhook_passphrase: Option<String>,

    // Execution
    pub dry_run: bool,
    pub adapter_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_backoff_factor: u32,
    pub retry_max_delay_ms: u64,
    pub fill_confirm_attempts: u32,
    pub fill_confirm_interval_ms: u64,
    pub exchange_max_sessions: usize,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub notifications_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,

            webhook_passphrase: env::var("WEBHOOK_PASSPHRASE").ok().filter(|s| !s.is_empty()),

            dry_run: env_or("DRY_RUN", true),
            adapter_timeout_secs: env_or("ADAPTER_TIMEOUT_SECS", 10),
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", 1_000),
            retry_backoff_factor: env_or("RETRY_BACKOFF_FACTOR", 2),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", 30_000),
            fill_confirm_attempts: env_or("FILL_CONFIRM_ATTEMPTS", 3),
            fill_confirm_interval_ms: env_or("FILL_CONFIRM_INTERVAL_MS", 500),
            exchange_max_sessions: env_or("EXCHANGE_MAX_SESSIONS", 4),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
            notifications_enabled: env_or("NOTIFICATIONS_ENABLED", false),
        })
    }

    /// Returns true if Telegram notifications are configured and enabled.
    pub fn has_telegram(&self) -> bool {
        self.notifications_enabled && self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            backoff_factor: self.retry_backoff_factor.max(1),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            call_timeout: Duration::from_secs(self.adapter_timeout_secs.max(1)),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            retry: self.retry_policy(),
            fill_confirm_attempts: self.fill_confirm_attempts,
            fill_confirm_interval: Duration::from_millis(self.fill_confirm_interval_ms),
        }
    }

    /// Defaults for tests and embedding, with an explicit database URL.
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".into(),
            port: 0,
            webhook_passphrase: None,
            dry_run: true,
            adapter_timeout_secs: 10,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_backoff_factor: 2,
            retry_max_delay_ms: 30_000,
            fill_confirm_attempts: 3,
            fill_confirm_interval_ms: 500,
            exchange_max_sessions: 4,
            telegram_bot_token: None,
            telegram_chat_id: None,
            notifications_enabled: false,
        }
    }
}

/// Parse an env var, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Unparsable config value, using default");
            default
        }),
        Err(_) => default,
    }
}
