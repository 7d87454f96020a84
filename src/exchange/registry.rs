use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use crate::models::BotAccount;

use super::{AdapterError, BinanceFutures, ExchangeAdapter, PaperExchange};

/// Hands out a ready adapter for a bot's exchange account.
#[async_trait]
pub trait AdapterProvider: Send + Sync {
    async fn adapter_for(&self, account: &BotAccount) -> Result<Arc<dyn ExchangeAdapter>, AdapterError>;
}

/// Builds adapters from account rows and caches one per exchange account.
///
/// Sharing the adapter per account means every bot on that account shares
/// its session pool too.
pub struct ExchangeRegistry {
    dry_run: bool,
    http: Client,
    max_sessions: usize,
    adapters: Mutex<HashMap<i64, Arc<dyn ExchangeAdapter>>>,
}

impl ExchangeRegistry {
    pub fn new(http: Client, dry_run: bool, max_sessions: usize) -> Self {
        Self {
            dry_run,
            http,
            max_sessions,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    fn build(&self, account: &BotAccount) -> Result<Arc<dyn ExchangeAdapter>, AdapterError> {
        if self.dry_run {
            return Ok(Arc::new(PaperExchange::new()));
        }

        match account.exchange.to_ascii_lowercase().as_str() {
            "binance" | "binanceusdm" => Ok(Arc::new(BinanceFutures::new(
                self.http.clone(),
                account.api_key.clone(),
                account.api_secret.clone(),
                account.sandbox_mode,
                self.max_sessions,
            ))),
            "paper" => Ok(Arc::new(PaperExchange::new())),
            other => Err(AdapterError::Unsupported(format!("exchange '{other}'"))),
        }
    }
}

#[async_trait]
impl AdapterProvider for ExchangeRegistry {
    async fn adapter_for(&self, account: &BotAccount) -> Result<Arc<dyn ExchangeAdapter>, AdapterError> {
        let mut adapters = self.adapters.lock().await;
        if let Some(adapter) = adapters.get(&account.account_id) {
            return Ok(Arc::clone(adapter));
        }

        let adapter = self.build(account)?;
        let ready = adapter.initialize().await?;
        tracing::info!(
            account_id = account.account_id,
            exchange = %ready.exchange,
            sandbox = ready.sandbox,
            "Exchange adapter initialized"
        );

        adapters.insert(account.account_id, Arc::clone(&adapter));
        Ok(adapter)
    }
}
