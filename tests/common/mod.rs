use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use signalbot::db::{BotDirectory, MemoryStore, Store};
use signalbot::exchange::{
    AdapterError, AdapterProvider, AdapterReady, CancelAck, ExchangeAdapter, ExchangeOrderStatus, ExchangePosition,
    Fill, OrderRequest, OrderState, RetryPolicy,
};
use signalbot::execution::{Dispatcher, DispatcherConfig};
use signalbot::models::BotAccount;

pub const BOT_ID: i64 = 7;
pub const ACCOUNT_ID: i64 = 3;

/// A bot on an account with 0.02% maker and 0.05% taker fees.
#[allow(dead_code)]
pub fn bot_account(bot_id: i64, account_id: i64) -> BotAccount {
    BotAccount {
        bot_id,
        bot_name: format!("bot-{bot_id}"),
        account_id,
        exchange: "binance".into(),
        api_key: "test-key".into(),
        api_secret: "test-secret".into(),
        password: None,
        sandbox_mode: true,
        maker_fee: dec!(0.02),
        taker_fee: dec!(0.05),
    }
}

/// Memory store seeded with `BOT_ID` on `ACCOUNT_ID` holding 1000.
#[allow(dead_code)]
pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.add_bot(bot_account(BOT_ID, ACCOUNT_ID), dec!(1000));
    store
}

/// Retry and confirmation timings shrunk to milliseconds.
#[allow(dead_code)]
pub fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2,
            max_delay: Duration::from_millis(5),
            call_timeout: Duration::from_millis(200),
        },
        fill_confirm_attempts: 2,
        fill_confirm_interval: Duration::from_millis(1),
    }
}

#[allow(dead_code)]
pub fn dispatcher(store: &MemoryStore, exchange: Arc<dyn ExchangeAdapter>) -> Dispatcher {
    Dispatcher::new(
        Arc::new(store.clone()) as Arc<dyn Store>,
        Arc::new(store.clone()) as Arc<dyn BotDirectory>,
        Arc::new(StaticAdapters(exchange)),
        fast_config(),
        None,
    )
}

/// A webhook payload as an alert template would send it.
#[allow(dead_code)]
pub fn signal(side: &str, size: &str, price: &str, pos_type: &str, pos_size: &str) -> Value {
    json!({
        "exchange": "binance",
        "symbol": "BTCUSDT.P",
        "order_price": price,
        "order_size": size,
        "order_side": side,
        "pos_size": pos_size,
        "pos_type": pos_type,
        "bot_id": BOT_ID,
        "type": "market",
        "timeframe": "1h",
        "time": "2024-03-01T12:00:00Z",
    })
}

/// Hands the same adapter to every account.
pub struct StaticAdapters(pub Arc<dyn ExchangeAdapter>);

#[async_trait]
impl AdapterProvider for StaticAdapters {
    async fn adapter_for(&self, _account: &BotAccount) -> Result<Arc<dyn ExchangeAdapter>, AdapterError> {
        Ok(Arc::clone(&self.0))
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Exchange double with scripted responses.
///
/// Without a script, orders fill in full at the requested price and
/// `fetch_order` returns the last known state.
#[derive(Default)]
pub struct ScriptedExchange {
    place_script: Mutex<VecDeque<Result<Fill, AdapterError>>>,
    fetch_script: Mutex<VecDeque<Result<OrderState, AdapterError>>>,
    known: Mutex<HashMap<String, OrderState>>,
    by_client_id: Mutex<HashMap<String, String>>,
    land_next_place: Mutex<bool>,
    on_next_place: Mutex<Option<Hook>>,
    place_delay: Mutex<Duration>,
    pub place_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
    pub positions: Mutex<Vec<ExchangePosition>>,
}

#[allow(dead_code)]
impl ScriptedExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_place(&self, response: Result<Fill, AdapterError>) {
        self.place_script.lock().unwrap().push_back(response);
    }

    pub fn script_fetch(&self, response: Result<OrderState, AdapterError>) {
        self.fetch_script.lock().unwrap().push_back(response);
    }

    /// Run `hook` when the next order reaches the exchange.
    pub fn on_next_place(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_next_place.lock().unwrap() = Some(Box::new(hook));
    }

    /// The next order executes on the exchange even if the scripted
    /// response reports a failure.
    pub fn land_next_place(&self) {
        *self.land_next_place.lock().unwrap() = true;
    }

    pub fn set_place_delay(&self, delay: Duration) {
        *self.place_delay.lock().unwrap() = delay;
    }

    pub fn places(&self) -> usize {
        self.place_calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
pub fn order_state(id: &str, status: ExchangeOrderStatus, filled: Decimal, price: Option<Decimal>) -> OrderState {
    OrderState {
        exchange_order_id: id.into(),
        status,
        filled_quantity: filled,
        average_price: price,
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedExchange {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn initialize(&self) -> Result<AdapterReady, AdapterError> {
        Ok(AdapterReady {
            exchange: "scripted".into(),
            sandbox: true,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, AdapterError> {
        let n = self.place_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.place_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let hook = self.on_next_place.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        let default_fill = order_state(
            &format!("ex-{n}"),
            ExchangeOrderStatus::Filled,
            request.quantity,
            request.price,
        );
        let scripted = self.place_script.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| Ok(default_fill.clone()));

        let landed = match &result {
            Ok(state) => Some(state.clone()),
            Err(_) if std::mem::take(&mut *self.land_next_place.lock().unwrap()) => Some(default_fill),
            Err(_) => None,
        };
        if let Some(state) = landed {
            self.by_client_id
                .lock()
                .unwrap()
                .insert(request.client_order_id.clone(), state.exchange_order_id.clone());
            self.known
                .lock()
                .unwrap()
                .insert(state.exchange_order_id.clone(), state);
        }
        result
    }

    async fn fetch_order_by_client_id(&self, client_order_id: &str, _symbol: &str) -> Result<OrderState, AdapterError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let exchange_order_id = self.by_client_id.lock().unwrap().get(client_order_id).cloned();
        exchange_order_id
            .and_then(|id| self.known.lock().unwrap().get(&id).cloned())
            .ok_or_else(|| AdapterError::NotFound(client_order_id.into()))
    }

    async fn fetch_order(&self, exchange_order_id: &str, _symbol: &str) -> Result<OrderState, AdapterError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.fetch_script.lock().unwrap().pop_front();
        if let Some(response) = scripted {
            return response;
        }
        self.known
            .lock()
            .unwrap()
            .get(exchange_order_id)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(exchange_order_id.into()))
    }

    async fn cancel_order(&self, exchange_order_id: &str, _symbol: &str) -> Result<CancelAck, AdapterError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CancelAck {
            exchange_order_id: exchange_order_id.into(),
        })
    }

    async fn fetch_positions(&self, symbols: Option<&[String]>) -> Result<Vec<ExchangePosition>, AdapterError> {
        let positions = self.positions.lock().unwrap().clone();
        Ok(positions
            .into_iter()
            .filter(|p| symbols.map_or(true, |s| s.contains(&p.symbol)))
            .collect())
    }
}
