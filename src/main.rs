use std::sync::Arc;

use signalbot::api::router::create_router;
use signalbot::config::AppConfig;
use signalbot::db::{self, BotDirectory, PgStore, Store};
use signalbot::exchange::{AdapterProvider, ExchangeRegistry};
use signalbot::execution::Dispatcher;
use signalbot::services::notifier::Notifier;
use signalbot::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);
    let metrics_handle = signalbot::metrics::init_metrics()?;

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database connected, migrations applied");

    let store = Arc::new(PgStore::new(pool));
    let swept = store
        .expire_pending_orders("abandoned: process stopped before the order was resolved")
        .await?;
    if swept > 0 {
        tracing::warn!(count = swept, "Expired pending orders from a previous run, reconcile against the exchange");
    }

    let exchanges: Arc<dyn AdapterProvider> = Arc::new(ExchangeRegistry::new(
        reqwest::Client::new(),
        config.dry_run,
        config.exchange_max_sessions,
    ));
    if config.dry_run {
        tracing::warn!("DRY_RUN enabled, orders fill on the paper exchange");
    }

    let notifier = match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) if config.has_telegram() => {
            tracing::info!("Telegram notifications enabled");
            Some(Arc::new(Notifier::new(token.clone(), chat_id.clone())))
        }
        _ => None,
    };

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone() as Arc<dyn Store>,
        store.clone() as Arc<dyn BotDirectory>,
        exchanges.clone(),
        config.dispatcher_config(),
        notifier,
    ));

    tracing::info!(
        dry_run = config.dry_run,
        retry_attempts = config.retry_max_attempts,
        adapter_timeout_secs = config.adapter_timeout_secs,
        webhook_passphrase = config.webhook_passphrase.is_some(),
        "Signal dispatcher ready"
    );

    let state = AppState {
        store: store.clone(),
        directory: store,
        exchanges,
        dispatcher,
        config,
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
