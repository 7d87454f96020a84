pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod exchange;
pub mod execution;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod money;
pub mod services;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{BotDirectory, Store};
use crate::exchange::AdapterProvider;
use crate::execution::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub directory: Arc<dyn BotDirectory>,
    pub exchanges: Arc<dyn AdapterProvider>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: AppConfig,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
