use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use crate::AppState;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// Prometheus scrape endpoint.
pub async fn render(State(state): State<AppState>) -> impl IntoResponse {
    // Histograms are only drained on upkeep; do it per scrape.
    state.metrics_handle.run_upkeep();
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], state.metrics_handle.render())
}
