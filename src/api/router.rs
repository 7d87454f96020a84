use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;
use super::auth::require_auth;
use super::handlers;

pub fn create_router(state: AppState) -> Router {
    // Public routes. The webhook authenticates with its payload passphrase.
    let public = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::render))
        .route("/webhook", post(handlers::webhook::receive));

    // Read API, Bearer token required when API_TOKEN is set
    let protected = Router::new()
        // Positions
        .route("/api/positions", get(handlers::positions::list))
        .route("/api/positions/:id", get(handlers::positions::detail))
        // Orders
        .route("/api/orders", get(handlers::orders::list))
        // Bots
        .route("/api/bots/:id/summary", get(handlers::bots::summary))
        .route("/api/bots/:id/exchange-positions", get(handlers::bots::exchange_positions))
        .layer(middleware::from_fn(require_auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
