use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::api::auth::secret_matches;
use crate::errors::webhook_error;
use crate::execution::{DispatchOutcome, Transition};
use crate::models::{Order, Position};
use crate::AppState;

#[derive(Serialize)]
pub struct WebhookSuccess {
    pub status: &'static str,
    pub message: String,
    pub order: Order,
    pub position: Position,
    pub realized_pnl: Option<Decimal>,
}

impl From<DispatchOutcome> for WebhookSuccess {
    fn from(outcome: DispatchOutcome) -> Self {
        let verb = match outcome.transition {
            Transition::Opened => "opened",
            Transition::Increased => "increased",
            Transition::Reduced => "reduced",
            Transition::Closed => "closed",
        };
        Self {
            status: "success",
            message: format!(
                "{} {} position {} on {}",
                outcome.order.side, outcome.position.direction, verb, outcome.position.symbol
            ),
            realized_pnl: outcome.realized.map(|r| r.net),
            order: outcome.order,
            position: outcome.position,
        }
    }
}

/// Inbound trade signal.
///
/// The payload is dispatched on its own task so a caller disconnecting
/// mid-flight cannot abandon an order between the exchange call and the
/// commit.
pub async fn receive(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            counter!("signals_rejected").increment(1);
            return webhook_error(StatusCode::BAD_REQUEST, "validation_failure", format!("invalid JSON: {e}"));
        }
    };

    if let Some(expected) = state.config.webhook_passphrase.as_deref() {
        let supplied = payload.get("passphrase").and_then(Value::as_str);
        if !supplied.is_some_and(|s| secret_matches(expected, s)) {
            counter!("signals_rejected").increment(1);
            tracing::warn!("Webhook rejected: bad passphrase");
            return webhook_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid passphrase");
        }
    }

    let dispatcher = Arc::clone(&state.dispatcher);
    let task = tokio::spawn(async move { dispatcher.handle(&payload).await });

    match task.await {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(WebhookSuccess::from(outcome))).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Dispatch task panicked");
            webhook_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "signal processing aborted")
        }
    }
}
