use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::StoreError;
use crate::exchange::AdapterError;
use crate::execution::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Exchange error: {0}")]
    Exchange(#[from] AdapterError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".into()),
            AppError::Exchange(e) => {
                tracing::warn!(error = %e, "Exchange call failed");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Internal(other.into()),
        }
    }
}

/// Webhook failure body: `{status: "error", code, message}`.
#[derive(Serialize)]
struct WebhookErrorBody<'a> {
    status: &'static str,
    code: &'a str,
    message: String,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Signal failed");
        }

        (
            status,
            Json(WebhookErrorBody {
                status: "error",
                code: self.code(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Error response for a webhook rejected before dispatch.
pub fn webhook_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(WebhookErrorBody {
            status: "error",
            code,
            message: message.into(),
        }),
    )
        .into_response()
}
