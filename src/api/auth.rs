use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::AppError;

/// Compare a presented secret with the configured one in constant time.
///
/// Both sides are reduced to fixed-length HMAC tags so neither the content
/// nor the length of `expected` leaks through timing.
pub fn secret_matches(expected: &str, presented: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(expected.as_bytes());
    let tag = mac.finalize().into_bytes();

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(presented.as_bytes());
    mac.verify_slice(&tag).is_ok()
}

/// Bearer-token guard for the read API.
///
/// With `API_TOKEN` set, requests must carry `Authorization: Bearer <token>`.
/// Unset or empty disables the check.
pub async fn require_auth(req: Request, next: Next) -> Response {
    let expected = std::env::var("API_TOKEN").unwrap_or_default();
    if expected.is_empty() {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented.is_some_and(|token| secret_matches(&expected, token)) {
        next.run(req).await
    } else {
        tracing::debug!(path = %req.uri().path(), "Rejected unauthenticated API request");
        AppError::Unauthorized.into_response()
    }
}
