use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::Order;
use crate::AppState;

use super::positions::ApiResponse;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub bot_id: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let orders = state.store.list_orders(query.bot_id, limit).await?;
    Ok(ApiResponse::ok(orders))
}
