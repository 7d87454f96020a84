use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Position, PositionStatus};
use crate::AppState;

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    pub bot_id: Option<i64>,
    pub status: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PositionQuery>,
) -> Result<Json<ApiResponse<Vec<Position>>>, AppError> {
    let status = match query.status.as_deref() {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(
            PositionStatus::from_api_str(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status '{raw}'")))?,
        ),
    };

    let positions = state.store.list_positions(query.bot_id, status).await?;
    Ok(ApiResponse::ok(positions))
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Position>>, AppError> {
    let position = state
        .store
        .get_position(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("position {id}")))?;
    Ok(ApiResponse::ok(position))
}
