use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::exchange::ExchangePosition;
use crate::models::{BotAccount, BotSummary};
use crate::AppState;

use super::positions::ApiResponse;

async fn find_bot(state: &AppState, bot_id: i64) -> Result<BotAccount, AppError> {
    state
        .directory
        .find_bot(bot_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("bot {bot_id}")))
}

/// Position counts, realized P&L totals and the account balance of one bot.
pub async fn summary(
    State(state): State<AppState>,
    Path(bot_id): Path<i64>,
) -> Result<Json<ApiResponse<BotSummary>>, AppError> {
    let account = find_bot(&state, bot_id).await?;
    let positions = state.store.list_positions(Some(bot_id), None).await?;

    let mut summary = BotSummary::from_positions(bot_id, &positions);
    summary.account_balance = state.store.account_balance(account.account_id).await?;

    Ok(ApiResponse::ok(summary))
}

#[derive(Debug, Deserialize)]
pub struct ExchangePositionQuery {
    /// Comma-separated symbols; all positions when absent.
    pub symbols: Option<String>,
}

/// Positions as the exchange reports them, for reconciliation against the ledger.
pub async fn exchange_positions(
    State(state): State<AppState>,
    Path(bot_id): Path<i64>,
    Query(query): Query<ExchangePositionQuery>,
) -> Result<Json<ApiResponse<Vec<ExchangePosition>>>, AppError> {
    let account = find_bot(&state, bot_id).await?;

    let symbols: Option<Vec<String>> = query.symbols.map(|raw| {
        raw.split(',')
            .map(crate::ingestion::normalize_symbol)
            .filter(|s| !s.is_empty())
            .collect()
    });

    let adapter = state.exchanges.adapter_for(&account).await?;
    let positions = adapter.fetch_positions(symbols.as_deref()).await?;

    Ok(ApiResponse::ok(positions))
}
