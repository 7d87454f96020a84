use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Position, PositionStatus};

/// The open position for (bot, symbol), row-locked for the rest of the
/// transaction.
pub async fn lock_open_position<'e, E: PgExecutor<'e>>(
    executor: E,
    bot_id: i64,
    symbol: &str,
) -> Result<Option<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE bot_id = $1 AND symbol = $2 AND status = 'open' FOR UPDATE",
    )
    .bind(bot_id)
    .bind(symbol)
    .fetch_optional(executor)
    .await
}

pub async fn find_open_position<'e, E: PgExecutor<'e>>(
    executor: E,
    bot_id: i64,
    symbol: &str,
) -> Result<Option<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE bot_id = $1 AND symbol = $2 AND status = 'open'",
    )
    .bind(bot_id)
    .bind(symbol)
    .fetch_optional(executor)
    .await
}

pub async fn get_position<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<Option<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Positions newest first, filtered by bot and status when given.
pub async fn list_positions<'e, E: PgExecutor<'e>>(
    executor: E,
    bot_id: Option<i64>,
    status: Option<PositionStatus>,
) -> Result<Vec<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>(
        r#"
        SELECT * FROM positions
        WHERE ($1::BIGINT IS NULL OR bot_id = $1)
          AND ($2::TEXT IS NULL OR status = $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(bot_id)
    .bind(status.map(|s| s.to_string()))
    .fetch_all(executor)
    .await
}

pub async fn insert_position<'e, E: PgExecutor<'e>>(executor: E, position: &Position) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO positions (
            id, bot_id, symbol, direction, status, position_size, initial_size,
            average_entry_price, exit_price, profit_loss, percent_profit_loss,
            created_at, closed_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(position.id)
    .bind(position.bot_id)
    .bind(&position.symbol)
    .bind(position.direction)
    .bind(position.status)
    .bind(position.position_size)
    .bind(position.initial_size)
    .bind(position.average_entry_price)
    .bind(position.exit_price)
    .bind(position.profit_loss)
    .bind(position.percent_profit_loss)
    .bind(position.created_at)
    .bind(position.closed_at)
    .bind(position.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Overwrite the mutable columns of an open position. Returns rows changed;
/// zero means the row is missing or already closed.
pub async fn update_open_position<'e, E: PgExecutor<'e>>(executor: E, position: &Position) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE positions
        SET status = $2, position_size = $3, initial_size = $4, average_entry_price = $5,
            exit_price = $6, profit_loss = $7, percent_profit_loss = $8,
            closed_at = $9, updated_at = $10
        WHERE id = $1 AND status = 'open'
        "#,
    )
    .bind(position.id)
    .bind(position.status)
    .bind(position.position_size)
    .bind(position.initial_size)
    .bind(position.average_entry_price)
    .bind(position.exit_price)
    .bind(position.profit_loss)
    .bind(position.percent_profit_loss)
    .bind(position.closed_at)
    .bind(position.updated_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
