use chrono::Utc;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{FillRecord, Order, OrderStatus};

/// Insert a new order row (normally `pending`).
pub async fn insert_order<'e, E: PgExecutor<'e>>(executor: E, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, external_order_id, client_order_id, position_id, bot_id, symbol,
            order_type, side, quantity, entry_price, status, error_message,
            exchange, timeframe, params, created_at, executed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(order.id)
    .bind(&order.external_order_id)
    .bind(&order.client_order_id)
    .bind(order.position_id)
    .bind(order.bot_id)
    .bind(&order.symbol)
    .bind(order.order_type)
    .bind(order.side)
    .bind(order.quantity)
    .bind(order.entry_price)
    .bind(order.status)
    .bind(&order.error_message)
    .bind(&order.exchange)
    .bind(&order.timeframe)
    .bind(&order.params)
    .bind(order.created_at)
    .bind(order.executed_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Record the exchange fill on a pending order. Returns `None` when the order
/// is not pending any more.
pub async fn fill_order<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: Uuid,
    fill: &FillRecord,
) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'filled', position_id = $2, external_order_id = $3,
            quantity = $4, entry_price = $5, executed_at = $6
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(fill.position_id)
    .bind(&fill.external_order_id)
    .bind(fill.quantity)
    .bind(fill.price)
    .bind(fill.executed_at)
    .fetch_optional(executor)
    .await
}

/// Move a pending order to a terminal non-filled status. Returns the number
/// of rows changed.
pub async fn finish_order<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: Uuid,
    status: OrderStatus,
    message: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = $2, error_message = $3, executed_at = $4
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(order_id)
    .bind(status)
    .bind(message)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Move every `pending` order to `error`. Run before serving, when no
/// dispatch can still own one.
pub async fn expire_pending<'e, E: PgExecutor<'e>>(executor: E, message: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = 'error', error_message = $1, executed_at = $2
        WHERE status = 'pending'
        "#,
    )
    .bind(message)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Most recent orders, optionally for one bot.
pub async fn list_orders<'e, E: PgExecutor<'e>>(
    executor: E,
    bot_id: Option<i64>,
    limit: i64,
) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE ($1::BIGINT IS NULL OR bot_id = $1)
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(bot_id)
    .bind(limit)
    .fetch_all(executor)
    .await
}
