use rust_decimal::Decimal;
use sqlx::PgExecutor;

use crate::models::BotAccount;

/// Active bot joined with its exchange account.
pub async fn find_bot<'e, E: PgExecutor<'e>>(executor: E, bot_id: i64) -> Result<Option<BotAccount>, sqlx::Error> {
    sqlx::query_as::<_, BotAccount>(
        r#"
        SELECT b.id AS bot_id, b.name AS bot_name, a.id AS account_id, a.exchange,
               a.api_key, a.api_secret, a.password, a.sandbox_mode, a.maker_fee, a.taker_fee
        FROM trading_bots b
        JOIN exchange_accounts a ON a.id = b.account_id
        WHERE b.id = $1 AND b.is_active
        "#,
    )
    .bind(bot_id)
    .fetch_optional(executor)
    .await
}

pub async fn get_balance<'e, E: PgExecutor<'e>>(executor: E, account_id: i64) -> Result<Option<Decimal>, sqlx::Error> {
    let row: Option<(Decimal,)> = sqlx::query_as("SELECT balance FROM exchange_accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|r| r.0))
}

/// Add `amount` (possibly negative) to the account balance. Returns rows
/// changed.
pub async fn credit_balance<'e, E: PgExecutor<'e>>(
    executor: E,
    account_id: i64,
    amount: Decimal,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE exchange_accounts SET balance = balance + $2 WHERE id = $1")
        .bind(account_id)
        .bind(amount)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
