use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Position;

/// All tracked positions, newest first.
pub async fn list_positions(pool: &PgPool) -> anyhow::Result<Vec<Position>> {
    let positions = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(positions)
}

pub async fn get_position(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Position>> {
    let position = sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(position)
}

/// Insert or fully replace a position by id.
pub async fn upsert_position(pool: &PgPool, position: &Position) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO positions (
            id, symbol, direction, entry_price, leverage, investment_amount,
            total_exposure, take_profits, stop_loss, source, needs_review, orders, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            symbol = EXCLUDED.symbol,
            direction = EXCLUDED.direction,
            entry_price = EXCLUDED.entry_price,
            leverage = EXCLUDED.leverage,
            investment_amount = EXCLUDED.investment_amount,
            total_exposure = EXCLUDED.total_exposure,
            take_profits = EXCLUDED.take_profits,
            stop_loss = EXCLUDED.stop_loss,
            source = EXCLUDED.source,
            needs_review = EXCLUDED.needs_review,
            orders = EXCLUDED.orders
        "#,
    )
    .bind(position.id)
    .bind(&position.symbol)
    .bind(position.direction.as_str())
    .bind(position.entry_price)
    .bind(position.leverage as i32)
    .bind(position.investment_amount)
    .bind(position.total_exposure)
    .bind(Json(&position.take_profits))
    .bind(Json(&position.stop_loss))
    .bind(position.source.as_str())
    .bind(position.needs_review)
    .bind(Json(&position.orders))
    .bind(position.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Returns false when no row matched.
pub async fn delete_position(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM positions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
