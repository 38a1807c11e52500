use sqlx::PgPool;

use crate::models::AdjustmentRecord;

/// Append a resolved suggestion. Returns false if `(suggestion_id, outcome)` was already recorded.
pub async fn insert_record(pool: &PgPool, record: &AdjustmentRecord) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO adjustment_history (
            suggestion_id, position_id, symbol, kind, rule, outcome,
            previous_level, proposed_level, resolved_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (suggestion_id, outcome) DO NOTHING
        "#,
    )
    .bind(record.suggestion_id)
    .bind(record.position_id)
    .bind(&record.symbol)
    .bind(record.kind.as_str())
    .bind(record.rule.as_str())
    .bind(record.outcome.as_str())
    .bind(record.previous_level)
    .bind(record.proposed_level)
    .bind(record.resolved_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Most recent records first.
pub async fn list_records(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<AdjustmentRecord>> {
    let records = sqlx::query_as::<_, AdjustmentRecord>(
        "SELECT * FROM adjustment_history ORDER BY resolved_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}
