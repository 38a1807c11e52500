use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::models::{ExchangeCredentials, LiveSettings};

const KEY_LIVE_TRADING: &str = "live_trading_enabled";
const KEY_API_KEY: &str = "exchange_api_key";
const KEY_API_SECRET: &str = "exchange_api_secret";
const KEY_TOTAL_CAPITAL: &str = "total_capital";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
}

pub async fn get_all_entries(pool: &PgPool) -> anyhow::Result<Vec<SettingEntry>> {
    let rows = sqlx::query_as::<_, SettingEntry>(
        "SELECT key, value FROM runtime_settings ORDER BY key",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Batch upsert of key/value entries in one transaction.
pub async fn upsert_entries(pool: &PgPool, entries: &HashMap<&str, String>) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    for (key, value) in entries {
        sqlx::query(
            r#"
            INSERT INTO runtime_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(())
}

/// `None` until settings have been saved once.
pub async fn load_settings(pool: &PgPool) -> anyhow::Result<Option<LiveSettings>> {
    let entries = get_all_entries(pool).await?;
    if entries.is_empty() {
        return Ok(None);
    }
    let map: HashMap<String, String> = entries.into_iter().map(|e| (e.key, e.value)).collect();
    Ok(Some(from_entries(&map)))
}

pub async fn save_settings(pool: &PgPool, settings: &LiveSettings) -> anyhow::Result<()> {
    upsert_entries(pool, &to_entries(settings)).await
}

fn to_entries(settings: &LiveSettings) -> HashMap<&'static str, String> {
    let (key, secret) = settings
        .credentials
        .as_ref()
        .map(|c| (c.api_key.clone(), c.api_secret.clone()))
        .unwrap_or_default();

    HashMap::from([
        (KEY_LIVE_TRADING, settings.live_trading_enabled.to_string()),
        (KEY_API_KEY, key),
        (KEY_API_SECRET, secret),
        (KEY_TOTAL_CAPITAL, settings.total_capital.to_string()),
    ])
}

fn from_entries(map: &HashMap<String, String>) -> LiveSettings {
    let defaults = LiveSettings::default();
    let credentials = match (map.get(KEY_API_KEY), map.get(KEY_API_SECRET)) {
        (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
            Some(ExchangeCredentials::new(key.clone(), secret.clone()))
        }
        _ => None,
    };

    LiveSettings {
        live_trading_enabled: map
            .get(KEY_LIVE_TRADING)
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.live_trading_enabled),
        credentials,
        total_capital: map
            .get(KEY_TOTAL_CAPITAL)
            .and_then(|v| v.parse::<Decimal>().ok())
            .unwrap_or(defaults.total_capital),
    }
}
