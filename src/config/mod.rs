use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::exchange::DEFAULT_BASE_URL;
use crate::execution::DEFAULT_STEP_TIMEOUT;
use crate::models::{ExchangeCredentials, LiveSettings};
use crate::risk::CapitalRiskBand;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// In-memory store when unset.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,

    // Exchange (credentials optional; persisted settings take precedence)
    pub exchange_base_url: String,
    pub exchange_credentials: Option<ExchangeCredentials>,
    pub exchange_timeout: Duration,
    pub order_step_timeout: Duration,

    // Risk defaults
    pub live_trading_enabled: bool,
    pub total_capital: Decimal,
    pub risk_floor_pct: Decimal,
    pub risk_ceiling_pct: Decimal,

    // Background loops
    pub reconcile_interval: Duration,
    pub price_refresh_interval: Duration,
    pub advisor_interval: Duration,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    /// Bearer token for the API; auth disabled when unset.
    pub api_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let band = CapitalRiskBand::default();
        Self {
            database_url: None,
            host: "0.0.0.0".into(),
            port: 8080,
            exchange_base_url: DEFAULT_BASE_URL.into(),
            exchange_credentials: None,
            exchange_timeout: Duration::from_secs(10),
            order_step_timeout: DEFAULT_STEP_TIMEOUT,
            live_trading_enabled: false,
            total_capital: Decimal::from(1_000),
            risk_floor_pct: band.floor_pct,
            risk_ceiling_pct: band.ceiling_pct,
            reconcile_interval: Duration::from_secs(60),
            price_refresh_interval: Duration::from_secs(10),
            advisor_interval: Duration::from_secs(300),
            telegram_bot_token: None,
            telegram_chat_id: None,
            api_token: None,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match non_empty(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid ({raw}): {e}")),
        None => Ok(default),
    }
}

fn secs_or(key: &str, default: Duration) -> anyhow::Result<Duration> {
    let secs: u64 = parse_or(key, default.as_secs())?;
    if secs == 0 {
        anyhow::bail!("{key} must be at least 1 second");
    }
    Ok(Duration::from_secs(secs))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let exchange_credentials = match (non_empty("BINANCE_API_KEY"), non_empty("BINANCE_API_SECRET")) {
            (Some(key), Some(secret)) => Some(ExchangeCredentials::new(key, secret)),
            (None, None) => None,
            _ => anyhow::bail!("BINANCE_API_KEY and BINANCE_API_SECRET must be set together"),
        };

        let config = Self {
            database_url: non_empty("DATABASE_URL"),
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: parse_or("PORT", defaults.port)?,

            exchange_base_url: non_empty("BINANCE_BASE_URL").unwrap_or(defaults.exchange_base_url),
            exchange_credentials,
            exchange_timeout: secs_or("EXCHANGE_TIMEOUT_SECS", defaults.exchange_timeout)?,
            order_step_timeout: secs_or("ORDER_STEP_TIMEOUT_SECS", defaults.order_step_timeout)?,

            live_trading_enabled: parse_or("LIVE_TRADING_ENABLED", defaults.live_trading_enabled)?,
            total_capital: parse_or("TOTAL_CAPITAL", defaults.total_capital)?,
            risk_floor_pct: parse_or("RISK_FLOOR_PCT", defaults.risk_floor_pct)?,
            risk_ceiling_pct: parse_or("RISK_CEILING_PCT", defaults.risk_ceiling_pct)?,

            reconcile_interval: secs_or("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval)?,
            price_refresh_interval: secs_or("PRICE_REFRESH_SECS", defaults.price_refresh_interval)?,
            advisor_interval: secs_or("ADVISOR_INTERVAL_SECS", defaults.advisor_interval)?,

            telegram_bot_token: non_empty("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty("TELEGRAM_CHAT_ID"),

            api_token: non_empty("API_TOKEN"),
        };

        if config.total_capital <= Decimal::ZERO {
            anyhow::bail!("TOTAL_CAPITAL must be positive");
        }
        if config.risk_floor_pct <= Decimal::ZERO || config.risk_floor_pct >= config.risk_ceiling_pct {
            anyhow::bail!("RISK_FLOOR_PCT must be positive and below RISK_CEILING_PCT");
        }

        Ok(config)
    }

    pub fn risk_band(&self) -> CapitalRiskBand {
        CapitalRiskBand {
            floor_pct: self.risk_floor_pct,
            ceiling_pct: self.risk_ceiling_pct,
        }
    }

    /// Settings used until the store holds saved ones.
    pub fn default_settings(&self) -> LiveSettings {
        LiveSettings {
            live_trading_enabled: self.live_trading_enabled,
            credentials: self.exchange_credentials.clone(),
            total_capital: self.total_capital,
        }
    }
}
