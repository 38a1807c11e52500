use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::db::PositionStore;
use crate::exchange::AssetBalance;
use crate::models::{ExchangeCredentials, LiveSettings};

/// Wallet asset whose balance can seed total capital.
pub const CAPITAL_ASSET: &str = "USDT";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("total capital must be positive, got {0}")]
    NonPositiveCapital(Decimal),

    #[error("both an API key and an API secret are required")]
    IncompleteCredentials,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Partial update from the settings endpoint. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub live_trading_enabled: Option<bool>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    #[serde(default)]
    pub clear_credentials: bool,
    pub total_capital: Option<Decimal>,
}

impl SettingsUpdate {
    pub fn apply(self, mut settings: LiveSettings) -> Result<LiveSettings, SettingsError> {
        if let Some(enabled) = self.live_trading_enabled {
            settings.live_trading_enabled = enabled;
        }

        if let Some(capital) = self.total_capital {
            if capital <= Decimal::ZERO {
                return Err(SettingsError::NonPositiveCapital(capital));
            }
            settings.total_capital = capital;
        }

        if self.clear_credentials {
            settings.credentials = None;
        }

        match (self.api_key, self.api_secret) {
            (None, None) => {}
            (Some(key), Some(secret)) => {
                let credentials = ExchangeCredentials::new(key.trim(), secret.trim());
                if !credentials.is_complete() {
                    return Err(SettingsError::IncompleteCredentials);
                }
                settings.credentials = Some(credentials);
            }
            _ => return Err(SettingsError::IncompleteCredentials),
        }

        Ok(settings)
    }
}

/// What the API reports back. Credentials are reduced to a flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsView {
    pub live_trading_enabled: bool,
    pub credentials_configured: bool,
    pub live: bool,
    pub total_capital: Decimal,
}

impl From<&LiveSettings> for SettingsView {
    fn from(s: &LiveSettings) -> Self {
        Self {
            live_trading_enabled: s.live_trading_enabled,
            credentials_configured: s.usable_credentials().is_some(),
            live: s.is_live(),
            total_capital: s.total_capital,
        }
    }
}

/// Positive wallet balance of `CAPITAL_ASSET`, if the account holds one.
pub fn capital_from_balances(balances: &[AssetBalance]) -> Option<Decimal> {
    balances
        .iter()
        .find(|b| b.asset.eq_ignore_ascii_case(CAPITAL_ASSET))
        .map(|b| b.balance)
        .filter(|b| *b > Decimal::ZERO)
}

/// Current settings plus change notification for the background loops.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<LiveSettings>>,
    // Serializes read-apply-persist-publish so concurrent updates never drop a field.
    writer: Arc<Mutex<()>>,
}

impl SettingsHandle {
    pub fn new(initial: LiveSettings) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Persisted settings if present, otherwise `defaults`.
    pub async fn load(store: &dyn PositionStore, defaults: LiveSettings) -> Self {
        let initial = match store.load_settings().await {
            Ok(Some(saved)) => {
                tracing::info!(
                    live_trading_enabled = saved.live_trading_enabled,
                    credentials_configured = saved.usable_credentials().is_some(),
                    "Loaded persisted settings"
                );
                saved
            }
            Ok(None) => defaults,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load settings, using defaults");
                defaults
            }
        };
        Self::new(initial)
    }

    pub fn current(&self) -> LiveSettings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSettings> {
        self.tx.subscribe()
    }

    /// Validates, persists, then publishes. Nothing is published if persisting fails.
    pub async fn update(
        &self,
        store: &dyn PositionStore,
        update: SettingsUpdate,
    ) -> Result<LiveSettings, SettingsError> {
        let _guard = self.writer.lock().await;
        let next = update.apply(self.current())?;
        store.save_settings(&next).await?;
        self.tx.send_replace(next.clone());

        tracing::info!(
            live_trading_enabled = next.live_trading_enabled,
            credentials_configured = next.usable_credentials().is_some(),
            total_capital = %next.total_capital,
            "Settings updated"
        );
        Ok(next)
    }
}
