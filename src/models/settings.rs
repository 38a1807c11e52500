use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// API key + secret for signed exchange calls.
///
/// `Debug` redacts both fields and the type never implements `Display`, so the
/// values cannot leak through tracing fields or error messages.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ExchangeCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Runtime toggles shared by the live-order path and the background loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    pub live_trading_enabled: bool,
    pub credentials: Option<ExchangeCredentials>,
    pub total_capital: Decimal,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            live_trading_enabled: false,
            credentials: None,
            total_capital: Decimal::from(1_000),
        }
    }
}

impl LiveSettings {
    /// Credentials usable for signing, if any.
    pub fn usable_credentials(&self) -> Option<&ExchangeCredentials> {
        self.credentials.as_ref().filter(|c| c.is_complete())
    }

    /// Live trading is on and credentials are present.
    pub fn is_live(&self) -> bool {
        self.live_trading_enabled && self.usable_credentials().is_some()
    }
}
