//! Signed REST access to the futures exchange.
//!
//! `OrderGateway` covers everything that mutates or reads account state;
//! `MarketData` covers prices, candles and account-level reference data.
//! `ExchangeClient` implements both.

pub mod auth;
pub mod client;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Candle, ExchangeCredentials};
use crate::risk::LeverageBracket;

pub use auth::{AuthError, RequestSigner};
pub use client::{ExchangeClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use types::{
    AssetBalance, ExchangePosition, OpenOrder, OrderAck, OrderRequest, OrderType, SymbolRules,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("exchange credentials are not configured")]
    CredentialsMissing,

    #[error("exchange call timed out after {0:?}")]
    Timeout(Duration),

    #[error("exchange rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid request url: {0}")]
    Url(String),

    #[error("request signing failed: {0}")]
    Signing(#[from] AuthError),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }
}

/// Order placement and account state on the exchange.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), GatewayError>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError>;

    /// Positions with a non-zero quantity.
    async fn open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError>;

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, GatewayError>;
}

/// Prices and reference data.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, GatewayError>;

    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<LeverageBracket>, GatewayError>;

    async fn account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError>;
}

/// Full exchange surface: order routing plus market data.
pub trait Exchange: OrderGateway + MarketData {}

impl<T: OrderGateway + MarketData> Exchange for T {}

/// Builds an exchange handle for the credentials current at call time.
///
/// Operations and loop ticks call this with freshly read settings, so a
/// credential change takes effect on the next use.
pub type ExchangeConnector =
    Arc<dyn Fn(Option<&ExchangeCredentials>) -> Arc<dyn Exchange> + Send + Sync>;

/// Connector producing `ExchangeClient`s that share one HTTP client.
pub fn client_connector(http: reqwest::Client, base_url: String, timeout: Duration) -> ExchangeConnector {
    Arc::new(move |credentials: Option<&ExchangeCredentials>| {
        let client = ExchangeClient::new(http.clone(), base_url.clone())
            .with_credentials(credentials.cloned())
            .with_timeout(timeout);
        Arc::new(client) as Arc<dyn Exchange>
    })
}
