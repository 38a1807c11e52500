use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::models::ExchangeCredentials;

type HmacSha256 = Hmac<Sha256>;

/// Validity window the exchange grants a signed request, in milliseconds.
pub const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HMAC computation failed: {0}")]
    HmacError(String),

    #[error("query encoding failed: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
}

/// Signs query strings for `USER_DATA` / `TRADE` endpoints.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: ExchangeCredentials,
    recv_window_ms: u64,
}

impl RequestSigner {
    pub fn new(credentials: ExchangeCredentials) -> Self {
        Self {
            credentials,
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
        }
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    /// Value for the `X-MBX-APIKEY` header.
    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// Hex HMAC-SHA256 of `query` keyed by the API secret.
    pub fn sign(&self, query: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .map_err(|e| AuthError::HmacError(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Appends `recvWindow` and `timestamp`, url-encodes the parameters and
    /// returns the query with its `signature` attached.
    pub fn signed_query(
        &self,
        mut params: Vec<(String, String)>,
        timestamp_ms: i64,
    ) -> Result<String, AuthError> {
        if self.recv_window_ms > 0 {
            params.push(("recvWindow".into(), self.recv_window_ms.to_string()));
        }
        params.push(("timestamp".into(), timestamp_ms.to_string()));

        let query = serde_urlencoded::to_string(&params)?;
        let signature = self.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }
}
