use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use crate::models::{Candle, ExchangeCredentials};
use crate::risk::LeverageBracket;

use super::auth::RequestSigner;
use super::types::{
    parse_kline_row, ApiErrorBody, AssetBalance, ExchangePosition, OpenOrder, OrderAck,
    OrderRequest, RawBracketResponse, RawExchangeInfo, RawOrder, RawPositionRisk, RawTicker,
    SymbolRules,
};
use super::{GatewayError, MarketData, OrderGateway};

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for the USDⓈ-M futures API.
///
/// Every call is bounded by `timeout`, both through the reqwest client and an
/// outer `tokio::time::timeout` that also covers reading the body. Nothing is
/// retried here.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    http: Client,
    base_url: String,
    signer: Option<RequestSigner>,
    timeout: Duration,
}

impl ExchangeClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Incomplete credentials are treated as absent.
    pub fn with_credentials(mut self, credentials: Option<ExchangeCredentials>) -> Self {
        self.signer = credentials
            .filter(ExchangeCredentials::is_complete)
            .map(RequestSigner::new);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// HTTP client with the per-call deadline applied at the transport level.
    pub fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder().timeout(timeout).build()
    }

    pub fn has_credentials(&self) -> bool {
        self.signer.is_some()
    }

    fn public(&self, path: &str, params: &[(&str, String)]) -> Result<RequestBuilder, GatewayError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| GatewayError::Url(e.to_string()))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(self.http.get(url))
    }

    fn signed(
        &self,
        method: Method,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<RequestBuilder, GatewayError> {
        let signer = self.signer.as_ref().ok_or(GatewayError::CredentialsMissing)?;
        let query = signer.signed_query(params, Utc::now().timestamp_millis())?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        Ok(self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", signer.api_key()))
    }

    async fn execute<T: DeserializeOwned>(&self, path: &str, req: RequestBuilder) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.timeout, self.execute_inner(req)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::warn!(path, error = %e, "Exchange call failed");
                }
                result
            }
            Err(_) => {
                tracing::warn!(path, timeout_ms = self.timeout.as_millis() as u64, "Exchange call timed out");
                Err(GatewayError::Timeout(self.timeout))
            }
        }
    }

    async fn execute_inner<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, GatewayError> {
        let resp = req.send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            // the URL carries the signed query; keep it out of error text
            GatewayError::Http(e.without_url())
        }
    }
}

/// Translates a non-2xx body into `Rejected`, preferring the exchange's own message.
fn rejection(status: u16, body: &str) -> GatewayError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => GatewayError::Rejected {
            status,
            code: Some(err.code),
            message: err.msg,
        },
        Err(_) => GatewayError::Rejected {
            status,
            code: None,
            message: format!("HTTP {status}"),
        },
    }
}

#[async_trait]
impl OrderGateway for ExchangeClient {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let path = "/fapi/v1/order";
        let req = self.signed(Method::POST, path, order.to_params())?;
        let raw: RawOrder = self.execute(path, req).await?;

        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            order_type = %order.order_type,
            quantity = %order.quantity,
            order_id = raw.order_id,
            "Order placed"
        );
        Ok(raw.into())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), GatewayError> {
        let path = "/fapi/v1/order";
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        let req = self.signed(Method::DELETE, path, params)?;
        let _: serde_json::Value = self.execute(path, req).await?;

        tracing::info!(symbol, order_id, "Order cancelled");
        Ok(())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        let path = "/fapi/v1/openOrders";
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let req = self.signed(Method::GET, path, params)?;
        let raw: Vec<RawOrder> = self.execute(path, req).await?;
        Ok(raw.into_iter().map(OpenOrder::from).collect())
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        let path = "/fapi/v2/positionRisk";
        let req = self.signed(Method::GET, path, Vec::new())?;
        let raw: Vec<RawPositionRisk> = self.execute(path, req).await?;
        Ok(raw
            .into_iter()
            .map(ExchangePosition::from)
            .filter(ExchangePosition::is_open)
            .collect())
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, GatewayError> {
        let path = "/fapi/v1/exchangeInfo";
        let req = self.public(path, &[])?;
        let info: RawExchangeInfo = self.execute(path, req).await?;
        info.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .map(|s| s.rules())
            .ok_or_else(|| GatewayError::Decode(format!("symbol {symbol} not listed in exchangeInfo")))
    }
}

#[async_trait]
impl MarketData for ExchangeClient {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let path = "/fapi/v1/ticker/price";
        let req = self.public(path, &[("symbol", symbol.to_string())])?;
        let ticker: RawTicker = self.execute(path, req).await?;
        Ok(ticker.price)
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, GatewayError> {
        let path = "/fapi/v1/klines";
        let req = self.public(
            path,
            &[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        let rows: Vec<Vec<serde_json::Value>> = self.execute(path, req).await?;
        Ok(rows.iter().filter_map(|row| parse_kline_row(row)).collect())
    }

    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<LeverageBracket>, GatewayError> {
        let path = "/fapi/v1/leverageBracket";
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let req = self.signed(Method::GET, path, params)?;
        let resp: RawBracketResponse = self.execute(path, req).await?;
        Ok(resp
            .into_symbol(symbol)
            .map(|s| s.brackets.into_iter().map(LeverageBracket::from).collect())
            .unwrap_or_default())
    }

    async fn account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError> {
        let path = "/fapi/v2/balance";
        let req = self.signed(Method::GET, path, Vec::new())?;
        self.execute(path, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> ExchangeCredentials {
        ExchangeCredentials::new("test-key", "test-secret")
    }

    fn client(server: &MockServer) -> ExchangeClient {
        ExchangeClient::new(Client::new(), server.uri())
            .with_credentials(Some(creds()))
            .with_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn place_order_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .and(header("X-MBX-APIKEY", "test-key"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("type", "MARKET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orderId": 22542179,
                "symbol": "BTCUSDT",
                "status": "NEW",
                "side": "BUY",
                "type": "MARKET",
                "origQty": "0.010"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let order = OrderRequest::market("BTCUSDT", Side::Buy, Decimal::new(10, 3));
        let ack = client(&server).place_order(&order).await.unwrap();
        assert_eq!(ack.order_id, "22542179");
        assert_eq!(ack.status, "NEW");

        let requests = server.received_requests().await.unwrap();
        let query = requests[0].url.query().unwrap().to_string();
        let (unsigned, signature) = query.split_once("&signature=").unwrap();
        assert!(unsigned.contains("timestamp="));
        assert!(unsigned.contains("recvWindow=5000"));
        assert_eq!(signature, RequestSigner::new(creds()).sign(unsigned).unwrap());
        assert!(!query.contains("test-secret"));
    }

    #[tokio::test]
    async fn account_balance_is_signed_and_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/balance"))
            .and(header("X-MBX-APIKEY", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"accountAlias": "SgsR", "asset": "USDT", "balance": "122.60748611", "availableBalance": "100.5"},
                {"accountAlias": "SgsR", "asset": "BNB", "balance": "0.00000000", "availableBalance": "0"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let balances = client(&server).account_balance().await.unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].asset, "USDT");
        assert_eq!(balances[0].balance, Decimal::new(12260748611, 8));

        let requests = server.received_requests().await.unwrap();
        let query = requests[0].url.query().unwrap_or_default().to_string();
        assert!(query.contains("timestamp="));
        assert!(query.contains("signature="));
    }

    #[tokio::test]
    async fn rejection_carries_exchange_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"code": -2019, "msg": "Margin is insufficient."})),
            )
            .mount(&server)
            .await;

        let order = OrderRequest::market("BTCUSDT", Side::Buy, Decimal::ONE);
        match client(&server).place_order(&order).await {
            Err(GatewayError::Rejected { status, code, message }) => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(-2019));
                assert_eq!(message, "Margin is insufficient.");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejection_without_json_uses_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/price"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        match client(&server).ticker_price("BTCUSDT").await {
            Err(GatewayError::Rejected { status, code, message }) => {
                assert_eq!(status, 502);
                assert_eq!(code, None);
                assert_eq!(message, "HTTP 502");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/price"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"symbol": "BTCUSDT", "price": "1"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = client(&server).with_timeout(Duration::from_millis(50));
        let err = client.ticker_price("BTCUSDT").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn signed_call_without_credentials_fails_fast() {
        let server = MockServer::start().await;
        let client = ExchangeClient::new(Client::new(), server.uri())
            .with_credentials(Some(ExchangeCredentials::new("key", "")));
        assert!(!client.has_credentials());

        let err = client.open_positions().await.unwrap_err();
        assert!(matches!(err, GatewayError::CredentialsMissing));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_positions_skips_flat_symbols() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTCUSDT", "positionAmt": "0.010", "entryPrice": "60000.0",
                 "markPrice": "61000.0", "unRealizedProfit": "10.0", "leverage": "10"},
                {"symbol": "ETHUSDT", "positionAmt": "0.000", "entryPrice": "0.0",
                 "markPrice": "3000.0", "unRealizedProfit": "0.0", "leverage": "20"}
            ])))
            .mount(&server)
            .await;

        let positions = client(&server).open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "BTCUSDT");
        assert_eq!(positions[0].leverage, 10);
    }

    #[tokio::test]
    async fn klines_are_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/klines"))
            .and(query_param("interval", "1h"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                [1_700_000_000_000_i64, "100", "102", "99", "101", "10", 1_700_003_599_999_i64],
                [1_700_003_600_000_i64, "101", "103", "100", "102", "12", 1_700_007_199_999_i64]
            ])))
            .mount(&server)
            .await;

        let candles = client(&server).klines("BTCUSDT", "1h", 2).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, Decimal::from(102));
    }

    #[tokio::test]
    async fn cancel_order_sends_order_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/fapi/v1/order"))
            .and(query_param("orderId", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orderId": 42, "symbol": "BTCUSDT", "status": "CANCELED"
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).cancel_order("BTCUSDT", "42").await.unwrap();
    }

    #[tokio::test]
    async fn symbol_rules_for_unlisted_symbol_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/exchangeInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"symbols": []})))
            .mount(&server)
            .await;

        let err = client(&server).symbol_rules("NOPEUSDT").await.unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn leverage_brackets_accepts_array_form() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/leverageBracket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "ETHUSDT", "brackets": [
                    {"bracket": 1, "initialLeverage": 75, "notionalCap": 10000,
                     "notionalFloor": 0, "maintMarginRatio": "0.0065", "cum": 0}
                ]}
            ])))
            .mount(&server)
            .await;

        let brackets = client(&server).leverage_brackets("ETHUSDT").await.unwrap();
        assert_eq!(brackets.len(), 1);
        assert_eq!(brackets[0].maint_margin_ratio, Decimal::new(65, 4));
    }
}
