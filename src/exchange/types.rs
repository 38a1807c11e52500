use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, Direction, Side};
use crate::risk::LeverageBracket;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Trigger price for stop / take-profit orders.
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            reduce_only: false,
        }
    }

    pub fn limit(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            price: Some(price),
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Reduce-only take-profit that closes `quantity` when `trigger` trades.
    pub fn take_profit(symbol: &str, side: Side, quantity: Decimal, trigger: Decimal) -> Self {
        Self {
            order_type: OrderType::TakeProfitMarket,
            stop_price: Some(trigger),
            reduce_only: true,
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Reduce-only stop that closes `quantity` when `trigger` trades.
    pub fn stop_loss(symbol: &str, side: Side, quantity: Decimal, trigger: Decimal) -> Self {
        Self {
            order_type: OrderType::StopMarket,
            stop_price: Some(trigger),
            reduce_only: true,
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Parameters in the order the order endpoint documents them.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("side".to_string(), self.side.as_str().to_string()),
            ("type".to_string(), self.order_type.as_str().to_string()),
            ("quantity".to_string(), self.quantity.normalize().to_string()),
        ];
        if let Some(price) = self.price {
            params.push(("price".into(), price.normalize().to_string()));
            params.push(("timeInForce".into(), "GTC".into()));
        }
        if let Some(stop) = self.stop_price {
            params.push(("stopPrice".into(), stop.normalize().to_string()));
        }
        if self.reduce_only {
            params.push(("reduceOnly".into(), "true".into()));
        }
        params
    }
}

/// Acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Option<Side>,
    pub order_type: String,
    pub quantity: Decimal,
    pub stop_price: Decimal,
    pub reduce_only: bool,
}

impl OpenOrder {
    pub fn is_stop_market(&self) -> bool {
        self.order_type == OrderType::StopMarket.as_str()
    }
}

/// Order as returned by the order and open-orders endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub side: String,
    #[serde(rename = "type", default)]
    pub order_type: String,
    #[serde(default)]
    pub orig_qty: Decimal,
    #[serde(default)]
    pub stop_price: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
}

impl From<RawOrder> for OrderAck {
    fn from(raw: RawOrder) -> Self {
        Self {
            order_id: raw.order_id.to_string(),
            symbol: raw.symbol,
            status: raw.status,
        }
    }
}

impl From<RawOrder> for OpenOrder {
    fn from(raw: RawOrder) -> Self {
        Self {
            order_id: raw.order_id.to_string(),
            symbol: raw.symbol,
            side: Side::from_api_str(&raw.side),
            order_type: raw.order_type,
            quantity: raw.orig_qty,
            stop_price: raw.stop_price,
            reduce_only: raw.reduce_only,
        }
    }
}

/// `{"code": -2019, "msg": "Margin is insufficient."}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

// ---------------------------------------------------------------------------
// Positions & account
// ---------------------------------------------------------------------------

/// Open position as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed contract quantity; negative for shorts.
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_profit: Decimal,
    pub leverage: u32,
}

impl ExchangePosition {
    pub fn is_open(&self) -> bool {
        !self.position_amt.is_zero()
    }

    pub fn direction(&self) -> Direction {
        if self.position_amt.is_sign_negative() {
            Direction::Short
        } else {
            Direction::Long
        }
    }

    /// Margin implied by quantity, entry and leverage.
    pub fn margin(&self) -> Decimal {
        self.position_amt.abs() * self.entry_price / Decimal::from(self.leverage.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPositionRisk {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub mark_price: Decimal,
    #[serde(default, rename = "unRealizedProfit")]
    pub unrealized_profit: Decimal,
    /// Sent as a string, e.g. `"20"`.
    #[serde(default)]
    pub leverage: String,
}

impl From<RawPositionRisk> for ExchangePosition {
    fn from(raw: RawPositionRisk) -> Self {
        Self {
            symbol: raw.symbol,
            position_amt: raw.position_amt,
            entry_price: raw.entry_price,
            mark_price: raw.mark_price,
            unrealized_profit: raw.unrealized_profit,
            leverage: raw.leverage.trim().parse().unwrap_or(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    pub asset: String,
    pub balance: Decimal,
    #[serde(default)]
    pub available_balance: Decimal,
}

// ---------------------------------------------------------------------------
// Symbol rules (exchangeInfo)
// ---------------------------------------------------------------------------

/// Quantity and price granularity for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolRules {
    pub symbol: String,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
}

impl SymbolRules {
    /// Used when exchangeInfo is unavailable.
    pub fn fallback(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            step_size: Decimal::new(1, 3),
            tick_size: Decimal::new(1, 2),
            min_qty: Decimal::new(1, 3),
        }
    }

    /// Quantity floored to the lot step.
    pub fn round_qty(&self, qty: Decimal) -> Decimal {
        floor_to_increment(qty, self.step_size)
    }

    /// Price rounded to the nearest tick.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        ((price / self.tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            * self.tick_size)
            .normalize()
    }
}

fn floor_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    ((value / increment).floor() * increment).normalize()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<RawSymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<serde_json::Value>,
}

impl RawSymbolInfo {
    fn filter_value(&self, filter_type: &str, key: &str) -> Option<Decimal> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
            .and_then(|f| f.get(key))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    pub fn rules(&self) -> SymbolRules {
        let fallback = SymbolRules::fallback(&self.symbol);
        SymbolRules {
            symbol: self.symbol.clone(),
            step_size: self.filter_value("LOT_SIZE", "stepSize").unwrap_or(fallback.step_size),
            tick_size: self.filter_value("PRICE_FILTER", "tickSize").unwrap_or(fallback.tick_size),
            min_qty: self.filter_value("LOT_SIZE", "minQty").unwrap_or(fallback.min_qty),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RawTicker {
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBracket {
    pub bracket: u32,
    pub initial_leverage: u32,
    pub notional_cap: Decimal,
    pub notional_floor: Decimal,
    pub maint_margin_ratio: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSymbolBrackets {
    pub symbol: String,
    #[serde(default)]
    pub brackets: Vec<RawBracket>,
}

/// The bracket endpoint answers with an object for a single symbol on some
/// deployments and a one-element array on others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBracketResponse {
    Many(Vec<RawSymbolBrackets>),
    One(RawSymbolBrackets),
}

impl RawBracketResponse {
    pub fn into_symbol(self, symbol: &str) -> Option<RawSymbolBrackets> {
        match self {
            RawBracketResponse::One(b) => Some(b),
            RawBracketResponse::Many(all) => all.into_iter().find(|b| b.symbol == symbol),
        }
    }
}

impl From<RawBracket> for LeverageBracket {
    fn from(raw: RawBracket) -> Self {
        Self {
            bracket: raw.bracket,
            initial_leverage: raw.initial_leverage,
            notional_floor: raw.notional_floor,
            notional_cap: raw.notional_cap,
            maint_margin_ratio: raw.maint_margin_ratio,
        }
    }
}

/// One kline row: `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.
pub fn parse_kline_row(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    let field = |i: usize| -> Option<Decimal> {
        match &row[i] {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.to_string().parse().ok(),
            _ => None,
        }
    };
    let open_time: DateTime<Utc> = DateTime::from_timestamp_millis(row[0].as_i64()?)?;
    Some(Candle {
        open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}
