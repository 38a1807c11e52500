use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use perpdesk::config::AppConfig;
use perpdesk::db::{MemoryStore, PositionStore};
use perpdesk::exchange::{
    AssetBalance, Exchange, ExchangeConnector, ExchangePosition, GatewayError, MarketData, OpenOrder,
    OrderAck, OrderGateway, OrderRequest, OrderType, SymbolRules,
};
use perpdesk::models::{
    Candle, Direction, ExchangeCredentials, LinkedOrders, LiveSettings, Position, PositionSource,
    StopLossLevel, TakeProfitLevel,
};
use perpdesk::risk::LeverageBracket;
use perpdesk::services::adjustment_monitor::SuggestionBook;
use perpdesk::services::notifier::Notifier;
use perpdesk::services::price_feed::PriceBook;
use perpdesk::services::settings::SettingsHandle;
use perpdesk::AppState;

/// In-process exchange double. Records every call; optionally stalls one order type.
#[derive(Default)]
pub struct MockExchange {
    pub remote_positions: Mutex<Vec<ExchangePosition>>,
    pub placed: Mutex<Vec<OrderRequest>>,
    pub cancelled: Mutex<Vec<String>>,
    pub position_calls: AtomicUsize,
    pub kline_calls: AtomicUsize,
    pub hang_on: Option<OrderType>,
    next_id: AtomicU64,
}

#[allow(dead_code)]
impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stalling(order_type: OrderType) -> Self {
        Self {
            hang_on: Some(order_type),
            ..Default::default()
        }
    }

    pub fn with_remote(positions: Vec<ExchangePosition>) -> Self {
        Self {
            remote_positions: Mutex::new(positions),
            ..Default::default()
        }
    }

    pub fn placed_types(&self) -> Vec<OrderType> {
        self.placed.lock().unwrap().iter().map(|o| o.order_type).collect()
    }
}

#[async_trait]
impl OrderGateway for MockExchange {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError> {
        self.placed.lock().unwrap().push(order.clone());
        if self.hang_on == Some(order.order_type) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderAck {
            order_id: id.to_string(),
            symbol: order.symbol.clone(),
            status: "NEW".into(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), GatewayError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        Ok(Vec::new())
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.remote_positions.lock().unwrap().clone())
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, GatewayError> {
        Ok(SymbolRules::fallback(symbol))
    }
}

#[async_trait]
impl MarketData for MockExchange {
    async fn ticker_price(&self, _symbol: &str) -> Result<Decimal, GatewayError> {
        Ok(Decimal::from(100))
    }

    async fn klines(&self, _symbol: &str, _interval: &str, _limit: u32) -> Result<Vec<Candle>, GatewayError> {
        self.kline_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn leverage_brackets(&self, _symbol: &str) -> Result<Vec<LeverageBracket>, GatewayError> {
        Ok(Vec::new())
    }

    async fn account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError> {
        Ok(vec![AssetBalance {
            asset: "USDT".into(),
            balance: Decimal::from(5_000),
            available_balance: Decimal::from(4_000),
        }])
    }
}

/// Connector that hands out the same mock whatever the credentials.
pub fn connector(mock: Arc<MockExchange>) -> ExchangeConnector {
    Arc::new(move |_: Option<&ExchangeCredentials>| mock.clone() as Arc<dyn Exchange>)
}

#[allow(dead_code)]
pub fn live_settings() -> LiveSettings {
    LiveSettings {
        live_trading_enabled: true,
        credentials: Some(ExchangeCredentials::new("test-key", "test-secret")),
        total_capital: Decimal::from(10_000),
    }
}

/// App state over an in-memory store and the given mock exchange.
#[allow(dead_code)]
pub fn test_state(mock: Arc<MockExchange>, settings: LiveSettings, config: AppConfig) -> AppState {
    let store: Arc<dyn PositionStore> = Arc::new(MemoryStore::new());
    AppState {
        store,
        config,
        settings: SettingsHandle::new(settings),
        notifier: Notifier::new(64),
        prices: Arc::new(PriceBook::new()),
        suggestions: Arc::new(SuggestionBook::new()),
        exchange: connector(mock),
        metrics_handle: perpdesk::metrics::detached_handle(),
    }
}

#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        order_step_timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn remote_position(symbol: &str, amt: i64, entry: i64, leverage: u32) -> ExchangePosition {
    ExchangePosition {
        symbol: symbol.into(),
        position_amt: Decimal::from(amt),
        entry_price: Decimal::from(entry),
        mark_price: Decimal::from(entry),
        unrealized_profit: Decimal::ZERO,
        leverage,
    }
}

/// A manual long at 100 with 10x leverage: stop 99, targets 102/104/106.
#[allow(dead_code)]
pub fn seed_position(symbol: &str) -> Position {
    let take_profits = [102, 104, 106]
        .iter()
        .zip([40, 30, 30])
        .enumerate()
        .map(|(i, (price, alloc))| TakeProfitLevel {
            level: (i + 1) as u8,
            price: Decimal::from(*price),
            expected_profit_usd: Decimal::ZERO,
            expected_profit_pct: Decimal::ZERO,
            allocation_pct: Decimal::from(alloc),
            rationale: String::new(),
        })
        .collect();

    Position {
        id: Uuid::new_v4(),
        symbol: symbol.into(),
        direction: Direction::Long,
        entry_price: Decimal::from(100),
        leverage: 10,
        investment_amount: Decimal::from(100),
        total_exposure: Decimal::from(1_000),
        take_profits,
        stop_loss: StopLossLevel {
            price: Decimal::from(99),
            expected_loss_usd: Decimal::from(10),
            expected_loss_pct: Decimal::ONE,
            capital_risk_pct: Decimal::from(10),
            rationale: String::new(),
            partial_exit_strategy: String::new(),
        },
        source: PositionSource::Manual,
        needs_review: false,
        orders: LinkedOrders::default(),
        created_at: Utc::now(),
    }
}
