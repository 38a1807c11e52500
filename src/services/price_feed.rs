use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

use crate::api::ws_types::WsMessage;
use crate::db::PositionStore;
use crate::exchange::{ExchangeConnector, MarketData};
use crate::models::PriceSnapshot;
use crate::risk::LeverageBracket;
use crate::services::notifier::Notifier;
use crate::services::settings::SettingsHandle;

/// Latest prices and leverage-bracket schedules for tracked symbols.
#[derive(Debug, Default)]
pub struct PriceBook {
    snapshots: RwLock<HashMap<String, PriceSnapshot>>,
    brackets: RwLock<HashMap<String, Vec<LeverageBracket>>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn price(&self, symbol: &str) -> Option<Decimal> {
        self.snapshots.read().await.get(symbol).map(|s| s.price)
    }

    pub async fn prices(&self) -> HashMap<String, Decimal> {
        self.snapshots
            .read()
            .await
            .iter()
            .map(|(symbol, s)| (symbol.clone(), s.price))
            .collect()
    }

    pub async fn snapshots(&self) -> Vec<PriceSnapshot> {
        let mut all: Vec<PriceSnapshot> = self.snapshots.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub async fn brackets(&self) -> HashMap<String, Vec<LeverageBracket>> {
        self.brackets.read().await.clone()
    }

    pub async fn update(&self, snapshot: PriceSnapshot) {
        self.snapshots.write().await.insert(snapshot.symbol.clone(), snapshot);
    }

    pub async fn set_brackets(&self, symbol: &str, brackets: Vec<LeverageBracket>) {
        self.brackets.write().await.insert(symbol.to_string(), brackets);
    }

    /// Drops entries for symbols no longer tracked.
    pub async fn retain_symbols(&self, symbols: &BTreeSet<String>) {
        self.snapshots.write().await.retain(|s, _| symbols.contains(s));
        self.brackets.write().await.retain(|s, _| symbols.contains(s));
    }
}

/// Fetches a price for every symbol. Brackets need a signed call, so they are
/// only fetched when `with_brackets` is set and not already cached.
pub async fn refresh_once<M: MarketData + ?Sized>(
    book: &PriceBook,
    market: &M,
    symbols: &BTreeSet<String>,
    with_brackets: bool,
) -> Vec<PriceSnapshot> {
    let mut updated = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        match market.ticker_price(symbol).await {
            Ok(price) => {
                let snapshot = PriceSnapshot {
                    symbol: symbol.clone(),
                    price,
                    timestamp: Utc::now(),
                };
                book.update(snapshot.clone()).await;
                updated.push(snapshot);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Price refresh failed");
            }
        }

        if with_brackets && !book.brackets.read().await.contains_key(symbol) {
            match market.leverage_brackets(symbol).await {
                Ok(brackets) => book.set_brackets(symbol, brackets).await,
                Err(e) => {
                    tracing::debug!(symbol = %symbol, error = %e, "Leverage brackets unavailable");
                }
            }
        }
    }

    book.retain_symbols(symbols).await;
    updated
}

pub async fn run_price_feed(
    store: Arc<dyn PositionStore>,
    settings: SettingsHandle,
    connect: ExchangeConnector,
    book: Arc<PriceBook>,
    notifier: Notifier,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(period_secs = period.as_secs(), "Price feed started");

    loop {
        interval.tick().await;

        let positions = match store.list_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list positions for price refresh");
                continue;
            }
        };

        let symbols: BTreeSet<String> = positions.into_iter().map(|p| p.symbol).collect();
        if symbols.is_empty() {
            book.retain_symbols(&symbols).await;
            continue;
        }

        let current = settings.current();
        let credentials = current.usable_credentials();
        let exchange = connect(credentials);
        let updated = refresh_once(&book, &*exchange, &symbols, credentials.is_some()).await;

        tracing::debug!(symbols = symbols.len(), updated = updated.len(), "Prices refreshed");
        if !updated.is_empty() {
            notifier.publish(WsMessage::PriceUpdate(updated));
        }
    }
}
