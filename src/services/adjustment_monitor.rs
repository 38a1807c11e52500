use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::api::ws_types::WsMessage;
use crate::db::PositionStore;
use crate::exchange::{ExchangeConnector, MarketData};
use crate::models::{AdjustmentOutcome, AdjustmentRecord, AdjustmentSuggestion, Candle, SuggestionIdentity};
use crate::risk::advisor;
use crate::services::notifier::Notifier;
use crate::services::price_feed::PriceBook;
use crate::services::settings::SettingsHandle;

pub const KLINE_INTERVAL: &str = "1h";
pub const KLINE_LIMIT: u32 = 100;
pub const DISMISS_COOLDOWN_HOURS: i64 = 24;

/// How much history is scanned for recent dismissals.
const HISTORY_SCAN: usize = 500;

/// Pending suggestions awaiting a user decision.
#[derive(Debug, Default)]
pub struct SuggestionBook {
    inner: RwLock<BookState>,
}

#[derive(Debug, Default)]
struct BookState {
    pending: Vec<AdjustmentSuggestion>,
    /// Identities dismissed through this book, with the dismissal time.
    dismissed: HashMap<SuggestionIdentity, DateTime<Utc>>,
}

impl SuggestionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<AdjustmentSuggestion> {
        self.inner.read().await.pending.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<AdjustmentSuggestion> {
        self.inner.read().await.pending.iter().find(|s| s.id == id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<AdjustmentSuggestion> {
        let mut inner = self.inner.write().await;
        let index = inner.pending.iter().position(|s| s.id == id)?;
        Some(inner.pending.remove(index))
    }

    /// Removes a suggestion and suppresses its identity for the cooldown.
    ///
    /// The identity is recorded under the same lock as the pending set, so an
    /// advisor pass that started before the dismissal cannot bring it back.
    pub async fn dismiss(&self, id: Uuid) -> Option<AdjustmentSuggestion> {
        let mut inner = self.inner.write().await;
        let index = inner.pending.iter().position(|s| s.id == id)?;
        let suggestion = inner.pending.remove(index);
        inner.dismissed.insert(suggestion.identity(), Utc::now());
        Some(suggestion)
    }

    /// Replaces the pending set with a fresh evaluation.
    ///
    /// A suggestion whose identity was already pending keeps its id, so a client
    /// holding that id can still resolve it. Suppressed identities are dropped,
    /// as are identities dismissed through this book within the cooldown.
    /// Pending suggestions for positions in `carry_over` (not evaluated this
    /// round) are kept as they are.
    pub async fn replace(
        &self,
        fresh: Vec<AdjustmentSuggestion>,
        suppressed: &HashSet<SuggestionIdentity>,
        carry_over: &HashSet<Uuid>,
    ) -> Vec<AdjustmentSuggestion> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - TimeDelta::hours(DISMISS_COOLDOWN_HOURS);
        inner.dismissed.retain(|_, at| *at > cutoff);

        let BookState { pending, dismissed } = &mut *inner;
        let blocked = |identity: &SuggestionIdentity| suppressed.contains(identity) || dismissed.contains_key(identity);
        let previous: HashMap<SuggestionIdentity, Uuid> =
            pending.iter().map(|s| (s.identity(), s.id)).collect();

        let mut next: Vec<AdjustmentSuggestion> = pending
            .iter()
            .filter(|s| carry_over.contains(&s.position_id) && !blocked(&s.identity()))
            .cloned()
            .collect();

        next.extend(
            fresh
                .into_iter()
                .filter(|s| !blocked(&s.identity()))
                .map(|mut s| {
                    if let Some(id) = previous.get(&s.identity()) {
                        s.id = *id;
                    }
                    s
                }),
        );

        *pending = next.clone();
        next
    }

    pub async fn retain_positions(&self, position_ids: &HashSet<Uuid>) {
        let mut inner = self.inner.write().await;
        inner.pending.retain(|s| position_ids.contains(&s.position_id));
        inner.dismissed.retain(|identity, _| position_ids.contains(&identity.position_id));
    }
}

/// Identities dismissed within `cooldown` of `now`.
pub fn dismissed_identities(
    records: &[AdjustmentRecord],
    now: DateTime<Utc>,
    cooldown: TimeDelta,
) -> HashSet<SuggestionIdentity> {
    records
        .iter()
        .filter(|r| r.outcome == AdjustmentOutcome::Dismissed && now - r.resolved_at < cooldown)
        .map(AdjustmentRecord::identity)
        .collect()
}

/// One advisor pass over every tracked position.
pub async fn evaluate_once<M: MarketData + ?Sized>(
    store: &dyn PositionStore,
    market: &M,
    book: &SuggestionBook,
    prices: &PriceBook,
) -> anyhow::Result<Vec<AdjustmentSuggestion>> {
    let positions = store.list_positions().await?;
    let records = store.list_adjustments(HISTORY_SCAN).await?;
    let suppressed = dismissed_identities(&records, Utc::now(), TimeDelta::hours(DISMISS_COOLDOWN_HOURS));

    let mut candles: HashMap<String, Option<Vec<Candle>>> = HashMap::new();
    let mut fresh = Vec::new();
    let mut carry_over = HashSet::new();

    for position in &positions {
        if !candles.contains_key(&position.symbol) {
            let fetched = match market.klines(&position.symbol, KLINE_INTERVAL, KLINE_LIMIT).await {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(symbol = %position.symbol, error = %e, "Kline fetch failed, skipping advisor");
                    None
                }
            };
            candles.insert(position.symbol.clone(), fetched);
        }

        let Some(Some(series)) = candles.get(&position.symbol) else {
            carry_over.insert(position.id);
            continue;
        };

        let live = prices.price(&position.symbol).await;
        let Some(current) = live.or_else(|| series.last().map(|c| c.close)) else {
            carry_over.insert(position.id);
            continue;
        };

        fresh.extend(advisor::evaluate(position, series, current));
    }

    let pending = book.replace(fresh, &suppressed, &carry_over).await;
    let live_ids: HashSet<Uuid> = positions.iter().map(|p| p.id).collect();
    book.retain_positions(&live_ids).await;

    metrics::gauge!("pending_suggestions").set(pending.len() as f64);
    Ok(book.list().await)
}

pub async fn run_adjustment_monitor(
    store: Arc<dyn PositionStore>,
    settings: SettingsHandle,
    connect: ExchangeConnector,
    book: Arc<SuggestionBook>,
    prices: Arc<PriceBook>,
    notifier: Notifier,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(period_secs = period.as_secs(), "Adjustment monitor started");

    loop {
        interval.tick().await;

        let current = settings.current();
        let exchange = connect(current.usable_credentials());

        match evaluate_once(store.as_ref(), &*exchange, &book, &prices).await {
            Ok(pending) => {
                tracing::debug!(pending = pending.len(), "Advisor pass complete");
                notifier.publish(WsMessage::SuggestionsUpdate(pending));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Advisor pass failed");
            }
        }
    }
}
