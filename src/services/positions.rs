//! Position entry, deletion and adjustment resolution.
//!
//! Every flow commits locally first. When live trading is active the exchange
//! side runs afterwards in a spawned task; its outcome is reported through the
//! notifier and linked back onto a freshly read record.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::ws_types::WsMessage;
use crate::exchange::{Exchange, MarketData};
use crate::execution::{
    size_position, LiveOrderOrchestrator, OrderStep, PlacementReport, SizingError, SizingInput, SizingResult,
    StepStatus,
};
use crate::models::position::{PositionError, MAX_LEVERAGE};
use crate::models::{
    AdjustmentKind, AdjustmentOutcome, AdjustmentRecord, AdjustmentSuggestion, Candle, Direction,
    LinkedOrders, Position, PositionSource,
};
use crate::risk::liquidation::{self, LiquidationEstimate};
use crate::risk::{calculate_levels, CapitalRiskBand, LevelError, LevelInputs, RiskLevels};
use crate::services::adjustment_monitor::{KLINE_INTERVAL, KLINE_LIMIT};
use crate::services::notifier::Notifier;
use crate::AppState;

const DEFAULT_RISK_PCT: Decimal = Decimal::ONE;

#[derive(Debug, Error)]
pub enum PositionServiceError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error(transparent)]
    Levels(#[from] LevelError),

    #[error(transparent)]
    Invalid(#[from] PositionError),

    #[error(transparent)]
    Sizing(#[from] SizingError),

    #[error("position {0} not found")]
    PositionNotFound(Uuid),

    #[error("suggestion {0} not found")]
    SuggestionNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPosition {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub investment_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewRequest {
    #[serde(flatten)]
    pub position: NewPosition,
    /// Percent of total capital put at risk; defaults to 1%.
    #[serde(default)]
    pub risk_pct: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionPreview {
    pub position: Position,
    pub levels: RiskLevels,
    pub sizing: SizingResult,
    pub liquidation: LiquidationEstimate,
}

/// Result of an accepted entry or adjustment. `sync` is the remote phase, if one was started.
pub struct Committed {
    pub position: Position,
    pub sync: Option<JoinHandle<PlacementReport>>,
}

/// Input checks that need no market data. Returns the normalized symbol.
pub fn validate_request(request: &NewPosition) -> Result<String, PositionServiceError> {
    let symbol = request.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(PositionServiceError::EmptySymbol);
    }
    if request.entry_price <= Decimal::ZERO {
        return Err(LevelError::NonPositiveEntry(request.entry_price).into());
    }
    if request.investment_amount <= Decimal::ZERO {
        return Err(LevelError::NonPositiveInvestment(request.investment_amount).into());
    }
    if request.leverage == 0 || request.leverage > MAX_LEVERAGE {
        return Err(LevelError::LeverageOutOfRange(request.leverage).into());
    }
    Ok(symbol)
}

/// Builds an unsaved position with calculated exits.
pub fn build_position(
    request: &NewPosition,
    candles: &[Candle],
    band: CapitalRiskBand,
) -> Result<(Position, RiskLevels), PositionServiceError> {
    let symbol = validate_request(request)?;

    let levels = calculate_levels(&LevelInputs {
        entry_price: request.entry_price,
        direction: request.direction,
        leverage: request.leverage,
        investment_amount: request.investment_amount,
        candles,
        band,
    })?;

    let position = Position {
        id: Uuid::new_v4(),
        symbol,
        direction: request.direction,
        entry_price: request.entry_price,
        leverage: request.leverage,
        investment_amount: request.investment_amount,
        total_exposure: request.investment_amount * Decimal::from(request.leverage),
        take_profits: levels.take_profits.clone(),
        stop_loss: levels.stop_loss.clone(),
        source: PositionSource::Manual,
        needs_review: false,
        orders: LinkedOrders::default(),
        created_at: Utc::now(),
    };
    position.validate()?;

    Ok((position, levels))
}

/// Recent candles for level calculation. Failures degrade to an empty series.
async fn fetch_candles<M: MarketData + ?Sized>(market: &M, symbol: &str) -> Vec<Candle> {
    match market.klines(symbol, KLINE_INTERVAL, KLINE_LIMIT).await {
        Ok(candles) => candles,
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "Kline fetch failed, levels will use fallback ATR");
            Vec::new()
        }
    }
}

/// Levels, sizing and liquidation for a prospective position, without persisting.
pub async fn preview_position(state: &AppState, request: &PreviewRequest) -> Result<PositionPreview, PositionServiceError> {
    let symbol = validate_request(&request.position)?;
    let settings = state.settings.current();
    let exchange = (state.exchange)(settings.usable_credentials());
    let candles = fetch_candles(&*exchange, &symbol).await;

    let (position, levels) = build_position(&request.position, &candles, state.config.risk_band())?;

    let sizing = size_position(&SizingInput {
        capital: settings.total_capital,
        risk_pct: request.risk_pct.unwrap_or(DEFAULT_RISK_PCT),
        entry_price: position.entry_price,
        stop_price: position.stop_loss.price,
        leverage: position.leverage,
        target_price: position.take_profits.first().map(|tp| tp.price),
    })?;

    let brackets = state.prices.brackets().await;
    let schedule = brackets.get(&position.symbol).map(Vec::as_slice).unwrap_or(&[]);
    let liquidation = liquidation::estimate(&position, position.entry_price, schedule);

    Ok(PositionPreview {
        position,
        levels,
        sizing,
        liquidation,
    })
}

/// Two-phase entry: the position is saved before any exchange call.
pub async fn open_position(state: &AppState, request: NewPosition) -> Result<Committed, PositionServiceError> {
    let symbol = validate_request(&request)?;
    let settings = state.settings.current();
    let exchange = (state.exchange)(settings.usable_credentials());
    let candles = fetch_candles(&*exchange, &symbol).await;

    let (position, levels) = build_position(&request, &candles, state.config.risk_band())?;
    state.store.save_position(&position).await?;

    tracing::info!(
        position_id = %position.id,
        symbol = %position.symbol,
        direction = %position.direction,
        leverage = position.leverage,
        stop = %position.stop_loss.price,
        atr_degraded = levels.atr.degraded,
        "Position opened"
    );
    refresh_position_gauge(state).await;
    state.notifier.publish(WsMessage::PositionUpdate(position.clone()));
    state.notifier.success(
        format!("{} opened", position.symbol),
        format!(
            "{} {}x, stop {} ({}% of margin)",
            position.direction,
            position.leverage,
            position.stop_loss.price.round_dp(4),
            position.stop_loss.capital_risk_pct.round_dp(2),
        ),
    );

    let sync = if !settings.live_trading_enabled {
        None
    } else if settings.usable_credentials().is_none() {
        warn_missing_credentials(&state.notifier);
        None
    } else {
        let state = state.clone();
        let placed = position.clone();
        Some(tokio::spawn(async move { sync_position_orders(&state, exchange, &placed).await }))
    };

    Ok(Committed { position, sync })
}

/// Places the exchange orders for a saved position and links their ids.
pub async fn sync_position_orders(state: &AppState, exchange: Arc<dyn Exchange>, position: &Position) -> PlacementReport {
    let orchestrator = LiveOrderOrchestrator::new(&*exchange, state.config.order_step_timeout);
    let report = orchestrator.place_position_orders(position).await;
    notify_steps(&state.notifier, &report);

    let linked = report.linked_orders(position.take_profits.len());
    if let Err(e) = link_orders(state, position.id, |p| p.orders = linked).await {
        tracing::warn!(position_id = %position.id, error = %e, "Failed to link exchange orders");
    }
    report
}

/// Removes a position locally. Exchange orders are left untouched.
pub async fn delete_position(state: &AppState, id: Uuid) -> Result<(), PositionServiceError> {
    if !state.store.delete_position(id).await? {
        return Err(PositionServiceError::PositionNotFound(id));
    }
    forget_position(state, id).await;
    refresh_position_gauge(state).await;
    tracing::info!(position_id = %id, "Position deleted");
    Ok(())
}

/// Accepts a pending suggestion: updates the stored level, records history,
/// then mirrors the change on the exchange when live trading is active.
pub async fn accept_suggestion(state: &AppState, id: Uuid) -> Result<Committed, PositionServiceError> {
    let suggestion = state
        .suggestions
        .get(id)
        .await
        .ok_or(PositionServiceError::SuggestionNotFound(id))?;

    let Some(before) = state.store.get_position(suggestion.position_id).await? else {
        state.suggestions.remove(id).await;
        return Err(PositionServiceError::PositionNotFound(suggestion.position_id));
    };

    let mut position = before.clone();
    let tp_index = take_profit_index(&position, &suggestion);
    let note = format!("Adjusted: {}", suggestion.rationale);
    match suggestion.kind {
        AdjustmentKind::StopLoss => {
            let market = market_price(state, &position).await;
            position.move_stop(suggestion.proposed_level, market, &note)?;
        }
        AdjustmentKind::TakeProfit => {
            position.move_take_profit(tp_index, suggestion.proposed_level, &note);
        }
    }
    state.store.save_position(&position).await?;
    record_outcome(state, &suggestion, AdjustmentOutcome::Accepted).await?;

    tracing::info!(
        position_id = %position.id,
        kind = %suggestion.kind,
        rule = %suggestion.rule,
        from = %suggestion.current_level,
        to = %suggestion.proposed_level,
        "Adjustment accepted"
    );
    state.notifier.publish(WsMessage::PositionUpdate(position.clone()));
    state.notifier.success(
        format!("{} {} adjusted", position.symbol, suggestion.kind),
        format!("{} → {}", suggestion.current_level.round_dp(4), suggestion.proposed_level.round_dp(4)),
    );

    let settings = state.settings.current();
    let sync = if !settings.live_trading_enabled {
        None
    } else if settings.usable_credentials().is_none() {
        warn_missing_credentials(&state.notifier);
        None
    } else {
        let exchange = (state.exchange)(settings.usable_credentials());
        let state = state.clone();
        Some(tokio::spawn(async move {
            apply_on_exchange(&state, exchange, &before, &suggestion, tp_index).await
        }))
    };

    Ok(Committed { position, sync })
}

async fn apply_on_exchange(
    state: &AppState,
    exchange: Arc<dyn Exchange>,
    before: &Position,
    suggestion: &AdjustmentSuggestion,
    tp_index: usize,
) -> PlacementReport {
    let orchestrator = LiveOrderOrchestrator::new(&*exchange, state.config.order_step_timeout);
    let report = orchestrator.apply_adjustment(before, suggestion).await;
    notify_steps(&state.notifier, &report);

    let result = match suggestion.kind {
        AdjustmentKind::StopLoss => {
            let cancelled = report
                .steps
                .iter()
                .any(|s| s.step == OrderStep::CancelStop && s.status.is_success());
            let replacement = report.order_id(OrderStep::StopLoss).map(String::from);
            link_orders(state, before.id, move |p| {
                if cancelled {
                    p.orders.stop_loss = replacement;
                }
            })
            .await
        }
        AdjustmentKind::TakeProfit => {
            let level = before.take_profits.get(tp_index).map(|tp| tp.level).unwrap_or(1);
            let placed = report.order_id(OrderStep::TakeProfit(level)).map(String::from);
            link_orders(state, before.id, move |p| {
                if let Some(id) = placed {
                    if p.orders.take_profits.len() <= tp_index {
                        p.orders.take_profits.resize(tp_index + 1, None);
                    }
                    p.orders.take_profits[tp_index] = Some(id);
                }
            })
            .await
        }
    };

    if let Err(e) = result {
        tracing::warn!(position_id = %before.id, error = %e, "Failed to link adjusted orders");
    }
    report
}

pub async fn dismiss_suggestion(state: &AppState, id: Uuid) -> Result<AdjustmentSuggestion, PositionServiceError> {
    let suggestion = state
        .suggestions
        .dismiss(id)
        .await
        .ok_or(PositionServiceError::SuggestionNotFound(id))?;

    record_outcome(state, &suggestion, AdjustmentOutcome::Dismissed).await?;
    tracing::info!(
        position_id = %suggestion.position_id,
        kind = %suggestion.kind,
        rule = %suggestion.rule,
        "Adjustment dismissed"
    );
    state
        .notifier
        .publish(WsMessage::SuggestionsUpdate(state.suggestions.list().await));
    Ok(suggestion)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Live price for a position's symbol: the feed first, then the exchange ticker,
/// then entry when neither is reachable.
async fn market_price(state: &AppState, position: &Position) -> Decimal {
    if let Some(price) = state.prices.price(&position.symbol).await {
        return price;
    }
    let exchange = (state.exchange)(state.settings.current().usable_credentials());
    match exchange.ticker_price(&position.symbol).await {
        Ok(price) => price,
        Err(e) => {
            tracing::warn!(symbol = %position.symbol, error = %e, "No live price, checking stop against entry");
            position.entry_price
        }
    }
}

fn take_profit_index(position: &Position, suggestion: &AdjustmentSuggestion) -> usize {
    position
        .take_profits
        .iter()
        .position(|tp| tp.price == suggestion.current_level)
        .unwrap_or(0)
}

async fn record_outcome(
    state: &AppState,
    suggestion: &AdjustmentSuggestion,
    outcome: AdjustmentOutcome,
) -> Result<(), PositionServiceError> {
    let record = AdjustmentRecord::resolve(suggestion, outcome);
    if !state.store.append_adjustment(&record).await? {
        tracing::debug!(suggestion_id = %suggestion.id, outcome = %outcome, "Outcome already recorded");
    }
    state.suggestions.remove(suggestion.id).await;
    Ok(())
}

/// Re-reads the record so concurrent edits are not overwritten, then applies `link`.
async fn link_orders<F>(state: &AppState, id: Uuid, link: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut Position),
{
    let Some(mut fresh) = state.store.get_position(id).await? else {
        tracing::warn!(position_id = %id, "Position removed before orders could be linked");
        return Ok(());
    };
    link(&mut fresh);
    state.store.save_position(&fresh).await?;
    state.notifier.publish(WsMessage::PositionUpdate(fresh));
    Ok(())
}

async fn forget_position(state: &AppState, id: Uuid) {
    let remaining: HashSet<Uuid> = match state.store.list_positions().await {
        Ok(positions) => positions.iter().map(|p| p.id).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list positions after removal");
            return;
        }
    };
    state.suggestions.retain_positions(&remaining).await;
    state.notifier.publish(WsMessage::PositionRemoved { id });
}

async fn refresh_position_gauge(state: &AppState) {
    if let Ok(positions) = state.store.list_positions().await {
        metrics::gauge!("open_positions").set(positions.len() as f64);
    }
}

fn warn_missing_credentials(notifier: &Notifier) {
    notifier.warning(
        "Live trading",
        "Exchange credentials are not configured; the position was saved but no orders were placed",
    );
}

/// One notification per order step.
pub fn notify_steps(notifier: &Notifier, report: &PlacementReport) {
    for outcome in &report.steps {
        let title = format!("{} {}", report.symbol, outcome.step);
        match &outcome.status {
            StepStatus::Placed { order_id } => {
                metrics::counter!("orders_placed").increment(1);
                notifier.success(title, format!("order {order_id} accepted"));
            }
            StepStatus::Rejected { message } => {
                metrics::counter!("orders_failed").increment(1);
                notifier.error(title, format!("rejected: {message}"));
            }
            StepStatus::TimedOut => {
                metrics::counter!("orders_failed").increment(1);
                notifier.error(title, "timed out waiting for the exchange");
            }
            StepStatus::Failed { message } => {
                metrics::counter!("orders_failed").increment(1);
                notifier.error(title, message.clone());
            }
            StepStatus::Skipped { reason } => {
                notifier.warning(title, format!("skipped: {reason}"));
            }
        }
    }
}
