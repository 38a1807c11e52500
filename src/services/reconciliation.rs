//! Keeps the local position list in step with the exchange.
//!
//! The exchange is authoritative: positions opened elsewhere are imported with
//! placeholder exits flagged for review, and local positions whose symbol has no
//! open exchange position are removed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::api::ws_types::WsMessage;
use crate::db::PositionStore;
use crate::exchange::{ExchangeConnector, ExchangePosition, GatewayError, OrderGateway};
use crate::models::position::MAX_LEVERAGE;
use crate::models::{LinkedOrders, LiveSettings, Position, PositionSource};
use crate::risk::{calculate_levels, CapitalRiskBand, LevelError, LevelInputs};
use crate::services::notifier::Notifier;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to fetch exchange positions: {0}")]
    Exchange(#[from] GatewayError),

    #[error("position store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub imported: Vec<String>,
    pub removed: Vec<String>,
    /// Local positions that matched an exchange position.
    pub matched: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.imported.is_empty() && self.removed.is_empty()
    }
}

/// Placeholder record for an exchange position with no local counterpart.
///
/// Exits come from the level calculator with no price history, so the ATR is
/// the degraded fallback and the record is flagged for review.
pub fn import_position(remote: &ExchangePosition) -> Result<Position, LevelError> {
    let direction = remote.direction();
    let leverage = remote.leverage.clamp(1, MAX_LEVERAGE);
    let margin = remote.margin();

    let levels = calculate_levels(&LevelInputs {
        entry_price: remote.entry_price,
        direction,
        leverage,
        investment_amount: margin,
        candles: &[],
        band: CapitalRiskBand::default(),
    })?;

    Ok(Position {
        id: Uuid::new_v4(),
        symbol: remote.symbol.clone(),
        direction,
        entry_price: remote.entry_price,
        leverage,
        investment_amount: margin,
        total_exposure: margin * Decimal::from(leverage),
        take_profits: levels.take_profits,
        stop_loss: levels.stop_loss,
        source: PositionSource::Imported,
        needs_review: true,
        orders: LinkedOrders::default(),
        created_at: Utc::now(),
    })
}

/// One reconciliation pass.
pub async fn reconcile_once<G: OrderGateway + ?Sized>(
    store: &dyn PositionStore,
    gateway: &G,
    notifier: &Notifier,
) -> Result<ReconcileReport, ReconcileError> {
    let remote = gateway.open_positions().await?;
    let local = store.list_positions().await?;

    let remote_symbols: HashSet<&str> = remote.iter().map(|p| p.symbol.as_str()).collect();
    let local_symbols: HashSet<&str> = local.iter().map(|p| p.symbol.as_str()).collect();
    let mut report = ReconcileReport::default();

    for position in remote.iter().filter(|p| !local_symbols.contains(p.symbol.as_str())) {
        let imported = match import_position(position) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(symbol = %position.symbol, error = %e, "Cannot import exchange position");
                continue;
            }
        };

        store.save_position(&imported).await?;
        tracing::info!(
            symbol = %imported.symbol,
            direction = %imported.direction,
            entry = %imported.entry_price,
            leverage = imported.leverage,
            "Imported exchange position"
        );
        notifier.warning(
            format!("{} imported", imported.symbol),
            "Found on the exchange; placeholder exits need review",
        );
        notifier.publish(WsMessage::PositionUpdate(imported.clone()));
        report.imported.push(imported.symbol);
    }

    for position in &local {
        if remote_symbols.contains(position.symbol.as_str()) {
            report.matched += 1;
            continue;
        }

        if store.delete_position(position.id).await? {
            tracing::info!(
                position_id = %position.id,
                symbol = %position.symbol,
                "Removed position closed on exchange"
            );
            notifier.success(
                format!("{} closed", position.symbol),
                "No longer open on the exchange; removed locally",
            );
            notifier.publish(WsMessage::PositionRemoved { id: position.id });
            report.removed.push(position.symbol.clone());
        }
    }

    Ok(report)
}

/// Runs `reconcile_once` immediately and then every `period` while live trading
/// is active. A settings change resets the schedule; an inactive configuration
/// waits for the next change. Returns when the settings sender is dropped.
pub async fn run_reconciliation_loop(
    store: Arc<dyn PositionStore>,
    mut settings_rx: watch::Receiver<LiveSettings>,
    connect: ExchangeConnector,
    period: Duration,
    notifier: Notifier,
) {
    tracing::info!(period_secs = period.as_secs(), "Reconciliation loop started");

    // Startup pass whenever credentials exist; the live schedule below covers the rest.
    let initial = settings_rx.borrow().clone();
    if let Some(credentials) = initial.usable_credentials().filter(|_| !initial.is_live()) {
        tracing::info!("Running startup reconciliation");
        let exchange = connect(Some(credentials));
        run_tick(store.as_ref(), &*exchange, &notifier).await;
    }

    'settings: loop {
        let settings = settings_rx.borrow_and_update().clone();

        if !settings.is_live() {
            tracing::debug!("Reconciliation inactive until live trading is enabled with credentials");
            if settings_rx.changed().await.is_err() {
                break;
            }
            continue;
        }

        let exchange = connect(settings.usable_credentials());
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    run_tick(store.as_ref(), &*exchange, &notifier).await;
                }
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        break 'settings;
                    }
                    tracing::debug!("Settings changed, rescheduling reconciliation");
                    continue 'settings;
                }
            }
        }
    }

    tracing::info!("Reconciliation loop stopped");
}

async fn run_tick<G: OrderGateway + ?Sized>(store: &dyn PositionStore, gateway: &G, notifier: &Notifier) {
    metrics::counter!("reconcile_runs").increment(1);
    match reconcile_once(store, gateway, notifier).await {
        Ok(report) if report.is_noop() => {
            tracing::debug!(matched = report.matched, "Reconciliation: in sync");
        }
        Ok(report) => {
            tracing::info!(
                imported = report.imported.len(),
                removed = report.removed.len(),
                matched = report.matched,
                "Reconciliation applied changes"
            );
        }
        Err(e) => {
            metrics::counter!("reconcile_failures").increment(1);
            tracing::warn!(error = %e, "Reconciliation failed");
        }
    }
}
