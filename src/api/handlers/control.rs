use axum::extract::State;

use super::{ok, ApiResult};
use crate::errors::AppError;
use crate::exchange::MarketData;
use crate::services::reconciliation::{self, ReconcileReport};
use crate::services::settings::{capital_from_balances, SettingsUpdate, SettingsView, CAPITAL_ASSET};
use crate::AppState;

/// POST /api/control/reconcile: one reconciliation pass on demand.
pub async fn reconcile(State(state): State<AppState>) -> ApiResult<ReconcileReport> {
    let settings = state.settings.current();
    let Some(credentials) = settings.usable_credentials() else {
        return Err(AppError::BadRequest("exchange credentials are not configured".into()));
    };

    let exchange = (state.exchange)(Some(credentials));
    let report = reconciliation::reconcile_once(state.store.as_ref(), &*exchange, &state.notifier).await?;
    tracing::info!(
        imported = report.imported.len(),
        removed = report.removed.len(),
        "Manual reconciliation complete"
    );
    ok(report)
}

/// POST /api/control/sync-capital: total capital set from the futures wallet balance.
pub async fn sync_capital(State(state): State<AppState>) -> ApiResult<SettingsView> {
    let settings = state.settings.current();
    let Some(credentials) = settings.usable_credentials() else {
        return Err(AppError::BadRequest("exchange credentials are not configured".into()));
    };

    let exchange = (state.exchange)(Some(credentials));
    let balances = exchange
        .account_balance()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    let capital = capital_from_balances(&balances)
        .ok_or_else(|| AppError::BadRequest(format!("no positive {CAPITAL_ASSET} balance on the account")))?;

    let next = state
        .settings
        .update(
            state.store.as_ref(),
            SettingsUpdate {
                total_capital: Some(capital),
                ..Default::default()
            },
        )
        .await?;
    tracing::info!(total_capital = %capital, "Total capital synced from exchange balance");
    ok(SettingsView::from(&next))
}
