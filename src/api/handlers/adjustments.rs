use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use super::{ok, ApiResult};
use crate::models::{AdjustmentRecord, AdjustmentSuggestion, Position};
use crate::services::positions;
use crate::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1_000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/adjustments: pending suggestions.
pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<AdjustmentSuggestion>> {
    ok(state.suggestions.list().await)
}

/// POST /api/adjustments/:id/accept
pub async fn accept(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Position> {
    let committed = positions::accept_suggestion(&state, id).await?;
    ok(committed.position)
}

/// POST /api/adjustments/:id/dismiss
pub async fn dismiss(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<AdjustmentSuggestion> {
    ok(positions::dismiss_suggestion(&state, id).await?)
}

/// GET /api/adjustments/history?limit=N: most recent first.
pub async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Vec<AdjustmentRecord>> {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    ok(state.store.list_adjustments(limit).await?)
}
