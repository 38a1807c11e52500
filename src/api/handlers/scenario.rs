use axum::extract::State;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{ok, ApiResult};
use crate::risk::scenario::{self, ScenarioReport};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ScenarioRequest {
    pub shock_pct: Decimal,
}

/// POST /api/scenario
pub async fn run(State(state): State<AppState>, Json(req): Json<ScenarioRequest>) -> ApiResult<ScenarioReport> {
    let positions = state.store.list_positions().await?;
    let prices = state.prices.prices().await;
    let brackets = state.prices.brackets().await;
    ok(scenario::simulate(&positions, &prices, req.shock_pct, &brackets)?)
}

/// GET /api/scenario/presets
pub async fn presets(State(state): State<AppState>) -> ApiResult<Vec<ScenarioReport>> {
    let positions = state.store.list_positions().await?;
    let prices = state.prices.prices().await;
    let brackets = state.prices.brackets().await;
    ok(scenario::simulate_presets(&positions, &prices, &brackets))
}
