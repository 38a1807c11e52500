use axum::extract::State;

use super::{ok, ApiResult};
use crate::risk::exposure::{self, PositionRisk};
use crate::risk::PortfolioExposure;
use crate::AppState;

/// GET /api/exposure
pub async fn summary(State(state): State<AppState>) -> ApiResult<PortfolioExposure> {
    let positions = state.store.list_positions().await?;
    let prices = state.prices.prices().await;
    let brackets = state.prices.brackets().await;
    ok(exposure::aggregate(&positions, &prices, &brackets))
}

/// GET /api/exposure/liquidation
pub async fn liquidation(State(state): State<AppState>) -> ApiResult<Vec<PositionRisk>> {
    let positions = state.store.list_positions().await?;
    let prices = state.prices.prices().await;
    let brackets = state.prices.brackets().await;
    ok(exposure::position_risks(&positions, &prices, &brackets))
}
