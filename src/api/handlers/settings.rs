use axum::extract::State;
use axum::Json;

use super::{ok, ApiResult};
use crate::services::settings::{SettingsUpdate, SettingsView};
use crate::AppState;

/// GET /api/settings: credentials are reported only as configured or not.
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<SettingsView> {
    ok(SettingsView::from(&state.settings.current()))
}

/// PUT /api/settings
pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<SettingsView> {
    let next = state.settings.update(state.store.as_ref(), update).await?;
    ok(SettingsView::from(&next))
}
