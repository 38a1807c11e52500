use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.list_positions().await.is_ok();
    let live = state.settings.current().is_live();

    if store_ok {
        (StatusCode::OK, Json(json!({ "status": "healthy", "live_trading": live })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "store": "unavailable" })),
        )
    }
}
