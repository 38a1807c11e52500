use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use super::{ok, ApiResponse, ApiResult};
use crate::errors::AppError;
use crate::models::Position;
use crate::services::positions::{self, NewPosition, PositionPreview, PreviewRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Created {
    pub position: Position,
    /// True when exchange orders are being placed in the background.
    pub live_sync: bool,
}

/// GET /api/positions
pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<Position>> {
    ok(state.store.list_positions().await?)
}

/// POST /api/positions: saved immediately; exchange orders follow when live.
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<NewPosition>,
) -> Result<(StatusCode, Json<ApiResponse<Created>>), AppError> {
    let committed = positions::open_position(&state, request).await?;
    let body = Created {
        live_sync: committed.sync.is_some(),
        position: committed.position,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse { success: true, data: body })))
}

/// POST /api/positions/preview: levels and sizing without saving.
pub async fn preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<PositionPreview> {
    ok(positions::preview_position(&state, &request).await?)
}

/// DELETE /api/positions/:id
pub async fn remove(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Uuid> {
    positions::delete_position(&state, id).await?;
    ok(id)
}
