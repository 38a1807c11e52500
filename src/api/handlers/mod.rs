pub mod adjustments;
pub mod control;
pub mod exposure;
pub mod health;
pub mod metrics;
pub mod positions;
pub mod scenario;
pub mod settings;
pub mod ws;

use axum::Json;
use serde::Serialize;

use crate::errors::AppError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse { success: true, data }))
}
