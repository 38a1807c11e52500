use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::execution::SizingError;
use crate::risk::{LevelError, ScenarioError};
use crate::services::positions::PositionServiceError;
use crate::services::reconciliation::ReconcileError;
use crate::services::settings::SettingsError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Exchange error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, (*msg).to_string()),
            AppError::Upstream(msg) => {
                tracing::warn!(error = %msg, "Exchange call failed");
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<SizingError> for AppError {
    fn from(e: SizingError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<LevelError> for AppError {
    fn from(e: LevelError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<ScenarioError> for AppError {
    fn from(e: ScenarioError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<SettingsError> for AppError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Store(e) => AppError::Internal(e),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<PositionServiceError> for AppError {
    fn from(e: PositionServiceError) -> Self {
        match e {
            PositionServiceError::PositionNotFound(_) | PositionServiceError::SuggestionNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            PositionServiceError::Store(e) => AppError::Internal(e),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Exchange(e) => AppError::Upstream(e.to_string()),
            ReconcileError::Store(e) => AppError::Internal(e),
        }
    }
}
