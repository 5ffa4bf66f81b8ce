//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docsync_engine::SyncError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Sync(SyncError::StoreUnavailable(_) | SyncError::IndexIncomplete(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Sync(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                ("Database error".to_string(), None)
            }
            AppError::Sync(SyncError::IndexIncomplete(reason)) => {
                tracing::error!(reason = %reason, "remote scan broke off");
                (
                    "Document store scan failed".to_string(),
                    Some(reason.clone()),
                )
            }
            AppError::Sync(SyncError::StoreUnavailable(reason)) => {
                tracing::error!(reason = %reason, "sync could not start");
                (
                    "Document store unavailable".to_string(),
                    Some(reason.clone()),
                )
            }
            AppError::Sync(e) => {
                tracing::warn!("Sync error: {:?}", e);
                (e.to_string(), None)
            }
            AppError::BadRequest(msg) => (msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
