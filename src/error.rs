use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::Resolution;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unknown device")]
    UnknownDevice,

    #[error("Unknown user")]
    UnknownUser,

    #[error("Unknown owner")]
    UnknownOwner,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed")]
    ValidationFailed,

    #[error("User locked")]
    UserLocked,

    #[error("Photo not found: {0}")]
    PhotoNotFound(i64),

    #[error("Upload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Rotation of photo {photo_id} failed at {failed} after rotating {rotated:?}: {reason}")]
    PartialRotation {
        photo_id: i64,
        rotated: Vec<Resolution>,
        failed: Resolution,
        reason: String,
    },

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl AppError {
    pub fn is_storage(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Pool(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UnknownDevice => (StatusCode::UNAUTHORIZED, "Unknown device".to_string()),
            AppError::UnknownUser => (StatusCode::UNAUTHORIZED, "Unknown user".to_string()),
            AppError::UnknownOwner => (StatusCode::UNAUTHORIZED, "Unknown owner".to_string()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::ValidationFailed => {
                (StatusCode::UNAUTHORIZED, "Validation failed".to_string())
            }
            AppError::UserLocked => (StatusCode::LOCKED, "User locked".to_string()),
            AppError::PhotoNotFound(id) => (StatusCode::NOT_FOUND, format!("Photo {} not found", id)),
            AppError::PayloadTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Upload exceeds {} bytes", limit),
            ),
            AppError::Image(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::PartialRotation { .. } => {
                tracing::error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Mail(msg) => {
                tracing::error!("Mail error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Mail delivery failed".to_string())
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Connection pool error".to_string(),
                )
            }
            AppError::Token(e) => {
                tracing::error!("Token error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Token error".to_string(),
                )
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string())
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "JSON parsing error".to_string())
            }
            AppError::Request(e) => {
                tracing::error!("Request error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "External request failed".to_string(),
                )
            }
        };

        let body = Json(json!({ "detail": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
