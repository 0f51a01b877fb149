//! Error types for the annotation server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or out-of-bounds range, empty selection, content mismatch
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown document, annotation or user
    #[error("Not found: {0}")]
    NotFound(String),

    /// Mutation attempted by someone other than the author
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Channel or fetch unavailable
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Stable machine-readable code, shared by HTTP bodies and channel frames
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Authorization(_) => "authorization_error",
            AppError::Transport(_) => "transport_error",
            AppError::Internal(_) => "internal_error",
            AppError::Database(_) => "database_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Io(_) => "io_error",
        }
    }

    /// Message safe to show to the client that caused the error
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Authorization(msg)
            | AppError::Transport(msg) => msg.clone(),
            AppError::Internal(_) => "An internal error occurred".to_string(),
            AppError::Database(_) => "Database error".to_string(),
            AppError::Serialization(_) => "Malformed payload".to_string(),
            AppError::Io(_) => "IO error".to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Serialization(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) | AppError::Database(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Transport(e.to_string())
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::Internal(_) | AppError::Database(_) | AppError::Io(_) => {
                tracing::error!(error = %self, "Request failed");
            }
            AppError::Transport(_) => tracing::warn!(error = %self, "Transport failure"),
            _ => tracing::debug!(error = %self, "Request rejected"),
        }

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message: self.public_message(),
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
