//! Unified error handling for Identity Core

use crate::context::Interrupted;
use crate::crypto::PasswordError;
use crate::repository::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Message shared by every failed login, whatever the cause
pub const INVALID_CREDENTIALS_MESSAGE: &str = "invalid email or password";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("{}", INVALID_CREDENTIALS_MESSAGE)]
    InvalidCredentials,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Password hashing error: {0}")]
    Password(#[from] PasswordError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable kind, used as the `error` field of responses
    /// and as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) | AppError::Validation(_) => "bad_request",
            AppError::AlreadyExists(_) => "conflict",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::NotFound(_) => "not_found",
            AppError::DeadlineExceeded => "deadline_exceeded",
            AppError::Cancelled => "cancelled",
            AppError::Database(_)
            | AppError::Jwt(_)
            | AppError::Password(_)
            | AppError::Internal(_) => "internal_error",
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) | AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::AlreadyExists(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                INVALID_CREDENTIALS_MESSAGE.to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::DeadlineExceeded => (
                StatusCode::GATEWAY_TIMEOUT,
                "The request did not complete in time".to_string(),
            ),
            AppError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "The request was cancelled".to_string(),
            ),
            // Logged with the operation name where the failure happened
            AppError::Database(_)
            | AppError::Jwt(_)
            | AppError::Password(_)
            | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists => AppError::AlreadyExists("record already exists".to_string()),
            StoreError::NotFound => AppError::NotFound("record not found".to_string()),
            StoreError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<Interrupted> for AppError {
    fn from(err: Interrupted) -> Self {
        match err {
            Interrupted::DeadlineExceeded => AppError::DeadlineExceeded,
            Interrupted::Cancelled => AppError::Cancelled,
        }
    }
}

// Conversion from validation errors
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}
