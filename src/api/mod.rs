//! REST API handlers and shared request helpers

pub mod auth;
pub mod health;
pub mod metrics;
pub mod user;

use crate::error::{AppError, Result};
use axum::extract::rejection::JsonRejection;
use axum::Json;

/// Unwrap a JSON body, reporting any rejection (bad syntax, missing field,
/// wrong content type) as a 400 in the standard error shape.
pub(crate) fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}
