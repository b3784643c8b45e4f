//! Registration and login endpoints

use crate::api::json_body;
use crate::domain::CredentialsInput;
use crate::error::Result;
use crate::state::HasIdentityService;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// POST /api/v1/auth/register
pub async fn register<S: HasIdentityService>(
    State(state): State<S>,
    payload: std::result::Result<Json<CredentialsInput>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let input = json_body(payload)?;
    let ctx = state.request_context();
    let user_id = state.identity_service().register(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

/// POST /api/v1/auth/login
pub async fn login<S: HasIdentityService>(
    State(state): State<S>,
    payload: std::result::Result<Json<CredentialsInput>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let input = json_body(payload)?;
    let ctx = state.request_context();
    let token = state.identity_service().login(&ctx, input).await?;
    Ok(Json(LoginResponse { token }))
}
