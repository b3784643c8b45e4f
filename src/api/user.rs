//! Identity lookup endpoints

use crate::error::{AppError, Result};
use crate::state::HasIdentityService;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminStatusResponse {
    pub is_admin: bool,
}

/// GET /api/v1/users/{id}/admin
pub async fn admin_status<S: HasIdentityService>(
    State(state): State<S>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| AppError::BadRequest(format!("invalid user id '{}'", id)))?;
    let ctx = state.request_context();
    let is_admin = state.identity_service().is_admin(&ctx, id).await?;
    Ok(Json(AdminStatusResponse { is_admin }))
}
