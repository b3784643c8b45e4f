//! Identity domain model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Identity record as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    /// Authorization flag. Only flipped by the administrative path, never here.
    pub is_admin: bool,
}

/// Identity about to be inserted; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub email: String,
    pub hashed_password: String,
}

/// Credentials accepted by registration and login
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CredentialsInput {
    #[validate(length(min = 1, max = 320, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, max = 1024, message = "password is required"))]
    pub password: String,
}
