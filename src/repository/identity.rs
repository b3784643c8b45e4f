//! Identity repository

use super::{PgUnitOfWork, StoreError};
use crate::domain::{Identity, NewIdentity};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    type Unit: Send;

    /// Insert an identity and return the id the store assigned.
    async fn save(
        &self,
        unit: Option<&mut Self::Unit>,
        identity: &NewIdentity,
    ) -> Result<Uuid, StoreError>;

    async fn get_by_email(
        &self,
        unit: Option<&mut Self::Unit>,
        email: &str,
    ) -> Result<Identity, StoreError>;

    async fn is_admin(&self, unit: Option<&mut Self::Unit>, id: Uuid) -> Result<bool, StoreError>;
}

pub struct IdentityRepositoryImpl {
    pool: PgPool,
}

impl IdentityRepositoryImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityRepository for IdentityRepositoryImpl {
    type Unit = PgUnitOfWork;

    async fn save(
        &self,
        unit: Option<&mut PgUnitOfWork>,
        identity: &NewIdentity,
    ) -> Result<Uuid, StoreError> {
        let query = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (email, hashed_password)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(&identity.email)
        .bind(&identity.hashed_password);

        let result = match unit {
            Some(unit) => query.fetch_one(unit.connection()).await,
            None => query.fetch_one(&self.pool).await,
        };

        result.map_err(StoreError::from_write)
    }

    async fn get_by_email(
        &self,
        unit: Option<&mut PgUnitOfWork>,
        email: &str,
    ) -> Result<Identity, StoreError> {
        let query = sqlx::query_as::<_, Identity>(
            r#"
            SELECT id, email, hashed_password, is_admin
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email);

        let identity = match unit {
            Some(unit) => query.fetch_optional(unit.connection()).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        identity.ok_or(StoreError::NotFound)
    }

    async fn is_admin(&self, unit: Option<&mut PgUnitOfWork>, id: Uuid) -> Result<bool, StoreError> {
        let query = sqlx::query_scalar::<_, bool>("SELECT is_admin FROM users WHERE id = $1").bind(id);

        let flag = match unit {
            Some(unit) => query.fetch_optional(unit.connection()).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        flag.ok_or(StoreError::NotFound)
    }
}
