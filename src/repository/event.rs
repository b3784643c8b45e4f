//! Domain event (outbox) repository

use super::{PgUnitOfWork, StoreError};
use crate::domain::NewEvent;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait EventRepository: Send + Sync {
    type Unit: Send;

    /// Append an event to the outbox and return its store-assigned id.
    async fn save(&self, unit: Option<&mut Self::Unit>, event: &NewEvent)
        -> Result<Uuid, StoreError>;
}

pub struct EventRepositoryImpl {
    pool: PgPool,
}

impl EventRepositoryImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for EventRepositoryImpl {
    type Unit = PgUnitOfWork;

    async fn save(
        &self,
        unit: Option<&mut PgUnitOfWork>,
        event: &NewEvent,
    ) -> Result<Uuid, StoreError> {
        let query = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO events (aggregate_id, event_type, payload, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(event.aggregate_id)
        .bind(event.event_type.as_str())
        .bind(event.payload.as_slice())
        .bind(event.status.as_str());

        let result = match unit {
            Some(unit) => query.fetch_one(unit.connection()).await,
            None => query.fetch_one(&self.pool).await,
        };

        result.map_err(StoreError::from_write)
    }
}
