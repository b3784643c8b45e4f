//! Transaction coordinator
//!
//! A unit of work is an explicit value. Repositories receive it as
//! `Option<&mut Unit>`, and because the unit type is an associated type of the
//! manager, handing a repository a transaction from another backend does not
//! type-check. There is no way to begin a transaction from a unit, so nesting
//! cannot happen.

use super::StoreError;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::future::Future;
use std::pin::Pin;

/// Boxed future borrowing the unit of work for `'a`
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One open transaction. Dropping it without commit rolls it back.
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    async fn commit(self) -> Result<(), StoreError>;
    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TransactionManager: Send + Sync {
    type Unit: UnitOfWork;

    /// Open a new unit of work at READ COMMITTED.
    async fn begin(&self) -> Result<Self::Unit, StoreError>;
}

/// Run `work` inside a fresh unit of work.
///
/// Commits when `work` succeeds. When it fails the unit is rolled back and the
/// original error is returned; a failing rollback is only logged. If the
/// returned future is dropped midway the unit is dropped with it and the
/// backend discards the transaction.
pub async fn run_in_transaction<M, R, E, F>(manager: &M, work: F) -> Result<R, E>
where
    M: TransactionManager + ?Sized,
    E: From<StoreError>,
    F: for<'u> FnOnce(&'u mut M::Unit) -> BoxFuture<'u, Result<R, E>> + Send,
{
    let mut unit = manager.begin().await?;

    let outcome = work(&mut unit).await;
    match outcome {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = unit.rollback().await {
                tracing::warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err)
        }
    }
}

/// PostgreSQL unit of work
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    /// Connection the open transaction runs on
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgTransactionManager {
    pool: PgPool,
}

impl PgTransactionManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    type Unit = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;
        Ok(PgUnitOfWork { tx })
    }
}
