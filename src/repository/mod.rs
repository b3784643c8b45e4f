//! Data access layer (Repository pattern)
//!
//! Every repository call takes an optional unit of work. `Some(unit)` issues the
//! statement on that open transaction; `None` runs a single auto-committing
//! statement against the pool.

pub mod event;
pub mod identity;
pub mod memory;
pub mod transaction;

pub use event::{EventRepository, EventRepositoryImpl};
pub use identity::{IdentityRepository, IdentityRepositoryImpl};
pub use transaction::{
    run_in_transaction, BoxFuture, PgTransactionManager, PgUnitOfWork, TransactionManager,
    UnitOfWork,
};

use thiserror::Error;

/// Entity store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("record already exists")]
    AlreadyExists,

    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Translate a failed insert, surfacing unique violations (SQLSTATE 23505)
    /// as [`StoreError::AlreadyExists`].
    pub fn from_write(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Self::AlreadyExists,
            _ => Self::Database(err),
        }
    }
}
