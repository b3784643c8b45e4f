//! In-memory entity store
//!
//! Implements the transaction manager and both repositories over a shared,
//! mutex-guarded state. A unit of work stages its writes and publishes them on
//! commit; reads through a unit see committed rows plus its own staged rows.
//! Used by unit and HTTP tests, and handy for running the service without a
//! database.

use super::{EventRepository, IdentityRepository, StoreError, TransactionManager, UnitOfWork};
use crate::domain::{EventStatus, EventType, Identity, NewEvent, NewIdentity};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Event row as held by the in-memory store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: Uuid,
    pub aggregate_id: Option<Uuid>,
    pub event_type: EventType,
    pub payload: Vec<u8>,
    pub status: EventStatus,
}

#[derive(Debug, Default)]
struct StoreState {
    identities: Vec<Identity>,
    events: Vec<StoredEvent>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_event_writes: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    faults: Arc<Faults>,
}

fn injected_failure() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }

    /// Make every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every subsequent event write fail.
    pub fn fail_event_writes(&self, fail: bool) {
        self.faults.fail_event_writes.store(fail, Ordering::SeqCst);
    }

    /// Flip the authorization flag the way an administrative path would.
    /// Returns false when no identity has `id`.
    pub fn set_admin(&self, id: Uuid, is_admin: bool) -> bool {
        let mut state = self.lock();
        match state.identities.iter_mut().find(|i| i.id == id) {
            Some(identity) => {
                identity.is_admin = is_admin;
                true
            }
            None => false,
        }
    }

    pub fn identity_count(&self) -> usize {
        self.lock().identities.len()
    }

    pub fn count_identities_with_email(&self, email: &str) -> usize {
        self.lock()
            .identities
            .iter()
            .filter(|i| i.email == email)
            .count()
    }

    pub fn events(&self) -> Vec<StoredEvent> {
        self.lock().events.clone()
    }

    pub fn count_events(&self, event_type: EventType) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    fn insert_identity(
        &self,
        staged: Option<&mut Vec<Identity>>,
        identity: &NewIdentity,
    ) -> Result<Uuid, StoreError> {
        self.ensure_available()?;
        let mut state = self.lock();

        let taken = |rows: &[Identity]| rows.iter().any(|i| i.email == identity.email);
        let staged_taken = staged
            .as_deref()
            .is_some_and(|rows| taken(rows.as_slice()));
        if staged_taken || taken(state.identities.as_slice()) {
            return Err(StoreError::AlreadyExists);
        }

        let row = Identity {
            id: Uuid::new_v4(),
            email: identity.email.clone(),
            hashed_password: identity.hashed_password.clone(),
            is_admin: false,
        };
        let id = row.id;
        match staged {
            Some(rows) => rows.push(row),
            None => state.identities.push(row),
        }
        Ok(id)
    }

    fn insert_event(
        &self,
        staged: Option<&mut Vec<StoredEvent>>,
        event: &NewEvent,
    ) -> Result<Uuid, StoreError> {
        self.ensure_available()?;
        if self.faults.fail_event_writes.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }

        let row = StoredEvent {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            payload: event.payload.clone(),
            status: event.status,
        };
        let id = row.id;
        match staged {
            Some(rows) => rows.push(row),
            None => self.lock().events.push(row),
        }
        Ok(id)
    }

    fn find_identity<P>(
        &self,
        staged: Option<&[Identity]>,
        predicate: P,
    ) -> Result<Identity, StoreError>
    where
        P: Fn(&Identity) -> bool,
    {
        self.ensure_available()?;
        if let Some(found) = staged.and_then(|rows| rows.iter().find(|i| predicate(i))) {
            return Ok(found.clone());
        }
        self.lock()
            .identities
            .iter()
            .find(|i| predicate(i))
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

/// Staged writes of one open in-memory transaction
#[derive(Debug)]
pub struct MemoryUnitOfWork {
    store: MemoryStore,
    identities: Vec<Identity>,
    events: Vec<StoredEvent>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        self.store.ensure_available()?;
        let mut state = self.store.lock();

        let conflict = self
            .identities
            .iter()
            .any(|staged| state.identities.iter().any(|i| i.email == staged.email));
        if conflict {
            return Err(StoreError::AlreadyExists);
        }

        state.identities.extend(self.identities);
        state.events.extend(self.events);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for MemoryStore {
    type Unit = MemoryUnitOfWork;

    async fn begin(&self) -> Result<MemoryUnitOfWork, StoreError> {
        self.ensure_available()?;
        Ok(MemoryUnitOfWork {
            store: self.clone(),
            identities: Vec::new(),
            events: Vec::new(),
        })
    }
}

#[async_trait]
impl IdentityRepository for MemoryStore {
    type Unit = MemoryUnitOfWork;

    async fn save(
        &self,
        unit: Option<&mut MemoryUnitOfWork>,
        identity: &NewIdentity,
    ) -> Result<Uuid, StoreError> {
        self.insert_identity(unit.map(|u| &mut u.identities), identity)
    }

    async fn get_by_email(
        &self,
        unit: Option<&mut MemoryUnitOfWork>,
        email: &str,
    ) -> Result<Identity, StoreError> {
        let staged = unit.map(|u| u.identities.as_slice());
        self.find_identity(staged, |i| i.email == email)
    }

    async fn is_admin(
        &self,
        unit: Option<&mut MemoryUnitOfWork>,
        id: Uuid,
    ) -> Result<bool, StoreError> {
        let staged = unit.map(|u| u.identities.as_slice());
        self.find_identity(staged, |i| i.id == id)
            .map(|identity| identity.is_admin)
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    type Unit = MemoryUnitOfWork;

    async fn save(
        &self,
        unit: Option<&mut MemoryUnitOfWork>,
        event: &NewEvent,
    ) -> Result<Uuid, StoreError> {
        self.insert_event(unit.map(|u| &mut u.events), event)
    }
}
