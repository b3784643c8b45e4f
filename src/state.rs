//! Application state traits for dependency injection
//!
//! Handlers are generic over [`HasIdentityService`] so the production state
//! (PostgreSQL, Redis) and test states (in-memory backends) share one router.

use crate::cache::CacheRepository;
use crate::context::RequestContext;
use crate::crypto::PasswordHasher;
use crate::jwt::TokenIssuer;
use crate::repository::{EventRepository, IdentityRepository, TransactionManager};
use crate::service::IdentityService;
use metrics_exporter_prometheus::PrometheusHandle;

pub trait HasIdentityService: Clone + Send + Sync + 'static {
    type Transactions: TransactionManager + 'static;
    type IdentityRepo: IdentityRepository<Unit = <Self::Transactions as TransactionManager>::Unit> + 'static;
    type EventRepo: EventRepository<Unit = <Self::Transactions as TransactionManager>::Unit> + 'static;
    type Cache: CacheRepository + 'static;
    type Hasher: PasswordHasher + 'static;
    type Tokens: TokenIssuer + 'static;

    fn identity_service(
        &self,
    ) -> &IdentityService<
        Self::Transactions,
        Self::IdentityRepo,
        Self::EventRepo,
        Self::Cache,
        Self::Hasher,
        Self::Tokens,
    >;

    /// Fresh context for one inbound request: the configured deadline, and
    /// cancelled when the server shuts down.
    fn request_context(&self) -> RequestContext;

    /// Render handle for `/metrics`; `None` when metrics are disabled.
    fn metrics_handle(&self) -> Option<&PrometheusHandle>;
}
