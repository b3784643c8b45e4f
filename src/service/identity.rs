//! Identity business logic: registration, login and authorization lookup

use crate::cache::{decode_flag, encode_flag, keys, CacheRepository};
use crate::config::Config;
use crate::context::RequestContext;
use crate::crypto::PasswordHasher;
use crate::domain::{CredentialsInput, EventPayload, EventType, Identity, NewEvent, NewIdentity};
use crate::error::{AppError, Result};
use crate::jwt::TokenIssuer;
use crate::repository::{
    run_in_transaction, EventRepository, IdentityRepository, StoreError, TransactionManager,
    UnitOfWork,
};
use crate::telemetry::metrics::{
    record_best_effort_failure, record_cache_lookup, record_operation,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

/// What a login does when a token for the email is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginCachePolicy {
    /// Return the cached token and skip issuing, event recording and re-caching.
    #[default]
    ReuseCachedToken,
    /// Return the cached token but still record a login event.
    AlwaysRecordEvent,
}

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    /// Lifetime of issued tokens
    pub token_ttl: Duration,
    pub token_cache_ttl: Duration,
    pub admin_cache_ttl: Duration,
    pub login_cache_policy: LoginCachePolicy,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(3600),
            token_cache_ttl: Duration::from_secs(3600),
            admin_cache_ttl: Duration::from_secs(3600),
            login_cache_policy: LoginCachePolicy::default(),
        }
    }
}

impl IdentitySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            token_ttl: Duration::from_secs(config.jwt.token_ttl_secs),
            token_cache_ttl: config.cache.token_ttl,
            admin_cache_ttl: config.cache.admin_ttl,
            login_cache_policy: if config.cache.always_record_login_event {
                LoginCachePolicy::AlwaysRecordEvent
            } else {
                LoginCachePolicy::ReuseCachedToken
            },
        }
        .clamped()
    }

    /// A cached token must not outlive its own `exp` claim.
    pub fn clamped(mut self) -> Self {
        self.token_cache_ttl = self.token_cache_ttl.min(self.token_ttl);
        self
    }
}

/// Readiness of the backing services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub store: bool,
    pub cache: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.store && self.cache
    }
}

pub struct IdentityService<M, I, E, C, H, T>
where
    M: TransactionManager + 'static,
    I: IdentityRepository<Unit = M::Unit> + 'static,
    E: EventRepository<Unit = M::Unit> + 'static,
    C: CacheRepository,
    H: PasswordHasher + 'static,
    T: TokenIssuer,
{
    transactions: Arc<M>,
    identities: Arc<I>,
    events: Arc<E>,
    cache: Arc<C>,
    hasher: Arc<H>,
    tokens: Arc<T>,
    settings: IdentitySettings,
}

impl<M, I, E, C, H, T> IdentityService<M, I, E, C, H, T>
where
    M: TransactionManager + 'static,
    I: IdentityRepository<Unit = M::Unit> + 'static,
    E: EventRepository<Unit = M::Unit> + 'static,
    C: CacheRepository,
    H: PasswordHasher + 'static,
    T: TokenIssuer,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<M>,
        identities: Arc<I>,
        events: Arc<E>,
        cache: Arc<C>,
        hasher: Arc<H>,
        tokens: Arc<T>,
        settings: IdentitySettings,
    ) -> Self {
        Self {
            transactions,
            identities,
            events,
            cache,
            hasher,
            tokens,
            settings: settings.clamped(),
        }
    }

    pub fn settings(&self) -> &IdentitySettings {
        &self.settings
    }

    /// Create an identity and its registration event atomically.
    pub async fn register(&self, ctx: &RequestContext, input: CredentialsInput) -> Result<Uuid> {
        self.register_inner(ctx, input)
            .await
            .inspect(|_| record_operation("register", "ok"))
            .inspect_err(|e| trace_failure("register", e))
    }

    async fn register_inner(&self, ctx: &RequestContext, input: CredentialsInput) -> Result<Uuid> {
        input.validate()?;
        ctx.check()?;

        let CredentialsInput { email, password } = input;

        let hasher = self.hasher.clone();
        let hashed_password = ctx
            .run(tokio::task::spawn_blocking(move || hasher.hash(&password)))
            .await?
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Password hashing task failed: {}", e)))??;

        let payload = EventPayload::new(email.as_str(), EventType::Registration, Utc::now());
        let event = NewEvent::from_payload(None, &payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode event payload: {}", e)))?;
        let identity = NewIdentity {
            email,
            hashed_password,
        };

        let identities = self.identities.clone();
        let events = self.events.clone();
        let id = ctx
            .run(run_in_transaction(self.transactions.as_ref(), move |unit| {
                Box::pin(async move {
                    let id = identities
                        .save(Some(&mut *unit), &identity)
                        .await
                        .map_err(|e| match e {
                            StoreError::AlreadyExists => AppError::AlreadyExists(
                                "an identity with this email already exists".to_string(),
                            ),
                            other => other.into(),
                        })?;
                    events.save(Some(unit), &event.with_aggregate(id)).await?;
                    Ok::<_, AppError>(id)
                })
            }))
            .await??;

        info!(op = "register", user_id = %id, "Identity registered");
        Ok(id)
    }

    /// Authenticate and return a signed token, reusing a cached one when present.
    pub async fn login(&self, ctx: &RequestContext, input: CredentialsInput) -> Result<String> {
        self.login_inner(ctx, input)
            .await
            .inspect(|_| record_operation("login", "ok"))
            .inspect_err(|e| trace_failure("login", e))
    }

    async fn login_inner(&self, ctx: &RequestContext, input: CredentialsInput) -> Result<String> {
        input.validate()?;
        let CredentialsInput { email, password } = input;

        let identity = match ctx.run(self.identities.get_by_email(None, &email)).await? {
            Ok(identity) => identity,
            Err(StoreError::NotFound) => {
                self.verify_decoy(ctx, password).await?;
                debug!(op = "login", "Login rejected: unknown email");
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        if !self
            .verify_password(ctx, identity.hashed_password.clone(), password)
            .await?
        {
            debug!(op = "login", user_id = %identity.id, "Login rejected: wrong password");
            return Err(AppError::InvalidCredentials);
        }

        let key = keys::login_token(&identity.email);
        match ctx.run(self.cache.get(&key)).await? {
            Ok(Some(token)) => {
                record_cache_lookup("token", "hit");
                debug!(op = "login", user_id = %identity.id, "Reusing cached token");
                if self.settings.login_cache_policy == LoginCachePolicy::AlwaysRecordEvent {
                    self.record_login_event(ctx, &identity).await;
                }
                return Ok(token);
            }
            Ok(None) => record_cache_lookup("token", "miss"),
            Err(e) => {
                record_cache_lookup("token", "error");
                warn!(op = "login", error = %e, "Token cache read failed, issuing a new token")
            }
        }

        let token = self.tokens.issue(&identity, self.settings.token_ttl)?;

        self.record_login_event(ctx, &identity).await;

        match ctx
            .run(self.cache.set(&key, &token, self.settings.token_cache_ttl))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                record_best_effort_failure("login", "token_cache_write");
                warn!(op = "login", error = %e, "Failed to cache token")
            }
            Err(e) => {
                record_best_effort_failure("login", "token_cache_write");
                warn!(op = "login", error = %e, "Token caching interrupted")
            }
        }

        info!(op = "login", user_id = %identity.id, "Login succeeded");
        Ok(token)
    }

    /// Authorization flag for `id`, served from cache when possible.
    pub async fn is_admin(&self, ctx: &RequestContext, id: Uuid) -> Result<bool> {
        self.is_admin_inner(ctx, id)
            .await
            .inspect(|_| record_operation("is_admin", "ok"))
            .inspect_err(|e| trace_failure("is_admin", e))
    }

    async fn is_admin_inner(&self, ctx: &RequestContext, id: Uuid) -> Result<bool> {
        let key = keys::admin_flag(id);

        match ctx.run(self.cache.get(&key)).await? {
            Ok(Some(raw)) => match decode_flag(&raw) {
                Some(flag) => {
                    record_cache_lookup("admin_flag", "hit");
                    return Ok(flag);
                }
                None => {
                    record_cache_lookup("admin_flag", "corrupt");
                    warn!(op = "is_admin", user_id = %id, value = %raw, "Corrupted cache entry")
                }
            },
            Ok(None) => record_cache_lookup("admin_flag", "miss"),
            Err(e) => {
                record_cache_lookup("admin_flag", "error");
                warn!(op = "is_admin", user_id = %id, error = %e, "Cache read failed")
            }
        }

        let flag = match ctx.run(self.identities.is_admin(None, id)).await? {
            Ok(flag) => flag,
            Err(StoreError::NotFound) => {
                return Err(AppError::NotFound(format!("identity {} not found", id)))
            }
            Err(e) => return Err(e.into()),
        };

        match ctx
            .run(self.cache.set(&key, encode_flag(flag), self.settings.admin_cache_ttl))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                record_best_effort_failure("is_admin", "flag_cache_write");
                warn!(op = "is_admin", user_id = %id, error = %e, "Failed to cache flag")
            }
            Err(e) => {
                record_best_effort_failure("is_admin", "flag_cache_write");
                warn!(op = "is_admin", user_id = %id, error = %e, "Flag caching interrupted")
            }
        }

        Ok(flag)
    }

    /// Check the store (open and discard a unit of work) and the cache.
    pub async fn readiness(&self, ctx: &RequestContext) -> Readiness {
        let store = match ctx.run(self.transactions.begin()).await {
            Ok(Ok(unit)) => {
                if let Err(e) = unit.rollback().await {
                    warn!(error = %e, "Readiness check rollback failed");
                }
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Store not ready");
                false
            }
            Err(e) => {
                warn!(error = %e, "Store readiness check interrupted");
                false
            }
        };

        let cache = match ctx.run(self.cache.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Cache not ready");
                false
            }
            Err(e) => {
                warn!(error = %e, "Cache readiness check interrupted");
                false
            }
        };

        Readiness { store, cache }
    }

    async fn verify_password(
        &self,
        ctx: &RequestContext,
        digest: String,
        password: String,
    ) -> Result<bool> {
        let hasher = self.hasher.clone();
        let verified = ctx
            .run(tokio::task::spawn_blocking(move || hasher.verify(&digest, &password)))
            .await?
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Password verification task failed: {}", e)))??;
        Ok(verified)
    }

    async fn verify_decoy(&self, ctx: &RequestContext, password: String) -> Result<()> {
        let hasher = self.hasher.clone();
        ctx.run(tokio::task::spawn_blocking(move || hasher.verify_decoy(&password)))
            .await?
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Password verification task failed: {}", e)))
    }

    /// Best effort: a failure here never fails the login.
    async fn record_login_event(&self, ctx: &RequestContext, identity: &Identity) {
        let payload = EventPayload::new(identity.email.as_str(), EventType::Login, Utc::now());
        let event = match NewEvent::from_payload(Some(identity.id), &payload) {
            Ok(event) => event,
            Err(e) => {
                record_best_effort_failure("login", "login_event");
                warn!(op = "login", user_id = %identity.id, error = %e, "Failed to encode login event");
                return;
            }
        };

        match ctx.run(self.events.save(None, &event)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                record_best_effort_failure("login", "login_event");
                warn!(op = "login", user_id = %identity.id, error = %e, "Failed to record login event")
            }
            Err(e) => {
                record_best_effort_failure("login", "login_event");
                warn!(op = "login", user_id = %identity.id, error = %e, "Login event recording interrupted")
            }
        }
    }
}

/// Domain rejections are routine; everything else is an infrastructure failure.
fn trace_failure(op: &'static str, err: &AppError) {
    record_operation(op, err.kind());
    match err {
        AppError::BadRequest(_)
        | AppError::Validation(_)
        | AppError::AlreadyExists(_)
        | AppError::InvalidCredentials
        | AppError::NotFound(_) => debug!(op = op, error = %err, "Request rejected"),
        _ => error!(op = op, error = %err, "Operation failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCache, MockCacheRepository};
    use crate::config::PasswordHashConfig;
    use crate::config::JwtConfig;
    use crate::crypto::{Argon2PasswordHasher, MockPasswordHasher, PasswordError};
    use crate::jwt::{JwtManager, MockTokenIssuer};
    use crate::repository::memory::MemoryStore;
    use crate::telemetry::metrics::testing::{block_on, capture, sample};
    use crate::telemetry::metrics::{
        BEST_EFFORT_FAILURES_TOTAL, CACHE_LOOKUPS_TOTAL, OPERATIONS_TOTAL,
    };
    use pretty_assertions::assert_eq;

    type TestService<C, H = Argon2PasswordHasher, T = JwtManager> =
        IdentityService<MemoryStore, MemoryStore, MemoryStore, C, H, T>;

    const EMAIL: &str = "user@example.com";
    const PASSWORD: &str = "s3cret-passw0rd";

    fn hasher() -> Argon2PasswordHasher {
        Argon2PasswordHasher::new(&PasswordHashConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    fn jwt() -> JwtManager {
        JwtManager::new(&JwtConfig {
            secret: "test-secret-key-for-testing-purposes-only".to_string(),
            token_ttl_secs: 3600,
        })
    }

    fn service_with<C, H, T>(
        store: &MemoryStore,
        cache: C,
        hasher: H,
        tokens: T,
        settings: IdentitySettings,
    ) -> TestService<C, H, T>
    where
        C: CacheRepository,
        H: PasswordHasher + 'static,
        T: TokenIssuer,
    {
        let store = Arc::new(store.clone());
        IdentityService::new(
            store.clone(),
            store.clone(),
            store,
            Arc::new(cache),
            Arc::new(hasher),
            Arc::new(tokens),
            settings,
        )
    }

    fn service(store: &MemoryStore, cache: &MemoryCache) -> TestService<MemoryCache> {
        service_with(store, cache.clone(), hasher(), jwt(), IdentitySettings::default())
    }

    fn credentials(email: &str, password: &str) -> CredentialsInput {
        CredentialsInput {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::background()
    }

    #[tokio::test]
    async fn test_register_then_login_returns_token() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);

        let id = service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        let token = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        assert!(!token.is_empty());
        let claims = jwt().verify(&token).unwrap();
        assert_eq!(claims.uuid, id);
        assert_eq!(claims.email, EMAIL);
        assert_eq!(cache.peek(&keys::login_token(EMAIL)), Some(token));
    }

    #[tokio::test]
    async fn test_register_stores_hash_and_registration_event() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);

        let id = service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        let identity = store.get_by_email(None, EMAIL).await.unwrap();
        assert_eq!(identity.id, id);
        assert_ne!(identity.hashed_password, PASSWORD);
        assert!(!identity.is_admin);

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Registration);
        assert_eq!(events[0].aggregate_id, Some(id));
        let payload: serde_json::Value = serde_json::from_slice(&events[0].payload).unwrap();
        assert_eq!(payload["email"], EMAIL);
        assert_eq!(payload["action"], "registration");
        assert!(payload["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_event_write_failure_rolls_back_identity() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        store.fail_event_writes(true);

        let result = service.register(&ctx(), credentials(EMAIL, PASSWORD)).await;

        assert!(matches!(result, Err(AppError::Database(_))));
        assert_eq!(store.identity_count(), 0);
        assert!(store.events().is_empty());

        store.fail_event_writes(false);
        service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        assert_eq!(store.identity_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);

        service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        let second = service.register(&ctx(), credentials(EMAIL, "other")).await;

        assert!(matches!(second, Err(AppError::AlreadyExists(_))));
        assert_eq!(store.count_identities_with_email(EMAIL), 1);
        assert_eq!(store.count_events(EventType::Registration), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_fields() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);

        let result = service.register(&ctx(), credentials("", PASSWORD)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = service.register(&ctx(), credentials(EMAIL, "")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.identity_count(), 0);
    }

    #[tokio::test]
    async fn test_hashing_failure_writes_nothing() {
        let store = MemoryStore::new();
        let mut hasher = MockPasswordHasher::new();
        hasher
            .expect_hash()
            .returning(|_| Err(PasswordError::Hash(argon2::password_hash::Error::Password)));
        let service = service_with(
            &store,
            MemoryCache::new(),
            hasher,
            jwt(),
            IdentitySettings::default(),
        );

        let result = service.register(&ctx(), credentials(EMAIL, PASSWORD)).await;

        assert!(matches!(result, Err(AppError::Password(_))));
        assert_eq!(store.identity_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_writes_nothing() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        let ctx = ctx();
        ctx.cancel();

        let result = service.register(&ctx, credentials(EMAIL, PASSWORD)).await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(store.identity_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_deadline_is_reported() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        let ctx = RequestContext::with_timeout(Duration::ZERO);

        let result = service.is_admin(&ctx, Uuid::new_v4()).await;

        assert!(matches!(result, Err(AppError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_email_are_indistinguishable() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        let wrong_password = service
            .login(&ctx(), credentials(EMAIL, "not-the-password"))
            .await
            .unwrap_err();
        let unknown_email = service
            .login(&ctx(), credentials("nobody@example.com", PASSWORD))
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AppError::InvalidCredentials));
        assert!(matches!(unknown_email, AppError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(store.count_events(EventType::Login), 0);
    }

    #[tokio::test]
    async fn test_unknown_email_still_runs_a_verification() {
        let store = MemoryStore::new();
        let mut hasher = MockPasswordHasher::new();
        hasher.expect_verify_decoy().times(1).return_const(());
        hasher.expect_verify().never();
        let service = service_with(
            &store,
            MemoryCache::new(),
            hasher,
            jwt(),
            IdentitySettings::default(),
        );

        let result = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await;

        assert!(matches!(result, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_second_login_reuses_cached_token_without_event() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        let first = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        let second = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count_events(EventType::Login), 1);
    }

    #[tokio::test]
    async fn test_always_record_event_policy_records_cache_hits() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let settings = IdentitySettings {
            login_cache_policy: LoginCachePolicy::AlwaysRecordEvent,
            ..Default::default()
        };
        let service = service_with(&store, cache.clone(), hasher(), jwt(), settings);
        service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        let first = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        let second = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count_events(EventType::Login), 2);
    }

    #[tokio::test]
    async fn test_login_event_failure_is_swallowed() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        store.fail_event_writes(true);

        let token = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        assert!(!token.is_empty());
        assert_eq!(store.count_events(EventType::Login), 0);
    }

    #[tokio::test]
    async fn test_signing_failure_is_internal() {
        let store = MemoryStore::new();
        let mut tokens = MockTokenIssuer::new();
        tokens.expect_issue().returning(|_, _| {
            Err(jsonwebtoken::errors::ErrorKind::InvalidKeyFormat.into())
        });
        let service = service_with(
            &store,
            MemoryCache::new(),
            hasher(),
            tokens,
            IdentitySettings::default(),
        );
        service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        let result = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await;

        assert!(matches!(result, Err(AppError::Jwt(_))));
        assert_eq!(store.count_events(EventType::Login), 0);
    }

    #[tokio::test]
    async fn test_admin_lookup_follows_store_after_cache_expiry() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        let id = service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        let key = keys::admin_flag(id);

        assert!(!service.is_admin(&ctx(), id).await.unwrap());
        assert_eq!(cache.peek(&key).as_deref(), Some("false"));

        assert!(store.set_admin(id, true));
        // Stale until the entry goes away
        assert!(!service.is_admin(&ctx(), id).await.unwrap());

        cache.expire(&key);
        assert!(service.is_admin(&ctx(), id).await.unwrap());
        assert_eq!(cache.peek(&key).as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_admin_lookup_ignores_corrupted_cache_value() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        let id = service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        store.set_admin(id, true);
        cache.insert_raw(&keys::admin_flag(id), "yes", Duration::from_secs(60));

        assert!(service.is_admin(&ctx(), id).await.unwrap());
        assert_eq!(cache.peek(&keys::admin_flag(id)).as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_admin_lookup_for_unknown_identity() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        let id = Uuid::new_v4();

        let result = service.is_admin(&ctx(), id).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(cache.peek(&keys::admin_flag(id)), None);
    }

    #[tokio::test]
    async fn test_broken_cache_never_fails_login_or_lookup() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);
        let id = service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        cache.set_failing(true);

        let token = service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        assert!(!token.is_empty());
        assert!(!service.is_admin(&ctx(), id).await.unwrap());
        assert_eq!(store.count_events(EventType::Login), 1);
    }

    #[tokio::test]
    async fn test_lookup_writes_flag_back_with_admin_ttl() {
        let store = MemoryStore::new();
        let id = {
            let bootstrap = service(&store, &MemoryCache::new());
            bootstrap
                .register(&ctx(), credentials(EMAIL, PASSWORD))
                .await
                .unwrap()
        };
        let expected_key = keys::admin_flag(id);

        let mut cache = MockCacheRepository::new();
        cache
            .expect_get()
            .times(1)
            .returning(|_| Err(CacheError::Unavailable));
        cache
            .expect_set()
            .withf(move |key, value, ttl| {
                key == expected_key && value == "false" && *ttl == Duration::from_secs(120)
            })
            .times(1)
            .returning(|_, _, _| Err(CacheError::Unavailable));
        let settings = IdentitySettings {
            admin_cache_ttl: Duration::from_secs(120),
            ..Default::default()
        };
        let service = service_with(&store, cache, hasher(), jwt(), settings);

        assert!(!service.is_admin(&ctx(), id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cached_flag_skips_the_store() {
        let store = MemoryStore::new();
        let mut cache = MockCacheRepository::new();
        cache
            .expect_get()
            .returning(|_| Ok(Some("true".to_string())));
        cache.expect_set().never();
        let service = service_with(&store, cache, hasher(), jwt(), IdentitySettings::default());
        store.set_unavailable(true);

        assert!(service.is_admin(&ctx(), Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_readiness_reports_each_backend() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let service = service(&store, &cache);

        assert!(service.readiness(&ctx()).await.is_ready());

        cache.set_failing(true);
        assert_eq!(
            service.readiness(&ctx()).await,
            Readiness {
                store: true,
                cache: false
            }
        );

        store.set_unavailable(true);
        cache.set_failing(false);
        assert_eq!(
            service.readiness(&ctx()).await,
            Readiness {
                store: false,
                cache: true
            }
        );
    }

    #[test]
    fn test_settings_from_config_selects_policy() {
        let mut config = crate::config::tests::sample_config();
        assert_eq!(
            IdentitySettings::from_config(&config).login_cache_policy,
            LoginCachePolicy::ReuseCachedToken
        );

        config.cache.always_record_login_event = true;
        config.jwt.token_ttl_secs = 900;
        let settings = IdentitySettings::from_config(&config);
        assert_eq!(settings.login_cache_policy, LoginCachePolicy::AlwaysRecordEvent);
        assert_eq!(settings.token_ttl, Duration::from_secs(900));
    }

    #[test]
    fn test_settings_from_config_clamps_token_cache_ttl() {
        let mut config = crate::config::tests::sample_config();
        config.jwt.token_ttl_secs = 1;

        let settings = IdentitySettings::from_config(&config);

        assert_eq!(settings.token_ttl, Duration::from_secs(1));
        assert_eq!(settings.token_cache_ttl, Duration::from_secs(1));
        assert_eq!(settings.admin_cache_ttl, config.cache.admin_ttl);
    }

    #[tokio::test]
    async fn test_token_is_cached_no_longer_than_it_lives() {
        let store = MemoryStore::new();
        {
            let bootstrap = service(&store, &MemoryCache::new());
            bootstrap
                .register(&ctx(), credentials(EMAIL, PASSWORD))
                .await
                .unwrap();
        }

        let mut cache = MockCacheRepository::new();
        cache.expect_get().times(1).returning(|_| Ok(None));
        cache
            .expect_set()
            .withf(|key, _, ttl| key == EMAIL && *ttl == Duration::from_secs(1))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let settings = IdentitySettings {
            token_ttl: Duration::from_secs(1),
            token_cache_ttl: Duration::from_secs(3600),
            ..Default::default()
        };
        let service = service_with(&store, cache, hasher(), jwt(), settings);

        assert_eq!(service.settings().token_cache_ttl, Duration::from_secs(1));
        service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_token_expires_with_short_token_lifetime() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let settings = IdentitySettings {
            token_ttl: Duration::from_secs(1),
            ..Default::default()
        };
        let service = service_with(&store, cache.clone(), hasher(), jwt(), settings);
        service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

        service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        assert!(cache.peek(&keys::login_token(EMAIL)).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.peek(&keys::login_token(EMAIL)), None);

        service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
        assert_eq!(store.count_events(EventType::Login), 2);
    }

    #[test]
    fn test_login_records_operation_and_cache_metrics() {
        let ((), rendered) = capture(|| {
            block_on(async {
                let store = MemoryStore::new();
                let cache = MemoryCache::new();
                let service = service(&store, &cache);
                service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();

                service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
                service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
                service
                    .login(&ctx(), credentials(EMAIL, "wrong"))
                    .await
                    .unwrap_err();
            })
        });

        let ops = |op: &str, result: &str| {
            sample(&rendered, OPERATIONS_TOTAL, &[("op", op), ("result", result)])
        };
        assert_eq!(ops("register", "ok"), Some(1.0));
        assert_eq!(ops("login", "ok"), Some(2.0));
        assert_eq!(ops("login", "invalid_credentials"), Some(1.0));

        let lookups = |result: &str| {
            sample(
                &rendered,
                CACHE_LOOKUPS_TOTAL,
                &[("cache", "token"), ("result", result)],
            )
        };
        assert_eq!(lookups("miss"), Some(1.0));
        assert_eq!(lookups("hit"), Some(1.0));
    }

    #[test]
    fn test_swallowed_failures_are_counted() {
        let ((), rendered) = capture(|| {
            block_on(async {
                let store = MemoryStore::new();
                let cache = MemoryCache::new();
                let service = service(&store, &cache);
                let id = service.register(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
                store.fail_event_writes(true);
                cache.set_failing(true);

                service.login(&ctx(), credentials(EMAIL, PASSWORD)).await.unwrap();
                service.is_admin(&ctx(), id).await.unwrap();
            })
        });

        let failures = |op: &str, kind: &str| {
            sample(&rendered, BEST_EFFORT_FAILURES_TOTAL, &[("op", op), ("kind", kind)])
        };
        assert_eq!(failures("login", "login_event"), Some(1.0));
        assert_eq!(failures("login", "token_cache_write"), Some(1.0));
        assert_eq!(failures("is_admin", "flag_cache_write"), Some(1.0));
        assert_eq!(
            sample(&rendered, CACHE_LOOKUPS_TOTAL, &[("cache", "admin_flag"), ("result", "error")]),
            Some(1.0)
        );
    }
}
