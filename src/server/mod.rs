//! Server initialization and routing

use crate::api;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::context::RequestContext;
use crate::crypto::Argon2PasswordHasher;
use crate::jwt::JwtManager;
use crate::middleware::HttpMetricsLayer;
use crate::migration;
use crate::repository::{EventRepositoryImpl, IdentityRepositoryImpl, PgTransactionManager};
use crate::service::{IdentityService, IdentitySettings};
use crate::state::HasIdentityService;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Identity service wired to PostgreSQL, Redis, Argon2id and HS256
pub type ProductionIdentityService = IdentityService<
    PgTransactionManager,
    IdentityRepositoryImpl,
    EventRepositoryImpl,
    CacheManager,
    Argon2PasswordHasher,
    JwtManager,
>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub identity_service: Arc<ProductionIdentityService>,
    /// Cancelled when the shutdown grace period runs out
    pub shutdown: CancellationToken,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Config,
        db_pool: PgPool,
        cache_manager: CacheManager,
        hasher: Argon2PasswordHasher,
        shutdown: CancellationToken,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let identity_service = IdentityService::new(
            Arc::new(PgTransactionManager::new(db_pool.clone())),
            Arc::new(IdentityRepositoryImpl::new(db_pool.clone())),
            Arc::new(EventRepositoryImpl::new(db_pool)),
            Arc::new(cache_manager),
            Arc::new(hasher),
            Arc::new(JwtManager::new(&config.jwt)),
            IdentitySettings::from_config(&config),
        );

        Self {
            config: Arc::new(config),
            identity_service: Arc::new(identity_service),
            shutdown,
            metrics_handle,
        }
    }
}

impl HasIdentityService for AppState {
    type Transactions = PgTransactionManager;
    type IdentityRepo = IdentityRepositoryImpl;
    type EventRepo = EventRepositoryImpl;
    type Cache = CacheManager;
    type Hasher = Argon2PasswordHasher;
    type Tokens = JwtManager;

    fn identity_service(&self) -> &ProductionIdentityService {
        &self.identity_service
    }

    fn request_context(&self) -> RequestContext {
        RequestContext::child_of(&self.shutdown, self.config.request_timeout)
    }

    fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.metrics_handle.as_ref()
    }
}

/// Run the HTTP server until SIGINT/SIGTERM, then drain in-flight requests
pub async fn run(config: Config, metrics_handle: Option<PrometheusHandle>) -> Result<()> {
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    info!("Connected to database");

    if config.database.run_migrations {
        migration::run_migrations(&db_pool).await?;
    }

    let cache_manager = CacheManager::new(&config.redis).await?;
    info!("Connected to Redis");

    let hasher = Argon2PasswordHasher::new(&config.password)
        .context("Invalid password hashing parameters")?;

    let http_addr = config.http_addr();
    let shutdown_timeout = config.shutdown_timeout;
    let shutdown = CancellationToken::new();
    if let Some(handle) = metrics_handle.clone() {
        tokio::spawn(run_metrics_upkeep(handle, shutdown.clone()));
    }

    let state = AppState::new(
        config,
        db_pool.clone(),
        cache_manager,
        hasher,
        shutdown.clone(),
        metrics_handle,
    );

    let app = build_router(state);

    let listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", http_addr))?;
    info!("HTTP server started on {}", http_addr);

    let signalled = CancellationToken::new();
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let signalled = signalled.clone();
        async move {
            shutdown_signal().await;
            signalled.cancel();
        }
    });
    let server = server.into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result.context("HTTP server failed")?,
        _ = drain_deadline(&signalled, shutdown_timeout) => {
            warn!("Shutdown timeout elapsed, cancelling in-flight requests");
            shutdown.cancel();
            match tokio::time::timeout(Duration::from_secs(1), &mut server).await {
                Ok(result) => result.context("HTTP server failed")?,
                Err(_) => warn!("In-flight requests did not finish, exiting anyway"),
            }
        }
    }

    shutdown.cancel();
    db_pool.close().await;
    info!("Server stopped");
    Ok(())
}

/// Drain histogram buckets periodically so they do not grow between scrapes.
async fn run_metrics_upkeep(handle: PrometheusHandle, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => handle.run_upkeep(),
        }
    }
}

/// Resolves `grace` after the shutdown signal fired.
async fn drain_deadline(signalled: &CancellationToken, grace: Duration) {
    signalled.cancelled().await;
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Graceful shutdown initiated");
}

/// Build the HTTP router for any state implementing [`HasIdentityService`]
pub fn build_router<S: HasIdentityService>(state: S) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(api::health::health))
        .route("/ready", get(api::health::ready::<S>))
        // Identity endpoints
        .route("/api/v1/auth/register", post(api::auth::register::<S>))
        .route("/api/v1/auth/login", post(api::auth::login::<S>))
        .route(
            "/api/v1/users/{id}/admin",
            get(api::user::admin_status::<S>),
        )
        .route_layer(HttpMetricsLayer)
        // Registered after the metrics layer so scrapes are not counted
        .route("/metrics", get(api::metrics::metrics_handler::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
