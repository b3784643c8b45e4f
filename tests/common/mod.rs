//! Common test utilities
//!
//! `TestAppState` runs the production router against in-memory backends, so
//! HTTP tests need no database or Redis.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use identity_core::cache::MemoryCache;
use identity_core::config::{JwtConfig, PasswordHashConfig};
use identity_core::context::RequestContext;
use identity_core::crypto::Argon2PasswordHasher;
use identity_core::jwt::JwtManager;
use identity_core::repository::memory::MemoryStore;
use identity_core::server::build_router;
use identity_core::service::{IdentityService, IdentitySettings};
use identity_core::state::HasIdentityService;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-http-testing";

pub type MemoryIdentityService = IdentityService<
    MemoryStore,
    MemoryStore,
    MemoryStore,
    MemoryCache,
    Argon2PasswordHasher,
    JwtManager,
>;

#[derive(Clone)]
pub struct TestAppState {
    pub store: MemoryStore,
    pub cache: MemoryCache,
    pub identity_service: Arc<MemoryIdentityService>,
    pub shutdown: CancellationToken,
    pub request_timeout: Duration,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl TestAppState {
    pub fn new() -> Self {
        Self::with_settings(IdentitySettings::default())
    }

    pub fn with_settings(settings: IdentitySettings) -> Self {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let shared_store = Arc::new(store.clone());

        let identity_service = IdentityService::new(
            shared_store.clone(),
            shared_store.clone(),
            shared_store,
            Arc::new(cache.clone()),
            Arc::new(test_hasher()),
            Arc::new(test_jwt_manager()),
            settings,
        );

        Self {
            store,
            cache,
            identity_service: Arc::new(identity_service),
            shutdown: CancellationToken::new(),
            request_timeout: Duration::from_secs(5),
            // Not installed globally; renders only what it was described with
            metrics_handle: Some(PrometheusBuilder::new().build_recorder().handle()),
        }
    }

    pub fn without_metrics(mut self) -> Self {
        self.metrics_handle = None;
        self
    }
}

impl HasIdentityService for TestAppState {
    type Transactions = MemoryStore;
    type IdentityRepo = MemoryStore;
    type EventRepo = MemoryStore;
    type Cache = MemoryCache;
    type Hasher = Argon2PasswordHasher;
    type Tokens = JwtManager;

    fn identity_service(&self) -> &MemoryIdentityService {
        &self.identity_service
    }

    fn request_context(&self) -> RequestContext {
        RequestContext::child_of(&self.shutdown, self.request_timeout)
    }

    fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.metrics_handle.as_ref()
    }
}

/// Cheapest valid Argon2id parameters
pub fn test_hasher() -> Argon2PasswordHasher {
    Argon2PasswordHasher::new(&PasswordHashConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}

pub fn test_jwt_manager() -> JwtManager {
    JwtManager::new(&JwtConfig {
        secret: TEST_JWT_SECRET.to_string(),
        token_ttl_secs: 3600,
    })
}

pub fn build_test_router(state: TestAppState) -> Router {
    build_router(state)
}

async fn send<T: DeserializeOwned>(app: &Router, request: Request<Body>) -> (StatusCode, Option<T>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();

    if body_bytes.is_empty() {
        return (status, None);
    }

    match serde_json::from_slice(&body_bytes) {
        Ok(data) => (status, Some(data)),
        Err(_) => (status, None),
    }
}

/// Make a GET request and parse JSON response
pub async fn get_json<T: DeserializeOwned>(app: &Router, path: &str) -> (StatusCode, Option<T>) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// Make a GET request and return the raw text body
pub async fn get_text(app: &Router, path: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body_bytes.to_vec()).unwrap())
}

/// Make a POST request with a JSON body and parse JSON response
pub async fn post_json<T: Serialize, R: DeserializeOwned>(
    app: &Router,
    path: &str,
    body: &T,
) -> (StatusCode, Option<R>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap();
    send(app, request).await
}

/// Make a POST request with a raw body
pub async fn post_raw<R: DeserializeOwned>(
    app: &Router,
    path: &str,
    body: &'static str,
) -> (StatusCode, Option<R>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}
