//! Redis cache layer
//!
//! Entries are advisory. Callers treat every miss or error as "ask the store".

pub mod memory;

pub use memory::MemoryCache;

use crate::config::RedisConfig;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;
use thiserror::Error;

/// Cache key derivation
pub mod keys {
    use uuid::Uuid;

    /// Login token cache key: the raw email as submitted.
    pub fn login_token(email: &str) -> String {
        email.to_string()
    }

    /// Authorization flag cache key: the canonical hyphenated UUID.
    pub fn admin_flag(id: Uuid) -> String {
        id.hyphenated().to_string()
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache unavailable")]
    Unavailable,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Cache manager for Redis operations
#[derive(Clone)]
pub struct CacheManager {
    conn: ConnectionManager,
}

impl CacheManager {
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| anyhow::anyhow!("Failed to create Redis client: {}", e))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheRepository for CacheManager {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        // SET EX rejects 0
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Encode an authorization flag the way it is cached.
pub fn encode_flag(is_admin: bool) -> &'static str {
    if is_admin {
        "true"
    } else {
        "false"
    }
}

/// Decode a cached authorization flag. Anything other than the two literals is
/// treated as corrupted.
pub fn decode_flag(raw: &str) -> Option<bool> {
    match raw {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
