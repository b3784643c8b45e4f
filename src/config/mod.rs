//! Configuration management for Identity Core

use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment, selects log format and verbosity
    pub env: AppEnv,
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// JWT configuration
    pub jwt: JwtConfig,
    /// Cache-aside TTLs and login policy
    pub cache: CacheConfig,
    /// Argon2 cost parameters
    pub password: PasswordHashConfig,
    /// Deadline applied to every inbound request
    pub request_timeout: Duration,
    /// Grace period for draining in-flight requests on shutdown
    pub shutdown_timeout: Duration,
    /// Install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Local,
    Dev,
    Prod,
}

impl FromStr for AppEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => bail!("unknown APP_ENV '{}', expected local, dev or prod", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub token_ttl_secs: u64,
}

/// Upper bound for `JWT_TOKEN_TTL_SECS`
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an issued login token is reused from cache
    pub token_ttl: Duration,
    /// How long an authorization flag may be served from cache
    pub admin_ttl: Duration,
    /// Record a login event even when the token came from cache
    pub always_record_login_event: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(3600),
            admin_ttl: Duration::from_secs(3600),
            always_record_login_event: false,
        }
    }
}

/// Argon2id cost parameters. Fixed per deployment, never chosen by callers.
#[derive(Debug, Clone)]
pub struct PasswordHashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        // argon2 crate defaults (OWASP minimum for Argon2id)
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            env: env::var("APP_ENV")
                .unwrap_or_else(|_| "dev".to_string())
                .parse()?,
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid HTTP_PORT")?,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 2)?,
                acquire_timeout: Duration::from_secs(parse_or(
                    "DATABASE_ACQUIRE_TIMEOUT_SECS",
                    3,
                )?),
                run_migrations: parse_or("DATABASE_RUN_MIGRATIONS", true)?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").context("JWT_SECRET is required")?,
                token_ttl_secs: parse_or("JWT_TOKEN_TTL_SECS", 3600)?,
            },
            cache: CacheConfig {
                token_ttl: Duration::from_secs(parse_or("CACHE_TOKEN_TTL_SECS", 3600)?),
                admin_ttl: Duration::from_secs(parse_or("CACHE_ADMIN_TTL_SECS", 3600)?),
                always_record_login_event: parse_or("LOGIN_ALWAYS_RECORD_EVENT", false)?,
            },
            password: PasswordHashConfig {
                memory_kib: parse_or("PASSWORD_HASH_MEMORY_KIB", 19456)?,
                iterations: parse_or("PASSWORD_HASH_ITERATIONS", 2)?,
                parallelism: parse_or("PASSWORD_HASH_PARALLELISM", 1)?,
            },
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 5)?),
            shutdown_timeout: Duration::from_secs(parse_or("SHUTDOWN_TIMEOUT_SECS", 5)?),
            metrics_enabled: parse_or("METRICS_ENABLED", true)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that parse but cannot work together
    pub fn validate(&self) -> Result<()> {
        if self.jwt.token_ttl_secs == 0 {
            bail!("JWT_TOKEN_TTL_SECS must be greater than zero");
        }
        if self.jwt.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            bail!(
                "JWT_TOKEN_TTL_SECS must be at most {} (one year)",
                MAX_TOKEN_TTL_SECS
            );
        }
        Ok(())
    }

    /// Get HTTP server address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

/// Parse an optional environment variable, falling back to `default` when unset.
/// A value that is present but malformed is an error rather than silently ignored.
fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        _ => Ok(default),
    }
}
