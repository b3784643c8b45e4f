//! Identity Core - Identity Service Backend
//!
//! Registration, login and authorization lookup over HTTP, backed by
//! PostgreSQL (with a transactional outbox for domain events) and a Redis
//! cache-aside layer.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod migration;
pub mod repository;
pub mod server;
pub mod service;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
