//! Business logic layer

pub mod identity;

pub use identity::{IdentityService, IdentitySettings, LoginCachePolicy, Readiness};
