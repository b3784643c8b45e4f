//! Cryptographic utilities for Identity Core

pub mod password;

pub use password::{Argon2PasswordHasher, PasswordError, PasswordHasher};

#[cfg(test)]
pub use password::MockPasswordHasher;
