//! Password hashing (Argon2id)

use crate::config::PasswordHashConfig;
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("invalid argon2 parameters: {0}")]
    Params(argon2::Error),

    #[error("password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),
}

/// Slow, salted one-way password hashing. Calls are CPU-bound and belong on
/// the blocking thread pool.
#[cfg_attr(test, mockall::automock)]
pub trait PasswordHasher: Send + Sync {
    /// Hash `plaintext` with a fresh random salt into a PHC string.
    fn hash(&self, plaintext: &str) -> Result<String, PasswordError>;

    /// `Ok(false)` on mismatch; `Err` only when `digest` is unusable.
    fn verify(&self, digest: &str, plaintext: &str) -> Result<bool, PasswordError>;

    /// Spend the same work as one `verify` against a digest nobody owns.
    fn verify_decoy(&self, plaintext: &str);
}

#[derive(Clone)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
    decoy_digest: String,
}

impl Argon2PasswordHasher {
    pub fn new(config: &PasswordHashConfig) -> Result<Self, PasswordError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(PasswordError::Params)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let decoy_digest = argon2
            .hash_password(salt.as_str().as_bytes(), &salt)
            .map_err(PasswordError::Hash)?
            .to_string();

        Ok(Self {
            argon2,
            decoy_digest,
        })
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(PasswordError::Hash)?;
        Ok(hash.to_string())
    }

    fn verify(&self, digest: &str, plaintext: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(digest).map_err(PasswordError::Hash)?;
        match self.argon2.verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::Hash(e)),
        }
    }

    fn verify_decoy(&self, plaintext: &str) {
        let _ = self.verify(&self.decoy_digest, plaintext);
    }
}
