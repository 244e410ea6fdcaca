//! Salted, deliberately slow one-way hashing for passwords and refresh secrets.
//!
//! bcrypt only reads 72 bytes of input, its NUL terminator included. Secrets
//! longer than 71 bytes are refused instead of silently truncated.

use crate::errors::{ServiceError, ServiceResult};
use bcrypt::{non_truncating_hash, non_truncating_verify, verify};
use std::sync::Arc;

/// Hashes and verifies secrets with bcrypt at a fixed cost.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    /// Hash of a throwaway value at the same cost. Used to burn the same
    /// amount of work when there is no usable stored hash to compare with.
    dummy_hash: Arc<str>,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> ServiceResult<Self> {
        let dummy_hash = non_truncating_hash(uuid::Uuid::now_v7().to_string(), cost)
            .map_err(|e| ServiceError::internal(format!("Hashing failed: {}", e)))?;

        Ok(Self {
            cost,
            dummy_hash: dummy_hash.into(),
        })
    }

    /// Hashes a secret with a fresh random salt.
    ///
    /// # Errors
    /// Returns `ServiceError::Internal` if bcrypt cannot produce a hash,
    /// including when `secret` is longer than 71 bytes
    pub fn hash(&self, secret: &str) -> ServiceResult<String> {
        non_truncating_hash(secret, self.cost)
            .map_err(|e| ServiceError::internal(format!("Hashing failed: {}", e)))
    }

    /// Returns `true` only if `secret` matches `hashed`.
    ///
    /// A corrupt hash or an over-long secret is reported as a plain mismatch
    /// after a comparison against a dummy hash, so every case costs roughly
    /// the same.
    pub fn verify(&self, secret: &str, hashed: &str) -> bool {
        match non_truncating_verify(secret, hashed) {
            Ok(matches) => matches,
            Err(_) => {
                self.burn(secret);
                false
            }
        }
    }

    /// Spends one comparison without looking at the outcome. Truncation is
    /// fine here since the result is discarded.
    pub fn burn(&self, secret: &str) {
        let _ = verify(secret, &self.dummy_hash);
    }
}
