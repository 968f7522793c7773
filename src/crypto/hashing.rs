//! One-way verification hashes for the password and the combination.
//!
//! Hashes are Argon2id PHC strings (`$argon2id$v=19$m=...$salt$hash`), so
//! each one carries its own salt and cost parameters and can be verified
//! without any other header field.

use std::fmt;

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Version};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, WalletError};

use super::kdf::{generate_salt, Argon2Params};

/// A PHC-formatted verification hash stored in a store header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationHash(String);

impl VerificationHash {
    pub fn new(phc: impl Into<String>) -> Self {
        Self(phc.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Legacy v10 stores carry no combination hash at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VerificationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash `secret` with a fresh random salt.
pub fn create_hash(secret: &[u8], params: &Argon2Params) -> Result<VerificationHash> {
    let salt = SaltString::encode_b64(&generate_salt())
        .map_err(|e| WalletError::CryptoFailure(format!("salt encoding failed: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2(None)?);

    let hash = argon2
        .hash_password(secret, &salt)
        .map_err(|e| WalletError::CryptoFailure(format!("hashing failed: {e}")))?;

    Ok(VerificationHash(hash.to_string()))
}

/// Check `secret` against a stored hash.
///
/// Returns `Ok(false)` on a mismatch and an error only when the hash
/// itself cannot be parsed or the primitive fails.
pub fn verify_hash(secret: &[u8], hash: &VerificationHash) -> Result<bool> {
    let parsed = PasswordHash::new(hash.as_str())
        .map_err(|e| WalletError::CryptoFailure(format!("malformed verification hash: {e}")))?;

    match Argon2::default().verify_password(secret, &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(WalletError::CryptoFailure(format!(
            "hash verification failed: {e}"
        ))),
    }
}
