//! The crypto service consumed by the store layer.
//!
//! Stores never see a raw password.  They are handed an [`Encryptor`],
//! which can derive the master key for a given salt, and verification
//! hashes produced by a [`CryptoService`].

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::errors::{Result, WalletError};

use super::hashing::{create_hash, verify_hash, VerificationHash};
use super::kdf::{derive_master_key_with_params, Argon2Params};
use super::keys::MasterKey;

/// The two secrets that unlock a wallet.
///
/// The combination is an independent second secret; both are hashed into
/// the header and both feed the encryption key.
pub struct Credential {
    password: Zeroizing<String>,
    combination: Zeroizing<String>,
}

impl Credential {
    pub fn new(password: impl Into<String>, combination: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            combination: Zeroizing::new(combination.into()),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn combination(&self) -> &str {
        &self.combination
    }
}

/// Key material for one credential, used opaquely by both store writers.
///
/// Holds `HMAC-SHA256(combination, password)` and the Argon2 parameters
/// new files are written with.  The secret is zeroized on drop.
#[derive(Clone)]
pub struct Encryptor {
    secret: Zeroizing<Vec<u8>>,
    params: Argon2Params,
}

impl Encryptor {
    /// Argon2 parameters recorded in files written with this encryptor.
    pub fn params(&self) -> Argon2Params {
        self.params
    }

    /// Derive the master key of a file from its salt and stored params.
    pub fn master_key(&self, salt: &[u8], params: &Argon2Params) -> Result<MasterKey> {
        let mut bytes = derive_master_key_with_params(&self.secret, salt, params)?;
        let key = MasterKey::new(bytes);
        bytes.zeroize();
        Ok(key)
    }

    /// Constant-time check that two encryptors wrap the same credential.
    pub fn same_secret(&self, other: &Encryptor) -> bool {
        self.secret.as_slice().ct_eq(other.secret.as_slice()).into()
    }
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Hashing and encryption primitives, injected into the wallet service.
pub trait CryptoService {
    /// One-way verification hash of `secret`.
    fn hash(&self, secret: &str) -> Result<VerificationHash>;

    /// Check `secret` against a hash produced by [`CryptoService::hash`].
    fn verify(&self, secret: &str, hash: &VerificationHash) -> Result<bool>;

    /// Build the encryptor for a credential.
    fn encryptor_for(&self, credential: &Credential) -> Result<Encryptor>;
}

/// Default [`CryptoService`]: Argon2id hashes, HMAC-combined secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2CryptoService {
    params: Argon2Params,
}

impl Argon2CryptoService {
    pub fn new(params: Argon2Params) -> Self {
        Self { params }
    }
}

impl CryptoService for Argon2CryptoService {
    fn hash(&self, secret: &str) -> Result<VerificationHash> {
        create_hash(secret.as_bytes(), &self.params)
    }

    fn verify(&self, secret: &str, hash: &VerificationHash) -> Result<bool> {
        verify_hash(secret.as_bytes(), hash)
    }

    fn encryptor_for(&self, credential: &Credential) -> Result<Encryptor> {
        let secret = combine_password_combination(
            credential.password().as_bytes(),
            credential.combination().as_bytes(),
        )?;
        Ok(Encryptor {
            secret: Zeroizing::new(secret),
            params: self.params,
        })
    }
}

/// `HMAC-SHA256(combination, password)`, fed into Argon2id as the password.
fn combine_password_combination(password: &[u8], combination: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(combination)
        .map_err(|e| WalletError::CryptoFailure(format!("HMAC init failed: {e}")))?;
    mac.update(password);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify a credential against the hashes of a store header.
///
/// An empty combination hash (legacy stores) skips the second check.
pub fn verify_credential(
    crypto: &dyn CryptoService,
    credential: &Credential,
    pass_hash: &VerificationHash,
    combination_hash: &VerificationHash,
) -> Result<()> {
    if !crypto.verify(credential.password(), pass_hash)? {
        return Err(WalletError::WrongPassword);
    }
    if !combination_hash.is_empty() && !crypto.verify(credential.combination(), combination_hash)? {
        return Err(WalletError::WrongPassword);
    }
    Ok(())
}
