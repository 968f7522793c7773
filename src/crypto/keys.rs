//! Key derivation helpers using HKDF-SHA256.
//!
//! From a single master key we derive:
//! - An **items key** sealing the serialized item list of a main store.
//! - A **table key** sealing the entry table of an attachment store.
//! - A unique **per-attachment** key for each blob, bound to its GUID.
//! - A dedicated **HMAC key** for file integrity checks.

use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::errors::{Result, WalletError};

use super::kdf::KEY_LEN;

/// Derive the key that seals a main store's item list.
pub fn derive_items_key(master_key: &[u8]) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(master_key, b"walletvault-items")
}

/// Derive the key that seals an attachment store's entry table.
pub fn derive_table_key(master_key: &[u8]) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(master_key, b"walletvault-attachment-table")
}

/// Derive a per-attachment encryption key.
///
/// `info` is `"walletvault-attachment:<guid>"`, so a blob cannot be
/// decrypted under another item's identity.
pub fn derive_attachment_key(master_key: &[u8], guid: &Uuid) -> Result<[u8; KEY_LEN]> {
    let info = format!("walletvault-attachment:{guid}");
    hkdf_derive(master_key, info.as_bytes())
}

/// Derive an HMAC key from the master key.
pub fn derive_hmac_key(master_key: &[u8]) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(master_key, b"walletvault-hmac-key")
}

/// Run HKDF-SHA256 expand with the given `info`.
///
/// The master key already came out of Argon2id, so it is used directly
/// as the pseudo-random key.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| WalletError::CryptoFailure(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// A 32-byte master key that zeroes its memory when dropped.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Create a new `MasterKey` from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn derive_items_key(&self) -> Result<[u8; KEY_LEN]> {
        derive_items_key(&self.bytes)
    }

    pub fn derive_table_key(&self) -> Result<[u8; KEY_LEN]> {
        derive_table_key(&self.bytes)
    }

    pub fn derive_attachment_key(&self, guid: &Uuid) -> Result<[u8; KEY_LEN]> {
        derive_attachment_key(&self.bytes, guid)
    }

    pub fn derive_hmac_key(&self) -> Result<[u8; KEY_LEN]> {
        derive_hmac_key(&self.bytes)
    }
}
