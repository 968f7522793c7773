//! AES-256-GCM sealing with a context label.
//!
//! Every sealed buffer is bound to the place it is stored: the items of a
//! main store, an attachment table, or one attachment blob (its GUID).
//! The context goes in as associated data, so a buffer copied into another
//! slot of a file no longer opens even under the right key.
//!
//! Layout of a sealed buffer:
//!   [ 12-byte nonce | ciphertext + 16-byte auth tag ]

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

use crate::errors::{Result, WalletError};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of the AES-256-GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Context of the sealed item list in a main store.
pub const ITEMS_CONTEXT: &[u8] = b"walletvault/items";

/// Context of the sealed entry table in an attachment store.
pub const TABLE_CONTEXT: &[u8] = b"walletvault/attachment-table";

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|e| WalletError::CryptoFailure(format!("invalid key length: {e}")))
}

/// Seal `plaintext` under a 32-byte `key`, bound to `context`.
///
/// A fresh random nonce is drawn per call and prepended to the output.
pub fn seal(key: &[u8], context: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let payload = Payload {
        msg: plaintext,
        aad: context,
    };
    let ciphertext = cipher(key)?
        .encrypt(&nonce, payload)
        .map_err(|e| WalletError::CryptoFailure(format!("sealing failed: {e}")))?;

    let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Open a buffer produced by [`seal`] with the same key and context.
///
/// A wrong key, a wrong context and a tampered buffer all fail the same
/// way, with `DecryptionFailed`.
pub fn open(key: &[u8], context: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(WalletError::DecryptionFailed);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let payload = Payload {
        msg: ciphertext,
        aad: context,
    };

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| WalletError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), payload)
        .map_err(|_| WalletError::DecryptionFailed)
}
