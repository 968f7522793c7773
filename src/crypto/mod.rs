//! Cryptographic primitives for WalletVault.
//!
//! This module provides:
//! - AES-256-GCM sealing bound to a context label (`encryption`)
//! - Argon2id password-based key derivation (`kdf`)
//! - HKDF-based purpose keys and per-attachment keys (`keys`)
//! - Argon2 PHC verification hashes (`hashing`)
//! - The injectable `CryptoService` and the opaque `Encryptor` (`service`)

pub mod encryption;
pub mod hashing;
pub mod kdf;
pub mod keys;
pub mod service;

pub use encryption::{open, seal, ITEMS_CONTEXT, TABLE_CONTEXT};
pub use hashing::VerificationHash;
pub use kdf::{generate_salt, Argon2Params};
pub use keys::MasterKey;
pub use service::{Argon2CryptoService, Credential, CryptoService, Encryptor};
