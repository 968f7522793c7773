use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in WalletVault.
#[derive(Debug, Error)]
pub enum WalletError {
    // --- Store lifecycle errors ---
    #[error("Cannot read file header of {0}: no known store version matches")]
    UnreadableStore(PathBuf),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error(
        "Attachment store swap was interrupted: {} is missing, staged copy left at {}",
        target.display(),
        staging.display()
    )]
    CorruptedSwapWindow { target: PathBuf, staging: PathBuf },

    // --- Crypto errors ---
    #[error("Cannot perform crypto operation: {0}")]
    CryptoFailure(String),

    #[error("Decryption failed: wrong password or corrupted data")]
    DecryptionFailed,

    #[error("Wrong password or combination")]
    WrongPassword,

    // --- Store format errors ---
    #[error("Vault not found at {0}")]
    VaultNotFound(PathBuf),

    #[error("Vault already exists at {0}")]
    VaultAlreadyExists(PathBuf),

    #[error("Invalid store format: {0}")]
    InvalidStoreFormat(String),

    #[error("HMAC verification failed: store file may be tampered")]
    HmacMismatch,

    #[error("Item {0} not found")]
    ItemNotFound(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,
}

/// Convenience type alias for WalletVault results.
pub type Result<T> = std::result::Result<T, WalletError>;
