//! Vault module: the wallet's item tree and its two store files.
//!
//! This module provides:
//! - The in-memory item tree and attachment intents (`model`)
//! - The main store header, item records and codec registry (`format`)
//! - One codec per historical main store layout (`codecs`)
//! - The attachment store and its transfer/append/rebuild operations (`attachments`)
//! - Staged rewrites and interrupted-swap recovery (`staging`)
//! - Post-transfer reconciliation of attachment references (`reconcile`)
//! - The `WalletService` orchestrating all of the above (`service`)

pub mod attachments;
pub mod codecs;
pub mod format;
pub mod model;
pub mod reconcile;
pub mod service;
pub mod staging;

// Re-export the most commonly used items.
pub use attachments::{attachment_path_of, AttachmentStore, AttachmentTable};
pub use format::{Header, StoreRecord, VaultCodec, LATEST_VERSION};
pub use model::{AccessFlag, AttachmentEntry, Item, ItemType, WalletModel};
pub use service::WalletService;
pub use staging::Recovery;
