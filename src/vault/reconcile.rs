//! Reconciling in-memory attachment references after a transfer.
//!
//! A transfer moves part of the attachments into a new store; the rest
//! still has to be appended.  Which part went where is decided by a pure
//! function over two read-only views: the access intents captured before
//! the migration, and the entry table reloaded from the new store.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::attachments::AttachmentTable;
use super::model::{AccessFlag, WalletModel};

/// What happens to one item's attachment after a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Flagged `Delete`: both references are cleared, nothing is written.
    Drop,
    /// Already present in the new store: references are cleared and the
    /// reload rebinds the item to its new entry.
    Migrated,
    /// Not in the new store yet: flagged `Create` for the append pass.
    Append,
}

/// Read-only capture of every attachment intent in a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentSnapshot(BTreeMap<Uuid, AccessFlag>);

impl IntentSnapshot {
    pub fn capture(model: &WalletModel) -> Self {
        Self(
            model
                .attachments()
                .map(|(item, entry)| (item.guid, entry.access_flag))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decide the resolution of every captured intent against `target`.
///
/// | prior flag | in target | outcome |
/// |---|---|---|
/// | Delete | - | Drop |
/// | Update / None / Create | yes | Migrated |
/// | Update / None / Create | no | Append |
pub fn reconcile(before: &IntentSnapshot, target: &AttachmentTable) -> BTreeMap<Uuid, Resolution> {
    before
        .0
        .iter()
        .map(|(guid, flag)| {
            let resolution = match flag {
                AccessFlag::Delete => Resolution::Drop,
                _ if target.contains(guid) => Resolution::Migrated,
                _ => Resolution::Append,
            };
            (*guid, resolution)
        })
        .collect()
}

/// Apply resolutions to the live model.
///
/// `attachment` and `new_attachment` are always cleared together.  An
/// `Append` without pending content has nothing to write and is dropped.
pub fn apply(model: &mut WalletModel, resolutions: &BTreeMap<Uuid, Resolution>) {
    for (guid, resolution) in resolutions {
        let Some(item) = model.item_mut(guid) else {
            continue;
        };
        match resolution {
            Resolution::Drop | Resolution::Migrated => item.clear_attachment(),
            Resolution::Append if item.new_attachment.is_none() => {
                log::warn!("attachment {guid} is in neither store and has no content; dropping it");
                item.clear_attachment();
            }
            Resolution::Append => {
                if let Some(entry) = item.attachment.as_mut() {
                    entry.access_flag = AccessFlag::Create;
                    entry.location = None;
                }
            }
        }
    }
}
