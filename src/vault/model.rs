//! In-memory wallet model: the item tree and per-item attachment intents.
//!
//! The model owns a flat list of items; ordering in that list is the tree
//! ordering.  `parent` is a navigational GUID only and `children` is
//! rebuilt from the flat list by [`WalletModel::build_tree_from_flat_list`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{Encryptor, VerificationHash};
use crate::errors::{Result, WalletError};

use super::format::LATEST_VERSION;

/// Suffix the editor appends to names of items with unsaved edits.
const DIRTY_MARKER: &str = "(*)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Category,
    Entry,
}

/// What must happen to an attachment on the next commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessFlag {
    #[default]
    None,
    Create,
    Update,
    Delete,
}

/// Where a committed blob lives inside the blob region of an attachment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocation {
    pub offset: u64,
    pub size: u64,
}

/// An item's reference into the attachment store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentEntry {
    /// Always equal to the owning item's GUID.
    pub guid: Uuid,
    pub file_name: String,
    /// `None` until the entry has been committed to a store file.
    pub location: Option<BlobLocation>,
    pub access_flag: AccessFlag,
}

impl AttachmentEntry {
    pub fn is_live(&self) -> bool {
        self.access_flag != AccessFlag::Delete
    }
}

/// Attachment content that has not been committed yet.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl std::fmt::Debug for PendingAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAttachment")
            .field("file_name", &self.file_name)
            .field("len", &self.content.len())
            .finish()
    }
}

/// A node of the wallet tree.
#[derive(Debug, Clone)]
pub struct Item {
    pub guid: Uuid,
    pub item_type: ItemType,
    pub name: String,
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub fields: BTreeMap<String, String>,
    pub notes: Option<String>,
    pub attachment: Option<AttachmentEntry>,
    pub new_attachment: Option<PendingAttachment>,
}

impl Item {
    pub fn new(item_type: ItemType, name: impl Into<String>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            item_type,
            name: name.into(),
            parent: None,
            children: Vec::new(),
            fields: BTreeMap::new(),
            notes: None,
            attachment: None,
            new_attachment: None,
        }
    }

    pub fn is_category(&self) -> bool {
        self.item_type == ItemType::Category
    }

    /// Drop both attachment references.  They are always cleared together.
    pub fn clear_attachment(&mut self) {
        self.attachment = None;
        self.new_attachment = None;
    }

    /// A copy carrying only committed state: children and pending content
    /// are dropped, a committed attachment is flagged `None` and one pending
    /// deletion is left out.
    pub fn shallow_clone(&self) -> Self {
        let attachment = self
            .attachment
            .as_ref()
            .filter(|a| {
                a.location.is_some()
                    && matches!(a.access_flag, AccessFlag::None | AccessFlag::Update)
            })
            .map(|a| AttachmentEntry {
                access_flag: AccessFlag::None,
                ..a.clone()
            });
        Self {
            children: Vec::new(),
            attachment,
            new_attachment: None,
            ..self.clone()
        }
    }

    fn strip_dirty_marker(&mut self) {
        if let Some(k) = self.name.find(DIRTY_MARKER) {
            if k > 0 {
                self.name.truncate(k);
            }
        }
    }
}

/// Equality over persisted state: identity, content, structure and the
/// committed attachment binding (not physical offsets or pending content).
impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        let binding = |i: &Item| {
            i.attachment
                .as_ref()
                .map(|a| (a.guid, a.file_name.clone(), a.access_flag))
        };
        self.guid == other.guid
            && self.item_type == other.item_type
            && self.name == other.name
            && self.parent == other.parent
            && self.children == other.children
            && self.fields == other.fields
            && self.notes == other.notes
            && binding(self) == binding(other)
    }
}

/// The item tree plus header state of one open wallet.
#[derive(Debug, Clone, Default)]
pub struct WalletModel {
    items: Vec<Item>,
    index: HashMap<Uuid, usize>,
    pub pass_hash: VerificationHash,
    pub combination_hash: VerificationHash,
    pub data_file_version: u32,
    pub vault_path: Option<PathBuf>,
    pub deleted_in_store: BTreeSet<Uuid>,
    encryptor: Option<Encryptor>,
}

impl WalletModel {
    /// An empty model at the latest data version.
    pub fn new() -> Self {
        Self {
            data_file_version: LATEST_VERSION,
            ..Self::default()
        }
    }

    /// Build a model from a flat item list as read from a store.
    pub fn from_flat_list(items: Vec<Item>) -> Self {
        let mut model = Self::new();
        model.set_items_flat_list(items);
        model
    }

    pub fn set_items_flat_list(&mut self, items: Vec<Item>) {
        self.items = items;
        self.build_tree_from_flat_list();
    }

    /// Rebuild the GUID index and every item's `children` list.
    ///
    /// Items whose parent GUID is unknown become roots.
    pub fn build_tree_from_flat_list(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.guid, i))
            .collect();

        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for item in &mut self.items {
            if let Some(parent) = item.parent {
                if !self.index.contains_key(&parent) {
                    item.parent = None;
                    continue;
                }
                children.entry(parent).or_default().push(item.guid);
            }
        }
        for item in &mut self.items {
            item.children = children.remove(&item.guid).unwrap_or_default();
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut Item> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, guid: &Uuid) -> Option<&Item> {
        self.index.get(guid).map(|&i| &self.items[i])
    }

    pub fn item_mut(&mut self, guid: &Uuid) -> Option<&mut Item> {
        self.index.get(guid).map(|&i| &mut self.items[i])
    }

    fn require_mut(&mut self, guid: &Uuid) -> Result<&mut Item> {
        self.index
            .get(guid)
            .map(|&i| &mut self.items[i])
            .ok_or_else(|| WalletError::ItemNotFound(guid.to_string()))
    }

    pub fn roots(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|i| i.parent.is_none())
    }

    pub fn children_of(&self, guid: &Uuid) -> Vec<&Item> {
        self.item(guid)
            .map(|parent| parent.children.iter().filter_map(|c| self.item(c)).collect())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, guid: &Uuid) -> Option<&Item> {
        self.item(guid)?.parent.and_then(|p| self.item(&p))
    }

    /// Append an item to the flat list, linking it under its parent.
    pub fn add_item(&mut self, mut item: Item) -> Result<Uuid> {
        if let Some(parent) = item.parent {
            if !self.index.contains_key(&parent) {
                return Err(WalletError::ItemNotFound(parent.to_string()));
            }
        }
        item.children.clear();
        let guid = item.guid;
        self.index.insert(guid, self.items.len());
        if let Some(parent) = item.parent {
            self.require_mut(&parent)?.children.push(guid);
        }
        self.items.push(item);
        Ok(guid)
    }

    pub fn add_category(&mut self, name: &str, parent: Option<Uuid>) -> Result<Uuid> {
        let mut item = Item::new(ItemType::Category, name);
        item.parent = parent;
        self.add_item(item)
    }

    pub fn add_entry(&mut self, parent: Uuid, name: &str) -> Result<Uuid> {
        let mut item = Item::new(ItemType::Entry, name);
        item.parent = Some(parent);
        self.add_item(item)
    }

    /// Stage new attachment content for an item.
    ///
    /// Flags `Update` when a committed attachment exists, `Create` otherwise.
    pub fn attach(&mut self, guid: &Uuid, file_name: &str, content: Vec<u8>) -> Result<()> {
        let item = self.require_mut(guid)?;
        let committed = item
            .attachment
            .as_ref()
            .filter(|a| a.access_flag != AccessFlag::Create)
            .and_then(|a| a.location);

        item.attachment = Some(AttachmentEntry {
            guid: *guid,
            file_name: file_name.to_string(),
            location: committed,
            access_flag: if committed.is_some() {
                AccessFlag::Update
            } else {
                AccessFlag::Create
            },
        });
        item.new_attachment = Some(PendingAttachment {
            file_name: file_name.to_string(),
            content,
        });
        Ok(())
    }

    /// Mark an item's attachment for deletion.
    ///
    /// An attachment that was never committed is simply dropped.
    pub fn detach(&mut self, guid: &Uuid) -> Result<()> {
        let item = self.require_mut(guid)?;
        let committed = item
            .attachment
            .as_ref()
            .is_some_and(|a| a.location.is_some() && a.access_flag != AccessFlag::Create);

        if committed {
            if let Some(entry) = item.attachment.as_mut() {
                entry.access_flag = AccessFlag::Delete;
            }
            item.new_attachment = None;
        } else {
            item.clear_attachment();
        }
        Ok(())
    }

    /// Remove the transient dirty marker from every item name.
    pub fn strip_dirty_markers(&mut self) {
        for item in &mut self.items {
            item.strip_dirty_marker();
        }
    }

    pub fn encryptor(&self) -> Option<&Encryptor> {
        self.encryptor.as_ref()
    }

    pub fn set_encryptor(&mut self, encryptor: Encryptor) {
        self.encryptor = Some(encryptor);
    }

    /// The session encryptor, required by every store write.
    pub fn require_encryptor(&self) -> Result<&Encryptor> {
        self.encryptor.as_ref().ok_or_else(|| {
            WalletError::UnsupportedOperation("the wallet model has no encryptor".into())
        })
    }

    pub fn vault_path(&self) -> Result<&Path> {
        self.vault_path.as_deref().ok_or_else(|| {
            WalletError::UnsupportedOperation("the wallet model is not bound to a file".into())
        })
    }

    pub fn is_latest_version(&self) -> bool {
        self.data_file_version == LATEST_VERSION
    }

    /// Items carrying an attachment reference, in tree order.
    pub fn attachments(&self) -> impl Iterator<Item = (&Item, &AttachmentEntry)> {
        self.items
            .iter()
            .filter_map(|i| i.attachment.as_ref().map(|a| (i, a)))
    }
}
