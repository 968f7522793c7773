//! The attachment store: binary blobs keyed by item GUID.
//!
//! An attachment store lives next to its main store (see
//! [`attachment_path_of`]) and is encrypted independently:
//!
//! ```text
//! [WATT: 4][version: 1][header_len: 4 LE][header JSON][table_len: 4 LE][sealed table][blob region][HMAC-SHA256: 32]
//! ```
//!
//! - **Header JSON**: salt + Argon2 params for the file's master key.
//! - **Sealed table**: AES-GCM sealed JSON of the entry table (GUID, file
//!   name, offset/size) and the deleted-but-not-purged GUID set.
//! - **Blob region**: each blob sealed with a per-GUID key.  Offsets are
//!   relative to the start of this region, so they change on every
//!   rewrite that drops or reorders blobs.
//!
//! Files are always read and written whole.  Every write goes through
//! `<path>.tmp` and a swap.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::crypto::kdf::SALT_LEN;
use crate::crypto::{
    generate_salt, open, seal, Argon2Params, Encryptor, MasterKey, TABLE_CONTEXT,
};
use crate::errors::{Result, WalletError};

use super::format::{base64_decode, base64_encode};
use super::model::{AccessFlag, AttachmentEntry, BlobLocation, WalletModel};
use super::staging::write_staged;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"WATT";

const FORMAT_VERSION: u8 = 1;

const HMAC_LEN: usize = 32;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
const PREFIX_LEN: usize = 9;

/// Extension of the attachment store derived from a vault path.
const ATTACHMENT_EXTENSION: &str = "attachments";

/// Deterministic attachment store path for a main store.
///
/// `dir/wallet.vault` → `dir/wallet.attachments`.
pub fn attachment_path_of(vault_path: &Path) -> PathBuf {
    vault_path.with_extension(ATTACHMENT_EXTENSION)
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Every entry of one attachment store file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentTable {
    /// Committed entries, flagged `None`, in file order.
    pub entries: Vec<AttachmentEntry>,
    /// GUIDs deleted by a commit and not yet purged by a rebuild.
    pub deleted: BTreeSet<Uuid>,
}

impl AttachmentTable {
    pub fn get(&self, guid: &Uuid) -> Option<&AttachmentEntry> {
        self.entries.iter().find(|e| &e.guid == guid)
    }

    pub fn contains(&self, guid: &Uuid) -> bool {
        self.get(guid).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreHeader {
    version: u8,
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    salt: Vec<u8>,
    kdf_params: Argon2Params,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    guid: Uuid,
    file_name: String,
    offset: u64,
    size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TableRecord {
    entries: Vec<EntryRecord>,
    #[serde(default)]
    deleted: BTreeSet<Uuid>,
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Salt, params and the master key derived from them for one file.
struct StoreKeys {
    salt: Vec<u8>,
    params: Argon2Params,
    master: MasterKey,
}

impl StoreKeys {
    fn fresh(encryptor: &Encryptor) -> Result<Self> {
        let salt = generate_salt().to_vec();
        let params = encryptor.params();
        let master = encryptor.master_key(&salt, &params)?;
        Ok(Self {
            salt,
            params,
            master,
        })
    }

    fn for_header(encryptor: &Encryptor, header: &StoreHeader) -> Result<Self> {
        let master = encryptor.master_key(&header.salt, &header.kdf_params)?;
        Ok(Self {
            salt: header.salt.clone(),
            params: header.kdf_params,
            master,
        })
    }

    fn seal_blob(&self, guid: &Uuid, content: &[u8]) -> Result<Vec<u8>> {
        let mut key = self.master.derive_attachment_key(guid)?;
        let sealed = seal(&key, guid.as_bytes(), content);
        key.zeroize();
        sealed
    }

    fn open_blob(&self, guid: &Uuid, sealed: &[u8]) -> Result<Vec<u8>> {
        let mut key = self.master.derive_attachment_key(guid)?;
        let plain = open(&key, guid.as_bytes(), sealed);
        key.zeroize();
        plain
    }
}

fn compute_hmac(master: &MasterKey, covered: &[u8]) -> Result<Hmac<Sha256>> {
    let mut hmac_key = master.derive_hmac_key()?;
    let mac = Hmac::<Sha256>::new_from_slice(&hmac_key)
        .map_err(|e| WalletError::CryptoFailure(format!("invalid HMAC key: {e}")));
    hmac_key.zeroize();
    let mut mac = mac?;
    mac.update(covered);
    Ok(mac)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A fully parsed attachment store file.
struct LoadedStore {
    keys: StoreKeys,
    table: AttachmentTable,
    blobs: Vec<u8>,
}

impl LoadedStore {
    /// `Ok(None)` when there is no file at `path`.
    fn load(path: &Path, encryptor: &Encryptor) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        Self::parse(&data, encryptor).map(Some)
    }

    fn parse(data: &[u8], encryptor: &Encryptor) -> Result<Self> {
        let invalid = |msg: &str| WalletError::InvalidStoreFormat(format!("attachment store: {msg}"));

        if data.len() < PREFIX_LEN + 4 + HMAC_LEN {
            return Err(invalid("file too small"));
        }
        if &data[0..4] != MAGIC {
            return Err(invalid("missing WATT magic bytes"));
        }
        if data[4] != FORMAT_VERSION {
            return Err(invalid(&format!("unsupported version {}", data[4])));
        }

        let body_end = data.len() - HMAC_LEN;
        let header_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
        let header_end = PREFIX_LEN
            .checked_add(header_len)
            .filter(|&end| end + 4 <= body_end)
            .ok_or_else(|| invalid("header length exceeds file size"))?;

        let header: StoreHeader = serde_json::from_slice(&data[PREFIX_LEN..header_end])
            .map_err(|e| invalid(&format!("header JSON: {e}")))?;
        if header.salt.len() != SALT_LEN {
            return Err(invalid("bad salt length"));
        }

        let t = header_end;
        let table_len = u32::from_le_bytes([data[t], data[t + 1], data[t + 2], data[t + 3]]) as usize;
        let table_end = (t + 4)
            .checked_add(table_len)
            .filter(|&end| end <= body_end)
            .ok_or_else(|| invalid("table length exceeds file size"))?;

        let keys = StoreKeys::for_header(encryptor, &header)?;

        compute_hmac(&keys.master, &data[PREFIX_LEN..body_end])?
            .verify_slice(&data[body_end..])
            .map_err(|_| WalletError::HmacMismatch)?;

        let mut table_key = keys.master.derive_table_key()?;
        let table_json = open(&table_key, TABLE_CONTEXT, &data[t + 4..table_end]);
        table_key.zeroize();
        let record: TableRecord = serde_json::from_slice(&table_json?)
            .map_err(|e| invalid(&format!("table JSON: {e}")))?;

        let blobs = data[table_end..body_end].to_vec();
        let entries = record
            .entries
            .into_iter()
            .map(|r| {
                let in_bounds = r
                    .offset
                    .checked_add(r.size)
                    .is_some_and(|end| end <= blobs.len() as u64);
                if !in_bounds {
                    return Err(invalid(&format!("entry {} points outside the blob region", r.guid)));
                }
                Ok(AttachmentEntry {
                    guid: r.guid,
                    file_name: r.file_name,
                    location: Some(BlobLocation {
                        offset: r.offset,
                        size: r.size,
                    }),
                    access_flag: AccessFlag::None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            keys,
            table: AttachmentTable {
                entries,
                deleted: record.deleted,
            },
            blobs,
        })
    }

    fn sealed_blob(&self, guid: &Uuid) -> Result<(&AttachmentEntry, &[u8])> {
        let entry = self
            .table
            .get(guid)
            .ok_or_else(|| WalletError::ItemNotFound(format!("attachment {guid}")))?;
        let loc = entry
            .location
            .ok_or_else(|| WalletError::InvalidStoreFormat(format!("entry {guid} has no location")))?;
        // Bounds were checked in `parse`.
        let start = loc.offset as usize;
        Ok((entry, &self.blobs[start..start + loc.size as usize]))
    }

    fn content(&self, guid: &Uuid) -> Result<Vec<u8>> {
        let (_, sealed) = self.sealed_blob(guid)?;
        self.keys.open_blob(guid, sealed)
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Accumulates entries and blobs for one new store file.
struct StoreWriter<'k> {
    keys: &'k StoreKeys,
    table: AttachmentTable,
    blobs: Vec<u8>,
}

impl<'k> StoreWriter<'k> {
    fn new(keys: &'k StoreKeys) -> Self {
        Self {
            keys,
            table: AttachmentTable::default(),
            blobs: Vec::new(),
        }
    }

    /// Start from an existing file's blob region, keeping every offset.
    /// `keys` must be the keys `existing` was loaded with.
    fn continuing(keys: &'k StoreKeys, existing: &LoadedStore) -> Self {
        Self {
            keys,
            table: existing.table.clone(),
            blobs: existing.blobs.clone(),
        }
    }

    fn contains(&self, guid: &Uuid) -> bool {
        self.table.contains(guid)
    }

    /// Append an already-sealed blob (same key material as `self.keys`).
    fn add_sealed(&mut self, guid: Uuid, file_name: &str, sealed: &[u8]) {
        let location = BlobLocation {
            offset: self.blobs.len() as u64,
            size: sealed.len() as u64,
        };
        self.blobs.extend_from_slice(sealed);
        self.table.deleted.remove(&guid);
        self.table.entries.push(AttachmentEntry {
            guid,
            file_name: file_name.to_string(),
            location: Some(location),
            access_flag: AccessFlag::None,
        });
    }

    fn add_plain(&mut self, guid: Uuid, file_name: &str, content: &[u8]) -> Result<()> {
        let sealed = self.keys.seal_blob(&guid, content)?;
        self.add_sealed(guid, file_name, &sealed);
        Ok(())
    }

    fn finish(self) -> Result<(Vec<u8>, AttachmentTable)> {
        let header = StoreHeader {
            version: FORMAT_VERSION,
            salt: self.keys.salt.clone(),
            kdf_params: self.keys.params,
        };
        let header_bytes = serde_json::to_vec(&header)
            .map_err(|e| WalletError::SerializationError(format!("attachment header: {e}")))?;

        let record = TableRecord {
            entries: self
                .table
                .entries
                .iter()
                .filter_map(|e| {
                    e.location.map(|loc| EntryRecord {
                        guid: e.guid,
                        file_name: e.file_name.clone(),
                        offset: loc.offset,
                        size: loc.size,
                    })
                })
                .collect(),
            deleted: self.table.deleted.clone(),
        };
        let table_json = serde_json::to_vec(&record)
            .map_err(|e| WalletError::SerializationError(format!("attachment table: {e}")))?;
        let mut table_key = self.keys.master.derive_table_key()?;
        let sealed_table = seal(&table_key, TABLE_CONTEXT, &table_json);
        table_key.zeroize();
        let sealed_table = sealed_table?;

        let to_u32 = |n: usize, what: &str| {
            u32::try_from(n).map_err(|_| {
                WalletError::SerializationError(format!("{what} length {n} exceeds u32::MAX"))
            })
        };
        let header_len = to_u32(header_bytes.len(), "attachment header")?;
        let table_len = to_u32(sealed_table.len(), "attachment table")?;

        let mut buf = Vec::with_capacity(
            PREFIX_LEN + header_bytes.len() + 4 + sealed_table.len() + self.blobs.len() + HMAC_LEN,
        );
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&table_len.to_le_bytes());
        buf.extend_from_slice(&sealed_table);
        buf.extend_from_slice(&self.blobs);

        let tag = compute_hmac(&self.keys.master, &buf[PREFIX_LEN..])?
            .finalize()
            .into_bytes();
        buf.extend_from_slice(&tag);

        Ok((buf, self.table))
    }
}

/// Point each model item at its entry in `table`; items absent from the
/// table lose their attachment reference.
fn bind_table(model: &mut WalletModel, table: &AttachmentTable) {
    for item in model.items_mut() {
        match table.get(&item.guid) {
            Some(entry) => {
                item.attachment = Some(entry.clone());
                item.new_attachment = None;
            }
            None => item.clear_attachment(),
        }
    }
    model.deleted_in_store = table.deleted.clone();
}

// ---------------------------------------------------------------------------
// AttachmentStore
// ---------------------------------------------------------------------------

/// Operations on attachment store files.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentStore;

impl AttachmentStore {
    pub fn new() -> Self {
        Self
    }

    /// Read the entry table of the store at `path`.
    ///
    /// Returns `Ok(None)` when no attachment store exists yet.
    pub fn read(&self, path: &Path, encryptor: &Encryptor) -> Result<Option<AttachmentTable>> {
        Ok(LoadedStore::load(path, encryptor)?.map(|store| store.table))
    }

    /// Decrypt one attachment of the store belonging to `vault_path`.
    pub fn read_content(
        &self,
        vault_path: &Path,
        guid: &Uuid,
        encryptor: &Encryptor,
    ) -> Result<Option<Vec<u8>>> {
        match LoadedStore::load(&attachment_path_of(vault_path), encryptor)? {
            Some(store) if store.table.contains(guid) => store.content(guid).map(Some),
            _ => Ok(None),
        }
    }

    /// Commit the model's attachment intents for a latest-version model.
    ///
    /// `Create`/`Update` write their pending content, `Delete` drops the
    /// blob and records the GUID as deleted, `None` entries are copied
    /// verbatim.  On success the model is rebound to the new table.
    pub fn save_attachments(
        &self,
        path: &Path,
        model: &mut WalletModel,
        encryptor: &Encryptor,
    ) -> Result<()> {
        let existing = LoadedStore::load(path, encryptor)?;

        let has_live = model.attachments().any(|(_, e)| e.is_live());
        if existing.is_none() && !has_live {
            model.items_mut().for_each(|i| i.clear_attachment());
            return Ok(());
        }

        let fresh;
        let keys = match &existing {
            Some(store) => &store.keys,
            None => {
                fresh = StoreKeys::fresh(encryptor)?;
                &fresh
            }
        };

        let mut writer = StoreWriter::new(keys);
        if let Some(store) = &existing {
            writer.table.deleted = store.table.deleted.clone();
        }

        for (item, entry) in model.attachments() {
            let stored = existing
                .as_ref()
                .filter(|s| s.table.contains(&entry.guid));

            match (entry.access_flag, &item.new_attachment, stored) {
                (AccessFlag::Delete, _, _) => {
                    writer.table.deleted.insert(entry.guid);
                }
                (AccessFlag::Create | AccessFlag::Update, Some(pending), _) => {
                    writer.add_plain(entry.guid, &pending.file_name, &pending.content)?;
                }
                (_, _, Some(store)) => {
                    let (stored_entry, sealed) = store.sealed_blob(&entry.guid)?;
                    writer.add_sealed(entry.guid, &stored_entry.file_name, sealed);
                }
                (flag, _, None) => {
                    log::warn!(
                        "attachment {} flagged {flag:?} has no content to commit; dropping it",
                        entry.guid
                    );
                }
            }
        }

        // Blobs whose item left the tree are purged with this rewrite.
        if let Some(store) = &existing {
            for entry in &store.table.entries {
                if model.item(&entry.guid).is_none() {
                    writer.table.deleted.insert(entry.guid);
                }
            }
        }

        let (bytes, table) = writer.finish()?;
        write_staged(path, &bytes)?;
        log::debug!(
            "saved attachment store {} ({} entries)",
            path.display(),
            table.len()
        );

        bind_table(model, &table);
        Ok(())
    }

    /// Copy the live attachments of `target` out of the store at
    /// `old_path` into a brand-new store at `new_path`, under `encryptor`.
    ///
    /// Entries flagged `None` or `Update` that exist in the old store are
    /// eligible; `Update` entries carry their pending replacement.  Returns
    /// `Ok(false)` and writes nothing when no entry is eligible.
    ///
    /// `source` supplies the encryptor of the old store.  Unless
    /// `rotating`, blobs are copied verbatim when source and target share a
    /// credential; a rotation always re-encrypts under fresh key material.
    pub fn transfer_attachment_store(
        &self,
        old_path: &Path,
        new_path: &Path,
        source: &WalletModel,
        target: &WalletModel,
        encryptor: &Encryptor,
        rotating: bool,
    ) -> Result<bool> {
        let source_encryptor = source.require_encryptor()?;
        let Some(old_store) = LoadedStore::load(old_path, source_encryptor)? else {
            log::debug!("no attachment store at {}; nothing to transfer", old_path.display());
            return Ok(false);
        };

        let eligible: Vec<_> = target
            .attachments()
            .filter(|(_, e)| matches!(e.access_flag, AccessFlag::None | AccessFlag::Update))
            .filter(|(_, e)| old_store.table.contains(&e.guid))
            .collect();
        if eligible.is_empty() {
            return Ok(false);
        }

        let verbatim = !rotating && encryptor.same_secret(source_encryptor);
        let fresh;
        let keys = if verbatim {
            &old_store.keys
        } else {
            fresh = StoreKeys::fresh(encryptor)?;
            &fresh
        };

        let mut writer = StoreWriter::new(keys);
        for (item, entry) in eligible {
            match (entry.access_flag, &item.new_attachment) {
                (AccessFlag::Update, Some(pending)) => {
                    writer.add_plain(entry.guid, &pending.file_name, &pending.content)?;
                }
                _ => {
                    let (stored, sealed) = old_store.sealed_blob(&entry.guid)?;
                    if verbatim {
                        writer.add_sealed(entry.guid, &stored.file_name, sealed);
                    } else {
                        let mut content = old_store.keys.open_blob(&entry.guid, sealed)?;
                        let added = writer.add_plain(entry.guid, &stored.file_name, &content);
                        content.zeroize();
                        added?;
                    }
                }
            }
        }

        let (bytes, table) = writer.finish()?;
        write_staged(new_path, &bytes)?;
        log::info!(
            "transferred {} attachment(s) from {} to {}",
            table.len(),
            old_path.display(),
            new_path.display()
        );
        Ok(true)
    }

    /// Append the model's `Create` entries to the store at `path`.
    ///
    /// Existing blobs keep their bytes and offsets; GUIDs already present
    /// are skipped.  Returns the number of appended entries.
    pub fn append_attachment_store(
        &self,
        path: &Path,
        model: &WalletModel,
        encryptor: &Encryptor,
    ) -> Result<usize> {
        let existing = LoadedStore::load(path, encryptor)?;

        let fresh;
        let mut writer = match &existing {
            Some(store) => StoreWriter::continuing(&store.keys, store),
            None => {
                fresh = StoreKeys::fresh(encryptor)?;
                StoreWriter::new(&fresh)
            }
        };

        let mut appended = 0;
        for (item, entry) in model.attachments() {
            if entry.access_flag != AccessFlag::Create {
                continue;
            }
            if writer.contains(&entry.guid) {
                log::warn!("attachment {} is already in the store; not appending", entry.guid);
                continue;
            }
            match &item.new_attachment {
                Some(pending) => {
                    writer.add_plain(entry.guid, &pending.file_name, &pending.content)?;
                    appended += 1;
                }
                None => log::warn!(
                    "attachment {} has no pending content to append; dropping it",
                    entry.guid
                ),
            }
        }

        if appended == 0 && existing.is_some() {
            return Ok(0);
        }

        let (bytes, _) = writer.finish()?;
        write_staged(path, &bytes)?;
        log::debug!("appended {appended} attachment(s) to {}", path.display());
        Ok(appended)
    }

    /// Build the store at `path` from scratch with only the live entries
    /// that carry content.  Always writes a file, possibly empty.
    pub fn new_attachment_store(
        &self,
        path: &Path,
        model: &WalletModel,
        encryptor: &Encryptor,
    ) -> Result<usize> {
        let keys = StoreKeys::fresh(encryptor)?;
        let mut writer = StoreWriter::new(&keys);

        for (item, entry) in model.attachments().filter(|(_, e)| e.is_live()) {
            match &item.new_attachment {
                Some(pending) => writer.add_plain(entry.guid, &pending.file_name, &pending.content)?,
                None => log::warn!(
                    "attachment {} has no content for the rebuilt store; dropping it",
                    entry.guid
                ),
            }
        }

        let (bytes, table) = writer.finish()?;
        write_staged(path, &bytes)?;
        log::info!(
            "rebuilt attachment store {} with {} entries",
            path.display(),
            table.len()
        );
        Ok(table.len())
    }

    /// Re-read the store at `path` and rebind every item found in it to
    /// its (possibly relocated) entry.
    pub fn reload_attachments(&self, path: &Path, model: &mut WalletModel) -> Result<()> {
        let encryptor = model.require_encryptor()?.clone();
        let Some(table) = self.read(path, &encryptor)? else {
            return Ok(());
        };

        for entry in &table.entries {
            if let Some(item) = model.item_mut(&entry.guid) {
                item.attachment = Some(entry.clone());
                item.new_attachment = None;
            }
        }
        model.deleted_in_store = table.deleted;
        Ok(())
    }
}
