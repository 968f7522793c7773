//! Main store file format: header, item records and the codec registry.
//!
//! The on-disk layout has changed over time.  Every historical layout is
//! owned by one [`VaultCodec`] (see `codecs`); this module holds what they
//! share:
//!
//! - [`Header`]: format version, verification hashes and KDF inputs.
//! - [`ItemRecord`]: the serialized shape of one item.
//! - [`StoreRecord`]: header + flat item list, the unit a codec produces.
//! - The registry: [`codecs`] (newest first) and [`latest`].
//!
//! Reading never trusts a version tag to pick the codec.  [`detect_header`]
//! tries a full header parse with each codec, newest to oldest, and takes
//! the first one that succeeds.  Writing always goes through [`latest`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{open, seal, Argon2Params, Encryptor, VerificationHash, ITEMS_CONTEXT};
use crate::errors::{Result, WalletError};

use super::codecs::{CodecV10, CodecV12, CodecV13};
use super::model::{Item, ItemType};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The only version the engine ever writes.
pub const LATEST_VERSION: u32 = 13;

/// Longest verification hash a legacy header may carry.
pub(crate) const MAX_HASH_LEN: usize = 512;

// ---------------------------------------------------------------------------
// Header / records
// ---------------------------------------------------------------------------

/// Metadata at the start of a main store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Format version; decides which codec parses the rest of the file.
    pub version: u32,

    /// Verification hash of the password.
    pub pass_hash: VerificationHash,

    /// Verification hash of the combination (empty in v10 files).
    #[serde(default)]
    pub combination_hash: VerificationHash,

    /// Argon2id salt for the file's master key (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    /// Argon2 params the master key was derived with.
    pub kdf_params: Argon2Params,

    /// When the file was written.  Only v13 records it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

/// One item as serialized inside the sealed item list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub guid: Uuid,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl From<&Item> for ItemRecord {
    fn from(item: &Item) -> Self {
        Self {
            guid: item.guid,
            item_type: item.item_type,
            name: item.name.clone(),
            parent: item.parent,
            fields: item.fields.clone(),
            notes: item.notes.clone(),
        }
    }
}

impl From<ItemRecord> for Item {
    fn from(record: ItemRecord) -> Self {
        let mut item = Item::new(record.item_type, record.name);
        item.guid = record.guid;
        item.parent = record.parent;
        item.fields = record.fields;
        item.notes = record.notes;
        item
    }
}

/// Header + flat item list, independent of attachment data.
#[derive(Debug, Clone)]
pub struct StoreRecord {
    pub header: Header,
    pub items: Vec<Item>,
}

// ---------------------------------------------------------------------------
// Codec trait + registry
// ---------------------------------------------------------------------------

/// Encoding of header + items for one on-disk format version.
pub trait VaultCodec: Sync {
    /// The format version this codec owns.
    fn version(&self) -> u32;

    /// Parse only the header.  Any structural mismatch is an error.
    fn read_header(&self, bytes: &[u8]) -> Result<Header>;

    /// Parse and decrypt a whole file.
    fn decode(&self, bytes: &[u8], encryptor: &Encryptor) -> Result<StoreRecord>;

    /// Encode a whole file.  `header.salt` and `header.kdf_params` must be
    /// the inputs the encryptor derives the file's master key from.
    fn encode(&self, header: &Header, items: &[Item], encryptor: &Encryptor) -> Result<Vec<u8>>;
}

static V13: CodecV13 = CodecV13;
static V12: CodecV12 = CodecV12;
static V10: CodecV10 = CodecV10;

/// All known codecs, newest first.
pub fn codecs() -> [&'static dyn VaultCodec; 3] {
    [&V13, &V12, &V10]
}

/// The codec every write goes through.
pub fn latest() -> &'static dyn VaultCodec {
    &V13
}

/// Try every codec newest to oldest; return the first that parses.
pub fn detect_header(bytes: &[u8]) -> Option<(&'static dyn VaultCodec, Header)> {
    codecs().into_iter().find_map(|codec| match codec.read_header(bytes) {
        Ok(header) => Some((codec, header)),
        Err(e) => {
            log::debug!("codec v{} rejected header: {e}", codec.version());
            None
        }
    })
}

// ---------------------------------------------------------------------------
// Shared helpers for codecs
// ---------------------------------------------------------------------------

/// Serialize and seal an item list with the file's items key.
pub(crate) fn seal_items(items: &[Item], items_key: &[u8]) -> Result<Vec<u8>> {
    let records: Vec<ItemRecord> = items.iter().map(ItemRecord::from).collect();
    let json = serde_json::to_vec(&records)
        .map_err(|e| WalletError::SerializationError(format!("items: {e}")))?;
    seal(items_key, ITEMS_CONTEXT, &json)
}

/// Open a sealed item list.
pub(crate) fn open_items(sealed: &[u8], items_key: &[u8]) -> Result<Vec<Item>> {
    let json = open(items_key, ITEMS_CONTEXT, sealed)?;
    let records: Vec<ItemRecord> = serde_json::from_slice(&json)
        .map_err(|e| WalletError::InvalidStoreFormat(format!("items JSON: {e}")))?;
    Ok(records.into_iter().map(Item::from).collect())
}

/// Bounds-checked cursor over a file's bytes.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                WalletError::InvalidStoreFormat(format!(
                    "unexpected end of file reading {n} bytes at offset {}",
                    self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u32_be(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// A `u32 BE` length followed by that many UTF-8 bytes.
    pub(crate) fn len_prefixed_str(&mut self) -> Result<String> {
        let len = self.u32_be()? as usize;
        if len > MAX_HASH_LEN {
            return Err(WalletError::InvalidStoreFormat(format!(
                "string length {len} exceeds {MAX_HASH_LEN}"
            )));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| WalletError::InvalidStoreFormat("string is not valid UTF-8".into()))
    }

    pub(crate) fn kdf_params(&mut self) -> Result<Argon2Params> {
        Ok(Argon2Params {
            memory_kib: self.u32_be()?,
            iterations: self.u32_be()?,
            parallelism: self.u32_be()?,
        })
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

pub(crate) fn put_len_prefixed_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u32::try_from(s.len()).map_err(|_| {
        WalletError::SerializationError(format!("string length {} exceeds u32::MAX", s.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn put_kdf_params(buf: &mut Vec<u8>, params: &Argon2Params) {
    buf.extend_from_slice(&params.memory_kib.to_be_bytes());
    buf.extend_from_slice(&params.iterations.to_be_bytes());
    buf.extend_from_slice(&params.parallelism.to_be_bytes());
}

/// A PHC hash must at least look like one; catches misaligned legacy parses.
pub(crate) fn check_phc(hash: &str, what: &str) -> Result<()> {
    if hash.starts_with('$') {
        Ok(())
    } else {
        Err(WalletError::InvalidStoreFormat(format!(
            "{what} is not a PHC string"
        )))
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
