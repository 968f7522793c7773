//! The concrete main store codecs, one per historical format version.
//!
//! ```text
//! v10: [version u32 BE][kdf params 3×u32 BE][pass_hash: u32 BE len + bytes][salt 32][sealed items]
//! v12: [version u32 BE][kdf params 3×u32 BE][pass_hash][combination_hash][salt 32][sealed items]
//! v13: [WLT3: 4][version: 1][header_len: 4 LE][header JSON][sealed items][HMAC-SHA256: 32]
//! ```
//!
//! `sealed items` is the AES-256-GCM sealed JSON item list.  v10 and v12
//! are read-only legacy layouts as far as the wallet service is concerned;
//! their `encode` exists to produce fixtures of old files.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::crypto::kdf::SALT_LEN;
use crate::crypto::{Encryptor, VerificationHash};
use crate::errors::{Result, WalletError};

use super::format::{
    check_phc, open_items, put_kdf_params, put_len_prefixed_str, seal_items, ByteReader, Header,
    StoreRecord, VaultCodec,
};
use super::model::Item;

/// Smallest possible sealed payload: 12-byte nonce + 16-byte tag.
const MIN_SEALED_LEN: usize = 28;

// ---------------------------------------------------------------------------
// Legacy length-prefixed layouts (v10, v12)
// ---------------------------------------------------------------------------

/// Parse the shared legacy prefix.  Returns the header and the sealed items.
fn read_legacy(bytes: &[u8], version: u32, with_combination: bool) -> Result<(Header, &[u8])> {
    let mut r = ByteReader::new(bytes);

    let found = r.u32_be()?;
    if found != version {
        return Err(WalletError::InvalidStoreFormat(format!(
            "version field is {found}, expected {version}"
        )));
    }

    let kdf_params = r.kdf_params()?;
    let pass_hash = r.len_prefixed_str()?;
    check_phc(&pass_hash, "password hash")?;

    let combination_hash = if with_combination {
        let hash = r.len_prefixed_str()?;
        check_phc(&hash, "combination hash")?;
        hash
    } else {
        String::new()
    };

    let salt = r.take(SALT_LEN)?.to_vec();
    let sealed = r.rest();
    if sealed.len() < MIN_SEALED_LEN {
        return Err(WalletError::InvalidStoreFormat(
            "sealed item list is truncated".into(),
        ));
    }

    let header = Header {
        version,
        pass_hash: VerificationHash::new(pass_hash),
        combination_hash: VerificationHash::new(combination_hash),
        salt,
        kdf_params,
        saved_at: None,
    };
    Ok((header, sealed))
}

fn write_legacy(
    header: &Header,
    items: &[Item],
    encryptor: &Encryptor,
    version: u32,
    with_combination: bool,
) -> Result<Vec<u8>> {
    let master_key = encryptor.master_key(&header.salt, &header.kdf_params)?;
    let mut items_key = master_key.derive_items_key()?;
    let sealed = seal_items(items, &items_key);
    items_key.zeroize();
    let sealed = sealed?;

    let mut buf = Vec::with_capacity(256 + sealed.len());
    buf.extend_from_slice(&version.to_be_bytes());
    put_kdf_params(&mut buf, &header.kdf_params);
    put_len_prefixed_str(&mut buf, header.pass_hash.as_str())?;
    if with_combination {
        put_len_prefixed_str(&mut buf, header.combination_hash.as_str())?;
    }
    buf.extend_from_slice(&header.salt);
    buf.extend_from_slice(&sealed);
    Ok(buf)
}

fn decode_sealed(header: Header, sealed: &[u8], encryptor: &Encryptor) -> Result<StoreRecord> {
    let master_key = encryptor.master_key(&header.salt, &header.kdf_params)?;
    let mut items_key = master_key.derive_items_key()?;
    let items = open_items(sealed, &items_key);
    items_key.zeroize();
    Ok(StoreRecord {
        header,
        items: items?,
    })
}

/// The oldest readable layout: no combination hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecV10;

impl VaultCodec for CodecV10 {
    fn version(&self) -> u32 {
        10
    }

    fn read_header(&self, bytes: &[u8]) -> Result<Header> {
        read_legacy(bytes, 10, false).map(|(h, _)| h)
    }

    fn decode(&self, bytes: &[u8], encryptor: &Encryptor) -> Result<StoreRecord> {
        let (header, sealed) = read_legacy(bytes, 10, false)?;
        decode_sealed(header, sealed, encryptor)
    }

    fn encode(&self, header: &Header, items: &[Item], encryptor: &Encryptor) -> Result<Vec<u8>> {
        write_legacy(header, items, encryptor, 10, false)
    }
}

/// Adds the combination hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecV12;

impl VaultCodec for CodecV12 {
    fn version(&self) -> u32 {
        12
    }

    fn read_header(&self, bytes: &[u8]) -> Result<Header> {
        read_legacy(bytes, 12, true).map(|(h, _)| h)
    }

    fn decode(&self, bytes: &[u8], encryptor: &Encryptor) -> Result<StoreRecord> {
        let (header, sealed) = read_legacy(bytes, 12, true)?;
        decode_sealed(header, sealed, encryptor)
    }

    fn encode(&self, header: &Header, items: &[Item], encryptor: &Encryptor) -> Result<Vec<u8>> {
        write_legacy(header, items, encryptor, 12, true)
    }
}

// ---------------------------------------------------------------------------
// v13: magic + JSON header + HMAC
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"WLT3";

/// Size of the HMAC tag appended to the file (SHA-256 = 32 bytes).
const HMAC_LEN: usize = 32;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
const PREFIX_LEN: usize = 9;

/// The current layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecV13;

/// The three variable sections of a v13 file, as raw bytes.
struct RawV13<'a> {
    header: Header,
    header_bytes: &'a [u8],
    sealed: &'a [u8],
    stored_hmac: &'a [u8],
}

impl CodecV13 {
    fn split(bytes: &[u8]) -> Result<RawV13<'_>> {
        if bytes.len() < PREFIX_LEN + HMAC_LEN {
            return Err(WalletError::InvalidStoreFormat(
                "file too small to be a v13 store".into(),
            ));
        }
        if &bytes[0..4] != MAGIC {
            return Err(WalletError::InvalidStoreFormat(
                "missing WLT3 magic bytes".into(),
            ));
        }
        if u32::from(bytes[4]) != 13 {
            return Err(WalletError::InvalidStoreFormat(format!(
                "unsupported version byte {}",
                bytes[4]
            )));
        }

        let header_len = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
        let header_end = PREFIX_LEN
            .checked_add(header_len)
            .filter(|&end| end + HMAC_LEN <= bytes.len())
            .ok_or_else(|| {
                WalletError::InvalidStoreFormat("header length exceeds file size".into())
            })?;

        let header_bytes = &bytes[PREFIX_LEN..header_end];
        let sealed_end = bytes.len() - HMAC_LEN;
        let sealed = &bytes[header_end..sealed_end];
        let stored_hmac = &bytes[sealed_end..];

        let header: Header = serde_json::from_slice(header_bytes)
            .map_err(|e| WalletError::InvalidStoreFormat(format!("header JSON: {e}")))?;
        if header.version != 13 {
            return Err(WalletError::InvalidStoreFormat(format!(
                "header declares version {}, file is v13",
                header.version
            )));
        }
        if header.salt.len() != SALT_LEN {
            return Err(WalletError::InvalidStoreFormat("bad salt length".into()));
        }

        Ok(RawV13 {
            header,
            header_bytes,
            sealed,
            stored_hmac,
        })
    }
}

fn compute_hmac(hmac_key: &[u8], header_bytes: &[u8], sealed: &[u8]) -> Result<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|e| WalletError::CryptoFailure(format!("invalid HMAC key: {e}")))?;
    mac.update(header_bytes);
    mac.update(sealed);
    Ok(mac)
}

impl VaultCodec for CodecV13 {
    fn version(&self) -> u32 {
        13
    }

    fn read_header(&self, bytes: &[u8]) -> Result<Header> {
        Self::split(bytes).map(|raw| raw.header)
    }

    fn decode(&self, bytes: &[u8], encryptor: &Encryptor) -> Result<StoreRecord> {
        let raw = Self::split(bytes)?;
        let master_key = encryptor.master_key(&raw.header.salt, &raw.header.kdf_params)?;

        // Verify over the original bytes from disk before opening anything.
        let mut hmac_key = master_key.derive_hmac_key()?;
        let mac = compute_hmac(&hmac_key, raw.header_bytes, raw.sealed);
        hmac_key.zeroize();
        mac?.verify_slice(raw.stored_hmac)
            .map_err(|_| WalletError::HmacMismatch)?;

        let mut items_key = master_key.derive_items_key()?;
        let items = open_items(raw.sealed, &items_key);
        items_key.zeroize();

        Ok(StoreRecord {
            header: raw.header,
            items: items?,
        })
    }

    fn encode(&self, header: &Header, items: &[Item], encryptor: &Encryptor) -> Result<Vec<u8>> {
        let header = Header {
            version: 13,
            saved_at: Some(header.saved_at.unwrap_or_else(Utc::now)),
            ..header.clone()
        };
        let header_bytes = serde_json::to_vec(&header)
            .map_err(|e| WalletError::SerializationError(format!("header: {e}")))?;
        let header_len = u32::try_from(header_bytes.len()).map_err(|_| {
            WalletError::SerializationError(format!(
                "header length {} exceeds u32::MAX",
                header_bytes.len()
            ))
        })?;

        let master_key = encryptor.master_key(&header.salt, &header.kdf_params)?;
        let mut items_key = master_key.derive_items_key()?;
        let sealed = seal_items(items, &items_key);
        items_key.zeroize();
        let sealed = sealed?;

        let mut hmac_key = master_key.derive_hmac_key()?;
        let mac = compute_hmac(&hmac_key, &header_bytes, &sealed);
        hmac_key.zeroize();
        let tag = mac?.finalize().into_bytes();

        let mut buf =
            Vec::with_capacity(PREFIX_LEN + header_bytes.len() + sealed.len() + HMAC_LEN);
        buf.extend_from_slice(MAGIC);
        buf.push(13);
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&sealed);
        buf.extend_from_slice(&tag);
        Ok(buf)
    }
}
