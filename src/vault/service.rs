//! High-level wallet operations.
//!
//! [`WalletService`] ties the pieces together: the codec registry for the
//! main store, the [`AttachmentStore`] for blobs, the staging protocol and
//! reconciliation.  Crypto and notifications are injected, so nothing here
//! reaches for global state.
//!
//! The store files of one wallet:
//!
//! ```text
//! <dir>/wallet.vault         main store (header + sealed items)
//! <dir>/wallet.attachments   attachment store
//! ```

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::crypto::service::verify_credential;
use crate::crypto::{generate_salt, Credential, CryptoService, Encryptor, VerificationHash};
use crate::errors::{Result, WalletError};
use crate::notify::{LogNotifier, Notifier};

use super::attachments::{attachment_path_of, AttachmentStore};
use super::format::{detect_header, latest, Header, StoreRecord, LATEST_VERSION};
use super::model::{AccessFlag, WalletModel};
use super::reconcile::{self, IntentSnapshot};
use super::staging::{
    discard_files, recover_interrupted_swap, staging_path_of, swap_into_place, write_replacing,
    Recovery,
};

/// Orchestrates reads and writes of a wallet's store files.
pub struct WalletService {
    crypto: Box<dyn CryptoService>,
    notifier: Box<dyn Notifier>,
    attachments: AttachmentStore,
}

impl WalletService {
    /// Without a notifier, messages go to the log through [`LogNotifier`].
    pub fn new(crypto: Box<dyn CryptoService>, notifier: Option<Box<dyn Notifier>>) -> Self {
        Self {
            crypto,
            notifier: notifier.unwrap_or_else(|| Box::new(LogNotifier)),
            attachments: AttachmentStore::new(),
        }
    }

    pub fn crypto(&self) -> &dyn CryptoService {
        self.crypto.as_ref()
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Parse the header of the main store at `path` with whichever codec
    /// accepts it.
    pub fn read_header(&self, path: &Path) -> Result<Header> {
        let bytes = read_store_bytes(path)?;
        match detect_header(&bytes) {
            Some((_, header)) => Ok(header),
            None => Err(self.unreadable(path)),
        }
    }

    /// Read and decrypt the main store at `path`.
    pub fn read_from_file(&self, path: &Path, encryptor: &Encryptor) -> Result<StoreRecord> {
        let bytes = read_store_bytes(path)?;
        let Some((codec, header)) = detect_header(&bytes) else {
            return Err(self.unreadable(path));
        };
        log::debug!(
            "reading {} with codec v{} (header version {})",
            path.display(),
            codec.version(),
            header.version
        );
        codec.decode(&bytes, encryptor)
    }

    /// Open the wallet at `path`.
    ///
    /// The credential is checked against the header hashes, then an
    /// interrupted attachment swap is finished before anything is
    /// decrypted.
    pub fn open(&self, path: &Path, credential: &Credential) -> Result<WalletModel> {
        let encryptor = self.unlock(path, credential)?;
        self.resolve_swap(path, &encryptor)?;
        let record = self.read_from_file(path, &encryptor)?;

        let mut model = WalletModel::from_flat_list(record.items);
        model.pass_hash = record.header.pass_hash;
        model.combination_hash = record.header.combination_hash;
        model.data_file_version = record.header.version;
        model.vault_path = Some(path.to_path_buf());
        model.set_encryptor(encryptor);

        self.attachments
            .reload_attachments(&attachment_path_of(path), &mut model)?;
        log::info!(
            "opened {} (v{}, {} items)",
            path.display(),
            model.data_file_version,
            model.len()
        );
        Ok(model)
    }

    /// Finish or clean up an interrupted attachment swap next to `path`.
    ///
    /// When both the attachment store and a staged copy exist, the copy
    /// that opens under `credential` survives.
    pub fn recover(&self, path: &Path, credential: &Credential) -> Result<Recovery> {
        let encryptor = self.unlock(path, credential)?;
        self.resolve_swap(path, &encryptor)
    }

    /// Check `credential` against the header of `path` and derive its
    /// encryptor.
    fn unlock(&self, path: &Path, credential: &Credential) -> Result<Encryptor> {
        if !path.exists() {
            return Err(WalletError::VaultNotFound(path.to_path_buf()));
        }
        let header = self.read_header(path)?;
        verify_credential(
            self.crypto(),
            credential,
            &header.pass_hash,
            &header.combination_hash,
        )?;
        self.crypto.encryptor_for(credential)
    }

    fn resolve_swap(&self, path: &Path, encryptor: &Encryptor) -> Result<Recovery> {
        let recovery = recover_interrupted_swap(&attachment_path_of(path), |target, staging| {
            self.attachments.read(target, encryptor).is_err()
                && matches!(self.attachments.read(staging, encryptor), Ok(Some(_)))
        })?;
        match recovery {
            Recovery::CompletedRename => self.notify_warn(
                "Recovery",
                "An interrupted attachment update was found and completed.",
            ),
            Recovery::PromotedStaged => self.notify_warn(
                "Recovery",
                "An interrupted password change was found and completed.",
            ),
            Recovery::Clean | Recovery::DiscardedStale => {}
        }
        Ok(recovery)
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Create an empty wallet at `path`.
    pub fn create(&self, path: &Path, credential: &Credential) -> Result<WalletModel> {
        if path.exists() {
            return Err(WalletError::VaultAlreadyExists(path.to_path_buf()));
        }
        let (pass_hash, combination_hash) = self.hash_credential("Create", credential)?;
        let encryptor = self.crypto.encryptor_for(credential)?;

        let mut model = WalletModel::new();
        model.pass_hash = pass_hash;
        model.combination_hash = combination_hash;
        model.vault_path = Some(path.to_path_buf());
        model.set_encryptor(encryptor);

        self.write_main_store(path, &model, model.require_encryptor()?)?;
        log::info!("created {}", path.display());
        Ok(model)
    }

    /// Persist the model.
    ///
    /// The main store is always written with the latest codec.  A model
    /// read from an older version has its attachment store migrated in
    /// the same call; otherwise pending attachment changes are committed.
    pub fn save(&self, model: &mut WalletModel) -> Result<()> {
        model.strip_dirty_markers();
        let path = model.vault_path()?.to_path_buf();
        let encryptor = model.require_encryptor()?.clone();

        self.write_main_store(&path, model, &encryptor)?;

        if model.is_latest_version() {
            self.attachments
                .save_attachments(&attachment_path_of(&path), model, &encryptor)?;
        } else {
            log::info!(
                "upgrading {} from v{} to v{LATEST_VERSION}",
                path.display(),
                model.data_file_version
            );
            let store = attachment_path_of(&path);
            self.migrate_attachments(&store, &store, model, &encryptor, false)?;
        }
        Ok(())
    }

    /// Rewrite both store files in the latest format, whatever version the
    /// model was read from.  Running it on an up-to-date wallet leaves its
    /// content unchanged.
    pub fn upgrade(&self, model: &mut WalletModel) -> Result<()> {
        model.strip_dirty_markers();
        let path = model.vault_path()?.to_path_buf();
        let encryptor = model.require_encryptor()?.clone();

        self.write_main_store(&path, model, &encryptor)?;
        let store = attachment_path_of(&path);
        self.migrate_attachments(&store, &store, model, &encryptor, false)
    }

    /// Re-key the wallet under `new_credential`.
    ///
    /// The re-keyed attachment store is built at `<store>.tmp` while the
    /// old one stays in place.  Renaming the new main store over the old
    /// one commits the rotation; the staged attachment store is swapped in
    /// afterwards.  A failure before the commit leaves the wallet and
    /// `model` as they were.  A crash after it is finished by
    /// [`WalletService::open`] with the new credential.
    pub fn rotate_password(
        &self,
        model: &mut WalletModel,
        new_credential: &Credential,
    ) -> Result<()> {
        model.strip_dirty_markers();
        let path = model.vault_path()?.to_path_buf();
        let (pass_hash, combination_hash) = self.hash_credential("Password", new_credential)?;
        let new_encryptor = self.crypto.encryptor_for(new_credential)?;

        let store = attachment_path_of(&path);
        let staged = staging_path_of(&store);
        let mut rotated = model.clone();
        rotated.pass_hash = pass_hash;
        rotated.combination_hash = combination_hash;

        let committed = self
            .migrate_attachments(&store, &staged, &mut rotated, &new_encryptor, true)
            .and_then(|()| self.write_main_store(&path, &rotated, &new_encryptor));
        if let Err(e) = committed {
            let nested = staging_path_of(&staged);
            discard_files(&[staged, staging_path_of(&nested), nested]);
            return Err(e);
        }

        *model = rotated;
        swap_into_place(&staged, &store)?;

        self.notify_info("Password", "The wallet password has been changed.");
        Ok(())
    }

    /// Write one entry, with its parent category, into a new wallet at
    /// `export_path` protected by `credential`.
    pub fn export_item(
        &self,
        model: &WalletModel,
        guid: &Uuid,
        credential: &Credential,
        export_path: &Path,
    ) -> Result<()> {
        let item = model
            .item(guid)
            .ok_or_else(|| WalletError::ItemNotFound(guid.to_string()))?;
        if item.is_category() {
            self.notify_warn(
                "Export",
                "Exporting a category is not supported. Select an entry instead.",
            );
            return Err(WalletError::UnsupportedOperation(
                "exporting a category".into(),
            ));
        }

        let source_path = model.vault_path()?;
        if same_file(source_path, export_path) {
            return Err(WalletError::UnsupportedOperation(
                "exporting a wallet onto itself".into(),
            ));
        }
        if export_path.exists() {
            return Err(WalletError::VaultAlreadyExists(export_path.to_path_buf()));
        }

        let (pass_hash, combination_hash) = self.hash_credential("Export", credential)?;
        let encryptor = self.crypto.encryptor_for(credential)?;

        let mut exported = WalletModel::new();
        let mut entry = item.shallow_clone();
        entry.parent = None;
        if let Some(parent) = model.parent_of(guid) {
            let mut category = parent.shallow_clone();
            category.parent = None;
            entry.parent = Some(exported.add_item(category)?);
        }
        exported.add_item(entry)?;
        exported.pass_hash = pass_hash;
        exported.combination_hash = combination_hash;
        exported.vault_path = Some(export_path.to_path_buf());
        exported.set_encryptor(encryptor.clone());

        // Both files are new: on any failure neither is left behind.
        let export_store = attachment_path_of(export_path);
        let written = self
            .write_main_store(export_path, &exported, &encryptor)
            .and_then(|()| {
                self.attachments.transfer_attachment_store(
                    &attachment_path_of(source_path),
                    &export_store,
                    model,
                    &exported,
                    &encryptor,
                    false,
                )
            });
        if let Err(e) = written {
            discard_files(&[
                export_path.to_path_buf(),
                staging_path_of(export_path),
                staging_path_of(&export_store),
                export_store,
            ]);
            self.notify_error(
                "Export",
                &format!("An error occurred while exporting the entry: {e}"),
            );
            return Err(e);
        }

        self.notify_info(
            "Export",
            &format!(
                "The entry \"{}\" has been exported to {}",
                item.name,
                export_path.display()
            ),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Move the attachment store at `source` to the latest format under
    /// `encryptor`, writing the result to `target`, then rebind the model
    /// to it.  `source` and `target` are the same path for an upgrade.
    ///
    /// Eligible blobs are transferred into a staged store that replaces
    /// `target`; whatever the transfer did not carry is reconciled and
    /// appended.  With nothing to transfer the store is rebuilt from the
    /// model's pending content alone.
    fn migrate_attachments(
        &self,
        source: &Path,
        target: &Path,
        model: &mut WalletModel,
        encryptor: &Encryptor,
        rotating: bool,
    ) -> Result<()> {
        let staging: PathBuf = staging_path_of(target);
        let before = IntentSnapshot::capture(model);

        let transferred = self.attachments.transfer_attachment_store(
            source,
            &staging,
            model,
            model,
            encryptor,
            rotating,
        )?;
        model.set_encryptor(encryptor.clone());

        if transferred {
            swap_into_place(&staging, target)?;
            let table = self
                .attachments
                .read(target, encryptor)?
                .unwrap_or_default();
            let resolutions = reconcile::reconcile(&before, &table);
            reconcile::apply(model, &resolutions);
            self.attachments
                .append_attachment_store(target, model, encryptor)?;
        } else {
            for item in model.items_mut() {
                if item
                    .attachment
                    .as_ref()
                    .is_some_and(|a| a.access_flag == AccessFlag::Delete)
                {
                    item.clear_attachment();
                }
            }
            self.attachments
                .new_attachment_store(target, model, encryptor)?;
        }

        self.attachments.reload_attachments(target, model)?;
        model.data_file_version = LATEST_VERSION;
        log::info!(
            "attachment store {} is at v{LATEST_VERSION} ({} intents reconciled)",
            target.display(),
            before.len()
        );
        Ok(())
    }

    /// Encode the model's items with the latest codec and replace the main
    /// store.  Every write draws a fresh salt.
    fn write_main_store(
        &self,
        path: &Path,
        model: &WalletModel,
        encryptor: &Encryptor,
    ) -> Result<()> {
        let header = Header {
            version: LATEST_VERSION,
            pass_hash: model.pass_hash.clone(),
            combination_hash: model.combination_hash.clone(),
            salt: generate_salt().to_vec(),
            kdf_params: encryptor.params(),
            saved_at: None,
        };
        let bytes = latest().encode(&header, model.items(), encryptor)?;
        write_replacing(path, &bytes)?;
        log::debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Verification hashes for a new credential.  Failures are reported
    /// under `title` and surface as `CryptoFailure`.
    fn hash_credential(
        &self,
        title: &str,
        credential: &Credential,
    ) -> Result<(VerificationHash, VerificationHash)> {
        let hashes = self.crypto.hash(credential.password()).and_then(|pass| {
            self.crypto
                .hash(credential.combination())
                .map(|combination| (pass, combination))
        });
        hashes.map_err(|e| {
            let e = match e {
                WalletError::CryptoFailure(_) => e,
                other => WalletError::CryptoFailure(other.to_string()),
            };
            self.notify_error(title, &format!("Cannot hash the credential: {e}"));
            e
        })
    }

    fn unreadable(&self, path: &Path) -> WalletError {
        self.notify_error(
            "Open",
            &format!("Cannot read the file header of {}", path.display()),
        );
        WalletError::UnreadableStore(path.to_path_buf())
    }

    fn notify_error(&self, title: &str, message: &str) {
        self.notifier.notify_error(title, message);
    }

    fn notify_warn(&self, title: &str, message: &str) {
        self.notifier.notify_warn(title, message);
    }

    fn notify_info(&self, title: &str, message: &str) {
        self.notifier.notify_info(title, message);
    }
}

fn read_store_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WalletError::VaultNotFound(path.to_path_buf()),
        _ => e.into(),
    })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Argon2CryptoService, Argon2Params};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Default, Clone)]
    struct Recorder(Rc<RefCell<Vec<(String, String)>>>);

    impl Notifier for Recorder {
        fn notify_error(&self, title: &str, message: &str) {
            self.0.borrow_mut().push((format!("error:{title}"), message.into()));
        }
        fn notify_warn(&self, title: &str, message: &str) {
            self.0.borrow_mut().push((format!("warn:{title}"), message.into()));
        }
        fn notify_info(&self, title: &str, message: &str) {
            self.0.borrow_mut().push((format!("info:{title}"), message.into()));
        }
    }

    fn fast_crypto() -> Box<dyn CryptoService> {
        Box::new(Argon2CryptoService::new(Argon2Params {
            memory_kib: 8_192,
            iterations: 1,
            parallelism: 1,
        }))
    }

    fn service_with(recorder: &Recorder) -> WalletService {
        WalletService::new(fast_crypto(), Some(Box::new(recorder.clone())))
    }

    fn cred() -> Credential {
        Credential::new("correct horse", "4711")
    }

    /// Argon2 crypto whose hashing can be switched off.
    struct FlakyHashing {
        inner: Argon2CryptoService,
        broken: Rc<Cell<bool>>,
    }

    impl CryptoService for FlakyHashing {
        fn hash(&self, secret: &str) -> Result<VerificationHash> {
            if self.broken.get() {
                return Err(WalletError::CryptoFailure("no entropy source".into()));
            }
            self.inner.hash(secret)
        }

        fn verify(&self, secret: &str, hash: &VerificationHash) -> Result<bool> {
            self.inner.verify(secret, hash)
        }

        fn encryptor_for(&self, credential: &Credential) -> Result<Encryptor> {
            self.inner.encryptor_for(credential)
        }
    }

    fn flaky_service(recorder: &Recorder, broken: &Rc<Cell<bool>>) -> WalletService {
        let crypto = FlakyHashing {
            inner: Argon2CryptoService::new(Argon2Params {
                memory_kib: 8_192,
                iterations: 1,
                parallelism: 1,
            }),
            broken: Rc::clone(broken),
        };
        WalletService::new(Box::new(crypto), Some(Box::new(recorder.clone())))
    }

    #[test]
    fn create_then_open_round_trips_items() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.vault");
        let svc = WalletService::new(fast_crypto(), None);

        let mut model = svc.create(&path, &cred()).unwrap();
        let bank = model.add_category("Banking", None).unwrap();
        let card = model.add_entry(bank, "Visa").unwrap();
        model
            .item_mut(&card)
            .unwrap()
            .fields
            .insert("pin".into(), "1234".into());
        svc.save(&mut model).unwrap();

        let reopened = svc.open(&path, &cred()).unwrap();
        assert_eq!(reopened.items(), model.items());
        assert_eq!(reopened.data_file_version, LATEST_VERSION);
    }

    #[test]
    fn open_rejects_wrong_combination() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.vault");
        let svc = WalletService::new(fast_crypto(), None);
        svc.create(&path, &cred()).unwrap();

        let result = svc.open(&path, &Credential::new("correct horse", "0000"));
        assert!(matches!(result, Err(WalletError::WrongPassword)));
    }

    #[test]
    fn unreadable_header_notifies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.vault");
        std::fs::write(&path, [0xAAu8; 64]).unwrap();

        let recorder = Recorder::default();
        let svc = service_with(&recorder);
        assert!(matches!(
            svc.read_header(&path),
            Err(WalletError::UnreadableStore(_))
        ));
        assert_eq!(recorder.0.borrow()[0].0, "error:Open");
    }

    #[test]
    fn export_of_category_is_refused_with_warning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.vault");
        let recorder = Recorder::default();
        let svc = service_with(&recorder);

        let mut model = svc.create(&path, &cred()).unwrap();
        let bank = model.add_category("Banking", None).unwrap();
        svc.save(&mut model).unwrap();

        let result = svc.export_item(&model, &bank, &cred(), &dir.path().join("out.vault"));
        assert!(matches!(result, Err(WalletError::UnsupportedOperation(_))));
        assert_eq!(recorder.0.borrow()[0].0, "warn:Export");
        assert!(!dir.path().join("out.vault").exists());
    }

    #[test]
    fn save_strips_dirty_markers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.vault");
        let svc = WalletService::new(fast_crypto(), None);

        let mut model = svc.create(&path, &cred()).unwrap();
        let bank = model.add_category("Banking(*)", None).unwrap();
        svc.save(&mut model).unwrap();

        let reopened = svc.open(&path, &cred()).unwrap();
        assert_eq!(reopened.item(&bank).unwrap().name, "Banking");
    }

    #[test]
    fn hash_failure_on_create_is_notified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.vault");
        let recorder = Recorder::default();
        let broken = Rc::new(Cell::new(true));
        let svc = flaky_service(&recorder, &broken);

        assert!(matches!(
            svc.create(&path, &cred()),
            Err(WalletError::CryptoFailure(_))
        ));
        assert_eq!(recorder.0.borrow()[0].0, "error:Create");
        assert!(!path.exists());
    }

    #[test]
    fn hash_failure_on_rotation_is_notified_and_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.vault");
        let recorder = Recorder::default();
        let broken = Rc::new(Cell::new(false));
        let svc = flaky_service(&recorder, &broken);
        let mut model = svc.create(&path, &cred()).unwrap();
        let before = std::fs::read(&path).unwrap();

        broken.set(true);
        let result = svc.rotate_password(&mut model, &Credential::new("another one", "1"));

        assert!(matches!(result, Err(WalletError::CryptoFailure(_))));
        assert_eq!(recorder.0.borrow()[0].0, "error:Password");
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(svc.open(&path, &cred()).is_ok());
    }

    #[test]
    fn failed_rotation_leaves_the_model_usable_with_the_old_credential() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.vault");
        let svc = WalletService::new(fast_crypto(), None);
        let mut model = svc.create(&path, &cred()).unwrap();
        let bank = model.add_category("Banking", None).unwrap();
        let card = model.add_entry(bank, "Visa").unwrap();
        model.attach(&card, "visa.txt", b"scan".to_vec()).unwrap();
        svc.save(&mut model).unwrap();
        let old_hash = model.pass_hash.clone();

        // A directory where the staged attachment store would go.
        let staged = staging_path_of(&attachment_path_of(&path));
        std::fs::create_dir(&staged).unwrap();
        assert!(svc
            .rotate_password(&mut model, &Credential::new("another one", "1"))
            .is_err());
        std::fs::remove_dir(&staged).unwrap();

        assert_eq!(model.pass_hash, old_hash);
        model.item_mut(&card).unwrap().notes = Some("renewed".into());
        svc.save(&mut model).unwrap();
        let reopened = svc.open(&path, &cred()).unwrap();
        assert_eq!(reopened.item(&card).unwrap().notes.as_deref(), Some("renewed"));
    }

    #[test]
    fn without_a_notifier_messages_go_to_the_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.vault");
        let svc = WalletService::new(fast_crypto(), None);
        let mut model = svc.create(&path, &cred()).unwrap();
        let bank = model.add_category("Banking", None).unwrap();
        assert!(matches!(
            svc.export_item(&model, &bank, &cred(), &dir.path().join("x.vault")),
            Err(WalletError::UnsupportedOperation(_))
        ));
    }
}
