//! Integration tests for the wallet service: round trips, version
//! fallback, attachment migration, recovery and export.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;
use walletvault::crypto::{Argon2CryptoService, Argon2Params, Credential, CryptoService};
use walletvault::errors::WalletError;
use walletvault::vault::codecs::{CodecV10, CodecV12};
use walletvault::vault::staging::staging_path_of;
use walletvault::vault::{
    attachment_path_of, AccessFlag, Header, VaultCodec, WalletModel, WalletService,
    LATEST_VERSION,
};

fn fast_params() -> Argon2Params {
    Argon2Params {
        memory_kib: 8_192,
        iterations: 1,
        parallelism: 1,
    }
}

fn service() -> WalletService {
    WalletService::new(Box::new(Argon2CryptoService::new(fast_params())), None)
}

fn cred() -> Credential {
    Credential::new("correct horse battery", "2468")
}

/// Helper: a fresh wallet path inside a temp dir.
fn wallet_path() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("wallet.vault");
    (dir, path)
}

/// A saved wallet with one category and `files.len()` attached entries.
fn wallet_with_files(
    svc: &WalletService,
    path: &Path,
    files: &[(&str, &[u8])],
) -> (WalletModel, Uuid, Vec<Uuid>) {
    let mut model = svc.create(path, &cred()).unwrap();
    let bank = model.add_category("Banking", None).unwrap();
    let mut entries = Vec::new();
    for (name, content) in files {
        let guid = model.add_entry(bank, name).unwrap();
        model.attach(&guid, name, content.to_vec()).unwrap();
        entries.push(guid);
    }
    svc.save(&mut model).unwrap();
    (model, bank, entries)
}

fn content_of(svc: &WalletService, model: &WalletModel, guid: &Uuid) -> Option<Vec<u8>> {
    svc.attachments()
        .read_content(
            model.vault_path().unwrap(),
            guid,
            model.require_encryptor().unwrap(),
        )
        .unwrap()
}

/// Rewrite the main store of `path` with a legacy codec, keeping its items.
fn downgrade(svc: &WalletService, path: &Path, codec: &dyn VaultCodec) {
    let model = svc.open(path, &cred()).unwrap();
    let encryptor = model.require_encryptor().unwrap();
    let header = Header {
        version: codec.version(),
        pass_hash: model.pass_hash.clone(),
        combination_hash: if codec.version() >= 12 {
            model.combination_hash.clone()
        } else {
            Default::default()
        },
        salt: walletvault::crypto::generate_salt().to_vec(),
        kdf_params: fast_params(),
        saved_at: None,
    };
    let bytes = codec.encode(&header, model.items(), encryptor).unwrap();
    fs::write(path, bytes).unwrap();
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

#[test]
fn items_structure_and_attachments_round_trip() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, bank, entries) = wallet_with_files(
        &svc,
        &path,
        &[("card.pdf", &b"%PDF-1.7 card"[..]), ("id.png", &b"\x89PNG id"[..])],
    );

    let sub = model.add_category("Savings", Some(bank)).unwrap();
    let acct = model.add_entry(sub, "Account").unwrap();
    model
        .item_mut(&acct)
        .unwrap()
        .fields
        .insert("iban".into(), "DE00 0000".into());
    model.item_mut(&acct).unwrap().notes = Some("joint".into());
    svc.save(&mut model).unwrap();

    let reopened = svc.open(&path, &cred()).unwrap();
    assert_eq!(reopened.len(), 5);
    assert_eq!(reopened.items(), model.items());
    assert_eq!(reopened.parent_of(&acct).unwrap().guid, sub);
    assert_eq!(reopened.children_of(&bank).len(), 3);

    assert_eq!(content_of(&svc, &reopened, &entries[0]).unwrap(), b"%PDF-1.7 card");
    assert_eq!(content_of(&svc, &reopened, &entries[1]).unwrap(), b"\x89PNG id");
    let entry = reopened.item(&entries[0]).unwrap().attachment.as_ref().unwrap();
    assert_eq!(entry.access_flag, AccessFlag::None);
    assert!(entry.location.is_some());
}

#[test]
fn replacing_an_attachment_keeps_only_the_new_content() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, _, entries) = wallet_with_files(&svc, &path, &[("a.txt", &b"old"[..])]);

    model.attach(&entries[0], "a.txt", b"new".to_vec()).unwrap();
    assert_eq!(
        model.item(&entries[0]).unwrap().attachment.as_ref().unwrap().access_flag,
        AccessFlag::Update
    );
    svc.save(&mut model).unwrap();

    let reopened = svc.open(&path, &cred()).unwrap();
    assert_eq!(content_of(&svc, &reopened, &entries[0]).unwrap(), b"new");
}

#[test]
fn wrong_password_is_rejected_before_decryption() {
    let (_dir, path) = wallet_path();
    let svc = service();
    svc.create(&path, &cred()).unwrap();

    let result = svc.open(&path, &Credential::new("wrong", "2468"));
    assert!(matches!(result, Err(WalletError::WrongPassword)));
}

#[test]
fn create_refuses_existing_file() {
    let (_dir, path) = wallet_path();
    let svc = service();
    svc.create(&path, &cred()).unwrap();
    assert!(matches!(
        svc.create(&path, &cred()),
        Err(WalletError::VaultAlreadyExists(_))
    ));
}

// ---------------------------------------------------------------------------
// Version fallback
// ---------------------------------------------------------------------------

#[test]
fn legacy_v10_and_v12_files_are_read_by_fallback() {
    let svc = service();
    for codec in [&CodecV12 as &dyn VaultCodec, &CodecV10 as &dyn VaultCodec] {
        let (_dir, path) = wallet_path();
        let (model, _, _) = wallet_with_files(&svc, &path, &[]);
        downgrade(&svc, &path, codec);

        assert_eq!(svc.read_header(&path).unwrap().version, codec.version());
        let legacy = svc.open(&path, &cred()).unwrap();
        assert_eq!(legacy.data_file_version, codec.version());
        assert!(!legacy.is_latest_version());
        assert_eq!(legacy.items(), model.items());
    }
}

#[test]
fn v10_header_has_no_combination_check() {
    let (_dir, path) = wallet_path();
    let svc = service();
    wallet_with_files(&svc, &path, &[]);
    downgrade(&svc, &path, &CodecV10);

    let header = svc.read_header(&path).unwrap();
    assert!(header.combination_hash.is_empty());
}

#[test]
fn saving_a_legacy_file_writes_the_latest_version() {
    let (_dir, path) = wallet_path();
    let svc = service();
    wallet_with_files(&svc, &path, &[]);
    downgrade(&svc, &path, &CodecV12);

    let mut legacy = svc.open(&path, &cred()).unwrap();
    svc.save(&mut legacy).unwrap();

    assert_eq!(legacy.data_file_version, LATEST_VERSION);
    assert_eq!(svc.read_header(&path).unwrap().version, LATEST_VERSION);
    assert_eq!(&fs::read(&path).unwrap()[..4], b"WLT3");
}

#[test]
fn unknown_format_is_unreadable() {
    let (_dir, path) = wallet_path();
    fs::write(&path, b"definitely not a wallet, just some text").unwrap();

    let svc = service();
    assert!(matches!(
        svc.read_header(&path),
        Err(WalletError::UnreadableStore(_))
    ));
    assert!(matches!(
        svc.open(&path, &cred()),
        Err(WalletError::UnreadableStore(_))
    ));
}

// ---------------------------------------------------------------------------
// Attachment migration
// ---------------------------------------------------------------------------

#[test]
fn upgrade_of_a_latest_store_is_idempotent() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, _, entries) =
        wallet_with_files(&svc, &path, &[("a", &b"alpha"[..]), ("b", &b"bravo"[..])]);

    svc.upgrade(&mut model).unwrap();
    svc.upgrade(&mut model).unwrap();

    let reopened = svc.open(&path, &cred()).unwrap();
    assert_eq!(reopened.items(), model.items());
    assert_eq!(content_of(&svc, &reopened, &entries[0]).unwrap(), b"alpha");
    assert_eq!(content_of(&svc, &reopened, &entries[1]).unwrap(), b"bravo");
    let table = svc
        .attachments()
        .read(&attachment_path_of(&path), reopened.require_encryptor().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(table.len(), 2);
}

#[test]
fn deletions_do_not_survive_an_upgrade() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, _, entries) =
        wallet_with_files(&svc, &path, &[("a", &b"alpha"[..]), ("b", &b"bravo"[..])]);

    model.detach(&entries[0]).unwrap();
    svc.upgrade(&mut model).unwrap();

    assert!(model.item(&entries[0]).unwrap().attachment.is_none());
    let reopened = svc.open(&path, &cred()).unwrap();
    assert!(reopened.item(&entries[0]).unwrap().attachment.is_none());
    assert!(content_of(&svc, &reopened, &entries[0]).is_none());
    assert_eq!(content_of(&svc, &reopened, &entries[1]).unwrap(), b"bravo");
}

#[test]
fn saved_deletion_is_recorded_in_the_store() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, _, entries) = wallet_with_files(&svc, &path, &[("a", &b"alpha"[..])]);

    model.detach(&entries[0]).unwrap();
    svc.save(&mut model).unwrap();

    let reopened = svc.open(&path, &cred()).unwrap();
    assert!(reopened.item(&entries[0]).unwrap().attachment.is_none());
    assert!(reopened.deleted_in_store.contains(&entries[0]));
}

#[test]
fn nothing_to_transfer_rebuilds_an_empty_store() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, _, entries) =
        wallet_with_files(&svc, &path, &[("a", &b"alpha"[..]), ("b", &b"bravo"[..])]);

    for guid in &entries {
        model.detach(guid).unwrap();
    }
    svc.upgrade(&mut model).unwrap();

    let table = svc
        .attachments()
        .read(&attachment_path_of(&path), model.require_encryptor().unwrap())
        .unwrap()
        .expect("rebuilt store exists");
    assert!(table.is_empty());
    assert!(model.attachments().next().is_none());
    assert!(!staging_path_of(&attachment_path_of(&path)).exists());
}

#[test]
fn legacy_upgrade_reconciles_every_intent() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (_, bank, entries) = wallet_with_files(
        &svc,
        &path,
        &[("drop", &b"gone"[..]), ("keep", &b"kept"[..]), ("swap", &b"before"[..])],
    );
    downgrade(&svc, &path, &CodecV12);

    let mut legacy = svc.open(&path, &cred()).unwrap();
    let (drop, keep, swap) = (entries[0], entries[1], entries[2]);
    let fresh = legacy.add_entry(bank, "fresh").unwrap();

    legacy.detach(&drop).unwrap();
    legacy.attach(&swap, "swap", b"after".to_vec()).unwrap();
    legacy.attach(&fresh, "fresh", b"new blob".to_vec()).unwrap();
    svc.save(&mut legacy).unwrap();

    assert!(legacy.is_latest_version());
    for item in legacy.items() {
        if let Some(a) = &item.attachment {
            assert_eq!(a.access_flag, AccessFlag::None);
            assert!(item.new_attachment.is_none());
        }
    }

    let reopened = svc.open(&path, &cred()).unwrap();
    assert_eq!(reopened.data_file_version, LATEST_VERSION);
    assert!(content_of(&svc, &reopened, &drop).is_none());
    assert_eq!(content_of(&svc, &reopened, &keep).unwrap(), b"kept");
    assert_eq!(content_of(&svc, &reopened, &swap).unwrap(), b"after");
    assert_eq!(content_of(&svc, &reopened, &fresh).unwrap(), b"new blob");
}

#[test]
fn legacy_file_without_attachments_gets_an_empty_store() {
    let (_dir, path) = wallet_path();
    let svc = service();
    wallet_with_files(&svc, &path, &[]);
    downgrade(&svc, &path, &CodecV10);
    assert!(!attachment_path_of(&path).exists());

    let mut legacy = svc.open(&path, &cred()).unwrap();
    svc.save(&mut legacy).unwrap();

    let table = svc
        .attachments()
        .read(&attachment_path_of(&path), legacy.require_encryptor().unwrap())
        .unwrap()
        .expect("store created");
    assert!(table.is_empty());
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[test]
fn open_completes_an_interrupted_swap() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (_, _, entries) = wallet_with_files(&svc, &path, &[("a", &b"alpha"[..])]);

    // Crash between delete and rename: only the staged copy is left.
    let store = attachment_path_of(&path);
    fs::rename(&store, staging_path_of(&store)).unwrap();

    let reopened = svc.open(&path, &cred()).unwrap();
    assert!(store.exists());
    assert!(!staging_path_of(&store).exists());
    assert_eq!(content_of(&svc, &reopened, &entries[0]).unwrap(), b"alpha");
}

#[test]
fn open_discards_a_stale_staged_store() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (_, _, entries) = wallet_with_files(&svc, &path, &[("a", &b"alpha"[..])]);

    let store = attachment_path_of(&path);
    fs::write(staging_path_of(&store), b"half written").unwrap();

    let reopened = svc.open(&path, &cred()).unwrap();
    assert!(!staging_path_of(&store).exists());
    assert_eq!(content_of(&svc, &reopened, &entries[0]).unwrap(), b"alpha");
}

// ---------------------------------------------------------------------------
// Password rotation
// ---------------------------------------------------------------------------

#[test]
fn rotation_rekeys_both_stores() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, _, entries) = wallet_with_files(&svc, &path, &[("a", &b"alpha"[..])]);
    let new_cred = Credential::new("new passphrase!", "1357");

    svc.rotate_password(&mut model, &new_cred).unwrap();

    assert!(matches!(
        svc.open(&path, &cred()),
        Err(WalletError::WrongPassword)
    ));
    let reopened = svc.open(&path, &new_cred).unwrap();
    assert_eq!(reopened.items(), model.items());
    assert_eq!(content_of(&svc, &reopened, &entries[0]).unwrap(), b"alpha");

    // The old credential cannot decrypt the attachment store either.
    let old_encryptor = Argon2CryptoService::new(fast_params())
        .encryptor_for(&cred())
        .unwrap();
    assert!(svc
        .attachments()
        .read(&attachment_path_of(&path), &old_encryptor)
        .is_err());
}

fn rotate_with_pending_intents(legacy: Option<&dyn VaultCodec>) {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (_, bank, entries) = wallet_with_files(
        &svc,
        &path,
        &[("drop", &b"gone"[..]), ("keep", &b"kept"[..]), ("swap", &b"before"[..])],
    );
    if let Some(codec) = legacy {
        downgrade(&svc, &path, codec);
    }

    let mut model = svc.open(&path, &cred()).unwrap();
    let (drop, keep, swap) = (entries[0], entries[1], entries[2]);
    let fresh = model.add_entry(bank, "fresh").unwrap();
    model.detach(&drop).unwrap();
    model.attach(&swap, "swap", b"after".to_vec()).unwrap();
    model.attach(&fresh, "fresh", b"new blob".to_vec()).unwrap();

    let new_cred = Credential::new("rotated passphrase", "8080");
    svc.rotate_password(&mut model, &new_cred).unwrap();

    assert!(model.is_latest_version());
    assert!(model.item(&drop).unwrap().attachment.is_none());
    for guid in [keep, swap, fresh] {
        let item = model.item(&guid).unwrap();
        assert_eq!(item.attachment.as_ref().unwrap().access_flag, AccessFlag::None);
        assert!(item.new_attachment.is_none());
    }
    assert!(!staging_path_of(&attachment_path_of(&path)).exists());

    let reopened = svc.open(&path, &new_cred).unwrap();
    assert_eq!(reopened.data_file_version, LATEST_VERSION);
    assert!(content_of(&svc, &reopened, &drop).is_none());
    assert_eq!(content_of(&svc, &reopened, &keep).unwrap(), b"kept");
    assert_eq!(content_of(&svc, &reopened, &swap).unwrap(), b"after");
    assert_eq!(content_of(&svc, &reopened, &fresh).unwrap(), b"new blob");
}

#[test]
fn rotation_commits_pending_intents() {
    rotate_with_pending_intents(None);
}

#[test]
fn rotation_of_legacy_files_commits_pending_intents() {
    rotate_with_pending_intents(Some(&CodecV12));
    rotate_with_pending_intents(Some(&CodecV10));
}

#[test]
fn failed_rotation_keeps_the_old_credential_working() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, _, entries) = wallet_with_files(&svc, &path, &[("a", &b"alpha"[..])]);
    let new_cred = Credential::new("new passphrase!", "1357");

    // Block the staged attachment store with a directory.
    let staged = staging_path_of(&attachment_path_of(&path));
    fs::create_dir(&staged).unwrap();
    assert!(svc.rotate_password(&mut model, &new_cred).is_err());
    fs::remove_dir(&staged).unwrap();

    let reopened = svc.open(&path, &cred()).unwrap();
    assert_eq!(content_of(&svc, &reopened, &entries[0]).unwrap(), b"alpha");
    assert!(matches!(
        svc.open(&path, &new_cred),
        Err(WalletError::WrongPassword)
    ));
}

#[test]
fn rotation_interrupted_before_the_attachment_swap_is_finished_on_open() {
    let (_dir, path) = wallet_path();
    let svc = service();
    let (mut model, _, entries) = wallet_with_files(&svc, &path, &[("a", &b"alpha"[..])]);
    let store = attachment_path_of(&path);
    let old_store = fs::read(&store).unwrap();
    let new_cred = Credential::new("new passphrase!", "1357");
    svc.rotate_password(&mut model, &new_cred).unwrap();

    // Crash after the main store was committed, before the old
    // attachment store was deleted.
    fs::rename(&store, staging_path_of(&store)).unwrap();
    fs::write(&store, old_store).unwrap();

    assert!(matches!(
        svc.open(&path, &cred()),
        Err(WalletError::WrongPassword)
    ));
    let reopened = svc.open(&path, &new_cred).unwrap();
    assert!(!staging_path_of(&store).exists());
    assert_eq!(content_of(&svc, &reopened, &entries[0]).unwrap(), b"alpha");
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[test]
fn export_writes_only_the_entry_and_its_category() {
    let (dir, path) = wallet_path();
    let svc = service();
    let (mut model, bank, entries) = wallet_with_files(
        &svc,
        &path,
        &[("visa", &b"visa scan"[..]), ("amex", &b"amex scan"[..])],
    );
    let other = model.add_category("Travel", None).unwrap();
    model.add_entry(other, "Passport").unwrap();
    svc.save(&mut model).unwrap();

    let source_main = fs::read(&path).unwrap();
    let source_attachments = fs::read(attachment_path_of(&path)).unwrap();

    let export_path = dir.path().join("visa.vault");
    let export_cred = Credential::new("export secret", "9999");
    svc.export_item(&model, &entries[0], &export_cred, &export_path)
        .unwrap();

    // Source untouched.
    assert_eq!(fs::read(&path).unwrap(), source_main);
    assert_eq!(fs::read(attachment_path_of(&path)).unwrap(), source_attachments);

    // Only the export credential opens the new wallet.
    assert!(matches!(
        svc.open(&export_path, &cred()),
        Err(WalletError::WrongPassword)
    ));
    let exported = svc.open(&export_path, &export_cred).unwrap();
    assert_eq!(exported.len(), 2);
    let category = exported.item(&bank).expect("parent category exported");
    assert!(category.parent.is_none());
    let entry = exported.item(&entries[0]).expect("entry exported");
    assert_eq!(entry.parent, Some(bank));
    assert!(exported.item(&entries[1]).is_none());
    assert_eq!(
        content_of(&svc, &exported, &entries[0]).unwrap(),
        b"visa scan"
    );
    assert!(content_of(&svc, &exported, &entries[1]).is_none());
}

#[test]
fn export_refuses_categories_and_existing_targets() {
    let (dir, path) = wallet_path();
    let svc = service();
    let (model, bank, entries) = wallet_with_files(&svc, &path, &[("visa", &b"v"[..])]);
    let target = dir.path().join("out.vault");

    assert!(matches!(
        svc.export_item(&model, &bank, &cred(), &target),
        Err(WalletError::UnsupportedOperation(_))
    ));
    assert!(!target.exists());

    fs::write(&target, b"occupied").unwrap();
    assert!(matches!(
        svc.export_item(&model, &entries[0], &cred(), &target),
        Err(WalletError::VaultAlreadyExists(_))
    ));
    assert!(matches!(
        svc.export_item(&model, &entries[0], &cred(), &path),
        Err(WalletError::UnsupportedOperation(_))
    ));
}

#[test]
fn failed_export_leaves_nothing_behind() {
    let (dir, path) = wallet_path();
    let svc = service();
    let (model, _, entries) = wallet_with_files(&svc, &path, &[("visa", &b"visa scan"[..])]);
    let target = dir.path().join("visa.vault");
    let export_cred = Credential::new("export secret", "9999");

    // Block the staged attachment store of the export.
    let blocker = staging_path_of(&attachment_path_of(&target));
    fs::create_dir(&blocker).unwrap();
    assert!(svc
        .export_item(&model, &entries[0], &export_cred, &target)
        .is_err());
    assert!(!target.exists());
    assert!(!attachment_path_of(&target).exists());

    fs::remove_dir(&blocker).unwrap();
    svc.export_item(&model, &entries[0], &export_cred, &target)
        .unwrap();
    let exported = svc.open(&target, &export_cred).unwrap();
    assert_eq!(
        content_of(&svc, &exported, &entries[0]).unwrap(),
        b"visa scan"
    );
}
