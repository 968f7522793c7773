//! Staged rewrites of store files.
//!
//! A store file is never rewritten in place.  New content goes to
//! `<path>.tmp` and is promoted afterwards.  The attachment store is
//! promoted with delete-then-rename; a crash between those two steps leaves
//! only the staged copy, which [`recover_interrupted_swap`] finishes.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{Result, WalletError};

/// `<path>.tmp`, next to `path`.
pub fn staging_path_of(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `bytes` to the staging path, then rename it over `path`.
///
/// Used for the main store, where `rename` replaces the old file in one
/// step and there is nothing to reconcile afterwards.
pub fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let staging = staging_path_of(path);
    fs::write(&staging, bytes)?;
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    Ok(())
}

/// Promote `staging` to `target`: delete the old file, then rename.
///
/// A failure after the delete is reported as `CorruptedSwapWindow`; the
/// staged file is left where it is so recovery can finish the rename.
pub fn swap_into_place(staging: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        fs::remove_file(target)?;
    }
    fs::rename(staging, target).map_err(|e| {
        log::error!(
            "rename {} -> {} failed after the old file was removed: {e}",
            staging.display(),
            target.display()
        );
        WalletError::CorruptedSwapWindow {
            target: target.to_path_buf(),
            staging: staging.to_path_buf(),
        }
    })
}

/// Write `bytes` to `<target>.tmp` and swap it into place.
pub fn write_staged(target: &Path, bytes: &[u8]) -> Result<()> {
    let staging = staging_path_of(target);
    fs::write(&staging, bytes)?;
    swap_into_place(&staging, target)
}

/// What [`recover_interrupted_swap`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// No staged file; nothing to do.
    Clean,
    /// The target was missing and the staged copy was renamed into place.
    CompletedRename,
    /// Both existed: the operation aborted before its delete step, so the
    /// target is authoritative and the stale staged copy was removed.
    DiscardedStale,
    /// Both existed, but only the staged copy matched the caller's key:
    /// it was swapped in over the target.
    PromotedStaged,
}

/// Finish or clean up an interrupted swap of `target`.
///
/// A missing `target` next to an existing `<target>.tmp` means "finish the
/// rename", never "there is no file".  When both exist the staged copy is
/// stale and removed, unless `staged_is_current(target, staging)` says
/// the staged copy is the one to keep.
pub fn recover_interrupted_swap<F>(target: &Path, staged_is_current: F) -> Result<Recovery>
where
    F: FnOnce(&Path, &Path) -> bool,
{
    let staging = staging_path_of(target);
    if !staging.exists() {
        return Ok(Recovery::Clean);
    }

    if target.exists() {
        if staged_is_current(target, &staging) {
            log::warn!(
                "promoting staged file {} over {}",
                staging.display(),
                target.display()
            );
            swap_into_place(&staging, target)?;
            return Ok(Recovery::PromotedStaged);
        }
        log::warn!(
            "discarding stale staged file {} (target {} is intact)",
            staging.display(),
            target.display()
        );
        fs::remove_file(&staging)?;
        return Ok(Recovery::DiscardedStale);
    }

    log::warn!(
        "completing interrupted swap: {} -> {}",
        staging.display(),
        target.display()
    );
    fs::rename(&staging, target).map_err(|_| WalletError::CorruptedSwapWindow {
        target: target.to_path_buf(),
        staging,
    })?;
    Ok(Recovery::CompletedRename)
}

/// Best-effort removal of files left behind by a failed operation.
pub fn discard_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => log::debug!("removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("could not remove {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn staging_path_appends_suffix() {
        assert_eq!(
            staging_path_of(Path::new("/a/b/wallet.attachments")),
            PathBuf::from("/a/b/wallet.attachments.tmp")
        );
    }

    #[test]
    fn write_staged_replaces_target_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("store");
        fs::write(&target, b"old").unwrap();

        write_staged(&target, b"new").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!staging_path_of(&target).exists());
    }

    #[test]
    fn recovery_completes_rename_when_target_missing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("store");
        fs::write(staging_path_of(&target), b"staged").unwrap();

        assert_eq!(
            recover_interrupted_swap(&target, |_, _| false).unwrap(),
            Recovery::CompletedRename
        );
        assert_eq!(fs::read(&target).unwrap(), b"staged");
    }

    #[test]
    fn recovery_discards_stale_staging() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("store");
        fs::write(&target, b"current").unwrap();
        fs::write(staging_path_of(&target), b"half-written").unwrap();

        assert_eq!(
            recover_interrupted_swap(&target, |_, _| false).unwrap(),
            Recovery::DiscardedStale
        );
        assert_eq!(fs::read(&target).unwrap(), b"current");
        assert!(!staging_path_of(&target).exists());
    }

    #[test]
    fn recovery_promotes_a_staged_copy_the_caller_vouches_for() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("store");
        fs::write(&target, b"old key").unwrap();
        fs::write(staging_path_of(&target), b"new key").unwrap();

        let outcome = recover_interrupted_swap(&target, |t, s| {
            fs::read(t).unwrap() != b"new key" && fs::read(s).unwrap() == b"new key"
        })
        .unwrap();

        assert_eq!(outcome, Recovery::PromotedStaged);
        assert_eq!(fs::read(&target).unwrap(), b"new key");
        assert!(!staging_path_of(&target).exists());
    }

    #[test]
    fn discard_files_ignores_missing_paths() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("left-over");
        fs::write(&present, b"x").unwrap();

        discard_files(&[present.clone(), dir.path().join("never-written")]);
        assert!(!present.exists());
    }

    #[test]
    fn recovery_is_a_noop_without_staging() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            recover_interrupted_swap(&dir.path().join("store"), |_, _| false).unwrap(),
            Recovery::Clean
        );
    }
}
