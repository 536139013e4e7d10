//! `SaveApi`: the platform-local half of a save slot (spec §4.7 names it
//! "local storage via a platform SaveApi"). The original keeps this behind
//! a per-platform abstraction (`SaveApiPC`, `SaveApiIOS`, ...); here it is a
//! trait so `SaveLoadService` stays platform-agnostic and tests can swap in
//! an in-memory fake rather than touching a real disk.
//!
//! Grounded on `pkgcore-downloader`'s target-file discipline: writes land
//! in a temp file beside the target and are renamed into place, so a crash
//! mid-write never leaves a half-written save blob on disk (spec §7:
//! `RenameNoSpace` is a distinct failure mode from a plain write failure).

use std::path::{Path, PathBuf};

use pkgcore_types::FilePath;

use crate::error::{SaveError, SaveResult};

/// The platform-local persistence surface a save slot is read from and
/// written to. `DiskSaveApi` is the default implementation; tests may
/// substitute an in-memory one.
pub trait SaveApi: Send + Sync {
    fn read(&self, slot: &FilePath) -> SaveResult<Option<Vec<u8>>>;
    fn write(&self, slot: &FilePath, bytes: &[u8]) -> SaveResult<()>;
    fn delete(&self, slot: &FilePath) -> SaveResult<()>;
}

/// Stores each slot as a file under a root directory, named by the slot's
/// archive-relative string with path separators preserved as subdirectories.
pub struct DiskSaveApi {
    root: PathBuf,
}

impl DiskSaveApi {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, slot: &FilePath) -> PathBuf {
        self.root.join(slot.to_archive_relative_string())
    }
}

impl SaveApi for DiskSaveApi {
    fn read(&self, slot: &FilePath) -> SaveResult<Option<Vec<u8>>> {
        let path = self.path_for(slot);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SaveError::Io(e)),
        }
    }

    fn write(&self, slot: &FilePath, bytes: &[u8]) -> SaveResult<()> {
        let path = self.path_for(slot);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SaveError::Io)?;
        }
        let tmp_path = temp_path_for(&path);
        std::fs::write(&tmp_path, bytes).map_err(map_write_error)?;
        std::fs::rename(&tmp_path, &path).map_err(|_| SaveError::RenameNoSpace)?;
        Ok(())
    }

    fn delete(&self, slot: &FilePath) -> SaveResult<()> {
        let path = self.path_for(slot);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SaveError::Io(e)),
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn map_write_error(e: std::io::Error) -> SaveError {
    match e.kind() {
        std::io::ErrorKind::WriteZero | std::io::ErrorKind::OutOfMemory => SaveError::WriteNoSpace,
        _ if e.raw_os_error() == Some(28) => SaveError::WriteNoSpace, // ENOSPC
        _ => SaveError::Io(e),
    }
}
