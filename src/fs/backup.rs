//! Point-in-time copies taken before destructive mutations.
//!
//! A store owns one private temporary directory, created on the first
//! backup and removed in full when the store is dropped. Each handle owns a
//! numbered slot inside it, so interleaved operations never share recovery
//! data.

use crate::error::{Result, WorkspaceError};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BACKUP_DIR_PREFIX: &str = "workspace-broker-backup-";

/// What a backup slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Exclusive reference to one backup slot.
///
/// Not `Clone`: exactly one `FileOperation` owns each handle.
#[derive(Debug, PartialEq, Eq)]
pub struct BackupHandle {
    id: usize,
    slot: PathBuf,
    kind: EntryKind,
}

impl BackupHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// The copied entry inside the slot.
    pub fn location(&self) -> PathBuf {
        self.slot.join("entry")
    }
}

/// A restore that failed; the handle is returned so the caller can retry.
#[derive(Debug)]
pub struct RestoreFailure {
    pub handle: BackupHandle,
    pub error: WorkspaceError,
}

#[derive(Debug, Default)]
pub struct BackupStore {
    dir: Option<TempDir>,
    next_id: usize,
}

impl BackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Private directory holding the slots, if any backup was taken.
    pub fn location(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    fn root(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.dir {
            return Ok(dir.path().to_path_buf());
        }

        let dir = tempfile::Builder::new()
            .prefix(BACKUP_DIR_PREFIX)
            .tempdir()?;
        log::debug!("Created backup directory: {}", dir.path().display());
        let root = dir.path().to_path_buf();
        self.dir = Some(dir);
        Ok(root)
    }

    /// Copies `path` into a fresh slot.
    ///
    /// Returns `None` when nothing exists at `path`.
    pub fn backup(&mut self, path: &Path) -> Result<Option<BackupHandle>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let kind = if meta.file_type().is_symlink() {
            EntryKind::Symlink
        } else if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        let id = self.next_id;
        self.next_id += 1;
        let slot = self.root()?.join(format!("{id:06}"));
        fs::create_dir(&slot)?;

        let handle = BackupHandle { id, slot, kind };
        if let Err(e) = copy_entry(path, &handle.location()) {
            let _ = fs::remove_dir_all(&handle.slot);
            return Err(e.into());
        }

        log::debug!("Backed up {} into slot {}", path.display(), id);
        Ok(Some(handle))
    }

    /// Replaces whatever is at `path` with the backed-up entry.
    ///
    /// Consumes the handle on success.
    pub fn restore(
        &self,
        handle: BackupHandle,
        path: &Path,
    ) -> std::result::Result<(), RestoreFailure> {
        let attempt = || -> io::Result<()> {
            remove_entry(path)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            copy_entry(&handle.location(), path)
        };

        match attempt() {
            Ok(()) => {
                log::debug!("Restored {} from slot {}", path.display(), handle.id);
                self.release(handle);
                Ok(())
            }
            Err(e) => Err(RestoreFailure {
                error: WorkspaceError::Io(io::Error::new(
                    e.kind(),
                    format!("Failed to restore {}: {}", path.display(), e),
                )),
                handle,
            }),
        }
    }

    /// Deletes the slot behind `handle`.
    ///
    /// Failures are logged only; the whole directory is removed on drop.
    pub fn release(&self, handle: BackupHandle) {
        if let Err(e) = fs::remove_dir_all(&handle.slot) {
            log::warn!(
                "Failed to release backup slot {}: {}",
                handle.slot.display(),
                e
            );
        }
    }
}

/// Copies a file, symlink or directory tree.
///
/// Symlinks are recreated as links and never followed.
pub(crate) fn copy_entry(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    if meta.file_type().is_symlink() {
        copy_symlink(from, to)
    } else if meta.is_dir() {
        copy_dir_recursive(from, to)?;
        fs::set_permissions(to, meta.permissions())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

/// Recursively copies directory tree.
fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;

    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let from_path = entry.path();
        let to_path = to.join(entry.file_name());

        if file_type.is_symlink() {
            copy_symlink(&from_path, &to_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&from_path, &to_path)?;
            fs::set_permissions(&to_path, fs::metadata(&from_path)?.permissions())?;
        } else {
            fs::copy(&from_path, &to_path)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(windows)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = fs::read_link(from)?;
    if fs::metadata(from).map(|m| m.is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(target, to)
    } else {
        std::os::windows::fs::symlink_file(target, to)
    }
}

/// Removes a file, symlink or directory tree. Missing paths are fine.
pub(crate) fn remove_entry(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
