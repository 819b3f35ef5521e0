//! Caller-owned log of applied file operations with rollback support.
//!
//! Unlike a staged batch, every entry here has **already been applied** to
//! the filesystem. The log exists so the whole unit of work can be undone.
//!
//! ## Guarantees
//!
//! - **Append-only**: entries are recorded only while the transaction is open
//! - **LIFO rollback**: entries are reverted last to first, since later
//!   operations depend on the state left by earlier ones
//! - **Scoped backups**: one private temp directory per transaction, removed
//!   on commit, after rollback, and on drop
//! - **Idempotent rollback**: rolling back twice equals rolling back once
//!
//! ## Example
//!
//! ```no_run
//! # use workspace_broker::{WorkspaceConfig, WorkspaceManager};
//! # fn example() -> workspace_broker::Result<()> {
//! let ws = WorkspaceManager::new(WorkspaceConfig::new("/srv/workspace"))?;
//! let mut txn = ws.begin();
//!
//! ws.write(&mut txn, "notes.txt", b"draft", false)?;
//! ws.rename(&mut txn, "notes.txt", "archive/notes.txt")?;
//!
//! ws.rollback(&mut txn)?; // both steps undone, `archive/` removed
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, WorkspaceError};
use crate::fs::backup::{copy_entry, remove_entry, BackupHandle, BackupStore};

use colored::Colorize;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Kind of file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Write,
    Append,
    Delete,
    Rename,
    CreateDir,
    ListDir,
}

impl OperationKind {
    /// True for kinds that change the filesystem.
    pub fn is_mutating(self) -> bool {
        !matches!(self, OperationKind::Read | OperationKind::ListDir)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Append => "append",
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
            OperationKind::CreateDir => "create_dir",
            OperationKind::ListDir => "list_dir",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied operation.
///
/// Owns the backup needed to invert it, if the operation destroyed
/// pre-existing data.
#[derive(Debug)]
pub struct FileOperation {
    pub kind: OperationKind,
    pub path: PathBuf,
    /// Destination, for `Rename` only.
    pub new_path: Option<PathBuf>,
    pub backup: Option<BackupHandle>,
    /// Bytes written by `Write`/`Append`. Informational only.
    pub payload: Option<Vec<u8>>,
}

impl FileOperation {
    fn new(kind: OperationKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            new_path: None,
            backup: None,
            payload: None,
        }
    }

    pub fn read(path: PathBuf) -> Self {
        Self::new(OperationKind::Read, path)
    }

    pub fn write(path: PathBuf, payload: Vec<u8>, backup: Option<BackupHandle>) -> Self {
        Self {
            backup,
            payload: Some(payload),
            ..Self::new(OperationKind::Write, path)
        }
    }

    pub fn append(path: PathBuf, payload: Vec<u8>, backup: Option<BackupHandle>) -> Self {
        Self {
            backup,
            payload: Some(payload),
            ..Self::new(OperationKind::Append, path)
        }
    }

    pub fn delete(path: PathBuf, backup: BackupHandle) -> Self {
        Self {
            backup: Some(backup),
            ..Self::new(OperationKind::Delete, path)
        }
    }

    pub fn rename(from: PathBuf, to: PathBuf, backup: Option<BackupHandle>) -> Self {
        Self {
            new_path: Some(to),
            backup,
            ..Self::new(OperationKind::Rename, from)
        }
    }

    pub fn create_dir(path: PathBuf) -> Self {
        Self::new(OperationKind::CreateDir, path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Accepting new entries.
    Open,
    /// Backups released; the filesystem keeps every change.
    Committed,
    /// Every entry reverted.
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        })
    }
}

/// An entry undone by rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertedEntry {
    pub kind: OperationKind,
    pub path: PathBuf,
}

/// An entry that could not be reverted and stays in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRevert {
    pub kind: OperationKind,
    pub path: PathBuf,
    /// Taxonomy name of the error, as in [`WorkspaceError::kind`].
    pub error_kind: &'static str,
    pub message: String,
}

/// Outcome of a rollback pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Entries undone, in the order they were processed (newest first).
    pub reverted: Vec<RevertedEntry>,
    /// Created directories that gained untracked content and were kept.
    pub left_in_place: Vec<PathBuf>,
    /// Entries that failed to revert. Empty after a complete rollback.
    pub failed: Vec<FailedRevert>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `RollbackFailed` listing every failed entry, unless complete.
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            return Ok(self);
        }

        let errors: Vec<String> = self
            .failed
            .iter()
            .map(|f| format!("{} {}: {}", f.kind, f.path.display(), f.message))
            .collect();
        Err(WorkspaceError::RollbackFailed(errors.join("; ")))
    }
}

enum Reverted {
    Done,
    LeftInPlace,
}

/// Log of applied operations that can be committed or rolled back.
///
/// Dropping an open transaction keeps every change on disk and logs a
/// warning; its backups are deleted.
#[must_use = "Transaction must be committed or rolled back"]
pub struct Transaction {
    operations: Vec<FileOperation>,
    state: TransactionState,
    backups: BackupStore,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Creates an open, empty transaction.
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            state: TransactionState::Open,
            backups: BackupStore::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }

    /// Private backup directory, once a backup has been taken.
    pub fn backup_location(&self) -> Option<&Path> {
        self.backups.location()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.state != TransactionState::Open {
            return Err(WorkspaceError::TransactionClosed(self.state));
        }
        Ok(())
    }

    /// Takes a backup of `path` in this transaction's private storage.
    pub fn backup(&mut self, path: &Path) -> Result<Option<BackupHandle>> {
        self.ensure_open()?;
        self.backups.backup(path)
    }

    /// Appends an applied operation to the log.
    pub fn record(&mut self, op: FileOperation) -> Result<()> {
        self.ensure_open()?;
        log::debug!("Recorded {}: {}", op.kind, op.path.display());
        self.operations.push(op);
        Ok(())
    }

    /// Undoes a single operation that was applied but never recorded, then
    /// removes the parent directories created for it.
    ///
    /// Used when a mutation fails halfway, to put the filesystem back before
    /// the error reaches the caller. If the undo itself fails, the
    /// directories and the operation are recorded with the backup intact, so
    /// a later rollback retries them.
    pub(crate) fn undo_unrecorded(
        &mut self,
        op: FileOperation,
        created_dirs: Vec<PathBuf>,
    ) -> Result<()> {
        match self.revert(op) {
            Ok(_) => {
                remove_created_dirs(&created_dirs);
                Ok(())
            }
            Err((op, e)) => {
                log::error!(
                    "Failed to undo {} {}, keeping it for rollback: {}",
                    op.kind,
                    op.path.display(),
                    e
                );
                self.operations
                    .extend(created_dirs.into_iter().map(FileOperation::create_dir));
                self.operations.push(op);
                Err(e)
            }
        }
    }

    /// Keeps every change and releases all backups.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;

        for op in self.operations.drain(..) {
            if let Some(handle) = op.backup {
                self.backups.release(handle);
            }
        }
        // Dropping the store removes the private directory itself
        self.backups = BackupStore::new();
        self.state = TransactionState::Committed;
        log::debug!("Transaction committed");
        Ok(())
    }

    /// Reverts every entry, newest first.
    ///
    /// A second call after success is a no-op. If some entries fail to
    /// revert, the rest are still processed; the failed ones stay in the log
    /// with their backups and the transaction stays open, so a later call
    /// retries only those.
    ///
    /// # Errors
    ///
    /// `RollbackFailed` if any entry could not be reverted. Use
    /// [`Transaction::rollback_report`] to see which entries did revert.
    pub fn rollback(&mut self) -> Result<RollbackReport> {
        self.rollback_report()?.into_result()
    }

    /// Like [`Transaction::rollback`], but reports failed entries in
    /// [`RollbackReport::failed`] instead of failing.
    ///
    /// Errors only when the transaction is already committed.
    pub fn rollback_report(&mut self) -> Result<RollbackReport> {
        match self.state {
            TransactionState::RolledBack => return Ok(RollbackReport::default()),
            TransactionState::Committed => {
                return Err(WorkspaceError::TransactionClosed(self.state));
            }
            TransactionState::Open => {}
        }

        let mut report = RollbackReport::default();
        let mut failed = Vec::new();

        while let Some(op) = self.operations.pop() {
            let kind = op.kind;
            let path = op.path.clone();

            match self.revert(op) {
                Ok(Reverted::Done) => {
                    log::debug!("Reverted {}: {}", kind, path.display());
                    report.reverted.push(RevertedEntry { kind, path });
                }
                Ok(Reverted::LeftInPlace) => report.left_in_place.push(path),
                Err((op, e)) => {
                    log::error!("Failed to revert {} {}: {}", kind, path.display(), e);
                    report.failed.push(FailedRevert {
                        kind,
                        path,
                        error_kind: e.kind(),
                        message: e.to_string(),
                    });
                    failed.push(op);
                }
            }
        }

        if failed.is_empty() {
            self.backups = BackupStore::new();
            self.state = TransactionState::RolledBack;
            log::info!("Rollback completed");
        } else {
            failed.reverse();
            self.operations = failed;
        }
        Ok(report)
    }

    /// Inverts one entry. On failure the entry comes back intact.
    fn revert(
        &self,
        mut op: FileOperation,
    ) -> std::result::Result<Reverted, (FileOperation, WorkspaceError)> {
        match op.kind {
            OperationKind::Read | OperationKind::ListDir => Ok(Reverted::Done),
            OperationKind::Write | OperationKind::Append | OperationKind::Delete => {
                match op.backup.take() {
                    Some(handle) => match self.backups.restore(handle, &op.path) {
                        Ok(()) => Ok(Reverted::Done),
                        Err(failure) => {
                            op.backup = Some(failure.handle);
                            Err((op, failure.error))
                        }
                    },
                    None if op.kind == OperationKind::Delete => {
                        let err = WorkspaceError::InvalidOperation(format!(
                            "no backup recorded for deleted {}",
                            op.path.display()
                        ));
                        Err((op, err))
                    }
                    // Target did not exist before: the write created it
                    None => match remove_entry(&op.path) {
                        Ok(()) => Ok(Reverted::Done),
                        Err(e) => Err((op, e.into())),
                    },
                }
            }
            OperationKind::Rename => {
                let Some(to) = op.new_path.clone() else {
                    let err = WorkspaceError::InvalidOperation(format!(
                        "rename of {} has no destination",
                        op.path.display()
                    ));
                    return Err((op, err));
                };

                // A retry after a failed restore finds `to` already moved back
                if fs::symlink_metadata(&to).is_ok() {
                    if fs::symlink_metadata(&op.path).is_ok() {
                        let err = WorkspaceError::InvalidOperation(format!(
                            "cannot move {} back: {} exists",
                            to.display(),
                            op.path.display()
                        ));
                        return Err((op, err));
                    }
                    if let Err(e) = move_entry(&to, &op.path) {
                        return Err((
                            op,
                            WorkspaceError::Io(io::Error::new(
                                e.kind(),
                                format!("Failed to move back {}: {}", to.display(), e),
                            )),
                        ));
                    }
                }

                match op.backup.take() {
                    Some(handle) => match self.backups.restore(handle, &to) {
                        Ok(()) => Ok(Reverted::Done),
                        Err(failure) => {
                            op.backup = Some(failure.handle);
                            Err((op, failure.error))
                        }
                    },
                    None => Ok(Reverted::Done),
                }
            }
            OperationKind::CreateDir => match fs::read_dir(&op.path) {
                Ok(mut entries) => {
                    if entries.next().is_none() {
                        match fs::remove_dir(&op.path) {
                            Ok(()) => Ok(Reverted::Done),
                            Err(e) => Err((op, e.into())),
                        }
                    } else {
                        // Content we never tracked; removing it would destroy data
                        log::warn!(
                            "Leaving non-empty directory in place: {}",
                            op.path.display()
                        );
                        Ok(Reverted::LeftInPlace)
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Reverted::Done),
                Err(e) => Err((op, e.into())),
            },
        }
    }

    /// Prints categorized summary to stdout.
    ///
    /// Paths are relative to `workspace_root` with forward slashes.
    pub fn print_summary(&self, workspace_root: &Path) {
        let mutations: Vec<_> = self
            .operations
            .iter()
            .filter(|op| op.kind.is_mutating())
            .collect();

        if mutations.is_empty() {
            println!("\n{}", "No changes made".yellow());
            return;
        }

        let display_path = |path: &Path| -> String {
            let relative =
                pathdiff::diff_paths(path, workspace_root).unwrap_or_else(|| path.to_path_buf());
            relative.to_string_lossy().replace('\\', "/")
        };

        println!("\n{}", "Changes applied:".green().bold());

        for op in &mutations {
            let line = match (&op.kind, &op.new_path) {
                (OperationKind::Rename, Some(to)) => format!(
                    "{} → {}",
                    display_path(&op.path),
                    display_path(to).green()
                ),
                _ => display_path(&op.path).dimmed().to_string(),
            };
            let tag = match op.kind {
                OperationKind::Write if op.backup.is_some() => "overwrite",
                OperationKind::Write => "create",
                OperationKind::Append => "append",
                OperationKind::Delete => "delete",
                OperationKind::Rename => "rename",
                OperationKind::CreateDir => "mkdir",
                OperationKind::Read | OperationKind::ListDir => continue,
            };
            println!("   {} {:<9} {}", "✓".green(), tag, line);
        }

        println!();
        println!(
            "{} Successfully completed {} operation{} ({})",
            "✓".green().bold(),
            mutations.len(),
            if mutations.len() == 1 { "" } else { "s" },
            self.stats().breakdown()
        );
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Open
            && self.operations.iter().any(|op| op.kind.is_mutating())
        {
            log::warn!("Transaction dropped without commit or rollback; changes kept");
        }
    }
}

/// Statistics about transaction operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub files_written: usize,
    pub entries_deleted: usize,
    pub entries_renamed: usize,
    pub dirs_created: usize,
    pub reads: usize,
    pub backups: usize,
    pub total: usize,
}

impl Transaction {
    /// Returns operation statistics.
    pub fn stats(&self) -> TransactionStats {
        let mut stats = TransactionStats {
            total: self.operations.len(),
            ..TransactionStats::default()
        };

        for op in &self.operations {
            match op.kind {
                OperationKind::Write | OperationKind::Append => stats.files_written += 1,
                OperationKind::Delete => stats.entries_deleted += 1,
                OperationKind::Rename => stats.entries_renamed += 1,
                OperationKind::CreateDir => stats.dirs_created += 1,
                OperationKind::Read | OperationKind::ListDir => stats.reads += 1,
            }
            if op.backup.is_some() {
                stats.backups += 1;
            }
        }

        stats
    }
}

impl TransactionStats {
    /// Comma-separated counts of the mutations, skipping zero categories.
    pub fn breakdown(&self) -> String {
        let dirs = if self.dirs_created == 1 {
            "directory created"
        } else {
            "directories created"
        };
        let parts = [
            (self.files_written, "written"),
            (self.entries_deleted, "deleted"),
            (self.entries_renamed, "renamed"),
            (self.dirs_created, dirs),
        ];
        let shown: Vec<String> = parts
            .into_iter()
            .filter(|(count, _)| *count > 0)
            .map(|(count, label)| format!("{count} {label}"))
            .collect();

        if shown.is_empty() {
            "no changes".to_string()
        } else {
            shown.join(", ")
        }
    }
}

/// Best-effort removal of directories an operation created, innermost first.
pub(crate) fn remove_created_dirs(created: &[PathBuf]) {
    for dir in created.iter().rev() {
        if let Err(e) = fs::remove_dir(dir) {
            log::warn!("Failed to remove created directory {}: {}", dir.display(), e);
        }
    }
}

/// Moves a file or tree, falling back to copy + delete across filesystems.
pub(crate) fn move_entry(from: &Path, to: &Path) -> io::Result<()> {
    if is_same_filesystem(from, to)? {
        fs::rename(from, to)
    } else {
        copy_entry(from, to)?;
        remove_entry(from)
    }
}

/// Checks if paths are on same filesystem.
///
/// Determines if atomic `rename()` is possible, or if cross-filesystem
/// copy+delete is required.
fn is_same_filesystem(path1: &Path, path2: &Path) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let meta1 = fs::symlink_metadata(path1)?;
        let meta2_parent = path2.parent().unwrap_or(path2);
        let meta2 = fs::metadata(meta2_parent)?;
        Ok(meta1.dev() == meta2.dev())
    }

    #[cfg(not(unix))]
    {
        let path1_str = path1.to_string_lossy();
        let path2_str = path2.to_string_lossy();

        if path1_str.len() >= 2 && path2_str.len() >= 2 {
            Ok(path1_str.chars().next() == path2_str.chars().next())
        } else {
            Ok(true)
        }
    }
}
