//! The public façade over a confined, transactional workspace.
//!
//! Every operation runs to completion before returning:
//!
//! 1. **Validate** each path against the allowed roots
//! 2. **Check** preconditions (existence, overwrite flag)
//! 3. **Confirm** write-class operations, if configured
//! 4. **Back up** anything about to be destroyed
//! 5. **Mutate**, undoing this single step if it fails halfway
//! 6. **Record** the applied step into the caller's [`Transaction`]

use crate::audit::{AuditEvent, AuditSink, JsonlAuditSink, LogAuditSink, Outcome};
use crate::config::WorkspaceConfig;
use crate::confirm::{ConfirmationProvider, TerminalPrompt};
use crate::error::{Result, WorkspaceError};
use crate::fs::backup::remove_entry;
use crate::fs::resolver::expand_home;
use crate::fs::transaction::{move_entry, remove_created_dirs};
use crate::fs::{
    AllowedRoot, BackupHandle, FileOperation, OperationKind, PathResolver, RollbackReport,
    Transaction,
};

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sandboxed file operations over a set of allowed roots.
///
/// # Concurrency
///
/// One logical actor per workspace. No locking is performed: running two
/// managers over the same roots, or changing the workspace from outside
/// while a transaction is open, leaves rollback results undefined. Keeping
/// that from happening is the caller's responsibility.
pub struct WorkspaceManager {
    resolver: PathResolver,
    require_confirmation: bool,
    confirmation: Box<dyn ConfirmationProvider>,
    audit: Box<dyn AuditSink>,
}

impl WorkspaceManager {
    /// Creates missing roots and builds the manager.
    ///
    /// Confirmation defaults to an interactive [`TerminalPrompt`]; audit
    /// events go to the JSON-lines file named in the config, or to `log`.
    pub fn new(config: WorkspaceConfig) -> Result<Self> {
        config.validate()?;

        let roots = std::iter::once(&config.root_path)
            .chain(&config.allowed_paths)
            .map(|raw| expand_home(Path::new(raw)))
            .collect::<Result<Vec<_>>>()?;

        for root in &roots {
            if !root.exists() {
                fs::create_dir_all(root)?;
                log::info!("Created workspace directory: {}", root.display());
            } else if !root.is_dir() {
                return Err(WorkspaceError::Config(format!(
                    "allowed root is not a directory: {}",
                    root.display()
                )));
            }
        }

        let resolver = PathResolver::new(&roots[0], &roots[1..])?;

        let audit: Box<dyn AuditSink> = match &config.audit_log_path {
            Some(path) => Box::new(JsonlAuditSink::open(expand_home(Path::new(path))?)?),
            None => Box::new(LogAuditSink),
        };

        Ok(Self {
            resolver,
            require_confirmation: config.require_confirmation_for_writes,
            confirmation: Box::new(TerminalPrompt),
            audit,
        })
    }

    pub fn with_confirmation(mut self, provider: impl ConfirmationProvider + 'static) -> Self {
        self.confirmation = Box::new(provider);
        self
    }

    pub fn with_audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Box::new(sink);
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn roots(&self) -> &[AllowedRoot] {
        self.resolver.roots()
    }

    pub fn primary_root(&self) -> &Path {
        self.resolver.primary().path()
    }

    pub fn relative_to_workspace(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        self.resolver.relative_to_workspace(path)
    }

    /// Opens a fresh transaction.
    pub fn begin(&self) -> Transaction {
        Transaction::new()
    }

    /// Reads a whole file.
    pub fn read(&self, txn: &mut Transaction, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let raw = path.as_ref();
        self.audited(OperationKind::Read, raw, || {
            txn.ensure_open()?;
            let resolved = self.resolver.resolve(raw)?;

            let meta = existing_metadata(&resolved.real, &resolved.normalized)?;
            if meta.is_dir() {
                return Err(WorkspaceError::InvalidOperation(format!(
                    "{} is a directory",
                    resolved.normalized.display()
                )));
            }

            let data = fs::read(&resolved.real)?;
            log::info!("Read {} bytes from {}", data.len(), resolved.real.display());
            txn.record(FileOperation::read(resolved.real))?;
            Ok(data)
        })
    }

    /// Reads a whole file as UTF-8.
    pub fn read_to_string(&self, txn: &mut Transaction, path: impl AsRef<Path>) -> Result<String> {
        let raw = path.as_ref();
        let data = self.read(txn, raw)?;
        String::from_utf8(data).map_err(|_| {
            WorkspaceError::InvalidOperation(format!("{} is not valid UTF-8", raw.display()))
        })
    }

    /// Writes `content`, creating the file and any missing parents.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the target exists and `overwrite` is false, or
    /// if it is a directory.
    pub fn write(
        &self,
        txn: &mut Transaction,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        overwrite: bool,
    ) -> Result<()> {
        let raw = path.as_ref();
        let content = content.as_ref();

        self.audited(OperationKind::Write, raw, || {
            txn.ensure_open()?;
            let target = self.resolver.resolve(raw)?.real;

            match fs::symlink_metadata(&target) {
                Ok(meta) if meta.is_dir() => {
                    return Err(WorkspaceError::InvalidOperation(format!(
                        "{} is a directory",
                        target.display()
                    )));
                }
                Ok(_) if !overwrite => {
                    return Err(WorkspaceError::InvalidOperation(format!(
                        "{} already exists and overwrite was not requested",
                        target.display()
                    )));
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            self.confirm(format!(
                "Write {} bytes to {}?",
                content.len(),
                target.display()
            ))?;

            let (parents, backup) = prepare_target(txn, &target)?;
            let result = fs::write(&target, content);

            self.finish(
                txn,
                parents,
                FileOperation::write(target, content.to_vec(), backup),
                result,
            )
        })
    }

    /// Appends `content`, creating the file and any missing parents.
    pub fn append(
        &self,
        txn: &mut Transaction,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
    ) -> Result<()> {
        let raw = path.as_ref();
        let content = content.as_ref();

        self.audited(OperationKind::Append, raw, || {
            txn.ensure_open()?;
            let target = self.resolver.resolve(raw)?.real;

            if target.is_dir() {
                return Err(WorkspaceError::InvalidOperation(format!(
                    "{} is a directory",
                    target.display()
                )));
            }

            self.confirm(format!(
                "Append {} bytes to {}?",
                content.len(),
                target.display()
            ))?;

            let (parents, backup) = prepare_target(txn, &target)?;
            let result = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&target)
                .and_then(|mut file| file.write_all(content));

            self.finish(
                txn,
                parents,
                FileOperation::append(target, content.to_vec(), backup),
                result,
            )
        })
    }

    /// Removes a file, symlink or whole directory tree.
    pub fn delete(&self, txn: &mut Transaction, path: impl AsRef<Path>) -> Result<()> {
        let raw = path.as_ref();

        self.audited(OperationKind::Delete, raw, || {
            txn.ensure_open()?;
            let target = self.resolver.resolve(raw)?.normalized;

            if self.resolver.is_root(&target) {
                return Err(WorkspaceError::InvalidOperation(format!(
                    "refusing to delete allowed root {}",
                    target.display()
                )));
            }

            existing_metadata_no_follow(&target)?;
            self.confirm(format!("Delete {}?", target.display()))?;

            let backup = txn
                .backup(&target)?
                .ok_or_else(|| WorkspaceError::NotFound(target.clone()))?;
            let result = remove_entry(&target);

            self.finish(txn, Vec::new(), FileOperation::delete(target, backup), result)
        })
    }

    /// Moves `from` to `to`, replacing (after backing up) anything at `to`.
    pub fn rename(
        &self,
        txn: &mut Transaction,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> Result<()> {
        let raw = from.as_ref();
        let raw_to = to.as_ref();

        self.audited(OperationKind::Rename, raw, || {
            txn.ensure_open()?;
            let from = self.resolver.resolve(raw)?.normalized;
            let to = self.resolver.resolve(raw_to)?.normalized;

            for endpoint in [&from, &to] {
                if self.resolver.is_root(endpoint) {
                    return Err(WorkspaceError::InvalidOperation(format!(
                        "refusing to rename allowed root {}",
                        endpoint.display()
                    )));
                }
            }

            existing_metadata_no_follow(&from)?;
            if from == to {
                return Err(WorkspaceError::InvalidOperation(format!(
                    "{} cannot be renamed onto itself",
                    from.display()
                )));
            }
            if to.starts_with(&from) {
                return Err(WorkspaceError::InvalidOperation(format!(
                    "cannot move {} into its own subtree {}",
                    from.display(),
                    to.display()
                )));
            }

            self.confirm(format!("Rename {} to {}?", from.display(), to.display()))?;

            let (parents, backup) = prepare_target(txn, &to)?;
            let replaces = backup.is_some();
            let result = (|| {
                if replaces {
                    remove_entry(&to)?;
                }
                move_entry(&from, &to)
            })();

            // A cross-device move can fail after a partial copy
            if result.is_err() && fs::symlink_metadata(&from).is_ok() {
                if let Err(e) = remove_entry(&to) {
                    log::error!("Failed to clear partial copy {}: {}", to.display(), e);
                }
            }

            self.finish(
                txn,
                parents,
                FileOperation::rename(from, to, backup),
                result,
            )
        })
    }

    /// Creates a directory and any missing parents.
    ///
    /// Each created directory is recorded, so rollback removes them all
    /// (unless untracked content has appeared in them meanwhile).
    pub fn create_dir(&self, txn: &mut Transaction, path: impl AsRef<Path>) -> Result<()> {
        let raw = path.as_ref();

        self.audited(OperationKind::CreateDir, raw, || {
            txn.ensure_open()?;
            let target = self.resolver.resolve(raw)?.normalized;

            if fs::symlink_metadata(&target).is_ok() {
                return Err(WorkspaceError::InvalidOperation(format!(
                    "{} already exists",
                    target.display()
                )));
            }

            self.confirm(format!("Create directory {}?", target.display()))?;

            let mut created = create_missing_parents(&target)?;
            if let Err(e) = fs::create_dir(&target) {
                remove_created_dirs(&created);
                return Err(e.into());
            }
            created.push(target.clone());

            for dir in created {
                txn.record(FileOperation::create_dir(dir))?;
            }
            log::info!("Created directory {}", target.display());
            Ok(())
        })
    }

    /// Lists directory entries matching a glob (`*` when `None`).
    ///
    /// Patterns containing `/` or `**` descend into subdirectories. Results
    /// are sorted. Nothing is recorded in any transaction.
    pub fn list_dir(&self, path: impl AsRef<Path>, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
        let raw = path.as_ref();

        self.audited(OperationKind::ListDir, raw, || {
            let dir = self.resolver.resolve(raw)?.normalized;

            if !existing_metadata(&dir, &dir)?.is_dir() {
                return Err(WorkspaceError::InvalidOperation(format!(
                    "Not a directory: {}",
                    dir.display()
                )));
            }

            let pattern = pattern.unwrap_or("*");
            let mut builder = OverrideBuilder::new(&dir);
            builder.add(pattern)?;
            let matcher = builder.build()?;

            let recursive = pattern.contains('/') || pattern.contains("**");
            let walker = WalkBuilder::new(&dir)
                .standard_filters(false)
                .follow_links(false)
                .max_depth(if recursive { None } else { Some(1) })
                .build();

            let mut entries = Vec::new();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        return Err(match err.io_error() {
                            Some(io_err) => {
                                WorkspaceError::Io(io::Error::new(io_err.kind(), err.to_string()))
                            }
                            None => err.into(),
                        });
                    }
                };
                if entry.depth() == 0 {
                    continue;
                }

                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                if matcher.matched(entry.path(), is_dir).is_whitelist() {
                    entries.push(entry.into_path());
                }
            }

            entries.sort();
            log::info!(
                "Listed {} entries in {} matching '{}'",
                entries.len(),
                dir.display(),
                pattern
            );
            Ok(entries)
        })
    }

    /// Commits `txn`, keeping every change.
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        let count = txn.len();
        txn.commit()?;
        log::info!("Committed {} operations", count);
        Ok(())
    }

    /// Rolls `txn` back and audits every entry, reverted or not.
    ///
    /// # Errors
    ///
    /// `RollbackFailed` if some entries could not be reverted. Those stay in
    /// `txn`, so calling this again retries only them.
    pub fn rollback(&self, txn: &mut Transaction) -> Result<RollbackReport> {
        let report = txn.rollback_report()?;

        for entry in report.reverted.iter().filter(|e| e.kind.is_mutating()) {
            self.audit(entry.kind, &entry.path, Outcome::RolledBack);
        }
        for failed in &report.failed {
            self.audit(
                failed.kind,
                &failed.path,
                Outcome::Failed {
                    kind: failed.error_kind.to_string(),
                },
            );
        }
        for dir in &report.left_in_place {
            log::warn!(
                "Directory gained untracked content and was kept: {}",
                dir.display()
            );
        }

        report.into_result().inspect_err(|e| {
            log::error!("Rollback incomplete: {}", e);
        })
    }

    fn confirm(&self, message: String) -> Result<()> {
        if !self.require_confirmation {
            return Ok(());
        }

        if self.confirmation.confirm(&message)? {
            Ok(())
        } else {
            log::info!("Operation cancelled: {}", message);
            Err(WorkspaceError::PermissionDenied(message))
        }
    }

    fn audit(&self, operation: OperationKind, path: &Path, outcome: Outcome) {
        if let Err(e) = self
            .audit
            .record(&AuditEvent::new(operation, path, outcome))
        {
            log::warn!("Audit sink failed: {}", e);
        }
    }

    /// Wraps an operation with attempt, success and failure events.
    fn audited<T>(
        &self,
        kind: OperationKind,
        path: &Path,
        op: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.audit(kind, path, Outcome::Attempted);

        match op() {
            Ok(value) => {
                self.audit(kind, path, Outcome::Succeeded);
                Ok(value)
            }
            Err(e) => {
                if e.is_policy() {
                    log::warn!("{} {} refused [{}]: {}", kind, path.display(), e.kind(), e);
                } else {
                    log::error!("{} {} failed [{}]: {}", kind, path.display(), e.kind(), e);
                }
                let outcome = match e {
                    WorkspaceError::PermissionDenied(_) => Outcome::Denied,
                    _ => Outcome::Failed {
                        kind: e.kind().to_string(),
                    },
                };
                self.audit(kind, path, outcome);
                Err(e)
            }
        }
    }

    /// Records a completed mutation, or undoes it if it failed.
    fn finish(
        &self,
        txn: &mut Transaction,
        parents: Vec<PathBuf>,
        op: FileOperation,
        result: io::Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                for dir in parents {
                    txn.record(FileOperation::create_dir(dir))?;
                }
                log::info!("Applied {}: {}", op.kind, op.path.display());
                txn.record(op)
            }
            Err(e) => {
                log::error!(
                    "{} {} failed: {}; undoing this step",
                    op.kind,
                    op.path.display(),
                    e
                );
                if let Err(undo_err) = txn.undo_unrecorded(op, parents) {
                    log::error!("Step left for rollback: {}", undo_err);
                }
                Err(e.into())
            }
        }
    }
}

/// Metadata of an existing path, following symlinks.
fn existing_metadata(path: &Path, shown: &Path) -> Result<fs::Metadata> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(WorkspaceError::NotFound(shown.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn existing_metadata_no_follow(path: &Path) -> Result<fs::Metadata> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(WorkspaceError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Creates the missing ancestors of `path`, outermost first.
///
/// Returns the directories created, in creation order. On failure, any
/// already created are removed again.
fn create_missing_parents(path: &Path) -> Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if fs::symlink_metadata(dir).is_ok() {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }
    missing.reverse();

    let mut created = Vec::with_capacity(missing.len());
    for dir in missing {
        if let Err(e) = fs::create_dir(&dir) {
            remove_created_dirs(&created);
            return Err(e.into());
        }
        log::debug!("Created parent directory {}", dir.display());
        created.push(dir);
    }

    Ok(created)
}

/// Creates the missing parents of `target`, then backs up whatever is there.
///
/// If the backup fails, the parents just created are removed again.
fn prepare_target(
    txn: &mut Transaction,
    target: &Path,
) -> Result<(Vec<PathBuf>, Option<BackupHandle>)> {
    let parents = create_missing_parents(target)?;
    match txn.backup(target) {
        Ok(backup) => Ok((parents, backup)),
        Err(e) => {
            remove_created_dirs(&parents);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::confirm::{AlwaysDeny, AutoApprove};
    use crate::fs::TransactionState;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> WorkspaceManager {
        let config = WorkspaceConfig::new(temp.path().to_string_lossy())
            .require_confirmation(false);
        WorkspaceManager::new(config).unwrap()
    }

    #[test]
    fn test_new_creates_missing_roots() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("ws");
        let extra = temp.path().join("extra/nested");

        let config = WorkspaceConfig::new(root.to_string_lossy())
            .allow(extra.to_string_lossy())
            .require_confirmation(false);
        let ws = WorkspaceManager::new(config).unwrap();

        assert!(root.is_dir());
        assert!(extra.is_dir());
        assert_eq!(ws.roots().len(), 2);
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        ws.write(&mut txn, "a.txt", "hello", false).unwrap();
        assert_eq!(ws.read_to_string(&mut txn, "a.txt").unwrap(), "hello");
        assert_eq!(txn.len(), 2);
        ws.commit(&mut txn).unwrap();
    }

    #[test]
    fn test_write_without_overwrite_fails() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "original").unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        let err = ws.write(&mut txn, "a.txt", "new", false).unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidOperation(_)));
        assert!(txn.is_empty());
        assert_eq!(
            fs::read_to_string(temp.path().join("a.txt")).unwrap(),
            "original"
        );
    }

    #[test]
    fn test_write_creates_parents_and_rollback_removes_them() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        ws.write(&mut txn, "x/y/z.txt", "deep", false).unwrap();
        assert!(temp.path().join("x/y/z.txt").is_file());
        assert_eq!(txn.stats().dirs_created, 2);

        ws.rollback(&mut txn).unwrap();
        assert!(!temp.path().join("x").exists());
    }

    #[test]
    fn test_append_backs_up_existing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("log.txt"), "one\n").unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        ws.append(&mut txn, "log.txt", "two\n").unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("log.txt")).unwrap(),
            "one\ntwo\n"
        );

        ws.rollback(&mut txn).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("log.txt")).unwrap(),
            "one\n"
        );
    }

    #[test]
    fn test_append_creates_missing_file() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        ws.append(&mut txn, "new.log", "first").unwrap();
        assert!(txn.operations()[0].backup.is_none());

        ws.rollback(&mut txn).unwrap();
        assert!(!temp.path().join("new.log").exists());
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        let err = ws.read(&mut txn, "missing.txt").unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        let err = ws.delete(&mut txn, "missing.txt").unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
    }

    #[test]
    fn test_delete_root_refused() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        let err = ws.delete(&mut txn, temp.path()).unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidOperation(_)));
        assert!(temp.path().exists());
    }

    #[test]
    fn test_create_dir_existing_fails() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        let err = ws.create_dir(&mut txn, "dir").unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidOperation(_)));
    }

    #[test]
    fn test_create_dir_records_every_level() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        ws.create_dir(&mut txn, "a/b/c").unwrap();
        assert_eq!(txn.len(), 3);
        assert!(txn.operations().iter().all(|op| op.backup.is_none()));

        ws.rollback(&mut txn).unwrap();
        assert!(!temp.path().join("a").exists());
    }

    #[test]
    fn test_rename_into_itself_refused() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        let err = ws.rename(&mut txn, "dir", "dir/inner").unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidOperation(_)));
        let err = ws.rename(&mut txn, "dir", "dir").unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidOperation(_)));
    }

    #[test]
    fn test_rename_missing_source() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        let err = ws.rename(&mut txn, "nope.txt", "b.txt").unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
    }

    #[test]
    fn test_list_dir_patterns() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src/nested")).unwrap();
        fs::write(temp.path().join("a.py"), "").unwrap();
        fs::write(temp.path().join("b.txt"), "").unwrap();
        fs::write(temp.path().join("src/c.py"), "").unwrap();
        fs::write(temp.path().join("src/nested/d.py"), "").unwrap();
        let ws = manager(&temp);

        let all = ws.list_dir(".", None).unwrap();
        assert_eq!(all.len(), 3);

        let top_py = ws.list_dir(".", Some("*.py")).unwrap();
        assert_eq!(top_py.len(), 1);
        assert!(top_py[0].ends_with("a.py"));

        let every_py = ws.list_dir(".", Some("**/*.py")).unwrap();
        assert_eq!(every_py.len(), 3);
    }

    #[test]
    fn test_list_dir_on_file_fails() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "").unwrap();
        let ws = manager(&temp);

        let err = ws.list_dir("a.txt", None).unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidOperation(_)));
    }

    #[test]
    fn test_confirmation_refused() {
        let temp = TempDir::new().unwrap();
        let config = WorkspaceConfig::new(temp.path().to_string_lossy());
        let ws = WorkspaceManager::new(config)
            .unwrap()
            .with_confirmation(AlwaysDeny);
        let mut txn = ws.begin();

        let err = ws.write(&mut txn, "a.txt", "data", false).unwrap_err();
        assert!(matches!(err, WorkspaceError::PermissionDenied(_)));
        assert!(!temp.path().join("a.txt").exists());
        assert!(txn.is_empty());
        assert!(txn.backup_location().is_none());
    }

    #[test]
    fn test_confirmation_sees_message() {
        let temp = TempDir::new().unwrap();
        let config = WorkspaceConfig::new(temp.path().to_string_lossy());
        let ws = WorkspaceManager::new(config)
            .unwrap()
            .with_confirmation(|message: &str| message.starts_with("Write"));
        let mut txn = ws.begin();

        ws.write(&mut txn, "a.txt", "data", false).unwrap();
        let err = ws.delete(&mut txn, "a.txt").unwrap_err();
        assert!(matches!(err, WorkspaceError::PermissionDenied(_)));
        assert!(temp.path().join("a.txt").exists());
    }

    #[test]
    fn test_reads_not_confirmed() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "data").unwrap();
        let config = WorkspaceConfig::new(temp.path().to_string_lossy());
        let ws = WorkspaceManager::new(config)
            .unwrap()
            .with_confirmation(AlwaysDeny);
        let mut txn = ws.begin();

        assert_eq!(ws.read(&mut txn, "a.txt").unwrap(), b"data");
        assert_eq!(ws.list_dir(".", None).unwrap().len(), 1);
    }

    #[test]
    fn test_closed_transaction_rejected_before_mutation() {
        let temp = TempDir::new().unwrap();
        let ws = manager(&temp).with_confirmation(AutoApprove);
        let mut txn = ws.begin();
        ws.commit(&mut txn).unwrap();

        let err = ws.write(&mut txn, "a.txt", "data", false).unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::TransactionClosed(TransactionState::Committed)
        ));
        assert!(!temp.path().join("a.txt").exists());
    }

    #[test]
    fn test_audit_events() {
        let temp = TempDir::new().unwrap();
        let sink = Arc::new(MemoryAuditSink::new());
        let ws = manager(&temp).with_audit_sink(Arc::clone(&sink));
        let mut txn = ws.begin();

        ws.write(&mut txn, "a.txt", "data", false).unwrap();
        let _ = ws.read(&mut txn, "/etc/passwd");
        ws.rollback(&mut txn).unwrap();

        let outcomes: Vec<_> = sink
            .events()
            .into_iter()
            .map(|e| (e.operation, e.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (OperationKind::Write, Outcome::Attempted),
                (OperationKind::Write, Outcome::Succeeded),
                (OperationKind::Read, Outcome::Attempted),
                (
                    OperationKind::Read,
                    Outcome::Failed {
                        kind: "SecurityViolation".into()
                    }
                ),
                (OperationKind::Write, Outcome::RolledBack),
            ]
        );
    }

    #[test]
    fn test_rollback_audits_failed_entries() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        let sink = Arc::new(MemoryAuditSink::new());
        let ws = manager(&temp).with_audit_sink(Arc::clone(&sink));
        let mut txn = ws.begin();

        ws.write(&mut txn, "c.txt", "c", false).unwrap();
        ws.rename(&mut txn, "a.txt", "moved.txt").unwrap();
        fs::write(temp.path().join("a.txt"), "someone else").unwrap();

        let err = ws.rollback(&mut txn).unwrap_err();
        assert!(matches!(err, WorkspaceError::RollbackFailed(_)));
        assert!(txn.is_open());

        let rollback_events: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| !matches!(e.outcome, Outcome::Attempted | Outcome::Succeeded))
            .map(|e| (e.operation, e.outcome))
            .collect();
        assert_eq!(
            rollback_events,
            vec![
                (OperationKind::Write, Outcome::RolledBack),
                (
                    OperationKind::Rename,
                    Outcome::Failed {
                        kind: "InvalidOperation".into()
                    }
                ),
            ]
        );
        assert!(!temp.path().join("c.txt").exists());
    }

    #[test]
    fn test_prepare_target_cleans_up_when_backup_fails() {
        let temp = TempDir::new().unwrap();
        let mut txn = Transaction::new();
        txn.commit().unwrap();

        let target = temp.path().join("x/y/z.txt");
        let err = prepare_target(&mut txn, &target).unwrap_err();

        assert!(matches!(err, WorkspaceError::TransactionClosed(_)));
        assert!(!temp.path().join("x").exists());
    }

    #[test]
    fn test_prepare_target_creates_parents_before_backup() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        let mut txn = Transaction::new();

        let (parents, backup) = prepare_target(&mut txn, &temp.path().join("a.txt")).unwrap();
        assert!(parents.is_empty());
        assert!(backup.is_some());

        let (parents, backup) = prepare_target(&mut txn, &temp.path().join("n/m/b.txt")).unwrap();
        assert_eq!(parents, vec![temp.path().join("n"), temp.path().join("n/m")]);
        assert!(backup.is_none());
        txn.commit().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_internal_symlink_restores_target() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("real.txt"), "original").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real.txt"), temp.path().join("alias.txt"))
            .unwrap();
        let ws = manager(&temp);
        let mut txn = ws.begin();

        ws.write(&mut txn, "alias.txt", "changed", true).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("real.txt")).unwrap(),
            "changed"
        );

        ws.rollback(&mut txn).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("real.txt")).unwrap(),
            "original"
        );
        assert!(
            fs::symlink_metadata(temp.path().join("alias.txt"))
                .unwrap()
                .file_type()
                .is_symlink()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_is_undone() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

        // Root ignores permission bits; nothing to observe then
        if fs::write(locked.join("check"), "").is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o700)).unwrap();
            return;
        }

        let ws = manager(&temp);
        let mut txn = ws.begin();
        let err = ws.write(&mut txn, "locked/sub/file.txt", "data", false);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o700)).unwrap();

        assert!(matches!(err.unwrap_err(), WorkspaceError::Io(_)));
        assert!(txn.is_empty());
        assert!(!locked.join("sub").exists());
    }
}
