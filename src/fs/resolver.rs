//! Containment checks against the workspace allow-list.
//!
//! Every candidate path is checked twice:
//!
//! 1. **Normalized**: `~` expanded, made absolute, `.` and `..` folded
//!    lexically. No symlinks are followed.
//! 2. **Real**: every symlink resolved, including dangling ones and the
//!    ancestors of paths that do not exist yet.
//!
//! Both forms must sit under an allowed root. Containment is component-wise,
//! so `/workspace-evil` is never inside `/workspace`.

use crate::error::{Result, WorkspaceError};

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Upper bound on symlink hops while resolving dangling links.
const MAX_SYMLINK_HOPS: u32 = 40;

/// A directory under which operations are permitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoot {
    normalized: PathBuf,
    real: PathBuf,
}

impl AllowedRoot {
    /// Root as configured, expanded and made absolute.
    pub fn path(&self) -> &Path {
        &self.normalized
    }

    /// Root with symlinks resolved.
    pub fn real_path(&self) -> &Path {
        &self.real
    }
}

/// Both forms of a validated path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute, lexically normalized. Used for namespace operations
    /// (delete, rename, mkdir) so a symlink is treated as an entry.
    pub normalized: PathBuf,
    /// Fully resolved. Used for content operations so writes through a
    /// symlink back up the file they actually change.
    pub real: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    roots: Vec<AllowedRoot>,
}

impl PathResolver {
    /// Builds a resolver for `primary` plus any extra roots.
    ///
    /// Relative roots are taken from the current directory. Duplicates (by
    /// normalized form) are dropped, keeping the first occurrence.
    pub fn new<P, I, Q>(primary: P, extra: I) -> Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = Q>,
        Q: AsRef<Path>,
    {
        let cwd = std::env::current_dir()?;
        let mut roots: Vec<AllowedRoot> = Vec::new();

        for raw in std::iter::once(primary.as_ref().to_path_buf())
            .chain(extra.into_iter().map(|p| p.as_ref().to_path_buf()))
        {
            let normalized = normalize_lexically(&make_absolute(&expand_home(&raw)?, &cwd));
            if roots.iter().any(|r| r.normalized == normalized) {
                log::debug!("Skipping duplicate root: {}", normalized.display());
                continue;
            }
            let real = resolve_real(&normalized)?;
            log::debug!(
                "Allowed root: {} (real: {})",
                normalized.display(),
                real.display()
            );
            roots.push(AllowedRoot { normalized, real });
        }

        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[AllowedRoot] {
        &self.roots
    }

    /// The first configured root. Relative candidates are joined onto it.
    pub fn primary(&self) -> &AllowedRoot {
        // `new` always pushes the primary root first
        &self.roots[0]
    }

    /// Expands `~` and makes `raw` absolute against the primary root,
    /// without touching the filesystem.
    pub fn normalize(&self, raw: impl AsRef<Path>) -> Result<PathBuf> {
        let expanded = expand_home(raw.as_ref())?;
        Ok(normalize_lexically(&make_absolute(
            &expanded,
            &self.primary().normalized,
        )))
    }

    /// Validates `raw`, returning its normalized form.
    ///
    /// # Errors
    ///
    /// `SecurityViolation` if either the normalized or the real form falls
    /// outside every allowed root.
    pub fn validate(&self, raw: impl AsRef<Path>) -> Result<PathBuf> {
        self.resolve(raw).map(|resolved| resolved.normalized)
    }

    /// Validates `raw`, returning both its normalized and real forms.
    pub fn resolve(&self, raw: impl AsRef<Path>) -> Result<ResolvedPath> {
        let raw = raw.as_ref();
        let normalized = self.normalize(raw)?;

        if !self.roots.iter().any(|r| normalized.starts_with(&r.normalized)) {
            log::warn!(
                "Attempted access to unauthorized path: {}",
                normalized.display()
            );
            return Err(WorkspaceError::security(
                raw,
                "path is outside the allowed workspace",
            ));
        }

        let real = resolve_real(&normalized)?;
        if !self.roots.iter().any(|r| real.starts_with(&r.real)) {
            log::warn!(
                "Attempted access to path that resolves outside workspace: {} -> {}",
                normalized.display(),
                real.display()
            );
            return Err(WorkspaceError::security(
                raw,
                format!(
                    "path resolves to {} outside the allowed workspace",
                    real.display()
                ),
            ));
        }

        Ok(ResolvedPath { normalized, real })
    }

    /// Returns `path` relative to the allowed root that contains it.
    pub fn relative_to_workspace(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let normalized = self.normalize(path)?;

        self.roots
            .iter()
            .find_map(|root| normalized.strip_prefix(&root.normalized).ok())
            .map(Path::to_path_buf)
            .ok_or_else(|| WorkspaceError::security(path, "path is outside the allowed workspace"))
    }

    /// True if `normalized` is exactly one of the allowed roots.
    pub fn is_root(&self, normalized: &Path) -> bool {
        self.roots.iter().any(|r| r.normalized == normalized)
    }
}

/// Expands a leading `~` or `~/` to the home directory.
///
/// `~user` forms are left as-is.
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let home = dirs::home_dir().ok_or_else(|| {
                WorkspaceError::InvalidOperation(format!(
                    "cannot expand '{}': home directory is unknown",
                    path.display()
                ))
            })?;
            Ok(home.join(components.as_path()))
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn make_absolute(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Folds `.` and `..` without filesystem access.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() && !path.is_absolute() {
                    normalized.push("..");
                }
            }
            Component::CurDir => {}
            comp => normalized.push(comp),
        }
    }

    normalized
}

/// Resolves every symlink in an absolute, normalized path.
///
/// The longest existing ancestor is canonicalized and the missing tail is
/// appended. A dangling symlink is followed through `read_link`, so a link
/// to a not-yet-existing file outside the workspace still resolves outside.
pub fn resolve_real(path: &Path) -> Result<PathBuf> {
    resolve_real_inner(path, 0)
}

fn resolve_real_inner(path: &Path, hops: u32) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        match fs::symlink_metadata(&existing) {
            Ok(meta) => {
                let base = if meta.file_type().is_symlink() {
                    match dunce::canonicalize(&existing) {
                        Ok(target) => target,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            follow_dangling(&existing, hops)?
                        }
                        Err(e) => return Err(e.into()),
                    }
                } else {
                    dunce::canonicalize(&existing)?
                };

                return Ok(missing
                    .iter()
                    .rev()
                    .fold(base, |acc, name| acc.join(name)));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    // Nothing on the path exists, not even the filesystem root
                    _ => return Ok(path.to_path_buf()),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn follow_dangling(link: &Path, hops: u32) -> Result<PathBuf> {
    if hops >= MAX_SYMLINK_HOPS {
        return Err(WorkspaceError::security(link, "too many levels of symbolic links"));
    }

    let target = fs::read_link(link)?;
    let parent = match link.parent() {
        Some(parent) => dunce::canonicalize(parent)?,
        None => PathBuf::from(Component::RootDir.as_os_str()),
    };

    resolve_real_inner(&normalize_lexically(&parent.join(target)), hops + 1)
}
