//! Error types for workspace-broker.
//!
//! All operations return `Result<T>` which aliases `Result<T, WorkspaceError>`.

use crate::fs::TransactionState;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Path escapes every allowed root, either syntactically or through a symlink.
    #[error("Security violation for '{}': {}", .0.display(), .1)]
    SecurityViolation(PathBuf, String),

    /// Operation requires an existing target that is absent.
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Operation is not valid for the current state of the target.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Confirmation was refused.
    ///
    /// Policy decision, never retried.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transaction is no longer open.
    #[error("Transaction is {0}")]
    TransactionClosed(TransactionState),

    /// One or more entries could not be reverted.
    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    /// Invalid configuration or plan file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml_edit::TomlError),

    /// Invalid glob pattern.
    #[error("Pattern error: {0}")]
    Pattern(#[from] ignore::Error),

    /// Unexpected error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkspaceError {
    /// Stable taxonomy name, used in log lines and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkspaceError::SecurityViolation(..) => "SecurityViolation",
            WorkspaceError::NotFound(_) => "NotFound",
            WorkspaceError::InvalidOperation(_) => "InvalidOperation",
            WorkspaceError::PermissionDenied(_) => "PermissionDenied",
            WorkspaceError::TransactionClosed(_) => "TransactionClosed",
            WorkspaceError::RollbackFailed(_) => "RollbackFailed",
            WorkspaceError::Config(_) | WorkspaceError::Toml(_) => "Config",
            WorkspaceError::Pattern(_) => "InvalidOperation",
            WorkspaceError::Io(_) => "IOFailure",
            WorkspaceError::Other(_) => "Other",
        }
    }

    /// True for policy failures that must reach the caller unchanged.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            WorkspaceError::SecurityViolation(..) | WorkspaceError::PermissionDenied(_)
        )
    }

    pub(crate) fn security(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        WorkspaceError::SecurityViolation(path.into(), reason.into())
    }
}

/// Result type alias for workspace-broker operations.
pub type Result<T> = std::result::Result<T, WorkspaceError>;
