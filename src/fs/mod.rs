//! Confinement, backups and transactional bookkeeping for file operations.

pub mod backup;
pub mod resolver;
pub mod transaction;

pub use backup::{BackupHandle, BackupStore, EntryKind};
pub use resolver::{AllowedRoot, PathResolver, ResolvedPath};
pub use transaction::{
    FailedRevert, FileOperation, OperationKind, RevertedEntry, RollbackReport, Transaction,
    TransactionState, TransactionStats,
};
