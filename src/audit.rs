//! Audit trail of attempted and reverted operations.
//!
//! Sinks are best-effort: the manager logs a sink failure and carries on.

use crate::fs::OperationKind;

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Attempted,
    Succeeded,
    Failed { kind: String },
    /// Confirmation refused.
    Denied,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub operation: OperationKind,
    pub path: PathBuf,
    pub outcome: Outcome,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl AuditEvent {
    pub fn new(operation: OperationKind, path: impl Into<PathBuf>, outcome: Outcome) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            operation,
            path: path.into(),
            outcome,
            timestamp,
        }
    }
}

/// Receives structured audit events.
pub trait AuditSink {
    fn record(&self, event: &AuditEvent) -> io::Result<()>;
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        (**self).record(event)
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Box<S> {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        (**self).record(event)
    }
}

/// Emits events through `log` on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        match &event.outcome {
            Outcome::Failed { kind } => log::warn!(
                target: "audit",
                "{} {} failed: {}",
                event.operation,
                event.path.display(),
                kind
            ),
            Outcome::Denied => log::warn!(
                target: "audit",
                "{} {} denied",
                event.operation,
                event.path.display()
            ),
            outcome => log::info!(
                target: "audit",
                "{} {} {:?}",
                event.operation,
                event.path.display(),
                outcome
            ),
        }
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditSink {
    /// Opens `path` for appending, creating it and its parents.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        let mut line = serde_json::to_string(event).map_err(io::Error::other)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("audit file lock poisoned"))?;
        file.write_all(line.as_bytes())
    }
}

/// Keeps events in memory. Handy for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        self.events
            .lock()
            .map_err(|_| io::Error::other("audit buffer lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
