//! Workspace configuration.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [workspace]
//! root_path = "~/ai_workspace"
//! allowed_paths = ["~/projects"]
//!
//! [security]
//! require_confirmation_for_writes = true
//! audit_log_path = "~/.workspace-broker/audit.jsonl"
//! ```

use crate::error::{Result, WorkspaceError};

use std::fs;
use std::path::Path;
use toml_edit::{DocumentMut, Item};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "~/.workspace-broker/config.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Primary root. Relative paths given to the manager resolve against it.
    pub root_path: String,
    /// Extra roots beyond the primary one.
    pub allowed_paths: Vec<String>,
    pub require_confirmation_for_writes: bool,
    /// JSON-lines audit file, if any.
    pub audit_log_path: Option<String>,
}

impl WorkspaceConfig {
    /// Config for a single root, with write confirmation required.
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            allowed_paths: Vec::new(),
            require_confirmation_for_writes: true,
            audit_log_path: None,
        }
    }

    pub fn allow(mut self, path: impl Into<String>) -> Self {
        self.allowed_paths.push(path.into());
        self
    }

    pub fn require_confirmation(mut self, required: bool) -> Self {
        self.require_confirmation_for_writes = required;
        self
    }

    pub fn audit_log(mut self, path: impl Into<String>) -> Self {
        self.audit_log_path = Some(path.into());
        self
    }

    /// Reads and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            log::error!("Failed to read config {}: {}", path.display(), e);
            WorkspaceError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config {}: {}", path.display(), e),
            ))
        })?;

        let config = Self::from_toml(&content)?;
        log::info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parses and validates config text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let doc: DocumentMut = content.parse()?;

        let workspace = doc
            .get("workspace")
            .ok_or_else(|| WorkspaceError::Config("missing [workspace] section".into()))?;

        let root_path = workspace
            .get("root_path")
            .ok_or_else(|| WorkspaceError::Config("missing workspace.root_path".into()))
            .and_then(|item| expect_str(item, "workspace.root_path"))?;

        let allowed_paths = match workspace.get("allowed_paths") {
            Some(item) => expect_str_array(item, "workspace.allowed_paths")?,
            None => Vec::new(),
        };

        let security = doc.get("security");
        let require_confirmation_for_writes =
            match security.and_then(|s| s.get("require_confirmation_for_writes")) {
                Some(item) => item.as_bool().ok_or_else(|| {
                    WorkspaceError::Config(
                        "security.require_confirmation_for_writes must be a boolean".into(),
                    )
                })?,
                None => true,
            };

        let audit_log_path = match security.and_then(|s| s.get("audit_log_path")) {
            Some(item) => Some(expect_str(item, "security.audit_log_path")?),
            None => None,
        };

        let config = Self {
            root_path,
            allowed_paths,
            require_confirmation_for_writes,
            audit_log_path,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_path.trim().is_empty() {
            return Err(WorkspaceError::Config("root_path must not be empty".into()));
        }
        if self.allowed_paths.iter().any(|p| p.trim().is_empty()) {
            return Err(WorkspaceError::Config(
                "allowed_paths must not contain empty entries".into(),
            ));
        }
        if self
            .audit_log_path
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(WorkspaceError::Config(
                "audit_log_path must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn expect_str(item: &Item, key: &str) -> Result<String> {
    item.as_str()
        .map(str::to_string)
        .ok_or_else(|| WorkspaceError::Config(format!("{key} must be a string")))
}

fn expect_str_array(item: &Item, key: &str) -> Result<Vec<String>> {
    let array = item
        .as_array()
        .ok_or_else(|| WorkspaceError::Config(format!("{key} must be an array of strings")))?;

    array
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| WorkspaceError::Config(format!("{key} must be an array of strings")))
        })
        .collect()
}
