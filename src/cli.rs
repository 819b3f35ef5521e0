use crate::command::BrokerCommand;
use crate::config::{DEFAULT_CONFIG_PATH, WorkspaceConfig};
use crate::error::{Result, WorkspaceError};
use crate::fs::resolver::expand_home;

use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "workspace-broker", version, about)]
/// Sandboxed, transactional file operations confined to allowed roots.
pub struct BrokerCli {
    /// Config file [default: ~/.workspace-broker/config.toml, if present]
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Primary workspace root, overriding the config
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<String>,

    /// Additional allowed root (repeatable)
    #[arg(long, global = true, value_name = "DIR")]
    pub allow: Vec<String>,

    /// Skip the interactive confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: BrokerCommand,
}

impl BrokerCli {
    /// Builds the effective config: file first, then command-line overrides.
    pub fn workspace_config(&self) -> Result<WorkspaceConfig> {
        let mut config = match &self.config {
            Some(path) => Some(WorkspaceConfig::load(path)?),
            None => {
                let default = expand_home(Path::new(DEFAULT_CONFIG_PATH))?;
                if default.is_file() {
                    Some(WorkspaceConfig::load(&default)?)
                } else {
                    log::debug!("No config at {}", default.display());
                    None
                }
            }
        };

        if let Some(root) = &self.root {
            config = Some(match config {
                Some(mut config) => {
                    config.root_path = root.clone();
                    config
                }
                None => WorkspaceConfig::new(root.clone()),
            });
        }

        let mut config = config.ok_or_else(|| {
            WorkspaceError::Config(format!(
                "no workspace root: pass --root or create {}",
                DEFAULT_CONFIG_PATH
            ))
        })?;

        config.allowed_paths.extend(self.allow.iter().cloned());
        config.validate()?;
        Ok(config)
    }
}

/// Initialises `env_logger`. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}
