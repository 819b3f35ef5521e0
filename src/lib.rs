#![doc = include_str!("../README.md")]

pub mod audit;
pub mod cli;
pub mod command;
pub mod config;
pub mod confirm;
pub mod error;
pub mod fs;
pub mod workspace;

pub use audit::{AuditEvent, AuditSink, JsonlAuditSink, LogAuditSink, MemoryAuditSink, Outcome};
pub use config::WorkspaceConfig;
pub use confirm::{AlwaysDeny, AutoApprove, ConfirmationProvider, TerminalPrompt};
pub use error::*;
pub use fs::{OperationKind, PathResolver, RollbackReport, Transaction, TransactionState};
pub use workspace::WorkspaceManager;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() -> Result<()> {
    use clap::Parser;

    let cli = cli::BrokerCli::parse();
    cli::init_logging(cli.verbose);

    let mut ws = WorkspaceManager::new(cli.workspace_config()?)?;
    if cli.yes {
        ws = ws.with_confirmation(AutoApprove);
    }

    command::execute(cli.command, &ws)
}
