pub mod apply;
pub mod file;

use crate::error::Result;
use crate::fs::Transaction;
use crate::workspace::WorkspaceManager;

use clap::Subcommand;
use colored::Colorize;

#[derive(Subcommand, Debug)]
pub enum BrokerCommand {
    /// Print a file to stdout
    Read(file::ReadArgs),
    /// List directory entries matching a glob
    Ls(file::LsArgs),
    /// Write a file (content from the argument or stdin)
    Write(file::WriteArgs),
    /// Append to a file (content from the argument or stdin)
    Append(file::AppendArgs),
    /// Delete a file or directory tree
    Rm(file::RmArgs),
    /// Move or rename an entry
    Mv(file::MvArgs),
    /// Create a directory and any missing parents
    Mkdir(file::MkdirArgs),
    /// Apply a TOML plan as one transaction
    Apply(apply::ApplyArgs),
}

pub fn execute(command: BrokerCommand, ws: &WorkspaceManager) -> Result<()> {
    match command {
        BrokerCommand::Read(args) => file::read(ws, args),
        BrokerCommand::Ls(args) => file::ls(ws, args),
        BrokerCommand::Write(args) => file::write(ws, args),
        BrokerCommand::Append(args) => file::append(ws, args),
        BrokerCommand::Rm(args) => file::rm(ws, args),
        BrokerCommand::Mv(args) => file::mv(ws, args),
        BrokerCommand::Mkdir(args) => file::mkdir(ws, args),
        BrokerCommand::Apply(args) => apply::execute(ws, args),
    }
}

/// Runs `body` in a fresh transaction.
///
/// On success the summary is printed and the transaction committed. On
/// failure everything `body` applied is rolled back before the error is
/// returned.
pub(crate) fn run_transaction<F>(ws: &WorkspaceManager, body: F) -> Result<()>
where
    F: FnOnce(&mut Transaction) -> Result<()>,
{
    let mut txn = ws.begin();

    if let Err(e) = body(&mut txn) {
        if !txn.is_empty() {
            eprintln!("{}", "Attempting to rollback changes...".yellow().bold());
            match ws.rollback(&mut txn) {
                Ok(_) => eprintln!("{}", "✓ Rollback successful.".green()),
                Err(rollback_err) => {
                    eprintln!("{} {}", "✗ Rollback failed:".red().bold(), rollback_err);
                }
            }
        }
        return Err(e);
    }

    txn.print_summary(ws.primary_root());
    ws.commit(&mut txn)
}
