//! Batch plans: a TOML list of steps applied as one transaction.
//!
//! ```toml
//! [[op]]
//! kind = "write"
//! path = "notes/a.txt"
//! content = "hello"
//! overwrite = true
//!
//! [[op]]
//! kind = "rename"
//! from = "notes/a.txt"
//! to = "archive/a.txt"
//! ```
//!
//! If any step fails, every step already applied is rolled back.

use crate::command::run_transaction;
use crate::error::{Result, WorkspaceError};
use crate::fs::Transaction;
use crate::workspace::WorkspaceManager;

use clap::Parser;
use colored::Colorize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use toml_edit::{DocumentMut, Table};

#[derive(Parser, Debug, Clone)]
pub struct ApplyArgs {
    /// Plan file to apply
    pub plan: PathBuf,

    /// Show the steps without applying any of them
    #[arg(long, short = 'n')]
    pub dry_run: bool,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    Read { path: String },
    Write {
        path: String,
        content: String,
        overwrite: bool,
    },
    Append { path: String, content: String },
    Delete { path: String },
    Rename { from: String, to: String },
    CreateDir { path: String },
}

impl PlanStep {
    fn apply(&self, ws: &WorkspaceManager, txn: &mut Transaction) -> Result<()> {
        match self {
            PlanStep::Read { path } => {
                let data = ws.read(txn, path)?;
                println!("{}", format!("--- {path} ---").dimmed());
                println!("{}", String::from_utf8_lossy(&data));
                Ok(())
            }
            PlanStep::Write {
                path,
                content,
                overwrite,
            } => ws.write(txn, path, content, *overwrite),
            PlanStep::Append { path, content } => ws.append(txn, path, content),
            PlanStep::Delete { path } => ws.delete(txn, path),
            PlanStep::Rename { from, to } => ws.rename(txn, from, to),
            PlanStep::CreateDir { path } => ws.create_dir(txn, path),
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::Read { path } => write!(f, "Read: {path}"),
            PlanStep::Write {
                path,
                content,
                overwrite,
            } => {
                let mode = if *overwrite { " (overwrite)" } else { "" };
                write!(f, "Write: {path} ({} bytes){mode}", content.len())
            }
            PlanStep::Append { path, content } => {
                write!(f, "Append: {path} ({} bytes)", content.len())
            }
            PlanStep::Delete { path } => write!(f, "Delete: {path}"),
            PlanStep::Rename { from, to } => write!(f, "Rename: {from} → {to}"),
            PlanStep::CreateDir { path } => write!(f, "Create dir: {path}"),
        }
    }
}

/// Parses plan text into its steps, in file order.
pub fn parse_plan(content: &str) -> Result<Vec<PlanStep>> {
    let doc: DocumentMut = content.parse()?;

    let ops = doc
        .get("op")
        .ok_or_else(|| WorkspaceError::Config("plan has no [[op]] entries".into()))?
        .as_array_of_tables()
        .ok_or_else(|| WorkspaceError::Config("`op` must be an array of tables ([[op]])".into()))?;

    ops.iter()
        .enumerate()
        .map(|(i, table)| parse_step(table).map_err(|e| prefix_step(i + 1, e)))
        .collect()
}

fn parse_step(table: &Table) -> Result<PlanStep> {
    let kind = required_str(table, "kind")?;

    let step = match kind.as_str() {
        "read" => PlanStep::Read {
            path: required_str(table, "path")?,
        },
        "write" => PlanStep::Write {
            path: required_str(table, "path")?,
            content: required_str(table, "content")?,
            overwrite: optional_bool(table, "overwrite")?.unwrap_or(false),
        },
        "append" => PlanStep::Append {
            path: required_str(table, "path")?,
            content: required_str(table, "content")?,
        },
        "delete" => PlanStep::Delete {
            path: required_str(table, "path")?,
        },
        "rename" => PlanStep::Rename {
            from: required_str(table, "from")?,
            to: required_str(table, "to")?,
        },
        "create_dir" => PlanStep::CreateDir {
            path: required_str(table, "path")?,
        },
        other => {
            return Err(WorkspaceError::Config(format!(
                "unknown kind '{other}' (expected read, write, append, delete, rename or create_dir)"
            )));
        }
    };

    Ok(step)
}

fn required_str(table: &Table, key: &str) -> Result<String> {
    let item = table
        .get(key)
        .ok_or_else(|| WorkspaceError::Config(format!("missing `{key}`")))?;
    item.as_str()
        .map(str::to_string)
        .ok_or_else(|| WorkspaceError::Config(format!("`{key}` must be a string")))
}

fn optional_bool(table: &Table, key: &str) -> Result<Option<bool>> {
    table
        .get(key)
        .map(|item| {
            item.as_bool()
                .ok_or_else(|| WorkspaceError::Config(format!("`{key}` must be a boolean")))
        })
        .transpose()
}

fn prefix_step(number: usize, err: WorkspaceError) -> WorkspaceError {
    match err {
        WorkspaceError::Config(msg) => WorkspaceError::Config(format!("op #{number}: {msg}")),
        other => other,
    }
}

pub fn execute(ws: &WorkspaceManager, args: ApplyArgs) -> Result<()> {
    let content = fs::read_to_string(&args.plan)?;
    let steps = parse_plan(&content)?;
    log::info!("Loaded {} steps from {}", steps.len(), args.plan.display());

    if args.dry_run {
        println!("{}", "Planned operations:".cyan().bold());
        for (i, step) in steps.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
        println!("\n{}", "Dry run: nothing was changed.".yellow());
        return Ok(());
    }

    run_transaction(ws, |txn| {
        for (i, step) in steps.iter().enumerate() {
            log::debug!("Step {}: {}", i + 1, step);
            step.apply(ws, txn)?;
        }
        Ok(())
    })?;

    println!(
        "{} {} operations",
        "✓ Successfully applied".green().bold(),
        steps.len()
    );
    Ok(())
}
