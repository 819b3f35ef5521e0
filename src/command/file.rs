//! Single-operation subcommands. Each mutation runs in its own transaction.

use crate::command::run_transaction;
use crate::error::Result;
use crate::workspace::WorkspaceManager;

use clap::Parser;
use colored::Colorize;
use std::io::{self, Read, Write};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct ReadArgs {
    /// File to read
    pub path: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct LsArgs {
    /// Directory to list
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Glob to match; `**` or `/` descends into subdirectories
    #[arg(long, short = 'p', value_name = "GLOB")]
    pub pattern: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct WriteArgs {
    /// File to write
    pub path: PathBuf,

    /// Content to write; read from stdin when omitted
    pub content: Option<String>,

    /// Replace the file if it already exists
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct AppendArgs {
    /// File to append to
    pub path: PathBuf,

    /// Content to append; read from stdin when omitted
    pub content: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct RmArgs {
    /// File or directory to delete
    pub path: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct MvArgs {
    /// Entry to move
    pub from: PathBuf,

    /// Destination; an existing entry here is replaced
    pub to: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct MkdirArgs {
    /// Directory to create
    pub path: PathBuf,
}

pub fn read(ws: &WorkspaceManager, args: ReadArgs) -> Result<()> {
    let mut txn = ws.begin();
    let data = ws.read(&mut txn, &args.path)?;
    ws.commit(&mut txn)?;

    let mut stdout = io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

pub fn ls(ws: &WorkspaceManager, args: LsArgs) -> Result<()> {
    let entries = ws.list_dir(&args.path, args.pattern.as_deref())?;

    for entry in entries {
        let shown = ws
            .relative_to_workspace(&entry)
            .unwrap_or_else(|_| entry.clone());
        let shown = shown.to_string_lossy().replace('\\', "/");

        // Symlinks are listed as plain entries, never followed.
        let is_dir = std::fs::symlink_metadata(&entry).is_ok_and(|meta| meta.is_dir());
        if is_dir {
            println!("{}", format!("{shown}/").blue().bold());
        } else {
            println!("{}", shown);
        }
    }
    Ok(())
}

pub fn write(ws: &WorkspaceManager, args: WriteArgs) -> Result<()> {
    let content = content_or_stdin(args.content)?;
    run_transaction(ws, |txn| {
        ws.write(txn, &args.path, &content, args.overwrite)
    })?;
    println!(
        "{} {} ({} bytes)",
        "✓ Wrote".green().bold(),
        args.path.display(),
        content.len()
    );
    Ok(())
}

pub fn append(ws: &WorkspaceManager, args: AppendArgs) -> Result<()> {
    let content = content_or_stdin(args.content)?;
    run_transaction(ws, |txn| ws.append(txn, &args.path, &content))?;
    println!(
        "{} {} ({} bytes)",
        "✓ Appended to".green().bold(),
        args.path.display(),
        content.len()
    );
    Ok(())
}

pub fn rm(ws: &WorkspaceManager, args: RmArgs) -> Result<()> {
    run_transaction(ws, |txn| ws.delete(txn, &args.path))?;
    println!("{} {}", "✓ Deleted".green().bold(), args.path.display());
    Ok(())
}

pub fn mv(ws: &WorkspaceManager, args: MvArgs) -> Result<()> {
    run_transaction(ws, |txn| ws.rename(txn, &args.from, &args.to))?;
    println!(
        "{} {} → {}",
        "✓ Moved".green().bold(),
        args.from.display().to_string().yellow(),
        args.to.display().to_string().green().bold()
    );
    Ok(())
}

pub fn mkdir(ws: &WorkspaceManager, args: MkdirArgs) -> Result<()> {
    run_transaction(ws, |txn| ws.create_dir(txn, &args.path))?;
    println!("{} {}", "✓ Created".green().bold(), args.path.display());
    Ok(())
}

fn content_or_stdin(content: Option<String>) -> Result<Vec<u8>> {
    match content {
        Some(content) => Ok(content.into_bytes()),
        None => {
            let mut buf = Vec::new();
            io::stdin().lock().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}
