//! Consent for write-class operations.
//!
//! The manager never reads from a terminal itself; it asks whatever
//! [`ConfirmationProvider`] it was given.

use crate::error::Result;

use colored::Colorize;
use std::io::{self, BufRead, IsTerminal, Write};

/// Synchronous yes/no decision on a pending mutation.
pub trait ConfirmationProvider {
    /// Returns `Ok(true)` to proceed.
    ///
    /// # Errors
    ///
    /// Only for failures of the provider itself (e.g. reading stdin).
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// Approves everything. Used for `--yes` and automated callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ConfirmationProvider for AutoApprove {
    fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Refuses everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDeny;

impl ConfirmationProvider for AlwaysDeny {
    fn confirm(&self, message: &str) -> Result<bool> {
        log::debug!("Denied without prompting: {}", message);
        Ok(false)
    }
}

impl<F> ConfirmationProvider for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, message: &str) -> Result<bool> {
        Ok(self(message))
    }
}

/// Interactive `(y/N)` prompt on stdin/stdout.
///
/// # Automatic Skip Conditions
///
/// - stdin is not a terminal: declines, since nobody can answer
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl ConfirmationProvider for TerminalPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        if !io::stdin().is_terminal() {
            log::warn!("Non-interactive terminal detected. Use --yes to confirm automatically.");
            return Ok(false);
        }

        print!("{} {} ", message.bold(), "(y/N)".dimmed());
        io::stdout().flush()?;

        let mut response = String::new();
        io::stdin().lock().read_line(&mut response)?;

        Ok(parse_answer(&response))
    }
}

/// Accepts `y`, `ye` and `yes`, case-insensitively.
fn parse_answer(response: &str) -> bool {
    matches!(
        response.trim().to_ascii_lowercase().as_str(),
        "y" | "ye" | "yes"
    )
}
