//! Clear command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use snapgate_core::SyncedOps;

use crate::exit_codes::SUCCESS;

/// Execute the clear command.
pub async fn execute(
    ops: SyncedOps,
    run: String,
    change: Option<String>,
    quiet: bool,
) -> Result<i32> {
    let written = ops
        .delete_changes(&run, change.as_deref())
        .await
        .with_context(|| format!("Failed to clear changes of run {run}"))?;

    if !quiet {
        match (&change, written) {
            (None, _) => println!("{} all changes of {}", "CLEARED".green().bold(), run),
            (Some(key), true) => println!("{} {} from {}", "CLEARED".green().bold(), key, run),
            (Some(key), false) => {
                println!("{} no change for {} in {}", "UNCHANGED".dimmed(), key, run)
            }
        }
    }
    Ok(SUCCESS)
}
