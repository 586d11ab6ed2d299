//! Copy-baseline command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use snapgate_core::SyncedOps;
use tracing::info;

use crate::exit_codes::SUCCESS;

/// Execute the copy-baseline command.
pub async fn execute(
    ops: SyncedOps,
    src: String,
    dest: String,
    author: String,
    quiet: bool,
) -> Result<i32> {
    ops.copy_snapshot(&src, &dest, &author)
        .await
        .with_context(|| format!("Failed to copy {src} to {dest}"))?;
    info!(src = %src, dest = %dest, author = %author, "Snapshot copied");

    if !quiet {
        println!(
            "{} {} -> {}",
            "COPIED".green().bold(),
            src,
            ops.store().resolve(&dest)
        );
    }
    Ok(SUCCESS)
}
