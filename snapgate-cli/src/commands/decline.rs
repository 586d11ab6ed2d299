//! Decline command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use snapgate_core::{PerceptualHash, SyncedOps};
use tracing::warn;

use crate::exit_codes::SUCCESS;

/// Execute the decline command.
pub async fn execute(ops: SyncedOps, approvals: String, hash: String, quiet: bool) -> Result<i32> {
    let hash: PerceptualHash = hash.parse().context("Failed to parse difference hash")?;
    let removed = ops
        .decline(&approvals, &hash)
        .await
        .with_context(|| format!("Failed to update approval set {approvals}"))?;

    if !removed {
        warn!(approvals = %approvals, "Hash was not approved");
    }
    if !quiet {
        if removed {
            println!("{} {}", "DECLINED".yellow().bold(), hash);
        } else {
            println!("{} {} was not approved", "UNCHANGED".dimmed(), hash);
        }
    }
    Ok(SUCCESS)
}
