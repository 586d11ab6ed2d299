//! Approve command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use snapgate_core::{ChangeLedger, PerceptualHash, SnapgateError, SyncedOps};
use tracing::info;

use crate::exit_codes::SUCCESS;

/// What is being approved.
pub enum Target {
    /// A raw difference hash.
    Hash(String),
    /// The pending change recorded for baseline `change` in `run`.
    Change { run: String, change: String },
}

/// Execute the approve command.
pub async fn execute(
    ops: SyncedOps,
    approvals: String,
    target: Target,
    promote: bool,
    approver: String,
    capacity: usize,
    quiet: bool,
) -> Result<i32> {
    let (hash, pending) = match target {
        Target::Hash(text) => {
            let hash: PerceptualHash = text.parse().context("Failed to parse difference hash")?;
            (hash, None)
        }
        Target::Change { run, change } => {
            let ledger = ChangeLedger::pull(ops.store(), &run)
                .await
                .with_context(|| format!("Failed to load changes of run {run}"))?;
            let record = ledger
                .get(&change)
                .cloned()
                .ok_or_else(|| SnapgateError::not_found(format!("{run}/{change}")))?;
            (record.difference_hash.clone(), Some((run, record)))
        }
    };

    ops.accept(&approvals, hash.clone(), &approver, capacity)
        .await
        .context("Failed to store approval")?;
    info!(approvals = %approvals, approver = %approver, "Difference approved");

    if let Some((run, record)) = pending {
        if promote {
            ops.copy_snapshot(&record.target, &record.key, &approver)
                .await
                .context("Failed to promote candidate to baseline")?;
            info!(key = %record.key, "Candidate promoted");
        }
        ops.delete_changes(&run, Some(&record.key))
            .await
            .context("Failed to clear approved change")?;
    }

    if quiet {
        println!("{hash}");
    } else {
        println!("{} {} by {}", "APPROVED".green().bold(), hash, approver);
    }
    Ok(SUCCESS)
}
