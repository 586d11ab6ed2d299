//! Changes command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use snapgate_core::{ChangeLedger, SyncedOps};

use crate::exit_codes::SUCCESS;
use crate::utils::format_timestamp;

/// Execute the changes command.
pub async fn execute(ops: SyncedOps, run: String, json: bool, quiet: bool) -> Result<i32> {
    let ledger = match ChangeLedger::pull(ops.store(), &run).await {
        Ok(ledger) => ledger,
        Err(e) if e.is_not_found() => ChangeLedger::default(),
        Err(e) => return Err(e).with_context(|| format!("Failed to load changes of run {run}")),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
        return Ok(SUCCESS);
    }
    if quiet {
        for record in ledger.records() {
            println!("{}", record.key);
        }
        return Ok(SUCCESS);
    }

    if ledger.is_empty() {
        println!("{} no pending changes in {}", "CLEAN".green().bold(), run);
        return Ok(SUCCESS);
    }
    println!("{} pending change(s) in {}", ledger.len().to_string().bold(), run);
    for record in ledger.records() {
        println!();
        println!(
            "{} {} {}",
            record.key.bold(),
            "recorded".dimmed(),
            format_timestamp(record.ts)
        );
        print!("{}", record.report(ops.store()));
        println!("\t{} {}", "hash:".dimmed(), record.difference_hash);
    }
    Ok(SUCCESS)
}
