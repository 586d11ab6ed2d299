//! Compare command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use snapgate_core::{Mask, Matcher, Outcome, SyncedOps};
use tracing::info;

use crate::exit_codes::{NEEDS_APPROVAL, SUCCESS};
use crate::utils::{load_image, parse_key_val};

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Screenshot to check
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Baseline name (prefixed by --prefix)
    #[arg(long, required_unless_present = "against_image")]
    pub baseline: Option<String>,

    /// Compare against this image file instead of a stored baseline
    #[arg(long, value_name = "IMAGE", conflicts_with = "baseline")]
    pub against_image: Option<PathBuf>,

    /// Run identifier; changes are recorded under this key
    #[arg(long, env = "SNAPGATE_RUN")]
    pub run: String,

    /// Key of the approval set to consult
    #[arg(long)]
    pub approvals: Option<String>,

    /// Ignore approvals older than two months
    #[arg(long)]
    pub exclude_expired: bool,

    /// Maximum Hamming distance treated as equal
    #[arg(long)]
    pub threshold: Option<u32>,

    /// Hash bit budget
    #[arg(long)]
    pub bits: Option<u32>,

    /// Replace the baseline when the screenshot differs
    #[arg(long)]
    pub update: bool,

    /// Replace the baseline without comparing
    #[arg(long)]
    pub force_update: bool,

    /// Crop the screenshot to the baseline size before hashing
    #[arg(long)]
    pub normalize: bool,

    /// Path segment namespacing baselines and artifacts (repeatable)
    #[arg(long)]
    pub prefix: Vec<String>,

    /// Region to ignore as x,y,width,height[,#rrggbb] (repeatable, black by default)
    #[arg(long, value_name = "RECT")]
    pub mask: Vec<Mask>,

    /// Baseline version recorded with new snapshots
    #[arg(long)]
    pub version: Option<String>,

    /// Metadata attached to snapshots and changes as KEY=VALUE (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub metadata: Vec<(String, String)>,
}

impl CompareArgs {
    /// Environment defaults with command-line flags layered on top.
    fn matcher(&self, ops: SyncedOps) -> Matcher {
        let mut matcher = Matcher::from_env(ops, self.run.clone()).with_prefix(self.prefix.clone());
        if let Some(key) = &self.approvals {
            matcher = matcher.with_approvals(key.clone());
        }
        if let Some(threshold) = self.threshold {
            matcher = matcher.with_threshold(threshold);
        }
        if let Some(bits) = self.bits {
            matcher = matcher.with_hash_bits(bits);
        }
        if let Some(version) = &self.version {
            matcher = matcher.with_version(version.clone());
        }
        if self.update {
            matcher = matcher.with_update(true);
        }
        if self.force_update {
            matcher = matcher.with_force_update(true);
        }
        if self.normalize {
            matcher = matcher.with_normalize(true);
        }
        if self.exclude_expired {
            matcher = matcher.with_exclude_expired_approvals(true);
        }
        self.metadata
            .iter()
            .fold(matcher, |m, (k, v)| m.with_metadata(k.clone(), v))
    }
}

/// Execute the compare command.
pub async fn execute(ops: SyncedOps, args: CompareArgs, quiet: bool) -> Result<i32> {
    let matcher = args.matcher(ops);
    let target = load_image(&args.file)?;

    let mut comparison = matcher.compare_image(target);
    for mask in &args.mask {
        comparison = comparison.mask(*mask);
    }
    comparison = match (&args.baseline, &args.against_image) {
        (_, Some(path)) => comparison.against_image(load_image(path)?),
        (Some(name), None) => comparison.against(name.clone()),
        (None, None) => comparison,
    };

    let outcome = comparison
        .compare()
        .await
        .with_context(|| format!("Failed to compare {}", args.file.display()))?;
    info!(path = %args.file.display(), pass = outcome.is_pass(), "Comparison finished");

    match outcome {
        Outcome::Equal => {
            if !quiet {
                println!("{} {}", "EQUAL".green().bold(), args.file.display());
            }
            Ok(SUCCESS)
        }
        Outcome::Published { locator, .. } => {
            if quiet {
                println!("{locator}");
            } else {
                println!("{} {}", "PUBLISHED".cyan().bold(), locator);
            }
            Ok(SUCCESS)
        }
        Outcome::Approved(found) => {
            if !quiet {
                println!(
                    "{} approved by {}",
                    "APPROVED".green().bold(),
                    found.approvers().join(", ")
                );
            }
            Ok(SUCCESS)
        }
        Outcome::NeedsApproval(change) => {
            if quiet {
                println!("{}", change.difference_hash);
            } else {
                println!("{}", "CHANGED".red().bold());
                print!("{}", change.report(matcher.ops().store()));
                println!("{} {}", "Difference hash:".dimmed(), change.difference_hash);
            }
            Ok(NEEDS_APPROVAL)
        }
    }
}
