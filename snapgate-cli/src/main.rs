//! Snapgate CLI - visual regression checks for screenshots.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use snapgate_core::SnapgateError;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

use commands::approve::Target;
use commands::compare::CompareArgs;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   equal, published or approved
  1   general error
  64  usage or configuration error
  65  screenshot changed and needs approval
  66  input file or key not found
  74  blob store I/O error";

#[derive(Parser)]
#[command(name = "snapgate")]
#[command(author, version, about = "Perceptual-hash visual regression checks", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Root directory of the blob store
    #[arg(long, global = true, env = "SNAPGATE_STORE", default_value = ".snapgate")]
    store: PathBuf,

    /// Log debug details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print only machine-readable results
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the perceptual hash of an image
    Hash {
        /// Image file (PNG or JPEG)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Hash bit budget
        #[arg(long, default_value_t = snapgate_core::DEFAULT_HASH_BITS)]
        bits: u32,
    },

    /// Compare a screenshot with its baseline
    Compare(CompareArgs),

    /// Approve a difference hash, or a pending change of a run
    Approve {
        /// Key of the approval set
        #[arg(long, env = "SNAPGATE_APPROVALS_KEY")]
        approvals: String,

        /// Difference hash to approve
        #[arg(long, conflicts_with = "change", required_unless_present = "change")]
        hash: Option<String>,

        /// Run whose pending change is approved
        #[arg(long, env = "SNAPGATE_RUN")]
        run: Option<String>,

        /// Baseline key of the pending change
        #[arg(long, requires = "run")]
        change: Option<String>,

        /// Also promote the candidate image to be the new baseline
        #[arg(long, requires = "change")]
        promote: bool,

        /// Who approves
        #[arg(long, env = "SNAPGATE_APPROVER", default_value = "cli")]
        approver: String,

        /// Maximum approvals kept in the set
        #[arg(long, default_value_t = 100)]
        capacity: usize,
    },

    /// Remove an approval
    Decline {
        /// Key of the approval set
        #[arg(long, env = "SNAPGATE_APPROVALS_KEY")]
        approvals: String,

        /// Difference hash to remove
        #[arg(value_name = "HASH")]
        hash: String,
    },

    /// List the pending changes of a run
    Changes {
        /// Run identifier
        #[arg(value_name = "RUN", env = "SNAPGATE_RUN")]
        run: String,

        /// Print the ledger as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete pending changes of a run
    Clear {
        /// Run identifier
        #[arg(value_name = "RUN", env = "SNAPGATE_RUN")]
        run: String,

        /// Only delete the change for this baseline key
        #[arg(long)]
        change: Option<String>,
    },

    /// Copy a stored snapshot to another key
    CopyBaseline {
        /// Source key
        #[arg(value_name = "SRC")]
        src: String,

        /// Destination key
        #[arg(value_name = "DEST")]
        dest: String,

        /// Recorded as the snapshot author
        #[arg(long, env = "SNAPGATE_APPROVER", default_value = "cli")]
        author: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "snapgate=debug,snapgate_core=debug"
    } else {
        "snapgate=info,snapgate_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let ops = utils::open_store(&cli.store);
    let quiet = cli.quiet;

    match cli.command {
        Commands::Hash { file, bits } => commands::hash::execute(file, bits, quiet),
        Commands::Compare(args) => commands::compare::execute(ops, args, quiet).await,
        Commands::Approve {
            approvals,
            hash,
            run,
            change,
            promote,
            approver,
            capacity,
        } => {
            let target = match (hash, run, change) {
                (Some(hash), _, _) => Target::Hash(hash),
                (None, Some(run), Some(change)) => Target::Change { run, change },
                _ => {
                    return Err(SnapgateError::Config(
                        "either --hash or --run with --change is required".into(),
                    )
                    .into())
                }
            };
            commands::approve::execute(ops, approvals, target, promote, approver, capacity, quiet)
                .await
        }
        Commands::Decline { approvals, hash } => {
            commands::decline::execute(ops, approvals, hash, quiet).await
        }
        Commands::Changes { run, json } => commands::changes::execute(ops, run, json, quiet).await,
        Commands::Clear { run, change } => commands::clear::execute(ops, run, change, quiet).await,
        Commands::CopyBaseline { src, dest, author } => {
            commands::copy_baseline::execute(ops, src, dest, author, quiet).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let exit = exit_codes::ExitCode::from_anyhow(&err);
            if let Some(message) = exit.message {
                eprintln!("{} {}", "error:".red().bold(), message);
            }
            exit.code
        }
    };
    std::process::exit(code);
}
