mod cmd_init;
mod cmd_reset;
mod cmd_run;
mod cmd_status;
mod cmd_watch;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shipnote_engine::pipeline::PipelineError;
use tracing_subscriber::EnvFilter;

/// EX_TEMPFAIL: another live invocation holds the run lock; try again later.
const EXIT_LOCK_BUSY: u8 = 75;

#[derive(Parser)]
#[command(
    name = "shipnote",
    version,
    about = "Drafts devlog posts from your git history"
)]
struct Cli {
    /// Repository to operate on (defaults to the current directory)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter .shipnote/config.yaml and create the queue directory
    Init,
    /// Run one poll cycle and exit
    Run {
        /// Seconds to wait for the run lock before giving up
        #[arg(long, default_value_t = 0)]
        lock_wait_secs: u64,
    },
    /// Poll continuously until Ctrl-C
    Watch,
    /// Show counters, queue depth, and the last run outcome
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear processing state so history becomes eligible again
    Reset {
        /// Re-baseline on current HEAD instead of reprocessing old history
        #[arg(long)]
        to_head: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let repo_root = match cli.repo {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("error: cannot determine working directory: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let result = match cli.cmd {
        Command::Init => cmd_init::execute(&repo_root),
        Command::Run { lock_wait_secs } => cmd_run::execute(&repo_root, lock_wait_secs),
        Command::Watch => cmd_watch::execute(&repo_root),
        Command::Status { json } => cmd_status::execute(&repo_root, json),
        Command::Reset { to_head } => cmd_reset::execute(&repo_root, to_head),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_lock_busy(&e) => {
            eprintln!("shipnote: {e}");
            ExitCode::from(EXIT_LOCK_BUSY)
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn is_lock_busy(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::LockBusy)
    )
}
