use std::path::Path;
use std::time::Duration;

use shipnote_core::config::Config;
use shipnote_engine::pipeline::PipelineError;
use shipnote_git::{CliGit, GitProvider};
use shipnote_store::lock::{FileRunLock, RunLock};
use shipnote_store::state::reset_state;
use shipnote_store::{ensure_dirs, lock_path, state_path};

pub fn execute(repo_root: &Path, to_head: bool) -> anyhow::Result<()> {
    let config = Config::load(repo_root)?;
    ensure_dirs(&config.shipnote_dir, &config.queue_dir)?;

    // Same lock as the pipeline: never reset under a running daemon.
    let lock = FileRunLock::new(
        lock_path(&config.shipnote_dir),
        Duration::from_secs(config.lock_stale_secs),
    );
    let _held = lock
        .acquire(Duration::ZERO)
        .map_err(PipelineError::from)?;

    let baseline = if to_head {
        CliGit::new(repo_root.to_path_buf()).head_commit()?
    } else {
        None
    };
    let state = reset_state(&state_path(&config.shipnote_dir), baseline)?;

    match &state.last_commit_sha {
        Some(sha) => println!("State reset; new baseline at {sha}"),
        None => println!("State reset; full history is eligible on the next run"),
    }
    Ok(())
}
