use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shipnote_core::config::Config;
use shipnote_engine::generate::CommandGenerator;
use shipnote_engine::pipeline::Pipeline;
use shipnote_git::CliGit;
use shipnote_store::lock::FileRunLock;
use shipnote_store::lock_path;

pub fn execute(repo_root: &Path) -> anyhow::Result<()> {
    let config = Config::load(repo_root)?;
    let git = CliGit::new(repo_root.to_path_buf());
    git.ensure_repo()?;

    let generator = CommandGenerator::new(config.generator_command.clone());
    let lock = FileRunLock::new(
        lock_path(&config.shipnote_dir),
        Duration::from_secs(config.lock_stale_secs),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))?;

    let pipeline = Pipeline::new(&config, &git, &generator, &lock);
    pipeline.run_daemon(&stop);
    Ok(())
}
