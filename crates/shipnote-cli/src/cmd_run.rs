use std::path::Path;
use std::time::Duration;

use shipnote_core::config::Config;
use shipnote_engine::generate::CommandGenerator;
use shipnote_engine::pipeline::Pipeline;
use shipnote_git::CliGit;
use shipnote_store::lock::FileRunLock;
use shipnote_store::lock_path;

pub fn execute(repo_root: &Path, lock_wait_secs: u64) -> anyhow::Result<()> {
    let config = Config::load(repo_root)?;
    let git = CliGit::new(repo_root.to_path_buf());
    git.ensure_repo()?;

    let generator = CommandGenerator::new(config.generator_command.clone());
    let lock = FileRunLock::new(
        lock_path(&config.shipnote_dir),
        Duration::from_secs(config.lock_stale_secs),
    );

    let pipeline = Pipeline::new(&config, &git, &generator, &lock);
    let report = pipeline.run_once(Duration::from_secs(lock_wait_secs))?;

    println!(
        "{} candidate(s): {} queued, {} skipped, {} deferred",
        report.candidates, report.queued, report.skipped, report.deferred
    );
    Ok(())
}
