use std::fs;
use std::path::Path;

use shipnote_core::config::{Config, CONFIG_RELATIVE_PATH};
use shipnote_git::CliGit;
use shipnote_store::{ensure_dirs, shipnote_dir};

pub fn execute(repo_root: &Path) -> anyhow::Result<()> {
    CliGit::new(repo_root.to_path_buf()).ensure_repo()?;

    let dir = shipnote_dir(repo_root);
    let queue_dir = dir.join("queue");
    ensure_dirs(&dir, &queue_dir)?;

    let config_path = repo_root.join(CONFIG_RELATIVE_PATH);
    if config_path.exists() {
        println!("Already initialized at {}", dir.display());
        return Ok(());
    }

    let project_name = repo_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shipnote".to_string());
    fs::write(&config_path, Config::starter_yaml(&project_name))?;

    println!("Initialized {}", dir.display());
    println!("  config: {}", config_path.display());
    println!("  queue:  {}", queue_dir.display());
    println!("Set generator.command in the config, then run `shipnote watch`.");
    Ok(())
}
