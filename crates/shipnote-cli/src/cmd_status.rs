use std::path::Path;

use shipnote_core::config::Config;
use shipnote_store::state::{load_state, CounterSet};
use shipnote_store::status::read_status;
use shipnote_store::{state_path, status_path};

pub fn execute(repo_root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(repo_root)?;
    let loaded = load_state(&state_path(&config.shipnote_dir));
    let state = loaded.state;
    let status = read_status(&status_path(&config.shipnote_dir));
    let pending = pending_drafts(&config.queue_dir);

    if json {
        let payload = serde_json::json!({
            "project": config.project_name,
            "last_run_timestamp": state.last_run_timestamp,
            "last_commit_sha": state.last_commit_sha,
            "last_outcome": status.as_ref().map(|s| s.last_outcome.clone()),
            "pending_drafts": pending,
            "queue_counter": state.queue_counter,
            "counters": state.counters,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Project: {}", config.project_name);
    match &state.last_run_timestamp {
        Some(ts) => {
            let outcome = status
                .as_ref()
                .map(|s| s.last_outcome.as_str())
                .unwrap_or("unknown");
            println!("Last run: {ts} ({outcome})");
        }
        None => println!("Last run: (never)"),
    }
    match &state.last_commit_sha {
        Some(sha) => println!("Baseline: {sha}"),
        None => println!("Baseline: (none; full history eligible)"),
    }
    println!(
        "Queue: {pending} pending draft(s) in {}",
        config.queue_dir.display()
    );
    print_counters("All time", &state.counters.all_time);
    print_counters(
        &format!("Week {}", state.counters.week_key),
        &state.counters.week,
    );
    Ok(())
}

fn print_counters(label: &str, c: &CounterSet) {
    println!(
        "{label}: {} seen, {} kept, {} skipped, {} queued, {} errors",
        c.seen, c.kept, c.skipped, c.queued, c.errors
    );
}

fn pending_drafts(queue_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(queue_dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".md"))
        .count()
}
