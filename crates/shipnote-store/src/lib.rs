pub mod lock;
pub mod queue;
pub mod state;
pub mod status;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Per-repository runtime directory.
pub const SHIPNOTE_DIR: &str = ".shipnote";

pub fn shipnote_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(SHIPNOTE_DIR)
}

pub fn state_path(shipnote_dir: &Path) -> PathBuf {
    shipnote_dir.join("state.json")
}

pub fn lock_path(shipnote_dir: &Path) -> PathBuf {
    shipnote_dir.join("runtime.lock")
}

pub fn status_path(shipnote_dir: &Path) -> PathBuf {
    shipnote_dir.join("status.json")
}

/// Ensure the runtime directories exist before a run.
pub fn ensure_dirs(shipnote_dir: &Path, queue_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(shipnote_dir)?;
    fs::create_dir_all(queue_dir)?;
    Ok(())
}

/// Atomic write: write to a temp file in the same dir, then rename.
///
/// A reader observes either the old file or the new file at the final path,
/// never a truncated one, regardless of crash point.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// RFC3339 UTC timestamp.
pub fn utc_now() -> String {
    let now = time::OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    now.format(&time::format_description::well_known::Rfc3339)
        .expect("RFC3339 formatting should not fail")
}

/// Key for the current UTC ISO week, e.g. `2026-W35`.
pub fn current_week_key() -> String {
    week_key_for(time::OffsetDateTime::now_utc().date())
}

pub fn week_key_for(date: time::Date) -> String {
    let (year, week, _) = date.to_iso_week_date();
    format!("{year}-W{week:02}")
}
