use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::state::CounterSet;
use crate::write_atomic;

/// Best-effort snapshot of the last run for external inspection.
///
/// Non-authoritative: the state file is the source of truth. Failures to
/// write this file never fail a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    pub pid: u32,
    pub started_at: String,
    pub last_run_timestamp: Option<String>,
    /// `ok`, `lock_busy`, or `N error(s)`.
    pub last_outcome: String,
    pub all_time: CounterSet,
    pub week: CounterSet,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            pid: std::process::id(),
            started_at: crate::utc_now(),
            last_run_timestamp: None,
            last_outcome: "idle".into(),
            all_time: CounterSet::default(),
            week: CounterSet::default(),
        }
    }
}

pub fn write_status(path: &Path, snapshot: &StatusSnapshot) -> anyhow::Result<()> {
    let mut data = serde_json::to_string_pretty(snapshot)?;
    data.push('\n');
    write_atomic(path, data.as_bytes())
}

pub fn read_status(path: &Path) -> Option<StatusSnapshot> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

pub fn clear_status(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("status.json");
        let mut snap = StatusSnapshot::default();
        snap.last_outcome = "2 error(s)".into();
        snap.all_time.errors = 2;
        write_status(&path, &snap).unwrap();

        let loaded = read_status(&path).unwrap();
        assert_eq!(loaded.last_outcome, "2 error(s)");
        assert_eq!(loaded.all_time.errors, 2);
    }

    #[test]
    fn read_missing_or_corrupt_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("status.json");
        assert!(read_status(&path).is_none());
        std::fs::write(&path, "not json").unwrap();
        assert!(read_status(&path).is_none());
    }

    #[test]
    fn clear_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("status.json");
        write_status(&path, &StatusSnapshot::default()).unwrap();
        clear_status(&path);
        assert!(!path.exists());
        clear_status(&path);
    }
}
