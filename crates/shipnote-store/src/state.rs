use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{current_week_key, utc_now, write_atomic};

/// Current state schema version.
pub const STATE_VERSION: u32 = 1;

/// Cap on the idempotency set; old entries age out once `last_commit_sha`
/// has moved far past them.
pub const MAX_PROCESSED_COMMITS: usize = 100;

/// Monotonic outcome totals. `kept + skipped == seen` always.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterSet {
    pub seen: u64,
    pub kept: u64,
    pub skipped: u64,
    pub queued: u64,
    pub errors: u64,
}

/// All-time counters plus a weekly bucket keyed by ISO week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub all_time: CounterSet,
    pub week: CounterSet,
    pub week_key: String,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            all_time: CounterSet::default(),
            week: CounterSet::default(),
            week_key: current_week_key(),
        }
    }
}

impl Counters {
    /// Apply the same bump to the all-time and weekly buckets.
    pub fn record(&mut self, bump: impl Fn(&mut CounterSet)) {
        bump(&mut self.all_time);
        bump(&mut self.week);
    }
}

/// Durable processing record for one repository.
///
/// Unknown keys written by a newer version round-trip through `extra`;
/// missing keys fill with defaults. Mutated only under the run lock and
/// written whole via [`save_state`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingState {
    pub version: u32,
    /// Boundary of processed history: ancestors are done, descendants are
    /// candidates.
    pub last_commit_sha: Option<String>,
    /// Secondary idempotency guard for rewritten history.
    pub processed_commits: Vec<String>,
    pub queue_counter: u64,
    pub last_run_timestamp: Option<String>,
    pub counters: Counters,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_commit_sha: None,
            processed_commits: Vec::new(),
            queue_counter: 0,
            last_run_timestamp: None,
            counters: Counters::default(),
            extra: serde_json::Map::new(),
        }
    }
}

impl ProcessingState {
    pub fn is_processed(&self, sha: &str) -> bool {
        self.processed_commits.iter().any(|s| s == sha)
    }

    /// Record a commit as done: stamps the run time and appends to the
    /// capped idempotency set. The history boundary moves separately; see
    /// [`ProcessingState::advance_baseline`].
    pub fn mark_processed(&mut self, sha: &str) {
        self.processed_commits.retain(|s| s != sha);
        self.processed_commits.push(sha.to_string());
        if self.processed_commits.len() > MAX_PROCESSED_COMMITS {
            let overflow = self.processed_commits.len() - MAX_PROCESSED_COMMITS;
            self.processed_commits.drain(..overflow);
        }
        self.last_run_timestamp = Some(utc_now());
    }

    /// Move the history boundary forward. Kept apart from
    /// [`ProcessingState::mark_processed`]: a batch holding a deferred
    /// commit records later successes in the idempotency set without
    /// moving the boundary past the commit that still needs a retry.
    pub fn advance_baseline(&mut self, sha: &str) {
        self.last_commit_sha = Some(sha.to_string());
    }

    /// Dedupe and cap the processed set; roll the weekly bucket over when
    /// the stored ISO week differs from the current one. Returns whether a
    /// rollover happened.
    fn normalize(&mut self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.processed_commits.retain(|sha| seen.insert(sha.clone()));
        if self.processed_commits.len() > MAX_PROCESSED_COMMITS {
            let overflow = self.processed_commits.len() - MAX_PROCESSED_COMMITS;
            self.processed_commits.drain(..overflow);
        }
        if self.version == 0 {
            self.version = STATE_VERSION;
        }
        let active_week = current_week_key();
        if self.counters.week_key != active_week {
            self.counters.week = CounterSet::default();
            self.counters.week_key = active_week;
            return true;
        }
        false
    }
}

/// Result of [`load_state`]. `recovered` covers both "no file yet" and
/// "file present but unreadable"; the caller decides how loudly to log.
#[derive(Debug)]
pub struct LoadedState {
    pub state: ProcessingState,
    pub recovered: bool,
    pub rolled_over: bool,
}

/// Load and normalize state. Never fails: an absent, empty, or corrupt file
/// yields a defensively normalized default state instead.
pub fn load_state(path: &Path) -> LoadedState {
    let parsed = std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<ProcessingState>(&text).ok());
    match parsed {
        Some(mut state) => {
            let rolled_over = state.normalize();
            LoadedState {
                state,
                recovered: false,
                rolled_over,
            }
        }
        None => LoadedState {
            state: ProcessingState::default(),
            recovered: true,
            rolled_over: false,
        },
    }
}

/// Write the whole state atomically. The only mutator of the state file.
pub fn save_state(path: &Path, state: &ProcessingState) -> Result<()> {
    let mut normalized = state.clone();
    normalized.normalize();
    let mut data = serde_json::to_string_pretty(&normalized)?;
    data.push('\n');
    write_atomic(path, data.as_bytes())
        .with_context(|| format!("saving state: {}", path.display()))
}

/// Reset progress markers to defaults (optionally re-baselined) and persist.
pub fn reset_state(path: &Path, last_commit_sha: Option<String>) -> Result<ProcessingState> {
    let state = ProcessingState {
        last_commit_sha,
        last_run_timestamp: Some(utc_now()),
        ..ProcessingState::default()
    };
    save_state(path, &state)?;
    Ok(state)
}
