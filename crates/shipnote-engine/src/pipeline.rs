use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use shipnote_core::config::Config;
use shipnote_core::filter::{decide, Decision, SkipReason};
use shipnote_core::redact::Redactor;
use shipnote_core::CommitRecord;
use shipnote_git::{GitError, GitProvider};
use shipnote_store::lock::{LockError, RunLock};
use shipnote_store::queue::{already_queued, write_draft, Draft};
use shipnote_store::state::{load_state, save_state, ProcessingState};
use shipnote_store::status::{clear_status, write_status, StatusSnapshot};
use shipnote_store::{ensure_dirs, state_path, status_path, utc_now};

use crate::generate::{DraftGenerator, DraftRequest, GenerateError};

/// Failure kinds surfaced by a pipeline run. `LockBusy` means "try again
/// later"; everything else ends the iteration, and the daemon loop carries
/// on at the next interval.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("another shipnote invocation holds the run lock")]
    LockBusy,
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("queue write failed: {0}")]
    Write(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<LockError> for PipelineError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Busy => PipelineError::LockBusy,
            LockError::Io(io) => PipelineError::Other(io.into()),
        }
    }
}

/// Per-commit outcome within one iteration.
///
/// `DeferredError` commits are deliberately not marked processed, so they
/// come back as candidates next iteration; that is the whole retry policy.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Skipped(SkipReason),
    Queued,
    DeferredError(String),
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub sha: String,
    pub state: ItemState,
}

/// Summary of one poll cycle.
#[derive(Debug, Default)]
pub struct RunReport {
    pub candidates: usize,
    pub kept: usize,
    pub skipped: usize,
    pub queued: usize,
    pub deferred: usize,
    pub state_recovered: bool,
    pub outcomes: Vec<CommitOutcome>,
}

/// The orchestrator: lock, discover, filter, redact, generate, queue,
/// persist. Single-threaded; one run finishes before the next begins.
pub struct Pipeline<'a> {
    pub config: &'a Config,
    pub git: &'a dyn GitProvider,
    pub generator: &'a dyn DraftGenerator,
    pub lock: &'a dyn RunLock,
    started_at: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        git: &'a dyn GitProvider,
        generator: &'a dyn DraftGenerator,
        lock: &'a dyn RunLock,
    ) -> Self {
        Self {
            config,
            git,
            generator,
            lock,
            started_at: utc_now(),
        }
    }

    /// One full iteration under the run lock.
    pub fn run_once(&self, lock_timeout: Duration) -> Result<RunReport, PipelineError> {
        ensure_dirs(&self.config.shipnote_dir, &self.config.queue_dir)
            .map_err(PipelineError::Other)?;
        let _handle = self
            .lock
            .acquire(lock_timeout)
            .map_err(PipelineError::from)?;
        self.run_locked()
    }

    /// Poll until `stop` is set. Lock contention and per-cycle errors are
    /// logged and absorbed; nothing escapes the loop in daemon operation.
    pub fn run_daemon(&self, stop: &AtomicBool) {
        info!(
            repo = %self.config.repo_root.display(),
            interval_secs = self.config.poll_interval_secs,
            "daemon start"
        );
        self.snapshot_outcome("idle");
        while !stop.load(Ordering::SeqCst) {
            match self.run_once(Duration::ZERO) {
                Ok(report) => {
                    if report.deferred > 0 {
                        warn!(
                            deferred = report.deferred,
                            "cycle finished with deferred commits; they retry next interval"
                        );
                    }
                }
                Err(PipelineError::LockBusy) => {
                    warn!("run lock busy; skipping this cycle");
                    self.snapshot_outcome("lock_busy");
                }
                Err(e) => {
                    error!("poll cycle failed: {e}");
                }
            }
            let mut remaining = self.config.poll_interval_secs;
            while remaining > 0 && !stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_secs(1));
                remaining -= 1;
            }
        }
        clear_status(&status_path(&self.config.shipnote_dir));
        info!("daemon stopped gracefully");
    }

    fn run_locked(&self) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();
        let st_path = state_path(&self.config.shipnote_dir);

        let Some(head) = self.git.head_commit()? else {
            info!("repository has no commits yet");
            return Ok(report);
        };

        let had_state_file = st_path.exists();
        let loaded = load_state(&st_path);
        let mut state = loaded.state;
        report.state_recovered = loaded.recovered;
        if loaded.recovered && had_state_file {
            // Corrupted state recovery: reset the baseline to HEAD and pick
            // up new commits from the next cycle.
            warn!("state file unreadable; resetting baseline to current HEAD");
            state.advance_baseline(&head);
            state.last_run_timestamp = Some(utc_now());
            save_state(&st_path, &state)?;
            self.write_snapshot(&state, "state recovered");
            return Ok(report);
        }
        if loaded.recovered {
            info!("no state file found; first-run mode");
        }
        if loaded.rolled_over {
            info!(week = %state.counters.week_key, "weekly counters rolled over");
        }

        let excluded: HashSet<String> = state.processed_commits.iter().cloned().collect();
        let commits = match self.git.commits_since(state.last_commit_sha.as_deref(), &excluded) {
            Ok(commits) => commits,
            Err(GitError::NotInHistory(sha)) => {
                // History rewrite: the old boundary is gone, so re-baseline
                // on HEAD. processed_commits still guards against re-queues.
                warn!(
                    last_commit = %sha,
                    "last processed commit not in current history; resetting baseline to HEAD"
                );
                self.git.commits_since(None, &excluded)?
            }
            Err(e) => return Err(e.into()),
        };

        if commits.is_empty() {
            state.last_run_timestamp = Some(utc_now());
            save_state(&st_path, &state)?;
            self.write_snapshot(&state, "ok");
            info!("poll cycle complete: 0 new commits");
            return Ok(report);
        }

        let branch = self.git.current_branch()?;
        let redactor = Redactor::new(&self.config.secret_patterns);
        let template = self
            .config
            .templates
            .first()
            .cloned()
            .unwrap_or_else(|| "devlog".to_string());

        // Once a commit defers, the baseline stops advancing until it is
        // resolved; otherwise discovery would never return it again. Later
        // successes still land in `processed_commits`, which keeps them
        // from re-queueing.
        let mut baseline_frozen = false;
        for commit in commits {
            if state.is_processed(&commit.sha) {
                // Rebase resilience: a rewritten sha can reappear as "new".
                info!(sha = commit.short_sha(), "skipping already-processed commit");
                if !baseline_frozen {
                    state.advance_baseline(&commit.sha);
                }
                continue;
            }
            report.candidates += 1;

            let commit = match self.enrich(commit, &mut state, &st_path) {
                Ok(c) => c,
                Err(e) => return Err(e),
            };

            match decide(&commit, &self.config.filter_rules) {
                Decision::Skip(reason) => {
                    info!(sha = commit.short_sha(), %reason, "skipping commit");
                    state.counters.record(|c| {
                        c.seen += 1;
                        c.skipped += 1;
                    });
                    state.mark_processed(&commit.sha);
                    if !baseline_frozen {
                        state.advance_baseline(&commit.sha);
                    }
                    report.skipped += 1;
                    report.outcomes.push(CommitOutcome {
                        sha: commit.sha.clone(),
                        state: ItemState::Skipped(reason),
                    });
                    continue;
                }
                Decision::Keep => {}
            }

            let (redacted, redactions) = redactor.redact(&commit.diff);
            if redactions > 0 {
                warn!(
                    sha = commit.short_sha(),
                    matches = redactions,
                    "secret scanner redacted diff content"
                );
            }

            if already_queued(&self.config.queue_dir, &commit.sha) {
                // A previous run wrote the queue file but crashed before the
                // state save. The file is authoritative; just mark it done.
                info!(
                    sha = commit.short_sha(),
                    "draft already queued by an earlier run; marking processed"
                );
                state.counters.record(|c| {
                    c.seen += 1;
                    c.kept += 1;
                    c.queued += 1;
                });
                state.mark_processed(&commit.sha);
                if !baseline_frozen {
                    state.advance_baseline(&commit.sha);
                }
                report.kept += 1;
                report.queued += 1;
                report.outcomes.push(CommitOutcome {
                    sha: commit.sha.clone(),
                    state: ItemState::Queued,
                });
                continue;
            }

            let request = DraftRequest {
                project: self.config.project_name.clone(),
                template: template.clone(),
                branch: branch.clone(),
                commit_sha: commit.sha.clone(),
                author: commit.author.clone(),
                subject: commit.subject.clone(),
                files: commit.files.clone(),
                diff: redacted,
            };
            info!(
                sha = commit.short_sha(),
                subject = %commit.subject,
                diff_chars = request.diff.len(),
                "generating draft"
            );

            let draft = match self.generate_with_retry(&request) {
                Ok(draft) => draft,
                Err(e) => {
                    // Not marked processed: the commit is rediscovered and
                    // retried on the next iteration.
                    error!(sha = commit.short_sha(), "generation failed: {e}");
                    state.counters.record(|c| c.errors += 1);
                    baseline_frozen = true;
                    report.deferred += 1;
                    report.outcomes.push(CommitOutcome {
                        sha: commit.sha.clone(),
                        state: ItemState::DeferredError(e.to_string()),
                    });
                    continue;
                }
            };

            let item = match write_draft(
                &self.config.queue_dir,
                &mut state,
                &commit,
                &draft,
                &self.config.project_name,
            ) {
                Ok(item) => item,
                Err(e) => {
                    // The commit is not marked processed; persist whatever
                    // progress preceded the failure and end the cycle.
                    error!(sha = commit.short_sha(), "queue write failed: {e}");
                    save_state(&st_path, &state)?;
                    self.write_snapshot(&state, "write error");
                    return Err(PipelineError::Write(e.to_string()));
                }
            };
            info!(path = %item.path.display(), "queued draft");

            state.counters.record(|c| {
                c.seen += 1;
                c.kept += 1;
            });
            state.mark_processed(&commit.sha);
            if !baseline_frozen {
                state.advance_baseline(&commit.sha);
            }
            report.kept += 1;
            report.queued += 1;
            report.outcomes.push(CommitOutcome {
                sha: commit.sha.clone(),
                state: ItemState::Queued,
            });
        }

        // One save per batch: every queue file above is already durable
        // before the state that records it.
        state.last_run_timestamp = Some(utc_now());
        save_state(&st_path, &state)?;

        let outcome = if report.deferred > 0 {
            format!("{} error(s)", report.deferred)
        } else {
            "ok".to_string()
        };
        self.write_snapshot(&state, &outcome);

        info!(
            candidates = report.candidates,
            kept = report.kept,
            skipped = report.skipped,
            deferred = report.deferred,
            "poll cycle complete"
        );
        Ok(report)
    }

    /// Fetch changed paths and diff for a candidate. A git failure here is
    /// fatal for the iteration; progress so far is persisted first.
    fn enrich(
        &self,
        mut commit: CommitRecord,
        state: &mut ProcessingState,
        st_path: &std::path::Path,
    ) -> Result<CommitRecord, PipelineError> {
        let fetched = self
            .git
            .changed_paths(&commit.sha)
            .and_then(|files| self.git.diff(&commit.sha).map(|diff| (files, diff)));
        match fetched {
            Ok((files, diff)) => {
                commit.files = files;
                commit.diff = diff;
                Ok(commit)
            }
            Err(e) => {
                error!(sha = commit.short_sha(), "git read failed: {e}");
                save_state(st_path, state)?;
                self.write_snapshot(state, "git error");
                Err(e.into())
            }
        }
    }

    fn generate_with_retry(&self, request: &DraftRequest) -> Result<Draft, GenerateError> {
        match self.generator.generate(request) {
            Ok(draft) => Ok(draft),
            Err(first) => {
                warn!(
                    sha = %request.commit_sha,
                    "generation attempt 1 failed: {first}; retrying once"
                );
                std::thread::sleep(Duration::from_secs(self.config.retry_pause_secs));
                self.generator.generate(request)
            }
        }
    }

    /// Best-effort status snapshot; never fails the run.
    fn write_snapshot(&self, state: &ProcessingState, outcome: &str) {
        let snapshot = StatusSnapshot {
            pid: std::process::id(),
            started_at: self.started_at.clone(),
            last_run_timestamp: state.last_run_timestamp.clone(),
            last_outcome: outcome.to_string(),
            all_time: state.counters.all_time.clone(),
            week: state.counters.week.clone(),
        };
        let path = status_path(&self.config.shipnote_dir);
        if let Err(e) = write_status(&path, &snapshot) {
            warn!("status snapshot write failed: {e}");
        }
    }

    /// Snapshot from persisted state, outside the locked section. Used at
    /// daemon startup and for cycles that never got the lock.
    fn snapshot_outcome(&self, outcome: &str) {
        let loaded = load_state(&state_path(&self.config.shipnote_dir));
        self.write_snapshot(&loaded.state, outcome);
    }
}
