use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use shipnote_core::CommitRecord;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("path is not a git work tree: {0}")]
    NotARepo(PathBuf),
    #[error("commit {0} is not in current history")]
    NotInHistory(String),
    #[error("git {cmd} failed: {stderr}")]
    Command { cmd: String, stderr: String },
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Read-only view of the monitored repository's history.
///
/// The pipeline consumes this trait; tests substitute an in-memory
/// implementation with scripted commits.
pub trait GitProvider {
    /// HEAD commit sha, or `None` for an empty repository.
    fn head_commit(&self) -> Result<Option<String>, GitError>;
    fn current_branch(&self) -> Result<String, GitError>;
    /// Commits reachable from HEAD but not from `last_sha`, oldest first,
    /// minus anything in `excluded`. Records carry metadata only; `diff`
    /// and `files` are fetched separately for surviving candidates.
    fn commits_since(
        &self,
        last_sha: Option<&str>,
        excluded: &HashSet<String>,
    ) -> Result<Vec<CommitRecord>, GitError>;
    fn diff(&self, sha: &str) -> Result<String, GitError>;
    fn changed_paths(&self, sha: &str) -> Result<Vec<String>, GitError>;
}

/// `GitProvider` backed by the `git` binary. Runs read-only commands only.
pub struct CliGit {
    repo_root: PathBuf,
}

const FIELD_SEP: char = '\u{1f}';
const LOG_FORMAT: &str = "%H%x1f%P%x1f%an%x1f%aI%x1f%s";

impl CliGit {
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    pub fn ensure_repo(&self) -> Result<(), GitError> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        if out.trim() == "true" {
            Ok(())
        } else {
            Err(GitError::NotARepo(self.repo_root.clone()))
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GitError::Command {
                cmd: args.join(" "),
                stderr: if stderr.is_empty() {
                    "unknown git error".into()
                } else {
                    stderr
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Exit status of a git command, without treating failure as an error.
    fn probe(&self, args: &[&str]) -> Result<bool, GitError> {
        let status = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()?
            .status;
        Ok(status.success())
    }

    fn commit_in_history(&self, sha: &str) -> Result<bool, GitError> {
        let exists = self.probe(&["cat-file", "-e", &format!("{sha}^{{commit}}")])?;
        if !exists {
            return Ok(false);
        }
        self.probe(&["merge-base", "--is-ancestor", sha, "HEAD"])
    }
}

fn parse_log(output: &str) -> Vec<CommitRecord> {
    let mut commits = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.splitn(5, FIELD_SEP).collect();
        if parts.len() != 5 {
            continue;
        }
        commits.push(CommitRecord {
            sha: parts[0].trim().to_string(),
            parents: parts[1].split_whitespace().count(),
            author: parts[2].trim().to_string(),
            date: parts[3].trim().to_string(),
            subject: parts[4].trim().to_string(),
            files: Vec::new(),
            diff: String::new(),
        });
    }
    commits
}

impl GitProvider for CliGit {
    fn head_commit(&self) -> Result<Option<String>, GitError> {
        self.ensure_repo()?;
        match self.run(&["rev-parse", "HEAD"]) {
            Ok(out) => {
                let sha = out.trim().to_string();
                Ok(if sha.is_empty() { None } else { Some(sha) })
            }
            // Unborn HEAD: repository initialized but no commits yet.
            Err(GitError::Command { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn current_branch(&self) -> Result<String, GitError> {
        match self.run(&["rev-parse", "--abbrev-ref", "HEAD"]) {
            Ok(out) if !out.trim().is_empty() => Ok(out.trim().to_string()),
            _ => Ok("unborn".to_string()),
        }
    }

    fn commits_since(
        &self,
        last_sha: Option<&str>,
        excluded: &HashSet<String>,
    ) -> Result<Vec<CommitRecord>, GitError> {
        self.ensure_repo()?;
        let format = format!("--format={LOG_FORMAT}");
        let output = match last_sha {
            // First run: baseline on the HEAD commit only, not all history.
            None => self.run(&["log", &format, "-n", "1"])?,
            Some(last) => {
                if !self.commit_in_history(last)? {
                    return Err(GitError::NotInHistory(last.to_string()));
                }
                let range = format!("{last}..HEAD");
                self.run(&["log", "--reverse", &format, &range])?
            }
        };
        Ok(parse_log(&output)
            .into_iter()
            .filter(|c| !excluded.contains(&c.sha))
            .collect())
    }

    fn diff(&self, sha: &str) -> Result<String, GitError> {
        let range = format!("{sha}^..{sha}");
        match self.run(&["diff", &range]) {
            Ok(out) => Ok(out),
            // Root commits have no parent; show the whole patch instead.
            Err(GitError::Command { .. }) => self.run(&["show", "--format=", sha]),
            Err(e) => Err(e),
        }
    }

    fn changed_paths(&self, sha: &str) -> Result<Vec<String>, GitError> {
        let range = format!("{sha}^..{sha}");
        let output = match self.run(&["diff", "--name-only", &range]) {
            Ok(out) => out,
            Err(GitError::Command { .. }) => {
                self.run(&["show", "--format=", "--name-only", sha])?
            }
            Err(e) => return Err(e),
        };
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_splits_on_unit_separator() {
        let line = format!(
            "abc123{s}p1 p2{s}Alice{s}2026-08-24T10:00:00+00:00{s}Merge branch | with pipes",
            s = FIELD_SEP
        );
        let commits = parse_log(&line);
        assert_eq!(commits.len(), 1);
        let c = &commits[0];
        assert_eq!(c.sha, "abc123");
        assert_eq!(c.parents, 2);
        assert_eq!(c.author, "Alice");
        assert_eq!(c.subject, "Merge branch | with pipes");
        assert!(c.is_merge());
    }

    #[test]
    fn parse_log_skips_malformed_lines() {
        let commits = parse_log("garbage line without separators\n");
        assert!(commits.is_empty());
    }

    #[test]
    fn parse_log_counts_root_commit_parents_as_zero() {
        let line = format!(
            "abc123{s}{s}Alice{s}2026-08-24T10:00:00+00:00{s}initial",
            s = FIELD_SEP
        );
        let commits = parse_log(&line);
        assert_eq!(commits[0].parents, 0);
    }

    // End-to-end tests against a real repository.
    mod with_git {
        use super::*;
        use std::fs;
        use std::process::Command;

        fn git(dir: &Path, args: &[&str]) {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir)
                .env("GIT_AUTHOR_NAME", "Tester")
                .env("GIT_AUTHOR_EMAIL", "t@example.com")
                .env("GIT_COMMITTER_NAME", "Tester")
                .env("GIT_COMMITTER_EMAIL", "t@example.com")
                .status()
                .expect("git binary available");
            assert!(status.success(), "git {args:?} failed");
        }

        fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
            fs::write(dir.join(name), content).unwrap();
            git(dir, &["add", "."]);
            git(dir, &["commit", "-q", "-m", message]);
        }

        fn init_repo(dir: &Path) {
            git(dir, &["init", "-q", "-b", "main"]);
        }

        #[test]
        fn empty_repo_has_no_head() {
            let tmp = tempfile::tempdir().unwrap();
            init_repo(tmp.path());
            let g = CliGit::new(tmp.path().to_path_buf());
            assert!(g.head_commit().unwrap().is_none());
        }

        #[test]
        fn discovers_new_commits_oldest_first() {
            let tmp = tempfile::tempdir().unwrap();
            init_repo(tmp.path());
            commit_file(tmp.path(), "a.txt", "one", "first");
            let g = CliGit::new(tmp.path().to_path_buf());
            let base = g.head_commit().unwrap().unwrap();

            commit_file(tmp.path(), "b.txt", "two", "second");
            commit_file(tmp.path(), "c.txt", "three", "third");

            let commits = g.commits_since(Some(&base), &HashSet::new()).unwrap();
            assert_eq!(commits.len(), 2);
            assert_eq!(commits[0].subject, "second");
            assert_eq!(commits[1].subject, "third");
            assert_eq!(commits[0].parents, 1);
        }

        #[test]
        fn excluded_shas_are_filtered_out() {
            let tmp = tempfile::tempdir().unwrap();
            init_repo(tmp.path());
            commit_file(tmp.path(), "a.txt", "one", "first");
            let g = CliGit::new(tmp.path().to_path_buf());
            let base = g.head_commit().unwrap().unwrap();
            commit_file(tmp.path(), "b.txt", "two", "second");
            let sha = g.head_commit().unwrap().unwrap();

            let excluded: HashSet<String> = [sha].into_iter().collect();
            let commits = g.commits_since(Some(&base), &excluded).unwrap();
            assert!(commits.is_empty());
        }

        #[test]
        fn unknown_baseline_reports_not_in_history() {
            let tmp = tempfile::tempdir().unwrap();
            init_repo(tmp.path());
            commit_file(tmp.path(), "a.txt", "one", "first");
            let g = CliGit::new(tmp.path().to_path_buf());
            let err = g
                .commits_since(Some("0000000000000000000000000000000000000000"), &HashSet::new())
                .unwrap_err();
            assert!(matches!(err, GitError::NotInHistory(_)));
        }

        #[test]
        fn diff_and_paths_work_for_root_commit() {
            let tmp = tempfile::tempdir().unwrap();
            init_repo(tmp.path());
            commit_file(tmp.path(), "a.txt", "hello\n", "first");
            let g = CliGit::new(tmp.path().to_path_buf());
            let sha = g.head_commit().unwrap().unwrap();

            let diff = g.diff(&sha).unwrap();
            assert!(diff.contains("+hello"));
            assert_eq!(g.changed_paths(&sha).unwrap(), vec!["a.txt".to_string()]);
        }

        #[test]
        fn first_run_baselines_on_head_only() {
            let tmp = tempfile::tempdir().unwrap();
            init_repo(tmp.path());
            commit_file(tmp.path(), "a.txt", "one", "first");
            commit_file(tmp.path(), "b.txt", "two", "second");
            let g = CliGit::new(tmp.path().to_path_buf());
            let commits = g.commits_since(None, &HashSet::new()).unwrap();
            assert_eq!(commits.len(), 1);
            assert_eq!(commits[0].subject, "second");
        }

        #[test]
        fn non_repo_dir_is_rejected() {
            let tmp = tempfile::tempdir().unwrap();
            let g = CliGit::new(tmp.path().to_path_buf());
            assert!(g.commits_since(None, &HashSet::new()).is_err());
        }
    }
}
