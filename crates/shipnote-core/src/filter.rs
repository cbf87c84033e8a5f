use std::fmt;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::{Regex, RegexBuilder};

use crate::commit::CommitRecord;

/// Outcome of the commit filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Keep,
    Skip(SkipReason),
}

/// Why a commit was skipped. The first matching rule wins; reasons never stack.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MergeCommit,
    /// Commit message matched a configured noise pattern.
    NoiseMessage(String),
    /// Too few changed paths survive the excluded-path globs.
    OnlyExcludedPaths { meaningful: usize, required: usize },
    /// Every changed line is a whitespace-only edit.
    TrivialDiff,
    DiffTooSmall { bytes: usize, required: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MergeCommit => write!(f, "merge commit"),
            SkipReason::NoiseMessage(pattern) => {
                write!(f, "message matched skip pattern '{pattern}'")
            }
            SkipReason::OnlyExcludedPaths {
                meaningful,
                required,
            } => write!(f, "insufficient meaningful files ({meaningful} < {required})"),
            SkipReason::TrivialDiff => write!(f, "trivial whitespace-only diff"),
            SkipReason::DiffTooSmall { bytes, required } => {
                write!(f, "diff below minimum size ({bytes} < {required} bytes)")
            }
        }
    }
}

/// Compiled filter rules, built once from config at loop start.
#[derive(Debug)]
pub struct FilterRules {
    message_patterns: Vec<Regex>,
    excluded_paths: GlobSet,
    pub min_meaningful_files: usize,
    pub min_diff_bytes: usize,
}

impl FilterRules {
    pub fn compile(
        message_patterns: &[String],
        excluded_path_globs: &[String],
        min_meaningful_files: usize,
        min_diff_bytes: usize,
    ) -> Result<Self, crate::config::ConfigError> {
        let mut patterns = Vec::with_capacity(message_patterns.len());
        for raw in message_patterns {
            let re = RegexBuilder::new(raw)
                .case_insensitive(true)
                .build()
                .map_err(|e| crate::config::ConfigError::BadPattern {
                    field: "filter.skip_message_patterns",
                    pattern: raw.clone(),
                    detail: e.to_string(),
                })?;
            patterns.push(re);
        }
        let mut builder = GlobSetBuilder::new();
        for raw in excluded_path_globs {
            let glob = Glob::new(raw).map_err(|e| crate::config::ConfigError::BadPattern {
                field: "filter.excluded_path_globs",
                pattern: raw.clone(),
                detail: e.to_string(),
            })?;
            builder.add(glob);
        }
        let excluded_paths =
            builder
                .build()
                .map_err(|e| crate::config::ConfigError::BadPattern {
                    field: "filter.excluded_path_globs",
                    pattern: String::new(),
                    detail: e.to_string(),
                })?;
        Ok(Self {
            message_patterns: patterns,
            excluded_paths,
            min_meaningful_files,
            min_diff_bytes,
        })
    }

    fn noise_pattern(&self, subject: &str) -> Option<String> {
        self.message_patterns
            .iter()
            .find(|re| re.is_match(subject))
            .map(|re| re.as_str().to_string())
    }

    fn meaningful_files(&self, files: &[String]) -> usize {
        files
            .iter()
            .filter(|path| !self.excluded_paths.is_match(path.as_str()))
            .count()
    }
}

/// Decide keep/skip for a fully populated commit record.
///
/// Pure and deterministic: no repository access, no side effects. Rules run
/// in a fixed order and the first matching skip rule is reported.
pub fn decide(commit: &CommitRecord, rules: &FilterRules) -> Decision {
    if commit.is_merge() {
        return Decision::Skip(SkipReason::MergeCommit);
    }
    if let Some(pattern) = rules.noise_pattern(&commit.subject) {
        return Decision::Skip(SkipReason::NoiseMessage(pattern));
    }
    let meaningful = rules.meaningful_files(&commit.files);
    if meaningful < rules.min_meaningful_files {
        return Decision::Skip(SkipReason::OnlyExcludedPaths {
            meaningful,
            required: rules.min_meaningful_files,
        });
    }
    if whitespace_only(&commit.diff) {
        return Decision::Skip(SkipReason::TrivialDiff);
    }
    if commit.diff.len() < rules.min_diff_bytes {
        return Decision::Skip(SkipReason::DiffTooSmall {
            bytes: commit.diff.len(),
            required: rules.min_diff_bytes,
        });
    }
    Decision::Keep
}

/// True when the removed and added lines differ only in whitespace.
fn whitespace_only(diff: &str) -> bool {
    let mut removed: Vec<String> = Vec::new();
    let mut added: Vec<String> = Vec::new();
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if let Some(rest) = line.strip_prefix('+') {
            added.push(squash_whitespace(rest));
        } else if let Some(rest) = line.strip_prefix('-') {
            removed.push(squash_whitespace(rest));
        }
    }
    removed.sort();
    added.sort();
    removed == added
}

fn squash_whitespace(line: &str) -> String {
    line.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> FilterRules {
        FilterRules::compile(
            &["^wip".into(), "^fix typo".into()],
            &["*.lock".into(), ".env*".into()],
            1,
            0,
        )
        .unwrap()
    }

    fn commit(subject: &str, files: &[&str], diff: &str) -> CommitRecord {
        CommitRecord {
            sha: "abcdef0123456789".into(),
            author: "Tester".into(),
            date: "2026-08-24T00:00:00Z".into(),
            subject: subject.into(),
            parents: 1,
            files: files.iter().map(|s| s.to_string()).collect(),
            diff: diff.into(),
        }
    }

    #[test]
    fn merge_commits_are_skipped_first() {
        let mut c = commit("wip merge branch", &["src/main.rs"], "+real change\n");
        c.parents = 2;
        assert_eq!(decide(&c, &rules()), Decision::Skip(SkipReason::MergeCommit));
    }

    #[test]
    fn noise_message_is_skipped_with_pattern_reported() {
        let c = commit("wip save", &["src/main.rs"], "+real change\n");
        match decide(&c, &rules()) {
            Decision::Skip(SkipReason::NoiseMessage(p)) => assert_eq!(p, "^wip"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn noise_patterns_match_case_insensitively() {
        let c = commit("WIP: half done", &["src/main.rs"], "+real change\n");
        assert!(matches!(
            decide(&c, &rules()),
            Decision::Skip(SkipReason::NoiseMessage(_))
        ));
    }

    #[test]
    fn only_excluded_paths_is_skipped() {
        let c = commit("deps update", &["Cargo.lock", ".env.local"], "+lockfile\n");
        assert_eq!(
            decide(&c, &rules()),
            Decision::Skip(SkipReason::OnlyExcludedPaths {
                meaningful: 0,
                required: 1
            })
        );
    }

    #[test]
    fn whitespace_only_diff_is_trivial() {
        let diff = "--- a/src/main.rs\n+++ b/src/main.rs\n-    let x = 1;\n+\tlet x = 1;\n";
        let c = commit("reformat", &["src/main.rs"], diff);
        assert_eq!(decide(&c, &rules()), Decision::Skip(SkipReason::TrivialDiff));
    }

    #[test]
    fn empty_diff_is_trivial() {
        let c = commit("empty", &["src/main.rs"], "");
        assert_eq!(decide(&c, &rules()), Decision::Skip(SkipReason::TrivialDiff));
    }

    #[test]
    fn small_diff_is_skipped_when_threshold_set() {
        let r = FilterRules::compile(&[], &[], 0, 64).unwrap();
        let c = commit("tiny", &["src/main.rs"], "+x\n");
        assert!(matches!(
            decide(&c, &r),
            Decision::Skip(SkipReason::DiffTooSmall { .. })
        ));
    }

    #[test]
    fn meaningful_commit_is_kept() {
        let diff = "--- a/src/planner.rs\n+++ b/src/planner.rs\n-old_plan();\n+new_plan();\n";
        let c = commit("Refactor planner", &["src/planner.rs", "Cargo.lock"], diff);
        assert_eq!(decide(&c, &rules()), Decision::Keep);
    }

    #[test]
    fn first_matching_rule_wins() {
        // Noise message and excluded paths both apply; noise is reported.
        let c = commit("wip save", &["Cargo.lock"], "");
        assert!(matches!(
            decide(&c, &rules()),
            Decision::Skip(SkipReason::NoiseMessage(_))
        ));
    }

    #[test]
    fn invalid_message_pattern_is_a_config_error() {
        let err = FilterRules::compile(&["(unclosed".into()], &[], 1, 0).unwrap_err();
        assert!(err.to_string().contains("filter.skip_message_patterns"));
    }
}
