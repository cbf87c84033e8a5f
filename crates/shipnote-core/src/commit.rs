use serde::{Deserialize, Serialize};

/// Immutable metadata and patch text for a single commit, as read from git.
///
/// Discovery returns records with `files` and `diff` empty; the pipeline
/// fills them in before the commit reaches the filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    /// Full commit hash.
    pub sha: String,
    pub author: String,
    /// Author date, RFC3339.
    pub date: String,
    /// First line of the commit message.
    pub subject: String,
    /// Parent count; more than one means a merge commit.
    #[serde(default)]
    pub parents: usize,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub diff: String,
}

impl CommitRecord {
    /// Abbreviated hash for log lines and queue filenames.
    pub fn short_sha(&self) -> &str {
        let end = self.sha.len().min(7);
        &self.sha[..end]
    }

    pub fn is_merge(&self) -> bool {
        self.parents > 1
    }
}
