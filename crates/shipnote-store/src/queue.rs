use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use shipnote_core::CommitRecord;

use crate::state::ProcessingState;
use crate::{utc_now, write_atomic};

/// A generated draft ready to be queued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    /// Target template identity.
    pub template: String,
    pub title: String,
    /// Content category reported by the generator.
    pub category: String,
    /// Markdown body.
    pub body: String,
}

/// A queued draft file. Never mutated after write; consumed by a human
/// reviewer outside this system.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub path: PathBuf,
    pub queue_number: u64,
    pub commit_sha: String,
    pub template: String,
    pub category: String,
    pub generated_at: String,
}

/// Write one draft to the queue directory and advance the in-memory queue
/// counters. The caller persists state afterwards; the file is always
/// durable before the state that records it.
///
/// The filename combines counter, date, subject slug, template, and short
/// sha, so two drafts can never overwrite each other even within the same
/// second.
pub fn write_draft(
    queue_dir: &Path,
    state: &mut ProcessingState,
    commit: &CommitRecord,
    draft: &Draft,
    project_name: &str,
) -> Result<QueueItem> {
    std::fs::create_dir_all(queue_dir)
        .with_context(|| format!("creating queue dir: {}", queue_dir.display()))?;

    state.queue_counter += 1;
    let queue_number = state.queue_counter;
    let generated_at = utc_now();
    let date_part = generated_at.split('T').next().unwrap_or("").to_string();
    let filename = format!(
        "{queue_number:03}_{date_part}_{slug}_{template}_{sha}.md",
        slug = slugify(&commit.subject),
        template = draft.template,
        sha = commit.short_sha(),
    );
    let path = queue_dir.join(&filename);

    let markdown = render(draft, commit, project_name, queue_number, &generated_at);
    write_atomic(&path, markdown.as_bytes())
        .with_context(|| format!("writing queue file: {}", path.display()))?;

    state.counters.record(|c| c.queued += 1);

    Ok(QueueItem {
        path,
        queue_number,
        commit_sha: commit.sha.clone(),
        template: draft.template.clone(),
        category: draft.category.clone(),
        generated_at,
    })
}

/// True when a queue file for this commit already exists, regardless of the
/// counter or date it was written under. Used to recover from a crash
/// between a queue write and the state save that records it.
pub fn already_queued(queue_dir: &Path, sha: &str) -> bool {
    let suffix = format!("_{}.md", &sha[..sha.len().min(7)]);
    let Ok(entries) = std::fs::read_dir(queue_dir) else {
        return false;
    };
    entries
        .flatten()
        .any(|e| e.file_name().to_string_lossy().ends_with(&suffix))
}

/// Frontmatter keys are a stable contract: `queue`, `template`, `category`,
/// `commit`, `commit_message`, `generated_at`, `project`.
fn render(
    draft: &Draft,
    commit: &CommitRecord,
    project_name: &str,
    queue_number: u64,
    generated_at: &str,
) -> String {
    let mut lines = vec![
        "---".to_string(),
        format!("queue: {queue_number}"),
        format!("template: {}", draft.template),
        format!("category: {}", yaml_quote(&draft.category)),
        format!("title: {}", yaml_quote(&draft.title)),
        format!("commit: {}", commit.sha),
        format!("commit_message: {}", yaml_quote(&commit.subject)),
        format!("generated_at: {}", yaml_quote(generated_at)),
        format!("project: {}", yaml_quote(project_name)),
        "---".to_string(),
    ];
    lines.push(String::new());
    lines.push(draft.body.trim().to_string());
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn yaml_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn slugify(subject: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in subject.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 50 {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "commit".to_string()
    } else {
        slug
    }
}
