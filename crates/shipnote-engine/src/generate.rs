use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shipnote_store::queue::Draft;

/// Redacted context handed to the external draft generator. Nothing in this
/// payload may contain unscrubbed diff text.
#[derive(Debug, Clone, Serialize)]
pub struct DraftRequest {
    pub project: String,
    pub template: String,
    pub branch: String,
    pub commit_sha: String,
    pub author: String,
    pub subject: String,
    pub files: Vec<String>,
    /// Redacted patch text.
    pub diff: String,
}

/// Per-commit generation failure. Both kinds defer the commit to the next
/// iteration; the split exists so logs can tell a dead provider from a
/// garbled response.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("draft generator transport failure: {0}")]
    Transport(String),
    #[error("draft generator returned a malformed response: {0}")]
    Malformed(String),
}

/// Black-box draft producer. The pipeline knows nothing about how drafts
/// are made; it sees a well-formed draft or a typed failure.
pub trait DraftGenerator {
    fn generate(&self, request: &DraftRequest) -> Result<Draft, GenerateError>;
}

/// Expected shape of the generator command's stdout.
#[derive(Debug, Deserialize)]
struct GeneratorResponse {
    title: String,
    #[serde(default = "default_category")]
    category: String,
    body: String,
}

fn default_category() -> String {
    "general".to_string()
}

/// `DraftGenerator` that spawns a configured command, writes the request as
/// JSON to its stdin, and parses a JSON draft from its stdout.
pub struct CommandGenerator {
    argv: Vec<String>,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl DraftGenerator for CommandGenerator {
    fn generate(&self, request: &DraftRequest) -> Result<Draft, GenerateError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(GenerateError::Transport(
                "no generator command configured (set generator.command in config.yaml)".into(),
            ));
        };
        let payload = serde_json::to_vec(request)
            .map_err(|e| GenerateError::Transport(format!("request encoding failed: {e}")))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GenerateError::Transport(format!("failed to spawn {program}: {e}")))?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(&payload)
                .map_err(|e| GenerateError::Transport(format!("writing request: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| GenerateError::Transport(format!("waiting for generator: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GenerateError::Transport(format!(
                "generator exited with {}: {stderr}",
                output.status
            )));
        }

        let response: GeneratorResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| GenerateError::Malformed(e.to_string()))?;
        Ok(Draft {
            template: request.template.clone(),
            title: response.title,
            category: response.category,
            body: response.body,
        })
    }
}
