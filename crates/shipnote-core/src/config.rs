use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::FilterRules;

/// Config file location, relative to the repository root.
pub const CONFIG_RELATIVE_PATH: &str = ".shipnote/config.yaml";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_LOCK_STALE_SECS: u64 = 3600;
pub const DEFAULT_RETRY_PAUSE_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid pattern in {field}: '{pattern}': {detail}")]
    BadPattern {
        field: &'static str,
        pattern: String,
        detail: String,
    },
}

/// Raw filter settings as they appear in config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Regexes matched (case-insensitively) against the commit subject.
    pub skip_message_patterns: Vec<String>,
    /// Globs for paths that never count as meaningful changes.
    pub excluded_path_globs: Vec<String>,
    pub min_meaningful_files: usize,
    /// 0 disables the minimum-diff-size rule.
    pub min_diff_bytes: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            skip_message_patterns: vec![
                "^wip".into(),
                "^fixup".into(),
                "^fix typo".into(),
                "^merge branch".into(),
            ],
            excluded_path_globs: vec!["*.lock".into(), ".env*".into(), "*.min.*".into()],
            min_meaningful_files: 1,
            min_diff_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    /// External draft command argv; receives a JSON request on stdin and
    /// must print a JSON draft on stdout.
    pub command: Vec<String>,
}

/// On-disk config shape. Every field has a default so a partial file loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub project_name: String,
    pub poll_interval_secs: u64,
    pub lock_stale_secs: u64,
    /// Pause before the single in-cycle generation retry.
    pub retry_pause_secs: u64,
    /// Queue directory, relative to the repository root.
    pub queue_dir: String,
    /// Template identities available to the generator; the first is the
    /// target for new drafts.
    pub templates: Vec<String>,
    pub generator: GeneratorSettings,
    pub filter: FilterSettings,
    /// Extra secret regexes applied after the built-in redaction table.
    pub secret_patterns: Vec<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            project_name: "shipnote".into(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            lock_stale_secs: DEFAULT_LOCK_STALE_SECS,
            retry_pause_secs: DEFAULT_RETRY_PAUSE_SECS,
            queue_dir: ".shipnote/queue".into(),
            templates: vec!["devlog".into()],
            generator: GeneratorSettings::default(),
            filter: FilterSettings::default(),
            secret_patterns: Vec::new(),
        }
    }
}

/// Resolved, validated configuration passed read-only through the pipeline.
#[derive(Debug)]
pub struct Config {
    pub repo_root: PathBuf,
    pub shipnote_dir: PathBuf,
    pub queue_dir: PathBuf,
    pub project_name: String,
    pub poll_interval_secs: u64,
    pub lock_stale_secs: u64,
    pub retry_pause_secs: u64,
    pub templates: Vec<String>,
    pub generator_command: Vec<String>,
    pub filter_rules: FilterRules,
    pub secret_patterns: Vec<Regex>,
    pub raw: RawConfig,
}

impl Config {
    /// Load and validate config for a repository. A missing config file is
    /// not an error; defaults apply until `shipnote init` writes one.
    pub fn load(repo_root: &Path) -> Result<Self, ConfigError> {
        let path = repo_root.join(CONFIG_RELATIVE_PATH);
        let raw = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
                path: path.clone(),
                source,
            })?
        } else {
            RawConfig::default()
        };
        Self::resolve(repo_root, raw)
    }

    pub fn resolve(repo_root: &Path, raw: RawConfig) -> Result<Self, ConfigError> {
        let filter_rules = FilterRules::compile(
            &raw.filter.skip_message_patterns,
            &raw.filter.excluded_path_globs,
            raw.filter.min_meaningful_files,
            raw.filter.min_diff_bytes,
        )?;
        let mut secret_patterns = Vec::with_capacity(raw.secret_patterns.len());
        for pattern in &raw.secret_patterns {
            let re = Regex::new(pattern).map_err(|e| ConfigError::BadPattern {
                field: "secret_patterns",
                pattern: pattern.clone(),
                detail: e.to_string(),
            })?;
            secret_patterns.push(re);
        }
        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            shipnote_dir: repo_root.join(".shipnote"),
            queue_dir: repo_root.join(&raw.queue_dir),
            project_name: raw.project_name.clone(),
            poll_interval_secs: raw.poll_interval_secs,
            lock_stale_secs: raw.lock_stale_secs,
            retry_pause_secs: raw.retry_pause_secs,
            templates: raw.templates.clone(),
            generator_command: raw.generator.command.clone(),
            filter_rules,
            secret_patterns,
            raw,
        })
    }

    /// Commented starter config written by `shipnote init`.
    pub fn starter_yaml(project_name: &str) -> String {
        format!(
            "\
# shipnote configuration
project_name: {project_name}

# Seconds between daemon poll cycles.
poll_interval_secs: 300

# Where accepted drafts land, relative to the repo root.
queue_dir: .shipnote/queue

# Template identities; the first one is used for new drafts.
templates:
  - devlog

# External draft generator: argv invoked per kept commit. It receives a
# JSON request on stdin and must print {{\"title\", \"category\", \"body\"}} on stdout.
generator:
  command: []

filter:
  skip_message_patterns:
    - \"^wip\"
    - \"^fixup\"
    - \"^fix typo\"
    - \"^merge branch\"
  excluded_path_globs:
    - \"*.lock\"
    - \".env*\"
    - \"*.min.*\"
  min_meaningful_files: 1
  min_diff_bytes: 0

# Extra secret regexes applied on top of the built-in redaction table.
secret_patterns: []
"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_loads_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(cfg.templates, vec!["devlog".to_string()]);
        assert_eq!(cfg.queue_dir, tmp.path().join(".shipnote/queue"));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".shipnote");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.yaml"),
            "project_name: demo\npoll_interval_secs: 10\n",
        )
        .unwrap();
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.project_name, "demo");
        assert_eq!(cfg.poll_interval_secs, 10);
        assert_eq!(cfg.lock_stale_secs, DEFAULT_LOCK_STALE_SECS);
    }

    #[test]
    fn invalid_secret_pattern_is_rejected_at_load() {
        let raw = RawConfig {
            secret_patterns: vec!["[unclosed".into()],
            ..RawConfig::default()
        };
        let err = Config::resolve(Path::new("/tmp/x"), raw).unwrap_err();
        assert!(err.to_string().contains("secret_patterns"));
    }

    #[test]
    fn starter_yaml_parses_back() {
        let text = Config::starter_yaml("demo");
        let raw: RawConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(raw.project_name, "demo");
        assert_eq!(raw.templates, vec!["devlog".to_string()]);
        assert!(raw.generator.command.is_empty());
    }

    #[test]
    fn invalid_yaml_is_an_error_not_a_default() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".shipnote");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.yaml"), "poll_interval_secs: [nope").unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }
}
