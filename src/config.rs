//! Configuration for the follow-up daemon.
//!
//! Settings are read from `followup.toml`, with every field optional and
//! defaulted. Secrets never live in the file; they come from the
//! environment (loaded through `.env` at startup).
//!
//! # Configuration File Format
//!
//! ```toml
//! [source]
//! cache_path = "/Users/me/Library/Application Support/Granola/cache-v3.json"
//! watch_debounce_ms = 500
//!
//! [maturation]
//! stability_window_seconds = 60
//! min_transcript_length = 50
//! max_wait_minutes = 120
//!
//! [daemon]
//! cycle_interval_seconds = 300
//!
//! [llm]
//! base_url = "http://localhost:1234/v1"
//! model = "local-model"
//! temperature = 0.3
//! max_tokens = 2000
//! timeout_seconds = 120
//!
//! [tracker]
//! base_url = "https://api.trello.com/1"
//! timeout_seconds = 30
//!
//! [retry]
//! max_attempts = 5
//! base_delay_seconds = 30
//! poll_interval_seconds = 60
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Transcript source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Path to the cache file exported by the meeting recorder.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// Minimum gap between change signals from the file watcher.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

fn default_cache_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Library/Application Support/Granola/cache-v3.json")
}

fn default_watch_debounce_ms() -> u64 {
    500
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}

/// Policy knobs for deciding when a transcript is final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaturationSection {
    /// How long the fingerprint must stay unchanged before extraction.
    #[serde(default = "default_stability_window_seconds")]
    pub stability_window_seconds: i64,
    /// Transcripts shorter than this never leave `pending` on their own.
    #[serde(default = "default_min_transcript_length")]
    pub min_transcript_length: usize,
    /// Escape valve: force maturation after this long, stability aside.
    #[serde(default = "default_max_wait_minutes")]
    pub max_wait_minutes: i64,
}

fn default_stability_window_seconds() -> i64 {
    60
}

fn default_min_transcript_length() -> usize {
    50
}

fn default_max_wait_minutes() -> i64 {
    120
}

impl Default for MaturationSection {
    fn default() -> Self {
        Self {
            stability_window_seconds: default_stability_window_seconds(),
            min_transcript_length: default_min_transcript_length(),
            max_wait_minutes: default_max_wait_minutes(),
        }
    }
}

/// Orchestrator loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    /// Idle interval between cycles when no change signal arrives.
    #[serde(default = "default_cycle_interval_seconds")]
    pub cycle_interval_seconds: u64,
}

fn default_cycle_interval_seconds() -> u64 {
    300
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            cycle_interval_seconds: default_cycle_interval_seconds(),
        }
    }
}

/// Extraction LLM endpoint (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_llm_base_url() -> String {
    "http://localhost:1234/v1".to_string()
}

fn default_llm_model() -> String {
    "local-model".to_string()
}

fn default_llm_temperature() -> f64 {
    0.3
}

fn default_llm_max_tokens() -> u32 {
    2000
}

fn default_llm_timeout_seconds() -> u64 {
    120
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

/// Task-tracker API settings. Credentials come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSection {
    #[serde(default = "default_tracker_base_url")]
    pub base_url: String,
    #[serde(default = "default_tracker_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_tracker_base_url() -> String {
    "https://api.trello.com/1".to_string()
}

fn default_tracker_timeout_seconds() -> u64 {
    30
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            base_url: default_tracker_base_url(),
            timeout_seconds: default_tracker_timeout_seconds(),
        }
    }
}

/// Retry scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: i64,
    /// First-retry delay; later delays double per attempt, unbounded.
    #[serde(default = "default_retry_base_delay_seconds")]
    pub base_delay_seconds: i64,
    #[serde(default = "default_retry_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

fn default_retry_max_attempts() -> i64 {
    5
}

fn default_retry_base_delay_seconds() -> i64 {
    30
}

fn default_retry_poll_interval_seconds() -> u64 {
    60
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_seconds: default_retry_base_delay_seconds(),
            poll_interval_seconds: default_retry_poll_interval_seconds(),
        }
    }
}

/// Database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("followup/followup.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// The complete followup.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowupConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub maturation: MaturationSection,
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub database: DatabaseSection,
}

impl FollowupConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse followup.toml")
    }

    /// Load from the given path, or fall back to defaults when the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize followup.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Default config file location (`~/.config/followup/followup.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("followup/followup.toml")
    }
}

/// Credentials and webhook targets, read from the environment only.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub tracker_key: Option<String>,
    pub tracker_token: Option<String>,
    pub tracker_list_id: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
}

impl Secrets {
    /// Read secrets from the environment. `.env` loading happens earlier
    /// in `main`, so plain `std::env::var` is enough here.
    pub fn from_env() -> Self {
        Self {
            tracker_key: std::env::var("FOLLOWUP_TRACKER_KEY").ok(),
            tracker_token: std::env::var("FOLLOWUP_TRACKER_TOKEN").ok(),
            tracker_list_id: std::env::var("FOLLOWUP_TRACKER_LIST_ID").ok(),
            slack_webhook_url: std::env::var("FOLLOWUP_SLACK_WEBHOOK_URL").ok(),
            discord_webhook_url: std::env::var("FOLLOWUP_DISCORD_WEBHOOK_URL").ok(),
        }
    }

    /// Tracker credentials as a triple, or `None` if any piece is missing.
    pub fn tracker_credentials(&self) -> Option<(String, String, String)> {
        match (&self.tracker_key, &self.tracker_token, &self.tracker_list_id) {
            (Some(k), Some(t), Some(l)) => Some((k.clone(), t.clone(), l.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = FollowupConfig::parse("").unwrap();
        assert_eq!(config.maturation.stability_window_seconds, 60);
        assert_eq!(config.maturation.min_transcript_length, 50);
        assert_eq!(config.maturation.max_wait_minutes, 120);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_seconds, 30);
        assert_eq!(config.retry.poll_interval_seconds, 60);
        assert_eq!(config.llm.base_url, "http://localhost:1234/v1");
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.llm.timeout_seconds, 120);
        assert_eq!(config.tracker.timeout_seconds, 30);
        assert_eq!(config.source.watch_debounce_ms, 500);
        assert_eq!(config.daemon.cycle_interval_seconds, 300);
    }

    #[test]
    fn test_parse_partial_section() {
        let content = r#"
[maturation]
stability_window_seconds = 10

[retry]
base_delay_seconds = 2
"#;
        let config = FollowupConfig::parse(content).unwrap();
        assert_eq!(config.maturation.stability_window_seconds, 10);
        // Unspecified fields in a present section keep their defaults.
        assert_eq!(config.maturation.min_transcript_length, 50);
        assert_eq!(config.retry.base_delay_seconds, 2);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_parse_invalid_toml_fails() {
        assert!(FollowupConfig::parse("[maturation\nbroken").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = FollowupConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("followup.toml");

        let mut config = FollowupConfig::default();
        config.llm.model = "qwen-72b".to_string();
        config.maturation.max_wait_minutes = 45;
        config.save(&path).unwrap();

        let loaded = FollowupConfig::load(&path).unwrap();
        assert_eq!(loaded.llm.model, "qwen-72b");
        assert_eq!(loaded.maturation.max_wait_minutes, 45);
    }

    #[test]
    fn test_tracker_credentials_require_all_three() {
        let secrets = Secrets {
            tracker_key: Some("k".to_string()),
            tracker_token: Some("t".to_string()),
            tracker_list_id: None,
            ..Default::default()
        };
        assert!(secrets.tracker_credentials().is_none());

        let secrets = Secrets {
            tracker_key: Some("k".to_string()),
            tracker_token: Some("t".to_string()),
            tracker_list_id: Some("l".to_string()),
            ..Default::default()
        };
        assert_eq!(
            secrets.tracker_credentials(),
            Some(("k".to_string(), "t".to_string(), "l".to_string()))
        );
    }
}
