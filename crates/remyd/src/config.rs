//! Daemon configuration.
//!
//! Configuration lives in /etc/remy/config.toml; the REMY_CONFIG
//! environment variable points somewhere else for development. Every field
//! has a serde default so a missing or partial file still yields a working
//! daemon, and out-of-range values are clamped via the `effective_*`
//! accessors rather than rejected.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/remy";
const CONFIG_FILE: &str = "config.toml";

/// Remy data directory (database, logs)
pub const DATA_DIR: &str = "/var/lib/remy";

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the chat API
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Per-request timeout in seconds (valid: 10-600)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7369".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl ServerConfig {
    pub fn effective_request_timeout(&self) -> u64 {
        self.request_timeout_secs.clamp(10, 600)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// SQLite database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    format!("{}/remy.db", DATA_DIR)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Language backend settings (Ollama)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Base URL of the Ollama server
    #[serde(default = "default_language_endpoint")]
    pub endpoint: String,

    /// Model name passed with every request
    #[serde(default = "default_language_model")]
    pub model: String,

    /// Per-call timeout in seconds (valid: 5-600)
    #[serde(default = "default_language_timeout")]
    pub timeout_secs: u64,

    /// How long the model stays loaded between calls
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

fn default_language_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_language_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_language_timeout() -> u64 {
    120
}

fn default_keep_alive() -> String {
    "5m".to_string()
}

impl LanguageConfig {
    pub fn effective_timeout(&self) -> u64 {
        self.timeout_secs.clamp(5, 600)
    }
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_language_endpoint(),
            model: default_language_model(),
            timeout_secs: default_language_timeout(),
            keep_alive: default_keep_alive(),
        }
    }
}

/// Fuzzy recipe matcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum similarity score to count as a match (valid: 0-100)
    #[serde(default = "default_match_threshold")]
    pub threshold: f64,

    /// Maximum candidates returned per search (valid: 1-20)
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Runner-up/top score ratio above which a search is ambiguous
    /// (valid: 0.5-1.0)
    #[serde(default = "default_ambiguity_ratio")]
    pub ambiguity_ratio: f64,
}

fn default_match_threshold() -> f64 {
    60.0
}

fn default_max_results() -> usize {
    5
}

fn default_ambiguity_ratio() -> f64 {
    0.85
}

impl MatcherConfig {
    pub fn effective_threshold(&self) -> f64 {
        self.threshold.clamp(0.0, 100.0)
    }

    pub fn effective_max_results(&self) -> usize {
        self.max_results.clamp(1, 20)
    }

    pub fn effective_ambiguity_ratio(&self) -> f64 {
        self.ambiguity_ratio.clamp(0.5, 1.0)
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: default_match_threshold(),
            max_results: default_max_results(),
            ambiguity_ratio: default_ambiguity_ratio(),
        }
    }
}

/// Conversation flow tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Batch-evidence score at or above which we skip straight to asking
    /// for a serving count
    #[serde(default = "default_batch_multi_score")]
    pub batch_multi_score: i32,

    /// Batch-evidence score at or below which a recipe is treated as a
    /// single portion without asking
    #[serde(default = "default_batch_single_score")]
    pub batch_single_score: i32,

    /// Maximum tool-calling rounds per turn (valid: 1-8)
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
}

fn default_batch_multi_score() -> i32 {
    3
}

fn default_batch_single_score() -> i32 {
    -2
}

fn default_max_tool_rounds() -> u32 {
    4
}

impl FlowConfig {
    pub fn effective_max_tool_rounds(&self) -> u32 {
        self.max_tool_rounds.clamp(1, 8)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            batch_multi_score: default_batch_multi_score(),
            batch_single_score: default_batch_single_score(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

/// Retry policy for transient language-backend failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (valid: 1-10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubles per attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    50
}

impl RetryConfig {
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.clamp(1, 10)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Complete Remy daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemyConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub language: LanguageConfig,

    #[serde(default)]
    pub matcher: MatcherConfig,

    #[serde(default)]
    pub flow: FlowConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl RemyConfig {
    /// Load config from REMY_CONFIG or the system path, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        let path = config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("ignoring malformed config {}: {}", path.display(), e)
                    }
                },
                Err(e) => tracing::warn!("could not read config {}: {}", path.display(), e),
            }
        }
        Self::default()
    }

    /// Save config to the active config path
    pub fn save(&self) -> std::io::Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }
}

/// Get the active config file path
pub fn config_path() -> PathBuf {
    if let Ok(custom) = std::env::var("REMY_CONFIG") {
        if !custom.is_empty() {
            return PathBuf::from(custom);
        }
    }
    PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE)
}

/// Get the data directory
pub fn data_dir() -> PathBuf {
    PathBuf::from(DATA_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RemyConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:7369");
        assert_eq!(config.matcher.threshold, 60.0);
        assert_eq!(config.flow.max_tool_rounds, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: RemyConfig = toml::from_str(
            r#"
            [matcher]
            threshold = 70.0

            [language]
            model = "qwen2.5:7b"
            "#,
        )
        .unwrap();
        assert_eq!(config.matcher.threshold, 70.0);
        assert_eq!(config.language.model, "qwen2.5:7b");
        assert_eq!(config.language.endpoint, "http://127.0.0.1:11434");
        assert_eq!(config.server.request_timeout_secs, 120);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config: RemyConfig = toml::from_str(
            r#"
            [matcher]
            threshold = 250.0
            max_results = 0
            ambiguity_ratio = 0.1

            [flow]
            max_tool_rounds = 50

            [language]
            timeout_secs = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.matcher.effective_threshold(), 100.0);
        assert_eq!(config.matcher.effective_max_results(), 1);
        assert_eq!(config.matcher.effective_ambiguity_ratio(), 0.5);
        assert_eq!(config.flow.effective_max_tool_rounds(), 8);
        assert_eq!(config.language.effective_timeout(), 5);
    }
}
