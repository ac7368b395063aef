//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relational store settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Build queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Pub/sub notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Deferred origin resolution policy
    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Inactive package pruning
    #[serde(default)]
    pub pruning: PruningConfig,

    /// File locations
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply `DATABASE_URL`, `QUEUE_URL` and `NOTIFY_TOPIC` from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(url) = std::env::var("QUEUE_URL") {
            self.queue.url = Some(url);
        }
        if let Ok(topic) = std::env::var("NOTIFY_TOPIC") {
            self.notifications.topic = Some(topic);
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(AppError::validation("database.url is empty"));
        }
        if self.database.max_connections == 0 {
            return Err(AppError::validation(
                "database.max_connections must be > 0",
            ));
        }
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.resolve.max_attempts == 0 {
            return Err(AppError::validation("resolve.max_attempts must be > 0"));
        }
        if self.pruning.threshold_secs <= 0 {
            return Err(AppError::validation("pruning.threshold_secs must be > 0"));
        }
        if matches!(&self.queue.url, Some(url) if url.trim().is_empty()) {
            return Err(AppError::validation("queue.url is set but empty"));
        }
        Ok(())
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[serde(default = "defaults::database_url")]
    pub url: String,

    /// Pool size
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "defaults::acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::database_url(),
            max_connections: defaults::max_connections(),
            acquire_timeout_secs: defaults::acquire_timeout(),
        }
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent sub-requests within one adapter
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Pause before every HTTP request an adapter makes, in milliseconds
    #[serde(default)]
    pub request_delay_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_concurrent: defaults::max_concurrent(),
            request_delay_ms: 0,
        }
    }
}

/// Build queue settings. No URL means enqueueing is skipped.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// Notification topic settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub topic: Option<String>,
}

/// Retry policy for deferred origins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Total attempts before the version is skipped
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit in milliseconds, scaled by attempt number and jitter
    #[serde(default = "defaults::backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            backoff_ms: defaults::backoff_ms(),
        }
    }
}

/// Pruning pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    #[serde(default = "defaults::prune_enabled")]
    pub enabled: bool,

    /// Packages unseen for longer than this are deactivated
    #[serde(default = "defaults::threshold")]
    pub threshold_secs: i64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::prune_enabled(),
            threshold_secs: defaults::threshold(),
        }
    }
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `{source_id}.json` seed files
    #[serde(default = "defaults::seed_dir")]
    pub seed_dir: PathBuf,

    /// Games and sources definition file
    #[serde(default = "defaults::sources_file")]
    pub sources_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            seed_dir: defaults::seed_dir(),
            sources_file: defaults::sources_file(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn database_url() -> String {
        "sqlite://data/generator.db?mode=rwc".into()
    }
    pub fn max_connections() -> u32 {
        5
    }
    pub fn acquire_timeout() -> u64 {
        10
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; generator/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_concurrent() -> usize {
        5
    }

    pub fn max_attempts() -> u32 {
        3
    }
    pub fn backoff_ms() -> u64 {
        1000
    }

    pub fn prune_enabled() -> bool {
        true
    }
    pub fn threshold() -> i64 {
        604_800
    }

    pub fn seed_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn sources_file() -> PathBuf {
        PathBuf::from("data/sources.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.crawler.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.resolve.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            url = "https://sqs.example.com/queue.fifo"

            [pruning]
            threshold_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(
            config.queue.url.as_deref(),
            Some("https://sqs.example.com/queue.fifo")
        );
        assert_eq!(config.pruning.threshold_secs, 60);
        assert!(config.pruning.enabled);
        assert_eq!(config.crawler.max_concurrent, 5);
        assert_eq!(config.resolve.max_attempts, 3);
        assert!(config.notifications.topic.is_none());
    }

    #[test]
    fn default_threshold_is_one_week() {
        assert_eq!(Config::default().pruning.threshold_secs, 604_800);
    }
}
