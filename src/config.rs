//! Configuration file parser for `feedhq.toml`.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Every section and key has a default, so any subset may be specified.
//! Unknown keys are accepted by serde but logged as a warning, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file (":memory:" for an ephemeral store).
    pub database_path: PathBuf,
    pub scheduler: SchedulerConfig,
    pub fetch: FetchConfig,
    pub sanitizer: SanitizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("feedhq.db"),
            scheduler: SchedulerConfig::default(),
            fetch: FetchConfig::default(),
            sanitizer: SanitizerConfig::default(),
        }
    }
}

/// Upper bound for every polling interval: one year, in minutes.
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// Polling cadence, backoff and worker bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Base polling interval for new feeds, in minutes.
    pub base_interval_minutes: u64,
    /// Backoff ceiling, in minutes.
    pub max_interval_minutes: u64,
    /// Maximum number of feeds polled at the same time.
    pub concurrency: usize,
    /// Maximum number of due feeds loaded per cycle.
    pub batch_size: usize,
    /// Seconds between scheduling cycles in `run`.
    pub tick_seconds: u64,
    /// Hard limit for fetch + parse + deduplicate of a single feed, in seconds.
    pub poll_timeout_seconds: u64,
    /// Consecutive transient failures after which a feed is reported unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval_minutes: 30,
            max_interval_minutes: 240,
            concurrency: 10,
            batch_size: 100,
            tick_seconds: 60,
            poll_timeout_seconds: 60,
            unhealthy_threshold: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn base_interval(&self) -> chrono::Duration {
        Self::minutes(self.base_interval_minutes)
    }

    pub fn max_interval(&self) -> chrono::Duration {
        Self::minutes(self.max_interval_minutes)
    }

    fn minutes(value: u64) -> chrono::Duration {
        // Bounded well inside i64 and chrono's range.
        chrono::Duration::minutes(value.min(MAX_INTERVAL_MINUTES) as i64)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_seconds)
    }
}

/// HTTP transport limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Overall request timeout, in seconds.
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
    pub user_agent: String,
    /// Skip the SSRF check on feed URLs and redirect targets.
    pub allow_private_addresses: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            connect_timeout_seconds: 10,
            max_redirects: 5,
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: format!("feedhq/{} (feed fetcher)", env!("CARGO_PKG_VERSION")),
            allow_private_addresses: false,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Hosts (and their subdomains) whose iframes survive sanitization.
    pub allowed_iframe_hosts: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            allowed_iframe_hosts: [
                "youtube.com",
                "youtube-nocookie.com",
                "player.vimeo.com",
                "dailymotion.com",
                "w.soundcloud.com",
                "bandcamp.com",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] =
        &["database_path", "scheduler", "fetch", "sanitizer"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML or wrong types → `Err(ConfigError::Parse)`
    /// - Inconsistent values → `Err(ConfigError::Invalid)`
    /// - Unknown top-level keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path.display(),
            concurrency = config.scheduler.concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.base_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.base_interval_minutes must be positive".into(),
            ));
        }
        if s.max_interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "scheduler.max_interval_minutes must be at most {MAX_INTERVAL_MINUTES}"
            )));
        }
        if s.max_interval_minutes < s.base_interval_minutes {
            return Err(ConfigError::Invalid(format!(
                "scheduler.max_interval_minutes ({}) is below base_interval_minutes ({})",
                s.max_interval_minutes, s.base_interval_minutes
            )));
        }
        if s.concurrency == 0 || s.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.concurrency and scheduler.batch_size must be positive".into(),
            ));
        }
        if s.poll_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.poll_timeout_seconds must be positive".into(),
            ));
        }
        if self.fetch.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_seconds must be positive".into()));
        }
        if self.fetch.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("fetch.max_body_bytes must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
