use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError};

/// Everything the data-access layer needs to know, passed explicitly.
///
/// ```toml
/// database = "data/users.db"
/// batch_size = 50
/// page_size = 100
///
/// [retry]
/// max_attempts = 3
/// base_delay_ms = 200
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    pub database: PathBuf,

    /// Create the database file when it does not exist yet
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum fan-out operations polled at once (0 = no limit)
    #[serde(default)]
    pub fanout_limit: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff unit; attempt `n` waits `n * base_delay_ms`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

// Default value functions for serde
fn default_create_if_missing() -> bool {
    true
}

fn default_batch_size() -> usize {
    50
}

fn default_page_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

impl StoreConfig {
    /// Config with defaults for everything but the database path
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            create_if_missing: default_create_if_missing(),
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            fanout_limit: 0,
            retry: RetryConfig::default(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(contents)
            .map_err(|e| StoreError::invalid_config(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file named by the caller
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StoreError::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&contents)?;
        debug!(path = %path.display(), "loaded store config");
        Ok(config)
    }

    /// Reject settings that would make traversal or retry meaningless
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(StoreError::invalid_config("batch_size must be positive"));
        }
        if self.page_size == 0 {
            return Err(StoreError::invalid_config("page_size must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(StoreError::invalid_config("retry.max_attempts must be positive"));
        }
        Ok(())
    }
}
