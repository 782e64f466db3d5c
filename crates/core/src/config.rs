//! Configuration management
//!
//! Settings live in a TOML file. Every field has a default, so a missing file
//! or a partial file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executor::Scheduling;
use crate::retry::CallKind;
use crate::traits::MAX_PAGE_SIZE;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "DC_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub clone: CloneConfig,
    pub retry: RetrySettings,
}

impl Config {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let clone = &self.clone;
        if clone.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".into()));
        }
        if clone.page_size == 0 || clone.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if clone.global_limit == Some(0) {
            return Err(Error::Config("global_limit must be at least 1".into()));
        }
        for call in [
            CallKind::GetNode,
            CallKind::Copy,
            CallKind::CreateFolder,
            CallKind::TransferOwnership,
        ] {
            if self.retry.for_call(call).max_attempts == 0 {
                return Err(Error::Config(format!(
                    "retry.{call}.max_attempts must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

/// Settings for a clone operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Leaf copies in flight per folder
    pub max_concurrency: usize,

    /// Page size for list calls
    pub page_size: u32,

    /// Appended to every child query, e.g. `" and trashed = false"`
    pub query_suffix: String,

    pub scheduling: Scheduling,

    /// Optional cap on folder creations and copies in flight across the tree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_limit: Option<usize>,

    /// Pause before re-requesting a page after a transient list failure
    pub list_retry_delay_ms: u64,

    /// Abort the whole operation after this many seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            page_size: MAX_PAGE_SIZE,
            query_suffix: String::new(),
            scheduling: Scheduling::Batched,
            global_limit: None,
            list_retry_delay_ms: 3000,
            timeout_secs: None,
        }
    }
}

/// Backoff settings for one call kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 2000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryConfig {
    fn with_initial_backoff(initial_backoff_ms: u64) -> Self {
        Self {
            initial_backoff_ms,
            ..Self::default()
        }
    }
}

/// Per-call retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub get_node: RetryConfig,
    pub copy: RetryConfig,
    pub create_folder: RetryConfig,
    pub transfer_ownership: RetryConfig,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            get_node: RetryConfig::with_initial_backoff(30_000),
            copy: RetryConfig::with_initial_backoff(2000),
            create_folder: RetryConfig::with_initial_backoff(2000),
            transfer_ownership: RetryConfig::with_initial_backoff(3000),
        }
    }
}

impl RetrySettings {
    /// Use the same settings for every call kind
    pub fn uniform(config: RetryConfig) -> Self {
        Self {
            get_node: config,
            copy: config,
            create_folder: config,
            transfer_ownership: config,
        }
    }

    pub fn for_call(&self, call: CallKind) -> &RetryConfig {
        match call {
            CallKind::GetNode => &self.get_node,
            CallKind::Copy => &self.copy,
            CallKind::CreateFolder => &self.create_folder,
            CallKind::TransferOwnership => &self.transfer_ownership,
        }
    }
}

/// Loads and saves the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Locate the configuration file
    ///
    /// Uses `$DC_CONFIG_DIR/config.toml` when set, otherwise the platform
    /// configuration directory.
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("cannot determine config directory".into()))?
                .join("drive-clone"),
        };
        Ok(Self::with_path(dir.join(CONFIG_FILE)))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the configuration; a missing file yields defaults
    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", self.path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, creating the directory if needed
    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
