//! Configuration management
//!
//! This module handles loading and saving the osc configuration file.
//! The configuration file is stored in TOML format at ~/.config/osc/config.toml,
//! or under `$OSC_CONFIG_DIR` when that variable is set.
//!
//! Credentials are not part of this file; the S3 backend resolves them through
//! the AWS SDK provider chain.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compression::{DEFAULT_BENEFIT_RATIO, DEFAULT_COMPRESSION_THRESHOLD};
use crate::error::{Error, Result};
use crate::retry::{MAX_MULTIPLIER, RetryPolicy};

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "OSC_CONFIG_DIR";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub mount: MountConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            endpoint: EndpointConfig::default(),
            retry: RetryConfig::default(),
            transfer: TransferConfig::default(),
            mount: MountConfig::default(),
        }
    }
}

impl Config {
    /// Reject values that would make the client misbehave
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.endpoint.url {
            url::Url::parse(url)?;
        }
        if !(1.0..=MAX_MULTIPLIER).contains(&self.retry.multiplier) {
            return Err(Error::Config(format!(
                "retry.multiplier must be within 1.0..={MAX_MULTIPLIER}, got {}",
                self.retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.transfer.compression_benefit_ratio) {
            return Err(Error::Config(format!(
                "transfer.compression_benefit_ratio must be within 0.0..=1.0, got {}",
                self.transfer.compression_benefit_ratio
            )));
        }
        Ok(())
    }
}

/// Where the object service lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Service URL; the SDK default endpoint is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Use path-style bucket addressing
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            region: default_region(),
            force_path_style: true,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive waits
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Upload tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Payloads at or above this many bytes are considered for compression
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    /// Estimated compressed/original ratio below which compression is used
    #[serde(default = "default_benefit_ratio")]
    pub compression_benefit_ratio: f64,
}

fn default_compression_threshold() -> usize {
    DEFAULT_COMPRESSION_THRESHOLD
}

fn default_benefit_ratio() -> f64 {
    DEFAULT_BENEFIT_RATIO
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            compression_threshold: default_compression_threshold(),
            compression_benefit_ratio: default_benefit_ratio(),
        }
    }
}

/// Filesystem mount settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// How long a lookup verdict is trusted, in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Let other users access the mount
    #[serde(default)]
    pub allow_other: bool,

    /// Unmount when the daemon exits
    #[serde(default = "default_true")]
    pub auto_unmount: bool,
}

fn default_cache_ttl() -> u64 {
    60
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            allow_other: false,
            auto_unmount: true,
        }
    }
}

impl MountConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("osc"),
        };
        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade osc.",
                config.schema_version, SCHEMA_VERSION
            )));
        }
        config.schema_version = SCHEMA_VERSION;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }
}
