//! # Environment-Based Configuration
//!
//! Runtime settings can be changed without a rebuild by exporting `CONCLAVE_*`
//! variables before starting an instance.
//!
//! ## Environment Variables
//!
//! - `CONCLAVE_DATABASE_PATH` - SQLite file shared by the session group (default: in-memory)
//! - `CONCLAVE_HEARTBEAT_INTERVAL_MS` - Leader heartbeat period (default: 1000)
//! - `CONCLAVE_LEADER_TIMEOUT_MS` - Silence after which followers re-elect (default: 3000)
//! - `CONCLAVE_CHANNEL_CAPACITY` - Per-peer broadcast buffer (default: 256)
//! - `CONCLAVE_SEGMENTATION_CACHE_CAPACITY` - Cached segmentations per instance (default: 100)
//! - `CONCLAVE_SYNC_INTERVAL_MS` - Leader maintenance period (default: 30000)

use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, time::Duration};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Settings for one instance and the session group it joins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConclaveConfig {
    /// `None` keeps the shared database in memory for the lifetime of the group
    pub database_path: Option<PathBuf>,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_millis")]
    pub leader_timeout: Duration,
    pub channel_capacity: usize,
    pub segmentation_cache_capacity: usize,
    #[serde(with = "duration_millis")]
    pub sync_interval: Duration,
}

impl Default for ConclaveConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            heartbeat_interval: Duration::from_millis(1000),
            leader_timeout: Duration::from_millis(3000),
            channel_capacity: 256,
            segmentation_cache_capacity: 100,
            sync_interval: Duration::from_millis(30_000),
        }
    }
}

impl ConclaveConfig {
    #[must_use]
    pub fn builder() -> ConclaveConfigBuilder {
        ConclaveConfigBuilder::default()
    }

    /// Load from `CONCLAVE_*` variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        ConclaveConfigBuilder::from_env()?.build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.leader_timeout <= self.heartbeat_interval {
            return Err(ConfigError::ValidationError(format!(
                "leader_timeout ({:?}) must exceed heartbeat_interval ({:?})",
                self.leader_timeout, self.heartbeat_interval
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.segmentation_cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "segmentation_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "sync_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ConclaveConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConclaveConfigBuilder {
    config: ConclaveConfig,
}

impl ConclaveConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::default();

        if let Some(path) = get_env_string("CONCLAVE_DATABASE_PATH") {
            builder = builder.database_path(PathBuf::from(path));
        }
        if let Some(ms) = get_env_u64("CONCLAVE_HEARTBEAT_INTERVAL_MS")? {
            builder = builder.heartbeat_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = get_env_u64("CONCLAVE_LEADER_TIMEOUT_MS")? {
            builder = builder.leader_timeout(Duration::from_millis(ms));
        }
        if let Some(capacity) = get_env_usize("CONCLAVE_CHANNEL_CAPACITY")? {
            builder = builder.channel_capacity(capacity);
        }
        if let Some(capacity) = get_env_usize("CONCLAVE_SEGMENTATION_CACHE_CAPACITY")? {
            builder = builder.segmentation_cache_capacity(capacity);
        }
        if let Some(ms) = get_env_u64("CONCLAVE_SYNC_INTERVAL_MS")? {
            builder = builder.sync_interval(Duration::from_millis(ms));
        }

        Ok(builder)
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.config.database_path = None;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn leader_timeout(mut self, timeout: Duration) -> Self {
        self.config.leader_timeout = timeout;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn segmentation_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.segmentation_cache_capacity = capacity;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn build(self) -> Result<ConclaveConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u64 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid usize value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

/// Serialize a [`Duration`] as whole milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
