//! Configuration module for dataflow-rs
//!
//! Runtime configuration covers the collaborators a root Dataflow owns:
//! - The worker thread pool (thread count and naming)
//! - The timer thread used for delayed actors
//! - Default connector capacities
//!
//! # Files
//!
//! Configurations are plain TOML by default. A path ending in `.json` is read
//! and written as JSON instead.
//!
//! # Example
//!
//! ```ignore
//! use dataflow_rs::config::RuntimeConfig;
//! use dataflow_rs::Dataflow;
//!
//! let config = RuntimeConfig::load("dataflow.toml")?;
//! let root = Dataflow::builder().config(&config)?.build();
//! ```

use crate::error::{DataflowError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default capacity for queues and stream ports created without an explicit one
pub const DEFAULT_CONNECTOR_CAPACITY: usize = 16;

/// Default prefix for worker thread names
pub const DEFAULT_WORKER_PREFIX: &str = "dataflow-worker";

/// Default timer thread name
pub const DEFAULT_TIMER_THREAD: &str = "dataflow-timer";

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool settings
    pub executor: ExecutorConfig,

    /// Timer thread settings
    pub timer: TimerConfig,

    /// Connector defaults
    pub connectors: ConnectorConfig,
}

/// Thread pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker threads (0 = available parallelism)
    pub worker_threads: usize,

    /// Worker threads are named `{prefix}-{index}`
    pub thread_name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name_prefix: DEFAULT_WORKER_PREFIX.to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Worker count with `0` resolved against the host
    pub fn resolved_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

/// Timer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Name of the dedicated timer thread
    pub thread_name: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_TIMER_THREAD.to_string(),
        }
    }
}

/// Connector defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Capacity used by `BoundedQueue::from_config` and default stream ports
    pub default_capacity: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_CONNECTOR_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DataflowError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DataflowError::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataflowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        if is_json(path) {
            let config: Self = serde_json::from_str(&content).map_err(|e| {
                DataflowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?;
            config.validate()?;
            Ok(config)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load runtime config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DataflowError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| {
                DataflowError::Serialization(format!("Failed to serialize config: {}", e))
            })?
        } else {
            self.to_toml_string()?
        };

        std::fs::write(path, content)
            .map_err(|e| DataflowError::Config(format!("Failed to write config: {}", e)))
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.connectors.default_capacity == 0 {
            return Err(DataflowError::InvalidCapacity(0).with_context("connectors.default_capacity"));
        }
        if self.executor.thread_name_prefix.is_empty() {
            return Err(DataflowError::Config(
                "executor.thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.connectors.default_capacity, DEFAULT_CONNECTOR_CAPACITY);
        assert_eq!(config.timer.thread_name, DEFAULT_TIMER_THREAD);
        assert!(config.executor.resolved_threads() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [executor]
            worker_threads = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.executor.worker_threads, 3);
        assert_eq!(config.executor.resolved_threads(), 3);
        assert_eq!(config.executor.thread_name_prefix, DEFAULT_WORKER_PREFIX);
        assert_eq!(config.connectors, ConnectorConfig::default());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RuntimeConfig::from_toml_str(
            r#"
            [connectors]
            default_capacity = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err.root_cause(), DataflowError::InvalidCapacity(0)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = RuntimeConfig::from_toml_str("executor = [").unwrap_err();
        assert!(matches!(err, DataflowError::Config(_)));
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dataflow.toml");

        let mut config = RuntimeConfig::default();
        config.executor.worker_threads = 2;
        config.timer.thread_name = "tick".to_string();
        config.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataflow.json");

        let mut config = RuntimeConfig::default();
        config.connectors.default_capacity = 64;
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.trim_start().starts_with('{'));
        assert_eq!(RuntimeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::load_or_default(dir.path().join("absent.toml"));
        assert_eq!(config, RuntimeConfig::default());
    }
}
