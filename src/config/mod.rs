//! Configuration module for pipeflow
//!
//! `EngineConfig` is threaded explicitly through [`Context`](crate::Context)
//! construction; there are no process-wide configuration singletons.
//!
//! # Files
//!
//! Configuration is stored as TOML. Every field has a default, so a partial
//! file (or none at all) is valid:
//!
//! ```toml
//! queue_capacity = 64
//! empty_emit = "error"
//!
//! [pool]
//! size = 128
//! auto_grow = false
//!
//! [logging]
//! filter = "info,pipeflow=debug"
//! ```
//!
//! # Default Location
//!
//! - **Linux**: `~/.config/dev.hxyulin.pipeflow/engine.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.pipeflow/engine.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.pipeflow\engine.toml`

use crate::error::{EngineError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.pipeflow";

/// Config filename
pub const CONFIG_FILE: &str = "engine.toml";

/// Default bounded capacity of each consumer queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of pre-allocated instances per pool
pub const DEFAULT_POOL_SIZE: usize = 256;

/// Get the default config file path
pub fn default_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Engine Config ====================

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of every per-consumer queue. A full queue blocks the producer.
    pub queue_capacity: usize,

    /// Default pool configuration, used for the built-in `Row` pool
    pub pool: PoolConfig,

    /// What an emit does when the producer has no attached consumers
    pub empty_emit: EmptyEmitPolicy,

    /// Default pipeline error policy: stop at the first failed step
    pub stop_on_error: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pool: PoolConfig::default(),
            empty_emit: EmptyEmitPolicy::default(),
            stop_on_error: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the empty-emit policy
    pub fn with_empty_emit(mut self, policy: EmptyEmitPolicy) -> Self {
        self.empty_emit = policy;
        self
    }

    /// Set the default pool configuration
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Check values that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(EngineError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.pool.size == 0 && !self.pool.auto_grow {
            return Err(EngineError::Config(
                "pool.size of 0 requires pool.auto_grow".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default engine config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

// ==================== Pool Config ====================

/// Object pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of instances pre-allocated by `initialize`
    pub size: usize,

    /// Construct new instances on demand when the pool runs dry
    pub auto_grow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            auto_grow: true,
        }
    }
}

impl PoolConfig {
    pub fn fixed(size: usize) -> Self {
        Self {
            size,
            auto_grow: false,
        }
    }

    pub fn growable(size: usize) -> Self {
        Self {
            size,
            auto_grow: true,
        }
    }
}

/// Behavior of `emit` on an adapter with zero attached consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyEmitPolicy {
    /// Recycle the item silently; it is not counted as a write
    #[default]
    Drop,
    /// Fail the emit, and reject unconnected producers at build time
    Error,
}

impl std::fmt::Display for EmptyEmitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmptyEmitPolicy::Drop => write!(f, "drop"),
            EmptyEmitPolicy::Error => write!(f, "error"),
        }
    }
}

// ==================== Logging Config ====================

/// Logging configuration consumed by [`crate::logging::init`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,

    /// Optional log file; written through a non-blocking appender
    pub file: Option<PathBuf>,

    /// Include thread names in log lines (node threads are named after nodes)
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
            thread_names: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.stop_on_error);
        assert_eq!(config.empty_emit, EmptyEmitPolicy::Drop);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EngineConfig::default().with_queue_capacity(0);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            queue_capacity = 8
            empty_emit = "error"

            [pool]
            auto_grow = false
            "#,
        )
        .unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.empty_emit, EmptyEmitPolicy::Error);
        assert_eq!(config.pool.size, DEFAULT_POOL_SIZE);
        assert!(!config.pool.auto_grow);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = EngineConfig::default()
            .with_queue_capacity(16)
            .with_pool(PoolConfig::fixed(32));
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_or_default(dir.path().join("missing.toml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "queue_capacity = 0\n").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
