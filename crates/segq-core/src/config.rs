use crate::constants::{
    DEFAULT_INITIAL_POOL_BLOCKS, DEFAULT_MAX_FREE_BLOCKS, DEFAULT_SEGMENT_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const LOCAL_CONFIG_FILE: &str = ".segq.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration for segq
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SegqConfig {
    /// Queue and segment pool sizing
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sizing of a segmented queue and its pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Slots per segment. Must be a power of two and match the queue's
    /// compile-time segment length.
    #[serde(default = "default_segment_capacity")]
    pub segment_capacity: usize,

    /// Segments allocated up front when the pool is created
    #[serde(default = "default_initial_pool_blocks")]
    pub initial_pool_blocks: usize,

    /// Free segments cached by the pool; anything returned beyond this is released
    #[serde(default = "default_max_free_blocks")]
    pub max_free_blocks: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            segment_capacity: default_segment_capacity(),
            initial_pool_blocks: default_initial_pool_blocks(),
            max_free_blocks: default_max_free_blocks(),
        }
    }
}

impl QueueConfig {
    pub fn with_pool(initial_pool_blocks: usize, max_free_blocks: usize) -> Self {
        Self {
            initial_pool_blocks,
            max_free_blocks,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_capacity < 2 || !self.segment_capacity.is_power_of_two() {
            return Err(ConfigError::ValidationError(format!(
                "segment_capacity must be a power of two >= 2, got {}",
                self.segment_capacity
            )));
        }
        if self.initial_pool_blocks > self.max_free_blocks {
            return Err(ConfigError::ValidationError(format!(
                "initial_pool_blocks ({}) exceeds max_free_blocks ({})",
                self.initial_pool_blocks, self.max_free_blocks
            )));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_segment_capacity() -> usize {
    DEFAULT_SEGMENT_CAPACITY
}
fn default_initial_pool_blocks() -> usize {
    DEFAULT_INITIAL_POOL_BLOCKS
}
fn default_max_free_blocks() -> usize {
    DEFAULT_MAX_FREE_BLOCKS
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

/// Loads and validates configuration
pub struct ConfigManager {
    config: SegqConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables
    /// 2. Config file (./.segq.toml, then ~/.segq/config.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        info!(
            path = ?config_path,
            segment_capacity = config.queue.segment_capacity,
            initial_pool_blocks = config.queue.initial_pool_blocks,
            max_free_blocks = config.queue.max_free_blocks,
            "segq configuration loaded"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load from an explicit file, still honouring environment overrides
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::apply_env_overrides(Self::read_toml_file(path)?);
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Parse and validate a TOML document. Environment is not consulted.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SegqConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_config_file() -> Result<(SegqConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".segq").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        debug!("No segq config file found, using defaults");
        Ok((SegqConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<SegqConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(config: SegqConfig) -> SegqConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut config: SegqConfig, lookup: F) -> SegqConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_usize = |key: &str| -> Option<usize> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring {}={:?}: not an unsigned integer", key, raw);
                    None
                }
            }
        };

        if let Some(blocks) = parse_usize("SEGQ_POOL_INITIAL_BLOCKS") {
            config.queue.initial_pool_blocks = blocks;
        }
        if let Some(blocks) = parse_usize("SEGQ_POOL_MAX_FREE_BLOCKS") {
            config.queue.max_free_blocks = blocks;
        }
        if let Some(capacity) = parse_usize("SEGQ_SEGMENT_CAPACITY") {
            config.queue.segment_capacity = capacity;
        }

        if let Some(level) = lookup("RUST_LOG") {
            config.logging.level = level;
        }
        if let Some(format) = lookup("SEGQ_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    fn validate_config(config: &SegqConfig) -> Result<(), ConfigError> {
        config.queue.validate()?;

        // RUST_LOG may carry a full filter directive; only bare level names are checked
        let level = config.logging.level.as_str();
        if !level.contains('=') && !level.contains(',') {
            match level {
                "trace" | "debug" | "info" | "warn" | "error" => {}
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                        other
                    )))
                }
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &SegqConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write the default configuration to `path`, creating parent directories
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(&SegqConfig::default())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SegqConfig::default();
        assert_eq!(config.queue.segment_capacity, 1024);
        assert_eq!(config.queue.initial_pool_blocks, 2);
        assert_eq!(config.queue.max_free_blocks, 16);
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = SegqConfig::default();
        bad.queue.segment_capacity = 1000;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = SegqConfig::default();
        bad.queue.initial_pool_blocks = 64;
        bad.queue.max_free_blocks = 8;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = SegqConfig::default();
        bad.logging.level = "loud".to_string();
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut directive = SegqConfig::default();
        directive.logging.level = "segq_concurrent=debug".to_string();
        assert!(ConfigManager::validate_config(&directive).is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let manager = ConfigManager::from_toml_str(
            r#"
            [queue]
            max_free_blocks = 4
            "#,
        )
        .unwrap();
        let config = manager.config();
        assert_eq!(config.queue.max_free_blocks, 4);
        assert_eq!(config.queue.segment_capacity, 1024);
        assert_eq!(config.logging, LoggingConfig::default());
        assert!(manager.config_path().is_none());
    }

    #[test]
    fn test_malformed_toml() {
        let err = ConfigManager::from_toml_str("[queue\nmax_free_blocks = ").err();
        assert!(matches!(err, Some(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("SEGQ_POOL_INITIAL_BLOCKS", "1"),
            ("SEGQ_POOL_MAX_FREE_BLOCKS", "32"),
            ("SEGQ_SEGMENT_CAPACITY", "not-a-number"),
            ("SEGQ_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let config = ConfigManager::apply_overrides(SegqConfig::default(), |key| {
            env.get(key).map(|v| v.to_string())
        });
        assert_eq!(config.queue.initial_pool_blocks, 1);
        assert_eq!(config.queue.max_free_blocks, 32);
        assert_eq!(config.queue.segment_capacity, 1024);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_default_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        ConfigManager::create_default_config(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let manager = ConfigManager::from_toml_str(&content).unwrap();
        assert_eq!(manager.config().queue, QueueConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            ConfigManager::from_path(&missing),
            Err(ConfigError::NotFound(_))
        ));
    }
}
