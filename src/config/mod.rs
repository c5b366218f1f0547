//! Configuration module for frameflow
//!
//! [`EngineConfig`] groups the engine defaults: stream buffer sizing, producer
//! timing and logging. It is handed to an [`crate::ExecutionContext`] when the
//! context is created; nothing reads configuration from global state.
//!
//! # Config Location
//!
//! The default config file lives in the platform config directory:
//! - **Linux**: `~/.config/dev.hxyulin.frameflow/frameflow.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.frameflow/frameflow.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.frameflow\frameflow.toml`
//!
//! Files ending in `.json` are read and written as JSON, everything else as TOML.
//!
//! # Example
//!
//! ```ignore
//! use frameflow::config::EngineConfig;
//!
//! let config = EngineConfig::load("engine.toml")?;
//! let ctx = frameflow::ExecutionContext::new(config);
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{FlowError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.frameflow";

/// Default config filename
pub const CONFIG_FILE: &str = "frameflow.toml";

/// Current config format version
fn default_config_version() -> u32 {
    1
}

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,

    #[serde(default)]
    pub stream: StreamSettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            stream: StreamSettings::default(),
            runtime: RuntimeSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

enum Format {
    Toml,
    Json,
}

fn format_of(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
        _ => Format::Toml,
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FlowError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FlowError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        match format_of(path) {
            Format::Json => serde_json::from_str(&content).map_err(|e| {
                FlowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            }),
            Format::Toml => {
                Self::from_toml_str(&content).with_context(|| format!("config file {:?}", path))
            }
        }
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default engine config: {}", e);
                Self::default()
            }
        }
    }

    /// Load from [`default_config_path`], falling back to defaults
    pub fn load_default_location() -> Self {
        default_config_path()
            .filter(|p| p.exists())
            .map(Self::load_or_default)
            .unwrap_or_default()
    }

    /// Save the config to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = match format_of(path) {
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| FlowError::Config(format!("Failed to serialize config: {}", e)))?,
            Format::Toml => self.to_toml_string()?,
        };

        std::fs::write(path, content).map_err(|e| {
            FlowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stream::StreamingMode;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.stream.default_capacity, DEFAULT_STREAM_CAPACITY);
        assert_eq!(config.stream.default_mode, StreamingMode::ProcessAllFrames);
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [stream]
            default_mode = "store_all_frames"
            default_capacity = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.default_mode, StreamingMode::StoreAllFrames);
        assert_eq!(config.stream.default_capacity, 4);
        assert_eq!(config.runtime, RuntimeSettings::default());
        assert_eq!(config.logging.filter, "frameflow=info");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("stream = 3").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = EngineConfig::default();
        config.stream.store_all_limit = 250;
        let text = config.to_toml_string().unwrap();
        let parsed = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_default_path_ends_with_file_name() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with(PathBuf::from(APP_ID).join(CONFIG_FILE)));
        }
    }
}
