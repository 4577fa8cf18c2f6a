//! TOML Configuration File Support
//!
//! Configuration lives at `<user-config-dir>/valvefm/config.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the binary through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [control]
//! queue_capacity = 8
//! read_timeout_ms = 2000
//! reply_timeout_ms = 2000
//!
//! [playback]
//! backend = "mpv"
//! search_dirs = ["/opt/mpv/bin"]
//! ```
//!
//! # Environment Variables
//!
//! - `VALVEFM_QUEUE_CAPACITY`: outstanding command limit
//! - `VALVEFM_READ_TIMEOUT_MS`: request line deadline
//! - `VALVEFM_REPLY_TIMEOUT_MS`: reply wait bound
//! - `VALVEFM_BACKEND`: preferred backend (`mpv` or `ffplay`)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::ServerConfig;
use crate::endpoint::APP_DIR_NAME;
use crate::supervisor::{BackendKind, BackendLocator};

/// Name of the configuration file inside the control directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[control]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlToml {
    /// Outstanding command limit
    pub queue_capacity: Option<usize>,

    /// Request line deadline in milliseconds
    pub read_timeout_ms: Option<u64>,

    /// Reply wait bound in milliseconds
    pub reply_timeout_ms: Option<u64>,
}

/// `[playback]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackToml {
    /// Preferred backend
    pub backend: Option<BackendKind>,

    /// Extra directories searched for backend executables
    pub search_dirs: Vec<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValvefmToml {
    /// Control server section
    pub control: ControlToml,

    /// Playback section
    pub playback: PlaybackToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration
#[derive(Clone, Debug)]
pub struct ValvefmConfig {
    /// Control server policy
    pub server: ServerConfig,

    /// Preferred backend, tried before the fixed probe order
    pub preferred_backend: Option<BackendKind>,

    /// Extra backend search directories, consulted before the defaults
    pub search_dirs: Vec<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ValvefmConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            preferred_backend: None,
            search_dirs: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ValvefmConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Backend locator honoring the playback settings
    pub fn backend_locator(&self) -> BackendLocator {
        BackendLocator::new()
            .prefer(self.preferred_backend)
            .with_search_dirs(self.search_dirs.iter().cloned())
    }

    /// Reject values the server cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.server.read_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "read_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.server.reply_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "reply_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Command-line overrides, applied on top of file and environment values
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Preferred backend
    pub backend: Option<BackendKind>,
    /// Outstanding command limit
    pub queue_capacity: Option<usize>,
    /// Request line deadline in milliseconds
    pub read_timeout_ms: Option<u64>,
    /// Reply wait bound in milliseconds
    pub reply_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create empty overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Set preferred backend override
    #[must_use]
    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }

    /// Set queue capacity override
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set reply timeout override
    #[must_use]
    pub fn with_reply_timeout_ms(mut self, ms: u64) -> Self {
        self.reply_timeout_ms = Some(ms);
        self
    }

    /// Apply overrides to a configuration and re-validate it
    pub fn apply(&self, config: &mut ValvefmConfig) -> Result<(), ConfigError> {
        if self.backend.is_some()
            || self.queue_capacity.is_some()
            || self.read_timeout_ms.is_some()
            || self.reply_timeout_ms.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(kind) = self.backend {
            config.preferred_backend = Some(kind);
        }
        if let Some(capacity) = self.queue_capacity {
            config.server.queue_capacity = capacity;
        }
        if let Some(ms) = self.read_timeout_ms {
            config.server.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.reply_timeout_ms {
            config.server.reply_timeout = Duration::from_millis(ms);
        }

        config.validate()
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `<user-config-dir>/valvefm/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<ValvefmConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ValvefmConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `env` to look up environment variables
fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ValvefmConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ValvefmConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ValvefmToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ValvefmConfig, toml: &ValvefmToml) {
    if let Some(capacity) = toml.control.queue_capacity {
        config.server.queue_capacity = capacity;
    }
    if let Some(ms) = toml.control.read_timeout_ms {
        config.server.read_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.control.reply_timeout_ms {
        config.server.reply_timeout = Duration::from_millis(ms);
    }

    if toml.playback.backend.is_some() {
        config.preferred_backend = toml.playback.backend;
    }
    config
        .search_dirs
        .extend(toml.playback.search_dirs.iter().cloned());
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ValvefmConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env("VALVEFM_QUEUE_CAPACITY") {
        if let Ok(n) = value.trim().parse::<usize>() {
            config.server.queue_capacity = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("VALVEFM_READ_TIMEOUT_MS") {
        if let Ok(ms) = value.trim().parse::<u64>() {
            config.server.read_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("VALVEFM_REPLY_TIMEOUT_MS") {
        if let Ok(ms) = value.trim().parse::<u64>() {
            config.server.reply_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("VALVEFM_BACKEND") {
        let kind = value
            .parse::<BackendKind>()
            .map_err(ConfigError::ValidationError)?;
        config.preferred_backend = Some(kind);
        config.source = ConfigSource::Env;
    }
    Ok(())
}
