//! Configuration management for softplayer
//!
//! This module handles loading and managing application configuration
//! from config files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::utils::error::{PlayerError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Frame buffer and pacing configuration
    pub playback: PlaybackConfig,

    /// Decoder configuration
    pub decoder: DecoderConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Number of decoded frames that may wait for the presenter
    pub buffer_capacity: usize,

    /// Maximum number of pixel buffers ever allocated per session
    pub pool_size: usize,

    /// Upper bound for a single blocking wait before liveness is re-checked
    pub wait_timeout_ms: u64,

    /// Picture rate used when the stream does not declare one
    pub default_picture_rate: f64,

    /// Reopen the stream and start over when it ends
    pub loop_playback: bool,
}

/// Decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Chunk size used when reading from files and readers
    pub read_chunk_size: usize,

    /// Longest accepted header line in bytes
    pub max_header_length: usize,

    /// Largest accepted picture width or height
    pub max_dimension: u32,
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1,
            pool_size: 2,
            wait_timeout_ms: 100,
            default_picture_rate: 25.0,
            loop_playback: false,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 64 * 1024,
            max_header_length: 1024,
            max_dimension: 8192,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl PlaybackConfig {
    /// Wait timeout as a Duration
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(PlayerError::Config("playback.buffer_capacity must be at least 1".to_string()));
        }

        // One buffer stays with the presenter while the decoder fills the next.
        if self.pool_size < 2 {
            return Err(PlayerError::Config("playback.pool_size must be at least 2".to_string()));
        }

        if self.wait_timeout_ms == 0 {
            return Err(PlayerError::Config("playback.wait_timeout_ms must be non-zero".to_string()));
        }

        if !self.default_picture_rate.is_finite() || self.default_picture_rate <= 0.0 {
            return Err(PlayerError::Config(format!(
                "playback.default_picture_rate must be positive, got {}",
                self.default_picture_rate
            )));
        }

        Ok(())
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            return Err(PlayerError::Config("decoder.read_chunk_size must be non-zero".to_string()));
        }

        if self.max_header_length < 16 {
            return Err(PlayerError::Config("decoder.max_header_length must be at least 16".to_string()));
        }

        if self.max_dimension == 0 {
            return Err(PlayerError::Config("decoder.max_dimension must be non-zero".to_string()));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/softplayer/config.toml on Linux)
    /// 3. User config file (~/.config/softplayer/config.toml on Linux)
    /// 4. Environment variables (SOFTPLAYER_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::read_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::read_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from an explicit file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| PlayerError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Save configuration to the given path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PlayerError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| PlayerError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml)
            .map_err(|e| PlayerError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Parse a TOML file; missing keys keep their defaults
    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

        toml::from_str(&contents)
            .map_err(|e| PlayerError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value.trim().parse()
                .map_err(|_| PlayerError::Config(format!("Invalid {}: '{}'", key, value)))
        }

        if let Some(v) = lookup("SOFTPLAYER_BUFFER_CAPACITY") {
            self.playback.buffer_capacity = parse("SOFTPLAYER_BUFFER_CAPACITY", v)?;
        }

        if let Some(v) = lookup("SOFTPLAYER_POOL_SIZE") {
            self.playback.pool_size = parse("SOFTPLAYER_POOL_SIZE", v)?;
        }

        if let Some(v) = lookup("SOFTPLAYER_WAIT_TIMEOUT_MS") {
            self.playback.wait_timeout_ms = parse("SOFTPLAYER_WAIT_TIMEOUT_MS", v)?;
        }

        if let Some(v) = lookup("SOFTPLAYER_LOOP") {
            self.playback.loop_playback = parse("SOFTPLAYER_LOOP", v)?;
        }

        if let Some(v) = lookup("SOFTPLAYER_LOG_LEVEL") {
            self.general.log_level = v;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.playback.validate()?;
        self.decoder.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(PlayerError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/softplayer/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("softplayer").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/softplayer/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("softplayer").join("config.toml"))
    }
}
