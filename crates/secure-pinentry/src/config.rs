//! Configuration types and loading for secure-pinentry.
//!
//! Configuration is loaded from `~/.config/secure-pinentry/config.toml`.
//! Command-line flags override whatever the file sets.
//!
//! # Error Handling
//!
//! - If the config file doesn't exist, default values are returned.
//! - If the config file exists but is invalid, an error is returned (fail fast).
//!
//! # Example Configuration
//!
//! ```toml
//! [prompt]
//! grab = true
//! enhanced = false
//! timeout = 0                 # seconds, 0 waits forever
//!
//! [memory]
//! pool_size = 16384           # secure memory pool in bytes
//! pin_length = 2048           # initial secret buffer
//! max_pin_length = 8192       # growth ceiling
//! ```

use std::path::{Path, PathBuf};

use secure_pinentry_core::secmem::DEFAULT_POOL_SIZE;
use secure_pinentry_core::session::{DEFAULT_MAX_PIN_LENGTH, DEFAULT_PIN_LENGTH};
use secure_pinentry_core::{PromptConfig, SecureMemory, SessionState};
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Prompt defaults.
    pub prompt: PromptSettings,
    /// Secure memory sizing.
    pub memory: MemorySettings,
}

/// Defaults for the prompt shown to the user.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptSettings {
    /// Grab the keyboard while prompting (default: true).
    pub grab: bool,
    /// Ask for additional settings along with the secret (default: false).
    pub enhanced: bool,
    /// Prompt timeout in seconds, 0 for none (default: 0).
    pub timeout: u64,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            grab: true,
            enhanced: false,
            timeout: 0,
        }
    }
}

/// Sizes of the secure memory pool and the secret buffer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemorySettings {
    /// Secure memory pool size in bytes (default: 16384).
    pub pool_size: usize,
    /// Initial secret buffer capacity in bytes (default: 2048).
    pub pin_length: usize,
    /// Maximum secret buffer capacity in bytes (default: 8192).
    pub max_pin_length: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            pin_length: DEFAULT_PIN_LENGTH,
            max_pin_length: DEFAULT_MAX_PIN_LENGTH,
        }
    }
}

impl Config {
    /// Returns the default configuration file path.
    ///
    /// Returns `~/.config/secure-pinentry/config.toml` using `dirs::config_dir()`,
    /// or `None` if the config directory cannot be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("secure-pinentry").join("config.toml"))
    }

    /// Load configuration from the default path.
    ///
    /// - Returns `Ok(Config::default())` if no config file exists.
    /// - Returns `Err` if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the memory settings can work together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let memory = &self.memory;
        if memory.pin_length == 0 {
            return Err(ConfigError::Invalid("memory.pin_length must not be 0".into()));
        }
        if memory.max_pin_length < memory.pin_length {
            return Err(ConfigError::Invalid(
                "memory.max_pin_length is smaller than memory.pin_length".into(),
            ));
        }
        if memory.pool_size < memory.pin_length {
            return Err(ConfigError::Invalid(
                "memory.pool_size cannot hold a secret buffer".into(),
            ));
        }
        Ok(())
    }

    /// The prompt configuration a session starts with.
    pub fn prompt_config(&self) -> PromptConfig {
        PromptConfig {
            grab: self.prompt.grab,
            enhanced: self.prompt.enhanced,
            timeout: self.prompt.timeout,
            ..PromptConfig::default()
        }
    }

    /// Build the session state for `config`, sized by the memory settings.
    pub fn session(&self, config: PromptConfig) -> SessionState {
        let memory = SecureMemory::new(self.memory.pool_size);
        SessionState::new(config, memory)
            .with_pin_limits(self.memory.pin_length, self.memory.max_pin_length)
    }
}
