//! Configuration loading using figment.
//!
//! Sources are layered, later overriding earlier:
//!
//! 1. Built-in defaults
//! 2. `palaver.toml` in the working directory (or an explicit file)
//! 3. Environment variables with the `PALAVER_` prefix, `__` as separator
//!    (`PALAVER_LOGGING__LEVEL=debug` → `logging.level = "debug"`)

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to extract configuration: {0}")]
    Extract(#[from] figment::Error),
}

/// Root runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API token used for session bootstrap and web-API calls.
    #[serde(default)]
    pub token: String,

    /// Base URL of the web API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Keepalive ping interval over the duplex channel, in seconds.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: default_api_url(),
            ping_interval_secs: default_ping_interval_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_api_url() -> String {
    "https://slack.com/api/".to_string()
}

fn default_ping_interval_secs() -> u64 {
    30
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads configuration from the default locations.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment(None))
    }

    /// Loads configuration from a specific TOML file, plus environment
    /// overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Self::extract(Self::figment(Some(path)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        debug!(
            api_url = %config.api_url,
            logging_level = %config.logging.level,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        let figment = match file {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment.merge(Toml::file("palaver.toml")),
        };
        figment.merge(
            Env::prefixed("PALAVER_")
                .split("__")
                .map(|key| key.as_str().replace("__", ".").into()),
        )
    }
}
