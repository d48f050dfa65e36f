//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/telebuf/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/telebuf/` (~/.config/telebuf/)
//! - Data: `$XDG_DATA_HOME/telebuf/` (~/.local/share/telebuf/)
//! - State/Logs: `$XDG_STATE_HOME/telebuf/` (~/.local/state/telebuf/)
//!
//! A [`CollectorConfig`] is fixed for the lifetime of one tracker; nothing
//! re-reads it after construction.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Remote collector and buffering configuration
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Install the file logger at startup
    #[serde(default)]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Remote collector configuration
///
/// Describes where envelopes are delivered, how records are batched, and
/// where undelivered envelopes wait between ticks.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Collector host name or IP
    pub api_host: Option<String>,

    /// Collector port
    pub api_port: Option<u16>,

    /// Upload path on the collector
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Use HTTPS instead of plain HTTP
    #[serde(default)]
    pub use_tls: bool,

    /// Application key sent as `ak` in every envelope
    pub app_key: Option<String>,

    /// Platform tag sent as `pl` (js, and, ios)
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Milliseconds between delivery ticks
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum records per envelope
    #[serde(default = "default_max_send_size")]
    pub max_send_size: usize,

    /// Mark envelopes as debug traffic
    #[serde(default)]
    pub debug: bool,

    /// Explicit device ID; detected from the host when unset
    pub device_id: Option<String>,

    /// Timezone offset in milliseconds
    #[serde(default = "default_time_zone")]
    pub time_zone: i64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Response read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Request write timeout in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Maximum envelopes held in storage before the oldest are evicted
    #[serde(default = "default_max_storage_records")]
    pub max_storage_records: usize,

    /// Directory for on-disk storage; envelopes stay in memory when unset
    pub storage_dir: Option<PathBuf>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_host: None,
            api_port: None,
            api_path: default_api_path(),
            use_tls: false,
            app_key: None,
            platform: default_platform(),
            flush_interval_ms: default_flush_interval_ms(),
            max_send_size: default_max_send_size(),
            debug: false,
            device_id: None,
            time_zone: default_time_zone(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            max_storage_records: default_max_storage_records(),
            storage_dir: None,
        }
    }
}

impl CollectorConfig {
    /// Create a configuration for a collector endpoint with every other
    /// setting at its default.
    pub fn new(api_host: impl Into<String>, api_port: u16, app_key: impl Into<String>) -> Self {
        Self {
            api_host: Some(api_host.into()),
            api_port: Some(api_port),
            app_key: Some(app_key.into()),
            ..Default::default()
        }
    }

    /// Check if the collector endpoint is fully configured
    pub fn is_ready(&self) -> bool {
        self.api_host.is_some() && self.api_port.is_some() && self.app_key.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.api_host.as_deref() {
            None => {
                return Err(Error::Config("collector.api_host is required".to_string()));
            }
            Some(host) if host.trim().is_empty() => {
                return Err(Error::Config(
                    "collector.api_host must not be empty".to_string(),
                ));
            }
            Some(_) => {}
        }
        if self.api_port.is_none() {
            return Err(Error::Config("collector.api_port is required".to_string()));
        }
        if self.app_key.is_none() {
            return Err(Error::Config("collector.app_key is required".to_string()));
        }
        if !self.api_path.starts_with('/') {
            return Err(Error::Config(
                "collector.api_path must start with '/'".to_string(),
            ));
        }
        if self.max_send_size == 0 {
            return Err(Error::Config(
                "collector.max_send_size must be at least 1".to_string(),
            ));
        }
        if self.max_storage_records == 0 {
            return Err(Error::Config(
                "collector.max_storage_records must be at least 1".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(
                "collector.flush_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Full URL envelopes are posted to
    pub fn endpoint_url(&self) -> Result<String> {
        self.validate()?;
        let scheme = if self.use_tls { "https" } else { "http" };
        // validate() guarantees host and port are present
        let host = self.api_host.as_deref().unwrap_or_default();
        let port = self.api_port.unwrap_or_default();
        Ok(format!("{}://{}:{}{}", scheme, host, port, self.api_path))
    }

    /// Get the configured flush interval
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Get the configured connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the configured read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Upper bound for one whole request (connect + write + read)
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .saturating_add(self.write_timeout_secs)
                .saturating_add(self.read_timeout_secs),
        )
    }
}

fn default_api_path() -> String {
    "/apipool".to_string()
}

fn default_platform() -> String {
    "js".to_string()
}

fn default_flush_interval_ms() -> u64 {
    3000
}

fn default_max_send_size() -> usize {
    10
}

fn default_time_zone() -> i64 {
    28_800_000
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    5
}

fn default_write_timeout() -> u64 {
    10
}

fn default_max_storage_records() -> usize {
    1000
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/telebuf/config.toml` (~/.config/telebuf/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("telebuf").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/telebuf/` (~/.local/share/telebuf/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("telebuf")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/telebuf/` (~/.local/state/telebuf/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("telebuf")
    }

    /// Returns the default directory for on-disk envelope storage
    ///
    /// `$XDG_DATA_HOME/telebuf/outbox/` (~/.local/share/telebuf/outbox/)
    pub fn default_storage_dir() -> PathBuf {
        Self::data_dir().join("outbox")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
