//! Configuration management for takbridge.
//!
//! This module provides the configuration system, which supports:
//! - Loading from YAML files
//! - Environment variable overrides (`TAKBRIDGE__SECTION__FIELD`)
//! - Validation of all settings

use crate::error::{ConfigError, Result};
use crate::types::TakServerUrl;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use takbridge_core::config::AppConfig;
///
/// let config = AppConfig::from_file("takbridge.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// TAK server every connection streams from
    #[serde(default)]
    pub server: ServerSettings,

    /// Socket and session settings for each TAK client
    #[serde(default)]
    pub client: ClientSettings,

    /// Connection pool behaviour
    #[serde(default)]
    pub pool: PoolSettings,

    /// Where connection records are read from
    #[serde(default)]
    pub connections: ConnectionsSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate, layering
    /// `TAKBRIDGE__*` environment variables over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or merged.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("TAKBRIDGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.client.validate()?;
        self.pool.retry.validate()?;
        self.logging.parse_level()?;
        Ok(())
    }
}

/// TAK server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Streaming URL, `ssl://host:port`
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Verify the server certificate chain. Disabled by default because
    /// deployed TAK servers commonly present certificates from a private CA.
    #[serde(default)]
    pub verify_server: bool,

    /// CA bundle (PEM) used when `verify_server` is set; webpki roots otherwise
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
}

fn default_server_url() -> String {
    "ssl://localhost:8089".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            verify_server: false,
            ca_cert: None,
        }
    }
}

impl ServerSettings {
    /// Validates the server settings.
    pub fn validate(&self) -> Result<()> {
        TakServerUrl::parse(&self.url)
            .map_err(|e| ConfigError::invalid_value("server.url", e.to_string()))?;

        if let Some(ref ca) = self.ca_cert {
            if !self.verify_server {
                tracing::warn!(path = %ca.display(), "server.ca_cert is ignored while verify_server is false");
            } else if !ca.exists() {
                return Err(ConfigError::invalid_value(
                    "server.ca_cert",
                    format!("CA bundle not found: {}", ca.display()),
                )
                .into());
            }
        }
        Ok(())
    }
}

/// Socket and session settings for TAK clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle read timeout in seconds; the server answers every ping, so
    /// silence longer than this means the session is gone
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Keep-alive ping interval in milliseconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Capacity of the client event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Upper bound on buffered bytes without a complete event
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    60
}

fn default_ping_interval() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_max_buffer_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            ping_interval_ms: default_ping_interval(),
            channel_capacity: default_channel_capacity(),
            max_buffer_bytes: default_max_buffer_bytes(),
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Validates the client settings.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid_value("client.connect_timeout_secs", "must be > 0").into());
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::invalid_value("client.read_timeout_secs", "must be > 0").into());
        }
        if self.ping_interval_ms == 0 {
            return Err(ConfigError::invalid_value("client.ping_interval_ms", "must be > 0").into());
        }
        if self.ping_interval_ms / 1000 >= self.read_timeout_secs {
            return Err(ConfigError::invalid_value(
                "client.read_timeout_secs",
                "must be longer than the ping interval",
            )
            .into());
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid_value("client.channel_capacity", "must be > 0").into());
        }
        Ok(())
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Deployment name attached to liveness metrics
    #[serde(default = "default_stack_name")]
    pub stack_name: String,

    /// Skip sink dispatch for every connection
    #[serde(default)]
    pub nosinks: bool,

    /// Skip liveness metrics for every connection
    #[serde(default)]
    pub nometrics: bool,

    /// Offline mode: bootstrap registers no connections
    #[serde(default)]
    pub local: bool,

    /// Reconnect backoff
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_stack_name() -> String {
    "takbridge".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            nosinks: false,
            nometrics: false,
            local: false,
            retry: RetrySettings::default(),
        }
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts allowed before a never-opened connection stalls
    #[serde(default = "default_max_initial_retries")]
    pub max_initial_retries: u32,

    /// Linear backoff step in milliseconds
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,

    /// Backoff ceiling in milliseconds once a connection has opened
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_initial_retries() -> u32 {
    5
}

fn default_step_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    15000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_initial_retries: default_max_initial_retries(),
            step_ms: default_step_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Validates the retry settings.
    pub fn validate(&self) -> Result<()> {
        if self.step_ms == 0 {
            return Err(ConfigError::invalid_value("pool.retry.step_ms", "must be > 0").into());
        }
        if self.max_delay_ms < self.step_ms {
            return Err(ConfigError::invalid_value(
                "pool.retry.max_delay_ms",
                "must be at least pool.retry.step_ms",
            )
            .into());
        }
        Ok(())
    }
}

/// Connection store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionsSettings {
    /// YAML file listing connection records
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Whether to include file/line info
    #[serde(default)]
    pub file_line: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            file_line: false,
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is started
    #[serde(default)]
    pub enabled: bool,

    /// Exporter listen address
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
