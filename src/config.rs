//! Configuration for the queue-depth exporter.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::SUPPORTED_TYPES;
use crate::queuespec;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Address to serve scrape requests on (default: "0.0.0.0:9726").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for the metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Seconds between collection cycles (default: 30).
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    /// Monitor-queues specification, e.g. "0:celery;1:task,cache".
    #[serde(default = "default_monitor_queues")]
    pub monitor_queues: String,

    /// Metric name prefix (default: "celery").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Broker connection settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen() -> String {
    "0.0.0.0:9726".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_polling_interval() -> u64 {
    30
}

fn default_monitor_queues() -> String {
    "0:celery".to_string()
}

fn default_prefix() -> String {
    "celery".to_string()
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            polling_interval_secs: default_polling_interval(),
            monitor_queues: default_monitor_queues(),
            prefix: default_prefix(),
            broker: BrokerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Broker connection settings. One configuration record covers every
/// backend; adapters read the fields that apply to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Backend type: "redis", "redis-sentinel" or "rabbitmq".
    #[serde(rename = "type", default = "default_broker_type")]
    pub broker_type: String,

    /// Broker host address (default: "localhost").
    #[serde(default = "default_broker_host")]
    pub host: String,

    /// Broker port (default: 6379).
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Username (RabbitMQ; default "guest" when unset).
    #[serde(default)]
    pub username: Option<String>,

    /// Password for the data connection.
    #[serde(default)]
    pub password: Option<String>,

    /// RabbitMQ virtual host (default: "/").
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,

    /// Socket timeout in seconds for broker calls (default: 5.0).
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_secs: f64,

    /// Sentinel settings, required for "redis-sentinel".
    #[serde(default)]
    pub sentinel: Option<SentinelConfig>,
}

fn default_broker_type() -> String {
    "redis".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    6379
}

fn default_virtual_host() -> String {
    "/".to_string()
}

fn default_socket_timeout() -> f64 {
    5.0
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_type: default_broker_type(),
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
            virtual_host: default_virtual_host(),
            socket_timeout_secs: default_socket_timeout(),
            sentinel: None,
        }
    }
}

/// Redis Sentinel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Sentinel endpoints as "host" or "host:port" (port defaults to 26379).
    pub hosts: Vec<String>,

    /// Name of the monitored master.
    pub master_name: String,

    /// Password for the sentinel nodes themselves.
    #[serde(default)]
    pub password: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ExporterConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.listen
            )));
        }

        if !self.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.polling_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "polling_interval_secs must be > 0".to_string(),
            ));
        }

        if queuespec::parse_monitor_queues(&self.monitor_queues).is_empty() {
            return Err(ConfigError::Validation(format!(
                "monitor_queues '{}' contains no valid entries",
                self.monitor_queues
            )));
        }

        if self.prefix.is_empty() {
            return Err(ConfigError::Validation(
                "prefix must not be empty".to_string(),
            ));
        }

        self.broker.validate()
    }
}

impl BrokerConfig {
    /// Validate the broker settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_TYPES.contains(&self.broker_type.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unsupported broker type '{}'. Supported types: {}",
                self.broker_type,
                SUPPORTED_TYPES.join(", ")
            )));
        }

        if !(self.socket_timeout_secs > 0.0) {
            return Err(ConfigError::Validation(
                "socket_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.broker_type.eq_ignore_ascii_case("redis-sentinel") {
            match &self.sentinel {
                None => {
                    return Err(ConfigError::Validation(
                        "broker type 'redis-sentinel' requires sentinel settings".to_string(),
                    ));
                }
                Some(sentinel) => {
                    if sentinel.hosts.is_empty() {
                        return Err(ConfigError::Validation(
                            "sentinel.hosts must not be empty".to_string(),
                        ));
                    }
                    if sentinel.master_name.is_empty() {
                        return Err(ConfigError::Validation(
                            "sentinel.master_name must not be empty".to_string(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
