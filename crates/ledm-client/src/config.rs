//! Scanner client configuration with YAML support

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{DEFAULT_COMPRESSION_QFACTOR, DEFAULT_RESOLUTION};

/// Scanner client configuration
///
/// Can be loaded from YAML, JSON, or constructed programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Connection settings
    pub connection: ConnectionConfig,

    /// Endpoint paths
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Polling and timeout settings
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Scan quality defaults
    #[serde(default)]
    pub scan: ScanDefaults,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Scanner host name or address
    pub host: String,

    /// HTTP port (default: 80)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    80
}

/// Endpoint paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Scanner status: GET
    #[serde(default = "default_status_path")]
    pub status: String,

    /// Job creation (POST) and cancellation (PUT)
    #[serde(default = "default_jobs_path")]
    pub jobs: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            status: default_status_path(),
            jobs: default_jobs_path(),
        }
    }
}

fn default_status_path() -> String {
    "/Scan/Status".to_string()
}

fn default_jobs_path() -> String {
    "/Scan/Jobs".to_string()
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Fixed delay between status polls in milliseconds (default: 5s)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-request timeout in milliseconds (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            request_ms: default_request_timeout(),
            connect_ms: default_connect_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

fn default_poll_interval() -> u64 {
    5_000 // 5 seconds
}

fn default_request_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

/// Scan quality defaults applied to every job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanDefaults {
    /// Resolution in dpi, used for both axes
    #[serde(default = "default_resolution")]
    pub resolution: u32,

    /// JPEG compression quality factor
    #[serde(default = "default_compression_qfactor")]
    pub compression_qfactor: u32,
}

impl Default for ScanDefaults {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            compression_qfactor: default_compression_qfactor(),
        }
    }
}

fn default_resolution() -> u32 {
    DEFAULT_RESOLUTION
}

fn default_compression_qfactor() -> u32 {
    DEFAULT_COMPRESSION_QFACTOR
}

impl ScannerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Create a builder for programmatic configuration
    pub fn builder(host: impl Into<String>) -> ScannerConfigBuilder {
        ScannerConfigBuilder::new(host)
    }

    /// Base URL of the scanner's embedded web server
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.connection.host, self.connection.port)
    }
}

/// Builder for ScannerConfig
pub struct ScannerConfigBuilder {
    config: ScannerConfig,
}

impl ScannerConfigBuilder {
    /// Create a new builder for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: ScannerConfig {
                connection: ConnectionConfig {
                    host: host.into(),
                    port: default_port(),
                },
                endpoints: EndpointsConfig::default(),
                timeouts: TimeoutsConfig::default(),
                scan: ScanDefaults::default(),
            },
        }
    }

    /// Set the HTTP port
    pub fn port(mut self, port: u16) -> Self {
        self.config.connection.port = port;
        self
    }

    /// Set the scanner status path
    pub fn status_path(mut self, path: impl Into<String>) -> Self {
        self.config.endpoints.status = path.into();
        self
    }

    /// Set the jobs path
    pub fn jobs_path(mut self, path: impl Into<String>) -> Self {
        self.config.endpoints.jobs = path.into();
        self
    }

    /// Set the poll interval in milliseconds
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.poll_interval_ms = ms;
        self
    }

    /// Set request timeout in milliseconds
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.request_ms = ms;
        self
    }

    /// Set connect timeout in milliseconds
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.connect_ms = ms;
        self
    }

    /// Set the scan resolution in dpi
    pub fn resolution(mut self, dpi: u32) -> Self {
        self.config.scan.resolution = dpi;
        self
    }

    /// Set the compression quality factor
    pub fn compression_qfactor(mut self, qfactor: u32) -> Self {
        self.config.scan.compression_qfactor = qfactor;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ScannerConfig {
        self.config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
