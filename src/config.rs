//! Configuration management
//!
//! Handles loading and validating link configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::link::DEFAULT_QUEUE_CAPACITY;
use crate::transport::{Endpoint, TransportKind};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub link: LinkSection,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub framed: FramedConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Vehicle endpoint and transport selection
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSection {
    /// Vehicle address on the local wireless network
    #[serde(default = "default_host")]
    pub host: String,
    /// Control channel port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transport variant
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// Transport connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// A single write stalled longer than this drops the link, in milliseconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Reconnect backoff policy
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds
    #[serde(default = "default_backoff_base")]
    pub base_ms: u64,
    /// Upper bound on the retry delay in milliseconds
    #[serde(default = "default_backoff_cap")]
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base(),
            cap_ms: default_backoff_cap(),
        }
    }
}

/// Outgoing queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Messages retained while disconnected
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

/// Framed (WebSocket) transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FramedConfig {
    /// Request path
    #[serde(default = "default_framed_path")]
    pub path: String,
    /// Keep-alive ping interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for FramedConfig {
    fn default() -> Self {
        Self {
            path: default_framed_path(),
            keepalive_secs: default_keepalive(),
        }
    }
}

/// Control-state publishing
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Periodic send interval in milliseconds
    #[serde(default = "default_cadence")]
    pub cadence_ms: u64,
    /// Stamp payloads with unix milliseconds
    #[serde(default = "default_true")]
    pub include_timestamp: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cadence_ms: default_cadence(),
            include_timestamp: default_true(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics listener address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
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

/// Runtime settings for one connection manager
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub transport: TransportKind,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub queue_capacity: usize,
    pub framed_path: String,
    pub keepalive_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            connect_timeout: Duration::from_millis(default_connect_timeout()),
            write_timeout: Duration::from_millis(default_write_timeout()),
            backoff_base: Duration::from_millis(default_backoff_base()),
            backoff_cap: Duration::from_millis(default_backoff_cap()),
            queue_capacity: default_queue_capacity(),
            framed_path: default_framed_path(),
            keepalive_interval: Duration::from_secs(default_keepalive()),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "10.42.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_transport() -> TransportKind {
    TransportKind::Stream
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_write_timeout() -> u64 {
    5_000
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_cap() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_framed_path() -> String {
    "/".to_string()
}

fn default_keepalive() -> u64 {
    15
}

fn default_cadence() -> u64 {
    2_000
}

fn default_true() -> bool {
    true
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9100))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&contents)
    }

    /// Parse and validate TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.link.host.is_empty() {
            anyhow::bail!("link.host must not be empty");
        }
        if self.link.port == 0 {
            anyhow::bail!("link.port must be > 0");
        }
        if self.link.connect_timeout_ms == 0 {
            anyhow::bail!("link.connect_timeout_ms must be > 0");
        }
        if self.link.write_timeout_ms == 0 {
            anyhow::bail!("link.write_timeout_ms must be > 0");
        }
        if self.backoff.base_ms == 0 {
            anyhow::bail!("backoff.base_ms must be > 0");
        }
        if self.backoff.cap_ms < self.backoff.base_ms {
            anyhow::bail!("backoff.cap_ms must be >= backoff.base_ms");
        }
        if self.queue.capacity == 0 {
            anyhow::bail!("queue.capacity must be > 0");
        }
        if self.framed.keepalive_secs == 0 {
            anyhow::bail!("framed.keepalive_secs must be > 0");
        }
        if !self.framed.path.starts_with('/') {
            anyhow::bail!("framed.path must start with '/'");
        }
        if self.control.cadence_ms == 0 {
            anyhow::bail!("control.cadence_ms must be > 0");
        }
        Ok(())
    }

    /// Configured vehicle endpoint
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.link.host.clone(), self.link.port)
    }

    /// Runtime settings for the connection manager
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            transport: self.link.transport,
            connect_timeout: Duration::from_millis(self.link.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.link.write_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff.base_ms),
            backoff_cap: Duration::from_millis(self.backoff.cap_ms),
            queue_capacity: self.queue.capacity,
            framed_path: self.framed.path.clone(),
            keepalive_interval: Duration::from_secs(self.framed.keepalive_secs),
        }
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.control.cadence_ms)
    }
}
