//! Configuration management for EmProto
//!
//! This module handles loading, validation, and management of the
//! communicator configuration from YAML files. Every section falls back to
//! its defaults when omitted, so a minimal file only lists what it changes.

use crate::error::{EvseError, Result};
use crate::protocol::P51Guard;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UDP socket configuration
    pub network: NetworkConfig,

    /// Device session timing
    pub session: SessionConfig,

    /// Wire protocol options
    pub protocol: ProtocolConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// JSON file holding known serials with their passwords and names;
    /// empty disables the file
    pub evses_file: String,

    /// Dump every sent/received datagram as hex
    pub dump_datagrams: bool,

    /// Timezone used when displaying device clocks
    pub timezone: String,
}

/// UDP socket parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local bind address (0.0.0.0 to receive broadcasts on all interfaces)
    pub bind_addr: String,

    /// Local UDP port the devices broadcast to (28376 on known firmware)
    pub port: u16,

    /// Enable SO_BROADCAST on the socket
    pub broadcast: bool,
}

/// Session liveness and request timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// A device silent for longer than this is considered gone
    pub liveness_timeout_secs: u64,

    /// Interval of the liveness sweep
    pub sweep_interval_ms: u64,

    /// Bound on waiting for a command response
    pub request_timeout_ms: u64,

    /// Bound on waiting for the login response
    pub login_timeout_ms: u64,

    /// Interval of the charge record poll sent to logged-in devices;
    /// 0 disables polling and re-login
    pub poll_interval_ms: u64,

    /// Log in again with the saved password when no keepalive was
    /// acknowledged for this long; 0 disables
    pub relogin_after_secs: u64,

    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
}

/// Wire protocol options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Guard used when decoding the `p51` field of login datagrams
    pub p51_guard: P51Guard,

    /// User id written into charge start commands
    pub user_id: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file or log directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl SessionConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    pub fn relogin_after(&self) -> Option<Duration> {
        (self.relogin_after_secs > 0).then(|| Duration::from_secs(self.relogin_after_secs))
    }
}

impl NetworkConfig {
    /// Socket address to bind the UDP transport to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_addr.parse().map_err(|e| {
            EvseError::invalid_parameter("network.bind_addr", format!("Invalid address: {}", e))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = ["emproto.yaml", "/data/emproto.yaml", "/etc/emproto/config.yaml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.network.socket_addr()?;

        if self.network.port == 0 {
            return Err(EvseError::invalid_parameter(
                "network.port",
                "Port must be greater than 0",
            ));
        }

        if self.session.liveness_timeout_secs == 0 {
            return Err(EvseError::invalid_parameter(
                "session.liveness_timeout_secs",
                "Must be greater than 0",
            ));
        }

        if self.session.sweep_interval_ms == 0 {
            return Err(EvseError::invalid_parameter(
                "session.sweep_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.session.request_timeout_ms == 0 || self.session.login_timeout_ms == 0 {
            return Err(EvseError::invalid_parameter(
                "session.request_timeout_ms",
                "Request and login timeouts must be greater than 0",
            ));
        }

        if self.session.event_capacity == 0 {
            return Err(EvseError::invalid_parameter(
                "session.event_capacity",
                "Must be greater than 0",
            ));
        }

        if self.protocol.user_id.len() > 16 {
            return Err(EvseError::invalid_parameter(
                "protocol.user_id",
                "At most 16 characters",
            ));
        }

        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| EvseError::invalid_parameter("timezone", e.to_string()))?;

        crate::logging::parse_log_level(&self.logging.level)?;

        Ok(())
    }

    /// Parsed display timezone, UTC when the name is unknown
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}
