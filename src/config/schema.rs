//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::port::{is_supported_baud, PortConfiguration};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults applied to newly opened serial ports
    pub serial: SerialConfig,
    /// Which ports the serial driver registers
    pub registry: RegistryConfig,
    /// Event monitor settings
    pub events: EventsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values the type system cannot.
    pub fn validate(&self) -> ConfigResult<()> {
        if !is_supported_baud(self.serial.default_baud) {
            return Err(ConfigError::invalid(
                "serial.default_baud",
                format!("{} is not a supported baud rate", self.serial.default_baud),
            ));
        }
        if self.events.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "events.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate for newly opened ports
    pub default_baud: u32,
    /// Receive timeout for newly opened ports; absent means disabled
    pub default_receive_timeout_ms: Option<u64>,
    /// Receive threshold for newly opened ports; absent means disabled
    pub default_receive_threshold: Option<usize>,
    /// Directory prefixed to bare port names
    pub device_dir: String,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: 9600,
            default_receive_timeout_ms: None,
            default_receive_threshold: Some(1),
            device_dir: default_device_dir().to_string(),
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Line settings a port starts with.
    pub fn port_configuration(&self) -> PortConfiguration {
        PortConfiguration {
            baud_rate: self.default_baud,
            receive_timeout: self.default_receive_timeout_ms.map(Duration::from_millis),
            receive_threshold: self.default_receive_threshold,
            ..PortConfiguration::default()
        }
    }
}

#[cfg(unix)]
fn default_device_dir() -> &'static str {
    "/dev/"
}

#[cfg(not(unix))]
fn default_device_dir() -> &'static str {
    ""
}

/// Registry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ports registered whether or not the OS reports them
    pub ports: Vec<String>,
    /// Also register every port the OS enumerates
    pub auto_discover: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            auto_discover: true,
        }
    }
}

#[cfg(unix)]
fn default_ports() -> Vec<String> {
    (0..4).map(|n| format!("/dev/ttyS{n}")).collect()
}

#[cfg(not(unix))]
fn default_ports() -> Vec<String> {
    (1..=4).map(|n| format!("COM{n}")).collect()
}

/// Event monitor configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Interval between line-status polls
    pub poll_interval_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
        }
    }
}

impl EventsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}
