//! Drivers probe for ports and materialize port objects.

use crate::comm_port::{CommPort, PortType};
use crate::config::Config;
use crate::error::{CommError, CommResult};
use crate::ownership::OwnershipClaim;
use crate::port::{device_path, DeviceOpener, PortConfiguration, PortError, SystemOpener};
use crate::serial_port::{SerialPort, DEFAULT_POLL_INTERVAL};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A source of ports.
pub trait CommDriver: Send + Sync {
    /// Probe the platform and report the ports this driver can open.
    ///
    /// Fails with `ResourceUnavailable` when the native backend is missing.
    fn initialize(&self) -> CommResult<Vec<(String, PortType)>>;

    /// Create the port object for `name`. The claim is held by the returned
    /// port until it is closed.
    fn open_port(
        &self,
        name: &str,
        port_type: PortType,
        claim: OwnershipClaim,
    ) -> CommResult<Box<dyn CommPort>>;
}

/// Settings the serial driver hands to every port it opens.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub ports: Vec<String>,
    pub auto_discover: bool,
    pub device_dir: String,
    pub aliases: HashMap<String, String>,
    pub defaults: PortConfiguration,
    pub poll_interval: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            auto_discover: false,
            device_dir: String::new(),
            aliases: HashMap::new(),
            defaults: PortConfiguration::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&Config> for DriverSettings {
    fn from(config: &Config) -> Self {
        Self {
            ports: config.registry.ports.clone(),
            auto_discover: config.registry.auto_discover,
            device_dir: config.serial.device_dir.clone(),
            aliases: config.serial.port_aliases.clone(),
            defaults: config.serial.port_configuration(),
            poll_interval: config.events.poll_interval(),
        }
    }
}

/// Driver for serial ports behind a `DeviceOpener`.
pub struct SerialDriver {
    opener: Arc<dyn DeviceOpener>,
    settings: DriverSettings,
}

impl SerialDriver {
    pub fn new(opener: Arc<dyn DeviceOpener>, settings: DriverSettings) -> Self {
        Self { opener, settings }
    }

    /// A driver for the OS serial devices.
    pub fn system(config: &Config) -> Self {
        Self::new(Arc::new(SystemOpener), DriverSettings::from(config))
    }

    /// The device path a port name resolves to.
    pub fn resolve(&self, name: &str) -> String {
        let target = self
            .settings
            .aliases
            .get(name)
            .map(String::as_str)
            .unwrap_or(name);
        device_path(target, &self.settings.device_dir)
    }
}

impl CommDriver for SerialDriver {
    fn initialize(&self) -> CommResult<Vec<(String, PortType)>> {
        let mut names: BTreeSet<String> = self.settings.ports.iter().cloned().collect();
        names.extend(self.settings.aliases.keys().cloned());

        if self.settings.auto_discover {
            let discovered = self.opener.available_ports().map_err(|err| match err {
                PortError::Unavailable(msg) => CommError::ResourceUnavailable(msg),
                other => CommError::ResourceUnavailable(other.to_string()),
            })?;
            debug!(count = discovered.len(), "discovered serial ports");
            names.extend(discovered);
        }

        info!(count = names.len(), "serial driver initialized");
        Ok(names
            .into_iter()
            .map(|name| (name, PortType::Serial))
            .collect())
    }

    fn open_port(
        &self,
        name: &str,
        port_type: PortType,
        claim: OwnershipClaim,
    ) -> CommResult<Box<dyn CommPort>> {
        if port_type != PortType::Serial {
            return Err(CommError::unsupported(format!(
                "{port_type} ports are not handled by the serial driver"
            )));
        }

        let path = self.resolve(name);
        debug!(port = name, %path, owner = claim.owner(), "opening serial port");
        let port = SerialPort::new(
            name,
            path,
            Arc::clone(&self.opener),
            self.settings.defaults.clone(),
        )
        .with_poll_interval(self.settings.poll_interval);
        port.attach_claim(claim);
        Ok(Box::new(port))
    }
}

impl fmt::Debug for SerialDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialDriver")
            .field("opener", &self.opener)
            .field("settings", &self.settings)
            .finish()
    }
}
