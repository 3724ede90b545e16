//! The port registry.
//!
//! Maps port names to identifiers. One registry is normally shared by the
//! whole process through an `Arc`; all methods take `&self` and are safe to
//! call from any thread.

use crate::comm_port::{CommPort, PortType};
use crate::driver::CommDriver;
use crate::error::{CommError, CommResult};
use crate::ownership::{ListenerId, Ownership, OwnershipListener};
use crate::serial_port::SerialPort;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A registered port: its name, type and the driver that opens it.
pub struct PortIdentifier {
    name: String,
    port_type: PortType,
    driver: Arc<dyn CommDriver>,
    ownership: Arc<Ownership>,
}

impl PortIdentifier {
    pub fn new(name: impl Into<String>, port_type: PortType, driver: Arc<dyn CommDriver>) -> Self {
        let name = name.into();
        Self {
            ownership: Ownership::new(name.clone()),
            name,
            port_type,
            driver,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn current_owner(&self) -> Option<String> {
        self.ownership.current_owner()
    }

    pub fn is_currently_owned(&self) -> bool {
        self.ownership.is_owned()
    }

    /// Open the port for `app`.
    ///
    /// If another application owns the port, its ownership listeners are told
    /// and the call waits up to `timeout` for the port to be closed before
    /// failing with `PortInUse`.
    pub fn open(&self, app: &str, timeout: Duration) -> CommResult<Box<dyn CommPort>> {
        let claim = self.ownership.claim(app, timeout)?;
        let port = self.driver.open_port(&self.name, self.port_type, claim)?;
        info!(port = %self.name, owner = app, "port opened");
        Ok(port)
    }

    /// `open` for callers that need the serial surface.
    pub fn open_serial(&self, app: &str, timeout: Duration) -> CommResult<SerialPort> {
        self.open(app, timeout)?.into_serial()
    }

    pub fn add_ownership_listener<L>(&self, listener: L) -> ListenerId
    where
        L: OwnershipListener + 'static,
    {
        self.ownership.add_listener(Arc::new(listener))
    }

    pub fn remove_ownership_listener(&self, id: ListenerId) -> bool {
        self.ownership.remove_listener(id)
    }

    /// A serializable view for listings.
    pub fn summary(&self) -> PortSummary {
        PortSummary {
            name: self.name.clone(),
            port_type: self.port_type,
            owner: self.current_owner(),
        }
    }
}

impl fmt::Debug for PortIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortIdentifier")
            .field("name", &self.name)
            .field("port_type", &self.port_type)
            .field("owner", &self.current_owner())
            .finish()
    }
}

/// Name, type and owner of a registered port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSummary {
    pub name: String,
    pub port_type: PortType,
    pub owner: Option<String>,
}

/// Concurrent map from port name to identifier.
#[derive(Default)]
pub struct PortRegistry {
    ports: RwLock<HashMap<String, Arc<PortIdentifier>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port. A later registration under the same name replaces the
    /// earlier one but keeps its owner and ownership listeners, so a port that
    /// is open stays exclusively owned.
    pub fn register(
        &self,
        name: impl Into<String>,
        port_type: PortType,
        driver: Arc<dyn CommDriver>,
    ) -> Arc<PortIdentifier> {
        let name = name.into();
        let mut ports = self.ports.write();
        let ownership = match ports.get(&name) {
            Some(existing) => Arc::clone(&existing.ownership),
            None => Ownership::new(name.clone()),
        };
        let identifier = Arc::new(PortIdentifier {
            name,
            port_type,
            driver,
            ownership,
        });
        let replaced = ports.insert(identifier.name.clone(), Arc::clone(&identifier));
        drop(ports);

        if replaced.is_some() {
            debug!(port = %identifier.name, "port re-registered");
        }
        identifier
    }

    /// Initialize `driver` and register every port it reports.
    pub fn install(&self, driver: Arc<dyn CommDriver>) -> CommResult<usize> {
        let ports = driver.initialize()?;
        let count = ports.len();
        for (name, port_type) in ports {
            self.register(name, port_type, Arc::clone(&driver));
        }
        Ok(count)
    }

    pub fn identifier(&self, name: &str) -> CommResult<Arc<PortIdentifier>> {
        self.ports
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CommError::NoSuchPort(name.to_string()))
    }

    /// The identifier an open port was created from.
    pub fn identifier_for(&self, port: &dyn CommPort) -> CommResult<Arc<PortIdentifier>> {
        self.identifier(port.name())
    }

    /// Snapshot of all identifiers, sorted by name.
    pub fn identifiers(&self) -> impl Iterator<Item = Arc<PortIdentifier>> {
        let mut snapshot: Vec<_> = self.ports.read().values().cloned().collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot.into_iter()
    }

    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.read().is_empty()
    }
}

impl fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortRegistry")
            .field("ports", &self.len())
            .finish()
    }
}
