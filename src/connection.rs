//! Connect/disconnect wrapper for the common case of one serial link.
//!
//! A `SerialConnection` names a port and a baud rate up front and opens the
//! port in a fixed shape: 8 data bits, 1 stop bit, no parity, a 100 ms receive
//! timeout and data-available notification enabled.

use crate::comm_port::PortType;
use crate::driver::CommDriver;
use crate::error::{CommError, CommResult};
use crate::port::{DataBits, Parity, StopBits};
use crate::registry::PortRegistry;
use crate::serial_port::SerialPort;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Owner name a connection claims its port under.
pub const CONNECTION_APP_NAME: &str = "SerialConnection";

/// How long `connect` waits for another owner to give the port up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Receive timeout set on every connected port.
pub const CONNECTION_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

pub const DEFAULT_CONNECTION_BAUD: u32 = 115_200;

/// Rates a connection can be created with.
pub const CONNECTION_BAUD_RATES: [u32; 11] = [
    2400, 4800, 9600, 14400, 19200, 28800, 38400, 57600, 76800, 115_200, 230_400,
];

/// A named serial link that can be connected and disconnected repeatedly.
#[derive(Debug)]
pub struct SerialConnection {
    registry: Arc<PortRegistry>,
    port_name: String,
    baud: u32,
    port: Option<Arc<SerialPort>>,
}

impl SerialConnection {
    /// Fails with `UnsupportedOperation` if `baud` is not a connection rate.
    pub fn new(
        registry: Arc<PortRegistry>,
        port_name: impl Into<String>,
        baud: u32,
    ) -> CommResult<Self> {
        check_baud(baud)?;
        Ok(Self {
            registry,
            port_name: port_name.into(),
            baud,
            port: None,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Change the rate used by the next `connect`.
    pub fn set_baud(&mut self, baud: u32) -> CommResult<()> {
        check_baud(baud)?;
        self.baud = baud;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.port.as_ref().is_some_and(|port| !port.is_closed())
    }

    /// Open and configure the port. Connecting twice is a no-op.
    ///
    /// If configuration fails the port is closed again and its ownership
    /// released.
    pub fn connect(&mut self) -> CommResult<()> {
        if self.is_connected() {
            debug!(port = %self.port_name, "already connected");
            return Ok(());
        }

        let port = self
            .registry
            .identifier(&self.port_name)?
            .open_serial(CONNECTION_APP_NAME, CONNECT_TIMEOUT)?;
        port.enable_receive_timeout(CONNECTION_RECEIVE_TIMEOUT)?;
        port.set_serial_port_params(self.baud, DataBits::Eight, StopBits::One, Parity::None)?;
        port.notify_on_data_available(true);

        info!(port = %self.port_name, baud = self.baud, "connected");
        self.port = Some(Arc::new(port));
        Ok(())
    }

    /// Close the port. Safe to call when not connected.
    pub fn disconnect(&mut self) {
        if let Some(port) = self.port.take() {
            port.close();
            info!(port = %self.port_name, "disconnected");
        }
    }

    /// The connected port, for reading, writing and event listeners.
    pub fn port(&self) -> Option<&Arc<SerialPort>> {
        self.port.as_ref().filter(|port| !port.is_closed())
    }

    pub fn notify_on_data_available(&self, enable: bool) -> CommResult<()> {
        let port = self
            .port()
            .ok_or_else(|| CommError::PortClosed(self.port_name.clone()))?;
        port.notify_on_data_available(enable);
        Ok(())
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Names of the serial ports `driver` reports.
///
/// A driver whose native backend is missing fails with
/// `ResourceUnavailable`.
pub fn available_serial_ports(driver: &dyn CommDriver) -> CommResult<BTreeSet<String>> {
    Ok(driver
        .initialize()?
        .into_iter()
        .filter(|(_, port_type)| *port_type == PortType::Serial)
        .map(|(name, _)| name)
        .collect())
}

fn check_baud(baud: u32) -> CommResult<()> {
    if CONNECTION_BAUD_RATES.contains(&baud) {
        Ok(())
    } else {
        Err(CommError::unsupported(format!("baud rate {baud}")))
    }
}
