//! rust-comm
//!
//! A `javax.comm`-style serial port core: a port registry with ownership
//! arbitration, drivers that materialize ports, serial ports with
//! threshold/timeout read semantics, and line-status events.
//!
//! # Modules
//!
//! - `registry`: port names to identifiers, opening with ownership arbitration
//! - `ownership`: the owner cell and ownership events of one port
//! - `driver`: the `CommDriver` seam and the serial driver
//! - `comm_port`: the transport-neutral `CommPort` surface
//! - `connection`: connect/disconnect wrapper for a single 8N1 link
//! - `serial_port`: the open serial port handle
//! - `event`: line-status and data events, one listener per port
//! - `port`: the device seam, system and mock backends, and the read policy engine
//! - `config`: configuration management with TOML support
//! - `logging`: tracing subscriber setup
//! - `error`: unified error handling
//!
//! # Example
//!
//! ```
//! use rust_comm::driver::{DriverSettings, SerialDriver};
//! use rust_comm::port::MockOpener;
//! use rust_comm::PortRegistry;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let opener = Arc::new(MockOpener::new());
//! let line = opener.line("ttyS0");
//! let settings = DriverSettings {
//!     ports: vec!["ttyS0".into()],
//!     ..DriverSettings::default()
//! };
//!
//! let registry = PortRegistry::new();
//! registry.install(Arc::new(SerialDriver::new(opener, settings)))?;
//!
//! let port = registry
//!     .identifier("ttyS0")?
//!     .open_serial("example", Duration::from_secs(2))?;
//! port.write(b"AT\r")?;
//! assert_eq!(line.written_bytes(), b"AT\r");
//! # Ok::<(), rust_comm::CommError>(())
//! ```

pub mod comm_port;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod event;
pub mod logging;
pub mod ownership;
pub mod port;
pub mod registry;
pub mod serial_port;

pub use comm_port::{CommPort, PortType};
pub use connection::{available_serial_ports, SerialConnection};
pub use driver::{CommDriver, DriverSettings, SerialDriver};
pub use error::{CommError, CommResult};
pub use event::{EventKind, EventMask, SerialPortEvent, SerialPortEventListener};
pub use ownership::{ListenerId, OwnershipClaim, OwnershipEvent, OwnershipListener};
pub use port::{
    DataBits, FlowControl, Parity, PortConfiguration, PortError, StopBits, SUPPORTED_BAUD_RATES,
};
pub use registry::{PortIdentifier, PortRegistry, PortSummary};
pub use serial_port::SerialPort;

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
