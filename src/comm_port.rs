//! The transport-neutral port surface.

use crate::error::{CommError, CommResult};
use crate::serial_port::SerialPort;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of port an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Serial,
    Parallel,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => f.pad("serial"),
            Self::Parallel => f.pad("parallel"),
        }
    }
}

/// An open communications port.
///
/// Capabilities a transport cannot provide report `UnsupportedOperation` (setters)
/// or `None` (getters) instead of silently doing nothing.
pub trait CommPort: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn port_type(&self) -> PortType;

    fn read(&self, buffer: &mut [u8]) -> CommResult<usize>;

    fn write(&self, data: &[u8]) -> CommResult<usize>;

    /// Release the port. Safe to call any number of times.
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn enable_receive_timeout(&self, timeout: Duration) -> CommResult<()>;

    fn disable_receive_timeout(&self) -> CommResult<()>;

    fn receive_timeout(&self) -> Option<Duration>;

    fn is_receive_timeout_enabled(&self) -> bool {
        self.receive_timeout().is_some()
    }

    fn enable_receive_threshold(&self, threshold: usize) -> CommResult<()>;

    fn disable_receive_threshold(&self) -> CommResult<()>;

    fn receive_threshold(&self) -> Option<usize>;

    fn is_receive_threshold_enabled(&self) -> bool {
        self.receive_threshold().is_some()
    }

    fn enable_receive_framing(&self, _framing_byte: u8) -> CommResult<()> {
        Err(CommError::unsupported("receive framing"))
    }

    fn disable_receive_framing(&self) -> CommResult<()> {
        Ok(())
    }

    fn receive_framing_byte(&self) -> Option<u8> {
        None
    }

    fn set_input_buffer_size(&self, _size: usize) -> CommResult<()> {
        Err(CommError::unsupported("input buffer sizing"))
    }

    fn input_buffer_size(&self) -> Option<usize> {
        None
    }

    fn set_output_buffer_size(&self, _size: usize) -> CommResult<()> {
        Err(CommError::unsupported("output buffer sizing"))
    }

    fn output_buffer_size(&self) -> Option<usize> {
        None
    }

    fn as_serial(&self) -> Option<&SerialPort> {
        None
    }

    /// Recover the serial-specific surface.
    fn into_serial(self: Box<Self>) -> CommResult<SerialPort> {
        Err(CommError::unsupported(format!(
            "{} is not a serial port",
            self.name()
        )))
    }
}
