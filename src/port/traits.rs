//! Core traits for the device seam.
//!
//! `DeviceHandle` is one open OS device; `DeviceOpener` creates them. Real
//! hardware goes through `SystemOpener` and tests go through `MockOpener`, so
//! everything above this seam is backend-agnostic.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Baud rates accepted by `set_serial_port_params`, the standard termios table.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];

/// Returns true if `baud` is on the allow-list.
pub fn is_supported_baud(baud: u32) -> bool {
    SUPPORTED_BAUD_RATES.binary_search(&baud).is_ok()
}

/// Line settings and read policy knobs for a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfiguration {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Receive timeout; `None` means disabled.
    pub receive_timeout: Option<Duration>,

    /// Receive threshold in bytes; `None` means disabled.
    pub receive_threshold: Option<usize>,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            receive_timeout: None,
            receive_threshold: Some(1),
        }
    }
}

impl PortConfiguration {
    /// Check the line settings against what the backends can express.
    pub fn validate(&self) -> Result<(), PortError> {
        if !is_supported_baud(self.baud_rate) {
            return Err(PortError::unsupported(format!(
                "baud rate {}",
                self.baud_rate
            )));
        }
        if self.stop_bits == StopBits::OnePointFive && self.data_bits != DataBits::Five {
            return Err(PortError::unsupported(
                "1.5 stop bits require 5 data bits",
            ));
        }
        serialport::StopBits::try_from(self.stop_bits)?;
        serialport::Parity::try_from(self.parity)?;
        Ok(())
    }

    /// True when switching to `other` needs a fresh device handle.
    ///
    /// Baud rate and the read policy knobs are baked into the handle at open
    /// time; the remaining line settings are applied in place.
    pub fn requires_reopen(&self, other: &PortConfiguration) -> bool {
        self.baud_rate != other.baud_rate
            || self.receive_timeout != other.receive_timeout
            || self.receive_threshold != other.receive_threshold
    }

    /// True when the settings applied in place (framing and flow control)
    /// are the same.
    pub fn same_line_settings(&self, other: &PortConfiguration) -> bool {
        self.data_bits == other.data_bits
            && self.stop_bits == other.stop_bits
            && self.parity == other.parity
            && self.flow_control == other.flow_control
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Build from a bit count, as in `DATABITS_5..DATABITS_8`.
    pub fn from_count(bits: u8) -> Option<Self> {
        match bits {
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            _ => None,
        }
    }

    pub fn count(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl TryFrom<Parity> for serialport::Parity {
    type Error = PortError;

    fn try_from(parity: Parity) -> Result<Self, PortError> {
        match parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Mark => Err(PortError::unsupported("mark parity")),
            Parity::Space => Err(PortError::unsupported("space parity")),
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl TryFrom<StopBits> for serialport::StopBits {
    type Error = PortError;

    fn try_from(bits: StopBits) -> Result<Self, PortError> {
        match bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => Err(PortError::unsupported("1.5 stop bits")),
        }
    }
}

/// Snapshot of the modem status lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSignals {
    pub cts: bool,
    pub dsr: bool,
    pub ri: bool,
    pub cd: bool,
}

/// Cumulative line error counters since the device was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineErrors {
    pub overrun: u32,
    pub parity: u32,
    pub framing: u32,
    pub breaks: u32,
}

/// One open OS serial device.
///
/// Dropping the handle releases the underlying resource.
pub trait DeviceHandle: Send + std::fmt::Debug {
    /// Read whatever is available, waiting at most `wait` for the first byte.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read_within(&mut self, buffer: &mut [u8], wait: Duration) -> Result<usize, PortError>;

    /// Write bytes, returning how many were accepted.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Block until queued output has been transmitted.
    fn flush(&mut self) -> Result<(), PortError>;

    /// Apply data bits, parity, stop bits and flow control in place.
    fn apply_line_settings(&mut self, config: &PortConfiguration) -> Result<(), PortError>;

    /// Bytes waiting in the input queue.
    fn bytes_to_read(&self) -> Result<usize, PortError>;

    /// Bytes waiting in the output queue.
    fn bytes_to_write(&self) -> Result<usize, PortError>;

    fn line_signals(&mut self) -> Result<LineSignals, PortError>;

    fn set_dtr(&mut self, level: bool) -> Result<(), PortError>;

    fn set_rts(&mut self, level: bool) -> Result<(), PortError>;

    /// Hold the line in break state for `duration`.
    fn send_break(&mut self, duration: Duration) -> Result<(), PortError>;

    /// Line error counters, if the backend can report them.
    fn line_errors(&mut self) -> Result<LineErrors, PortError> {
        Err(PortError::unsupported("line error counters"))
    }
}

/// Creates device handles and enumerates the devices a backend can see.
pub trait DeviceOpener: Send + Sync + std::fmt::Debug {
    /// Open `path` and configure it with `config`.
    fn open(
        &self,
        path: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn DeviceHandle>, PortError>;

    /// Device paths currently present on the system.
    fn available_ports(&self) -> Result<Vec<String>, PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = PortConfiguration::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.flow_control, FlowControl::None);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.receive_timeout, None);
        assert_eq!(config.receive_threshold, Some(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_baud_allow_list_is_sorted() {
        assert!(SUPPORTED_BAUD_RATES.windows(2).all(|w| w[0] < w[1]));
        assert!(is_supported_baud(115200));
        assert!(is_supported_baud(4000000));
        assert!(!is_supported_baud(123));
        assert!(!is_supported_baud(0));
    }

    #[test]
    fn test_validate_rejects_unexpressible_settings() {
        let mut config = PortConfiguration {
            baud_rate: 123,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_unsupported());

        config.baud_rate = 19200;
        config.parity = Parity::Mark;
        assert!(config.validate().unwrap_err().is_unsupported());

        config.parity = Parity::None;
        config.stop_bits = StopBits::OnePointFive;
        assert!(config.validate().unwrap_err().is_unsupported());
    }

    #[test]
    fn test_requires_reopen() {
        let base = PortConfiguration::default();

        let same = base.clone();
        assert!(!base.requires_reopen(&same));

        let parity_only = PortConfiguration {
            parity: Parity::Even,
            ..base.clone()
        };
        assert!(!base.requires_reopen(&parity_only));

        let faster = PortConfiguration {
            baud_rate: 19200,
            ..base.clone()
        };
        assert!(base.requires_reopen(&faster));

        let timed = PortConfiguration {
            receive_timeout: Some(Duration::from_millis(100)),
            ..base.clone()
        };
        assert!(base.requires_reopen(&timed));

        let counted = PortConfiguration {
            receive_threshold: Some(8),
            ..base
        };
        assert!(counted.requires_reopen(&PortConfiguration::default()));
    }

    #[test]
    fn test_data_bits_count() {
        for n in 5..=8 {
            assert_eq!(DataBits::from_count(n).map(DataBits::count), Some(n));
        }
        assert_eq!(DataBits::from_count(9), None);
        let serialport_bits: serialport::DataBits = DataBits::Seven.into();
        assert_eq!(serialport_bits, serialport::DataBits::Seven);
    }

    #[test]
    fn test_flow_control_conversion() {
        let serialport_flow: serialport::FlowControl = FlowControl::Hardware.into();
        assert_eq!(serialport_flow, serialport::FlowControl::Hardware);
    }

    #[test]
    fn test_parity_conversion() {
        let even: serialport::Parity = Parity::Even.try_into().unwrap();
        assert_eq!(even, serialport::Parity::Even);
        assert!(serialport::Parity::try_from(Parity::Space).is_err());
    }

    #[test]
    fn test_stop_bits_conversion() {
        let two: serialport::StopBits = StopBits::Two.try_into().unwrap();
        assert_eq!(two, serialport::StopBits::Two);
        assert!(serialport::StopBits::try_from(StopBits::OnePointFive).is_err());
    }
}
