//! System serial devices.
//!
//! Wraps the `serialport` crate's `SerialPort` trait with our own `DeviceHandle`
//! trait, and adds the access check and device naming rules that sit in front of
//! every native open.

use super::error::PortError;
use super::traits::{DeviceHandle, DeviceOpener, LineSignals, PortConfiguration};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Upper bound on a single blocking write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Map a logical port name onto a device path.
///
/// A bare name such as `ttyS0` is placed under `device_dir`; names that are
/// already absolute or already carry the prefix are left alone. An empty
/// `device_dir` (the Windows default) leaves every name unchanged.
pub fn device_path(name: &str, device_dir: &str) -> String {
    if device_dir.is_empty()
        || name.starts_with(device_dir)
        || std::path::Path::new(name).is_absolute()
    {
        return name.to_string();
    }
    format!("{}/{}", device_dir.trim_end_matches('/'), name)
}

/// Fail fast unless the caller can both read and write `path`.
#[cfg(unix)]
pub fn check_access(path: &str) -> Result<(), PortError> {
    use rustix::fs::{access, Access};
    use rustix::io::Errno;

    match access(path, Access::READ_OK | Access::WRITE_OK) {
        Ok(()) => Ok(()),
        Err(Errno::NOENT | Errno::NOTDIR) => Err(PortError::not_found(path)),
        Err(Errno::ACCESS | Errno::PERM | Errno::ROFS) => Err(PortError::permission_denied(path)),
        Err(errno) => Err(PortError::Io(errno.into())),
    }
}

/// COM ports are not filesystem entries; the native open reports access errors.
#[cfg(not(unix))]
pub fn check_access(_path: &str) -> Result<(), PortError> {
    Ok(())
}

/// An open OS serial device backed by `serialport`.
pub struct SystemDevice {
    port: Box<dyn serialport::SerialPort>,
    path: String,
}

impl SystemDevice {
    /// Open a serial device with the given configuration.
    ///
    /// # Example
    /// ```no_run
    /// use rust_comm::port::{PortConfiguration, SystemDevice};
    ///
    /// let device = SystemDevice::open("/dev/ttyUSB0", &PortConfiguration::default())?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(path: &str, config: &PortConfiguration) -> Result<Self, PortError> {
        check_access(path)?;
        config.validate()?;

        let port = serialport::new(path, config.baud_rate)
            .data_bits(config.data_bits.into())
            .flow_control(config.flow_control.into())
            .parity(config.parity.try_into()?)
            .stop_bits(config.stop_bits.try_into()?)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => PortError::not_found(path),
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                    PortError::permission_denied(path)
                }
                _ => PortError::Serial(e),
            })?;

        debug!(path, baud = config.baud_rate, "opened serial device");
        Ok(Self {
            port,
            path: path.to_string(),
        })
    }
}

impl DeviceHandle for SystemDevice {
    fn read_within(&mut self, buffer: &mut [u8], wait: Duration) -> Result<usize, PortError> {
        if buffer.is_empty() {
            return Ok(0);
        }
        if wait.is_zero() && self.bytes_to_read()? == 0 {
            return Ok(0);
        }

        self.port.set_timeout(wait)?;
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(PortError::Io(e)),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.port.set_timeout(WRITE_TIMEOUT)?;
        self.port.write(data).map_err(PortError::Io)
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.port.flush().map_err(PortError::Io)
    }

    fn apply_line_settings(&mut self, config: &PortConfiguration) -> Result<(), PortError> {
        self.port.set_data_bits(config.data_bits.into())?;
        self.port.set_parity(config.parity.try_into()?)?;
        self.port.set_stop_bits(config.stop_bits.try_into()?)?;
        self.port.set_flow_control(config.flow_control.into())?;
        Ok(())
    }

    fn bytes_to_read(&self) -> Result<usize, PortError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn bytes_to_write(&self) -> Result<usize, PortError> {
        Ok(self.port.bytes_to_write()? as usize)
    }

    fn line_signals(&mut self) -> Result<LineSignals, PortError> {
        Ok(LineSignals {
            cts: self.port.read_clear_to_send()?,
            dsr: self.port.read_data_set_ready()?,
            ri: self.port.read_ring_indicator()?,
            cd: self.port.read_carrier_detect()?,
        })
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), PortError> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(PortError::Serial)
    }

    fn set_rts(&mut self, level: bool) -> Result<(), PortError> {
        self.port
            .write_request_to_send(level)
            .map_err(PortError::Serial)
    }

    fn send_break(&mut self, duration: Duration) -> Result<(), PortError> {
        self.port.set_break()?;
        std::thread::sleep(duration);
        self.port.clear_break().map_err(PortError::Serial)
    }
}

impl Drop for SystemDevice {
    fn drop(&mut self) {
        debug!(path = %self.path, "closed serial device");
    }
}

impl std::fmt::Debug for SystemDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDevice")
            .field("path", &self.path)
            .field("baud_rate", &self.port.baud_rate().ok())
            .finish()
    }
}

/// Opens real devices through the OS serial driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl DeviceOpener for SystemOpener {
    fn open(
        &self,
        path: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn DeviceHandle>, PortError> {
        Ok(Box::new(SystemDevice::open(path, config)?))
    }

    fn available_ports(&self) -> Result<Vec<String>, PortError> {
        let ports = serialport::available_ports()
            .map_err(|e| PortError::Unavailable(format!("port enumeration failed: {e}")))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}
