//! Mock serial devices for testing.
//!
//! A `MockLine` is the far end of a simulated wire: tests feed bytes into it,
//! flip modem signals, and inspect what the port wrote. `MockOpener` hands out
//! `MockDevice` handles attached to one line per device path, and records every
//! open and close so tests can observe when a handle is recreated.

use super::error::PortError;
use super::traits::{DeviceHandle, DeviceOpener, LineErrors, LineSignals, PortConfiguration};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Inner state of a simulated line.
#[derive(Debug, Default)]
struct LineState {
    /// Bytes waiting to be read by the port.
    input: VecDeque<u8>,
    /// Log of every write the port performed.
    write_log: Vec<Vec<u8>>,
    /// Reported size of the output queue.
    pending_output: usize,
    signals: LineSignals,
    errors: LineErrors,
    line_errors_unsupported: bool,
    dtr: bool,
    rts: bool,
    breaks: Vec<Duration>,
    reject_line_settings: bool,
    deny_access: bool,
    applied: Option<PortConfiguration>,
    opens: Vec<PortConfiguration>,
    closes: usize,
}

#[derive(Debug, Default)]
struct LineShared {
    state: Mutex<LineState>,
    arrived: Condvar,
}

/// The far end of a simulated serial line.
///
/// # Example
/// ```
/// use rust_comm::port::{DeviceHandle, DeviceOpener, MockOpener, PortConfiguration};
/// use std::time::Duration;
///
/// let opener = MockOpener::new();
/// let line = opener.line("/dev/ttyMOCK0");
/// line.feed(b"Hello");
///
/// let mut device = opener.open("/dev/ttyMOCK0", &PortConfiguration::default()).unwrap();
/// let mut buffer = [0u8; 16];
/// let n = device.read_within(&mut buffer, Duration::ZERO).unwrap();
/// assert_eq!(&buffer[..n], b"Hello");
///
/// device.write_bytes(b"ACK").unwrap();
/// assert_eq!(line.written(), vec![b"ACK".to_vec()]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockLine {
    shared: Arc<LineShared>,
}

impl MockLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver bytes to the port and wake any blocked reader.
    pub fn feed(&self, data: &[u8]) {
        let mut state = self.shared.state.lock();
        state.input.extend(data);
        self.shared.arrived.notify_all();
    }

    /// Bytes delivered but not yet read by the port.
    pub fn available(&self) -> usize {
        self.shared.state.lock().input.len()
    }

    /// Every write the port performed, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().write_log.clone()
    }

    /// All written bytes concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.shared.state.lock().write_log.concat()
    }

    pub fn set_pending_output(&self, bytes: usize) {
        self.shared.state.lock().pending_output = bytes;
    }

    pub fn set_cts(&self, level: bool) {
        self.shared.state.lock().signals.cts = level;
    }

    pub fn set_dsr(&self, level: bool) {
        self.shared.state.lock().signals.dsr = level;
    }

    pub fn set_ri(&self, level: bool) {
        self.shared.state.lock().signals.ri = level;
    }

    pub fn set_cd(&self, level: bool) {
        self.shared.state.lock().signals.cd = level;
    }

    pub fn raise_overrun(&self) {
        self.shared.state.lock().errors.overrun += 1;
    }

    pub fn raise_parity_error(&self) {
        self.shared.state.lock().errors.parity += 1;
    }

    pub fn raise_framing_error(&self) {
        self.shared.state.lock().errors.framing += 1;
    }

    pub fn raise_break(&self) {
        self.shared.state.lock().errors.breaks += 1;
    }

    /// Report line error counters as unsupported, like the system backend.
    pub fn disable_line_errors(&self) {
        self.shared.state.lock().line_errors_unsupported = true;
    }

    /// Make in-place line setting changes fail, as a driver rejecting them would.
    pub fn reject_line_settings(&self, reject: bool) {
        self.shared.state.lock().reject_line_settings = reject;
    }

    /// Make the access check fail for this line.
    pub fn deny_access(&self, deny: bool) {
        self.shared.state.lock().deny_access = deny;
    }

    /// Level last driven on DTR by the port.
    pub fn dtr(&self) -> bool {
        self.shared.state.lock().dtr
    }

    /// Level last driven on RTS by the port.
    pub fn rts(&self) -> bool {
        self.shared.state.lock().rts
    }

    /// Durations of every break the port sent.
    pub fn breaks_sent(&self) -> Vec<Duration> {
        self.shared.state.lock().breaks.clone()
    }

    /// Settings most recently applied in place, if any.
    pub fn applied_settings(&self) -> Option<PortConfiguration> {
        self.shared.state.lock().applied.clone()
    }

    /// Number of device handles opened on this line.
    pub fn open_count(&self) -> usize {
        self.shared.state.lock().opens.len()
    }

    /// Number of device handles released on this line.
    pub fn close_count(&self) -> usize {
        self.shared.state.lock().closes
    }

    /// Configuration each handle was opened with, oldest first.
    pub fn opened_with(&self) -> Vec<PortConfiguration> {
        self.shared.state.lock().opens.clone()
    }
}

/// A device handle attached to a `MockLine`.
#[derive(Debug)]
pub struct MockDevice {
    path: String,
    line: MockLine,
}

impl MockDevice {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl DeviceHandle for MockDevice {
    fn read_within(&mut self, buffer: &mut [u8], wait: Duration) -> Result<usize, PortError> {
        if buffer.is_empty() {
            return Ok(0);
        }

        let shared = &self.line.shared;
        let deadline = Instant::now() + wait;
        let mut state = shared.state.lock();
        while state.input.is_empty() {
            if shared.arrived.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let n = buffer.len().min(state.input.len());
        for (slot, byte) in buffer.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.line.shared.state.lock().write_log.push(data.to_vec());
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.line.shared.state.lock().pending_output = 0;
        Ok(())
    }

    fn apply_line_settings(&mut self, config: &PortConfiguration) -> Result<(), PortError> {
        let mut state = self.line.shared.state.lock();
        if state.reject_line_settings {
            return Err(PortError::unsupported("line settings rejected by mock"));
        }
        state.applied = Some(config.clone());
        Ok(())
    }

    fn bytes_to_read(&self) -> Result<usize, PortError> {
        Ok(self.line.available())
    }

    fn bytes_to_write(&self) -> Result<usize, PortError> {
        Ok(self.line.shared.state.lock().pending_output)
    }

    fn line_signals(&mut self) -> Result<LineSignals, PortError> {
        Ok(self.line.shared.state.lock().signals)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), PortError> {
        self.line.shared.state.lock().dtr = level;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<(), PortError> {
        self.line.shared.state.lock().rts = level;
        Ok(())
    }

    fn send_break(&mut self, duration: Duration) -> Result<(), PortError> {
        self.line.shared.state.lock().breaks.push(duration);
        Ok(())
    }

    fn line_errors(&mut self) -> Result<LineErrors, PortError> {
        let state = self.line.shared.state.lock();
        if state.line_errors_unsupported {
            return Err(PortError::unsupported("line error counters"));
        }
        Ok(state.errors)
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.line.shared.state.lock().closes += 1;
    }
}

/// Opens `MockDevice`s, one simulated line per device path.
#[derive(Debug, Default)]
pub struct MockOpener {
    lines: Mutex<HashMap<String, MockLine>>,
    unavailable: AtomicBool,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// The line behind `path`, created on first use.
    pub fn line(&self, path: &str) -> MockLine {
        self.lines
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// Make port enumeration fail, as if the native backend were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl DeviceOpener for MockOpener {
    fn open(
        &self,
        path: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn DeviceHandle>, PortError> {
        let line = self.line(path);
        {
            let mut state = line.shared.state.lock();
            if state.deny_access {
                return Err(PortError::permission_denied(path));
            }
            config.validate()?;
            state.opens.push(config.clone());
            // A fresh open asserts the modem control lines, like a tty does.
            state.dtr = true;
            state.rts = true;
        }
        Ok(Box::new(MockDevice {
            path: path.to_string(),
            line,
        }))
    }

    fn available_ports(&self) -> Result<Vec<String>, PortError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("mock backend disabled".to_string()));
        }
        let mut names: Vec<String> = self.lines.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
