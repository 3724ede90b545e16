//! The open serial port handle.
//!
//! A `SerialPort` owns at most one device handle at a time. The handle is
//! opened lazily on the first I/O call and dropped whenever the baud rate or a
//! read policy knob changes, so the next I/O call reopens it with the new
//! settings. Other line settings are applied to the live handle in place.
//!
//! Locking: `read_gate` and `write_gate` serialize reads and writes, and
//! configuration changes take both, so they never overlap in-flight I/O. The
//! `slot` mutex is only held for one device call at a time. Lock order is
//! read gate, write gate, slot.

use crate::comm_port::{CommPort, PortType};
use crate::error::{CommError, CommResult};
use crate::event::{
    DeviceProbe, EventHub, EventKind, EventMonitor, SerialPortEventListener,
};
use crate::ownership::OwnershipClaim;
use crate::port::{
    ByteSource, DataBits, DeviceHandle, DeviceOpener, FlowControl, LineSignals, Parity,
    PortConfiguration, PortError, ReadPolicy, StopBits,
};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default interval between event polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest time a blocked read keeps the device to itself.
const LOCK_SLICE: Duration = Duration::from_millis(20);

struct DeviceSlot {
    config: PortConfiguration,
    device: Option<Box<dyn DeviceHandle>>,
    dtr: Option<bool>,
    rts: Option<bool>,
    /// Bumped on every successful open.
    generation: u64,
    /// The last background open failed; cleared when the settings change.
    open_failed: bool,
}

impl DeviceSlot {
    fn attach(&mut self, path: &str, mut device: Box<dyn DeviceHandle>) {
        if let Some(level) = self.dtr {
            if let Err(err) = device.set_dtr(level) {
                warn!(path, error = %err, "failed to restore DTR");
            }
        }
        if let Some(level) = self.rts {
            if let Err(err) = device.set_rts(level) {
                warn!(path, error = %err, "failed to restore RTS");
            }
        }
        self.generation += 1;
        self.open_failed = false;
        self.device = Some(device);
    }

    fn invalidate(&mut self) {
        self.device.take();
        self.open_failed = false;
    }
}

struct Shared {
    name: String,
    path: String,
    opener: Arc<dyn DeviceOpener>,
    slot: Mutex<DeviceSlot>,
    read_gate: Mutex<()>,
    write_gate: Mutex<()>,
    closed: AtomicBool,
}

impl Shared {
    /// The live device, opened first if necessary.
    fn device<'a>(&self, slot: &'a mut DeviceSlot) -> CommResult<&'a mut Box<dyn DeviceHandle>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CommError::PortClosed(self.name.clone()));
        }
        if slot.device.is_none() {
            let device = self
                .opener
                .open(&self.path, &slot.config)
                .map_err(|err| CommError::from_open(&self.path, err))?;
            debug!(port = %self.name, path = %self.path, baud = slot.config.baud_rate, "device opened");
            slot.attach(&self.path, device);
        }
        slot.device
            .as_mut()
            .ok_or_else(|| CommError::PortClosed(self.name.clone()))
    }

    fn with_live_device<R>(
        &self,
        f: impl FnOnce(&mut dyn DeviceHandle) -> Result<R, PortError>,
    ) -> CommResult<R> {
        let mut slot = self.slot.lock();
        let device = self.device(&mut slot)?;
        Ok(f(&mut **device)?)
    }
}

impl DeviceProbe for Shared {
    fn with_device<R>(
        &self,
        materialize: bool,
        f: impl FnOnce(&mut dyn DeviceHandle) -> R,
    ) -> Option<(u64, R)> {
        let mut slot = self.slot.lock();
        if self.is_closed() {
            return None;
        }
        if slot.device.is_none() {
            if !materialize || slot.open_failed {
                return None;
            }
            match self.opener.open(&self.path, &slot.config) {
                Ok(device) => slot.attach(&self.path, device),
                Err(err) => {
                    warn!(port = %self.name, error = %err, "event monitor could not open device");
                    slot.open_failed = true;
                    return None;
                }
            }
        }
        let generation = slot.generation;
        slot.device
            .as_mut()
            .map(|device| (generation, f(&mut **device)))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Reads slice by slice so writers and the event monitor get the device in
/// between.
struct DeviceReader<'a> {
    shared: &'a Shared,
}

impl ByteSource for DeviceReader<'_> {
    fn read_within(&mut self, buffer: &mut [u8], wait: Duration) -> Result<usize, PortError> {
        let deadline = Instant::now().checked_add(wait);
        loop {
            if self.is_cancelled() {
                return Ok(0);
            }
            let mut slot = self.shared.slot.lock();
            let Some(device) = slot.device.as_mut() else {
                return Ok(0);
            };
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => LOCK_SLICE,
            };
            let n = device.read_within(buffer, remaining.min(LOCK_SLICE))?;
            MutexGuard::unlock_fair(slot);
            if n > 0 || deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(n);
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// An open serial port.
pub struct SerialPort {
    shared: Arc<Shared>,
    hub: Arc<EventHub>,
    monitor: Mutex<Option<EventMonitor>>,
    claim: Mutex<Option<OwnershipClaim>>,
    poll_interval: Duration,
}

impl SerialPort {
    /// Create a port for the device at `path`. Nothing is opened yet.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        opener: Arc<dyn DeviceOpener>,
        config: PortConfiguration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                path: path.into(),
                opener,
                slot: Mutex::new(DeviceSlot {
                    config,
                    device: None,
                    dtr: None,
                    rts: None,
                    generation: 0,
                    open_failed: false,
                }),
                read_gate: Mutex::new(()),
                write_gate: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
            hub: Arc::new(EventHub::default()),
            monitor: Mutex::new(None),
            claim: Mutex::new(None),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Tie an ownership claim to this port; it is released on close.
    pub fn attach_claim(&self, claim: OwnershipClaim) {
        *self.claim.lock() = Some(claim);
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The OS device path behind this port.
    pub fn path(&self) -> &str {
        &self.shared.path
    }

    /// The application currently holding this port, if it was opened through
    /// a registry.
    pub fn owner(&self) -> Option<String> {
        self.claim.lock().as_ref().map(|c| c.owner().to_string())
    }

    pub fn configuration(&self) -> PortConfiguration {
        self.shared.slot.lock().config.clone()
    }

    /// True while a device handle is open.
    pub fn is_device_open(&self) -> bool {
        self.shared.slot.lock().device.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CommResult<()> {
        if self.is_closed() {
            return Err(CommError::PortClosed(self.shared.name.clone()));
        }
        Ok(())
    }

    /// Apply `change` to the settings all-or-nothing.
    fn reconfigure(&self, change: impl FnOnce(&mut PortConfiguration)) -> CommResult<()> {
        let _reading = self.shared.read_gate.lock();
        let _writing = self.shared.write_gate.lock();
        let mut guard = self.shared.slot.lock();
        let slot = &mut *guard;
        self.ensure_open()?;

        let mut next = slot.config.clone();
        change(&mut next);
        if next == slot.config {
            return Ok(());
        }
        next.validate().map_err(CommError::from_config)?;

        // The live handle has to accept new line settings even when it is
        // about to be replaced, so a rejection leaves everything unchanged.
        if !slot.config.same_line_settings(&next) {
            if let Some(device) = slot.device.as_mut() {
                if let Err(err) = device.apply_line_settings(&next) {
                    if let Err(revert) = device.apply_line_settings(&slot.config) {
                        warn!(port = %self.shared.name, error = %revert, "could not restore line settings, dropping device");
                        slot.invalidate();
                    }
                    return Err(CommError::from_config(err));
                }
            }
        }

        let reopen = slot.config.requires_reopen(&next);
        slot.config = next;
        if reopen {
            debug!(port = %self.shared.name, "settings changed, device will be reopened");
            slot.invalidate();
        }
        Ok(())
    }

    /// Set baud rate, data bits, stop bits and parity together.
    ///
    /// On failure none of the four values change.
    pub fn set_serial_port_params(
        &self,
        baud_rate: u32,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> CommResult<()> {
        self.reconfigure(|config| {
            config.baud_rate = baud_rate;
            config.data_bits = data_bits;
            config.stop_bits = stop_bits;
            config.parity = parity;
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.shared.slot.lock().config.baud_rate
    }

    pub fn data_bits(&self) -> DataBits {
        self.shared.slot.lock().config.data_bits
    }

    pub fn stop_bits(&self) -> StopBits {
        self.shared.slot.lock().config.stop_bits
    }

    pub fn parity(&self) -> Parity {
        self.shared.slot.lock().config.parity
    }

    pub fn set_flow_control_mode(&self, flow: FlowControl) -> CommResult<()> {
        self.reconfigure(|config| config.flow_control = flow)
    }

    pub fn flow_control_mode(&self) -> FlowControl {
        self.shared.slot.lock().config.flow_control
    }

    pub fn enable_receive_timeout(&self, timeout: Duration) -> CommResult<()> {
        self.reconfigure(|config| config.receive_timeout = Some(timeout))
    }

    pub fn disable_receive_timeout(&self) -> CommResult<()> {
        self.reconfigure(|config| config.receive_timeout = None)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.shared.slot.lock().config.receive_timeout
    }

    pub fn enable_receive_threshold(&self, threshold: usize) -> CommResult<()> {
        self.reconfigure(|config| config.receive_threshold = Some(threshold))
    }

    pub fn disable_receive_threshold(&self) -> CommResult<()> {
        self.reconfigure(|config| config.receive_threshold = None)
    }

    pub fn receive_threshold(&self) -> Option<usize> {
        self.shared.slot.lock().config.receive_threshold
    }

    pub fn set_dtr(&self, level: bool) -> CommResult<()> {
        let mut slot = self.shared.slot.lock();
        self.shared.device(&mut slot)?.set_dtr(level)?;
        slot.dtr = Some(level);
        Ok(())
    }

    /// Last DTR level requested; lines are asserted on open.
    pub fn is_dtr(&self) -> bool {
        self.shared.slot.lock().dtr.unwrap_or(true)
    }

    pub fn set_rts(&self, level: bool) -> CommResult<()> {
        let mut slot = self.shared.slot.lock();
        self.shared.device(&mut slot)?.set_rts(level)?;
        slot.rts = Some(level);
        Ok(())
    }

    pub fn is_rts(&self) -> bool {
        self.shared.slot.lock().rts.unwrap_or(true)
    }

    fn signals(&self) -> CommResult<LineSignals> {
        self.shared.with_live_device(|device| device.line_signals())
    }

    pub fn is_cts(&self) -> CommResult<bool> {
        Ok(self.signals()?.cts)
    }

    pub fn is_dsr(&self) -> CommResult<bool> {
        Ok(self.signals()?.dsr)
    }

    pub fn is_ri(&self) -> CommResult<bool> {
        Ok(self.signals()?.ri)
    }

    pub fn is_cd(&self) -> CommResult<bool> {
        Ok(self.signals()?.cd)
    }

    pub fn send_break(&self, duration: Duration) -> CommResult<()> {
        let _writing = self.shared.write_gate.lock();
        self.shared
            .with_live_device(|device| device.send_break(duration))
    }

    /// Bytes queued by the driver but not yet read.
    pub fn bytes_available(&self) -> CommResult<usize> {
        self.shared.with_live_device(|device| device.bytes_to_read())
    }

    /// Read according to the current threshold and timeout.
    ///
    /// Returns `Ok(0)` when the port is closed by another thread mid-read.
    pub fn read(&self, buffer: &mut [u8]) -> CommResult<usize> {
        let _reading = self.shared.read_gate.lock();
        let policy = {
            let mut slot = self.shared.slot.lock();
            self.shared.device(&mut slot)?;
            ReadPolicy::new(slot.config.receive_threshold, slot.config.receive_timeout)
        };
        let mut reader = DeviceReader {
            shared: &self.shared,
        };
        let n = policy.read(&mut reader, buffer)?;
        if n > 0 && self.hub.mask().contains(EventKind::DataAvailable) {
            let slot = self.shared.slot.lock();
            let empty = slot
                .device
                .as_ref()
                .is_some_and(|device| matches!(device.bytes_to_read(), Ok(0)));
            if empty {
                self.hub.mark_drained();
            }
        }
        Ok(n)
    }

    /// Write all of `data`.
    pub fn write(&self, data: &[u8]) -> CommResult<usize> {
        let _writing = self.shared.write_gate.lock();
        let mut slot = self.shared.slot.lock();
        let device = self.shared.device(&mut slot)?;
        let mut written = 0;
        while written < data.len() {
            let n = device.write_bytes(&data[written..])?;
            if n == 0 {
                return Err(PortError::Io(io::Error::from(io::ErrorKind::WriteZero)).into());
            }
            written += n;
        }
        Ok(written)
    }

    pub fn flush(&self) -> CommResult<()> {
        let _writing = self.shared.write_gate.lock();
        self.shared.with_live_device(|device| device.flush())
    }

    /// Register the single event listener and start the event monitor.
    pub fn add_event_listener<L>(&self, listener: L) -> CommResult<()>
    where
        L: SerialPortEventListener + 'static,
    {
        self.ensure_open()?;
        if !self.hub.install(Arc::new(listener)) {
            return Err(CommError::TooManyListeners(self.shared.name.clone()));
        }

        let mut monitor = self.monitor.lock();
        if monitor.is_none() {
            match EventMonitor::spawn(
                &self.shared.name,
                Arc::clone(&self.shared),
                Arc::clone(&self.hub),
                self.poll_interval,
            ) {
                Ok(spawned) => *monitor = Some(spawned),
                Err(err) => {
                    self.hub.clear();
                    return Err(CommError::ResourceUnavailable(format!(
                        "event monitor thread: {err}"
                    )));
                }
            }
        } else if let Some(running) = monitor.as_ref() {
            running.wake();
        }
        Ok(())
    }

    pub fn remove_event_listener(&self) {
        self.hub.clear();
    }

    /// Enable or disable one event kind.
    pub fn notify_on(&self, kind: EventKind, enable: bool) {
        self.hub.set(kind, enable);
        if let Some(monitor) = self.monitor.lock().as_ref() {
            monitor.wake();
        }
    }

    pub fn is_notify_on(&self, kind: EventKind) -> bool {
        self.hub.mask().contains(kind)
    }

    pub fn notify_on_data_available(&self, enable: bool) {
        self.notify_on(EventKind::DataAvailable, enable);
    }

    pub fn notify_on_output_empty(&self, enable: bool) {
        self.notify_on(EventKind::OutputBufferEmpty, enable);
    }

    pub fn notify_on_cts(&self, enable: bool) {
        self.notify_on(EventKind::Cts, enable);
    }

    pub fn notify_on_dsr(&self, enable: bool) {
        self.notify_on(EventKind::Dsr, enable);
    }

    pub fn notify_on_ring_indicator(&self, enable: bool) {
        self.notify_on(EventKind::Ri, enable);
    }

    pub fn notify_on_carrier_detect(&self, enable: bool) {
        self.notify_on(EventKind::Cd, enable);
    }

    pub fn notify_on_overrun_error(&self, enable: bool) {
        self.notify_on(EventKind::OverrunError, enable);
    }

    pub fn notify_on_parity_error(&self, enable: bool) {
        self.notify_on(EventKind::ParityError, enable);
    }

    pub fn notify_on_framing_error(&self, enable: bool) {
        self.notify_on(EventKind::FramingError, enable);
    }

    pub fn notify_on_break_interrupt(&self, enable: bool) {
        self.notify_on(EventKind::BreakInterrupt, enable);
    }

    /// Close the port. Later calls are no-ops.
    ///
    /// Stops the event monitor, removes the listener, releases the device and
    /// gives up ownership. Blocked reads return end-of-stream.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let monitor = self.monitor.lock().take();
        if let Some(mut monitor) = monitor {
            monitor.shutdown();
        }
        self.hub.clear();

        let device = self.shared.slot.lock().device.take();
        if device.is_some() {
            debug!(port = %self.shared.name, "device closed");
        }
        drop(device);

        let claim = self.claim.lock().take();
        drop(claim);
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPort")
            .field("name", &self.shared.name)
            .field("path", &self.shared.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CommPort for SerialPort {
    fn name(&self) -> &str {
        SerialPort::name(self)
    }

    fn port_type(&self) -> PortType {
        PortType::Serial
    }

    fn read(&self, buffer: &mut [u8]) -> CommResult<usize> {
        SerialPort::read(self, buffer)
    }

    fn write(&self, data: &[u8]) -> CommResult<usize> {
        SerialPort::write(self, data)
    }

    fn close(&self) {
        SerialPort::close(self)
    }

    fn is_closed(&self) -> bool {
        SerialPort::is_closed(self)
    }

    fn enable_receive_timeout(&self, timeout: Duration) -> CommResult<()> {
        SerialPort::enable_receive_timeout(self, timeout)
    }

    fn disable_receive_timeout(&self) -> CommResult<()> {
        SerialPort::disable_receive_timeout(self)
    }

    fn receive_timeout(&self) -> Option<Duration> {
        SerialPort::receive_timeout(self)
    }

    fn enable_receive_threshold(&self, threshold: usize) -> CommResult<()> {
        SerialPort::enable_receive_threshold(self, threshold)
    }

    fn disable_receive_threshold(&self) -> CommResult<()> {
        SerialPort::disable_receive_threshold(self)
    }

    fn receive_threshold(&self) -> Option<usize> {
        SerialPort::receive_threshold(self)
    }

    fn as_serial(&self) -> Option<&SerialPort> {
        Some(self)
    }

    fn into_serial(self: Box<Self>) -> CommResult<SerialPort> {
        Ok(*self)
    }
}

impl io::Read for &SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SerialPort::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for &SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SerialPort::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        SerialPort::flush(self).map_err(io::Error::from)
    }
}

impl io::Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}
