//! Line-status and data events.
//!
//! Every open port owns one `EventMonitor`: a background thread that polls the
//! device at a fixed interval, turns changes into `SerialPortEvent`s and hands
//! them to the port's single listener. The thread is driven by a control
//! channel; dropping the sender is how it is cancelled.

use crate::port::{DeviceHandle, LineErrors, LineSignals, PortError};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, warn};

/// Kinds of event a port can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    DataAvailable,
    OutputBufferEmpty,
    Cts,
    Dsr,
    Ri,
    Cd,
    OverrunError,
    ParityError,
    FramingError,
    BreakInterrupt,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::DataAvailable,
        EventKind::OutputBufferEmpty,
        EventKind::Cts,
        EventKind::Dsr,
        EventKind::Ri,
        EventKind::Cd,
        EventKind::OverrunError,
        EventKind::ParityError,
        EventKind::FramingError,
        EventKind::BreakInterrupt,
    ];

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DataAvailable => "DATA_AVAILABLE",
            Self::OutputBufferEmpty => "OUTPUT_BUFFER_EMPTY",
            Self::Cts => "CTS",
            Self::Dsr => "DSR",
            Self::Ri => "RI",
            Self::Cd => "CD",
            Self::OverrunError => "OE",
            Self::ParityError => "PE",
            Self::FramingError => "FE",
            Self::BreakInterrupt => "BI",
        };
        f.write_str(name)
    }
}

/// A set of event kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMask(u16);

impl EventMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        EventKind::ALL.iter().fold(Self::empty(), |mask, kind| mask.with(*kind))
    }

    pub fn with(self, kind: EventKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn without(self, kind: EventKind) -> Self {
        Self(self.0 & !kind.bit())
    }

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }
}

const SIGNAL_KINDS: EventMask = EventMask(
    (1 << EventKind::Cts as u16)
        | (1 << EventKind::Dsr as u16)
        | (1 << EventKind::Ri as u16)
        | (1 << EventKind::Cd as u16),
);

const ERROR_KINDS: EventMask = EventMask(
    (1 << EventKind::OverrunError as u16)
        | (1 << EventKind::ParityError as u16)
        | (1 << EventKind::FramingError as u16)
        | (1 << EventKind::BreakInterrupt as u16),
);

/// One observed change on a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortEvent {
    pub port: String,
    pub kind: EventKind,
    pub old_value: bool,
    pub new_value: bool,
}

/// Receives the events of one port.
///
/// Called from the port's monitor thread.
pub trait SerialPortEventListener: Send + Sync {
    fn serial_event(&self, event: SerialPortEvent);
}

impl<F> SerialPortEventListener for F
where
    F: Fn(SerialPortEvent) + Send + Sync,
{
    fn serial_event(&self, event: SerialPortEvent) {
        self(event)
    }
}

/// Listener slot and enabled kinds, shared between a port and its monitor.
#[derive(Default)]
pub(crate) struct EventHub {
    listener: Mutex<Option<Arc<dyn SerialPortEventListener>>>,
    mask: AtomicU16,
    /// A read emptied the input queue since the last poll.
    drained: AtomicBool,
}

impl EventHub {
    /// Install `listener` unless one is already present.
    pub(crate) fn install(&self, listener: Arc<dyn SerialPortEventListener>) -> bool {
        let mut slot = self.listener.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(listener);
        true
    }

    pub(crate) fn clear(&self) {
        self.listener.lock().take();
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn SerialPortEventListener>> {
        self.listener.lock().clone()
    }

    pub(crate) fn mask(&self) -> EventMask {
        EventMask(self.mask.load(Ordering::SeqCst))
    }

    /// Record that the consumer emptied the input queue, re-arming
    /// `DataAvailable` for the next burst.
    pub(crate) fn mark_drained(&self) {
        self.drained.store(true, Ordering::SeqCst);
    }

    fn take_drained(&self) -> bool {
        self.drained.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn set(&self, kind: EventKind, enable: bool) {
        if enable {
            self.mask.fetch_or(kind.bit(), Ordering::SeqCst);
        } else {
            self.mask.fetch_and(!kind.bit(), Ordering::SeqCst);
        }
    }
}

/// Access to a port's current device for the monitor.
pub(crate) trait DeviceProbe: Send + Sync + 'static {
    /// Run `f` on the current device, opening it first if `materialize` is set.
    ///
    /// Returns the device generation alongside the result, or `None` when no
    /// device is available.
    fn with_device<R>(
        &self,
        materialize: bool,
        f: impl FnOnce(&mut dyn DeviceHandle) -> R,
    ) -> Option<(u64, R)>;

    fn is_closed(&self) -> bool;
}

/// Raw readings from one poll.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    pub available: Option<Result<usize, PortError>>,
    pub pending: Option<Result<usize, PortError>>,
    pub signals: Option<Result<LineSignals, PortError>>,
    pub errors: Option<Result<LineErrors, PortError>>,
}

/// Edge detection across polls of one device generation.
#[derive(Debug, Default)]
pub(crate) struct Poller {
    port: String,
    generation: Option<u64>,
    data_notified: bool,
    last_pending: usize,
    signals: Option<LineSignals>,
    errors: Option<LineErrors>,
    degraded: EventMask,
}

impl Poller {
    pub(crate) fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Let the next non-empty input queue fire `DataAvailable` again.
    pub(crate) fn rearm_data(&mut self) {
        self.data_notified = false;
    }

    /// Which probes the next snapshot should take.
    pub(crate) fn wanted(&self, mask: EventMask) -> EventMask {
        let mut wanted = EventMask::empty();
        for kind in EventKind::ALL {
            if mask.contains(kind) && !self.degraded.contains(kind) {
                wanted = wanted.with(kind);
            }
        }
        wanted
    }

    pub(crate) fn take(device: &mut dyn DeviceHandle, wanted: EventMask) -> Snapshot {
        Snapshot {
            available: wanted
                .contains(EventKind::DataAvailable)
                .then(|| device.bytes_to_read()),
            pending: wanted
                .contains(EventKind::OutputBufferEmpty)
                .then(|| device.bytes_to_write()),
            signals: wanted
                .intersects(SIGNAL_KINDS)
                .then(|| device.line_signals()),
            errors: wanted.intersects(ERROR_KINDS).then(|| device.line_errors()),
        }
    }

    /// Turn a snapshot into events, updating the edge state.
    pub(crate) fn observe(
        &mut self,
        generation: u64,
        snapshot: Snapshot,
        mask: EventMask,
    ) -> Vec<SerialPortEvent> {
        if self.generation != Some(generation) {
            *self = Self {
                port: std::mem::take(&mut self.port),
                generation: Some(generation),
                ..Default::default()
            };
        }

        // Kinds that were not probed lose their baseline.
        if snapshot.signals.is_none() {
            self.signals = None;
        }
        if snapshot.errors.is_none() {
            self.errors = None;
        }

        let mut events = Vec::new();

        if let Some(available) = snapshot.available {
            match available {
                Ok(0) => self.data_notified = false,
                Ok(_) if !self.data_notified => {
                    self.data_notified = true;
                    events.push(self.event(EventKind::DataAvailable, false, true));
                }
                Ok(_) => {}
                Err(e) => self.degrade(EventMask::empty().with(EventKind::DataAvailable), &e),
            }
        }

        if let Some(pending) = snapshot.pending {
            match pending {
                Ok(now) => {
                    if self.last_pending > 0 && now == 0 {
                        events.push(self.event(EventKind::OutputBufferEmpty, false, true));
                    }
                    self.last_pending = now;
                }
                Err(e) => self.degrade(EventMask::empty().with(EventKind::OutputBufferEmpty), &e),
            }
        }

        if let Some(signals) = snapshot.signals {
            match signals {
                Ok(now) => {
                    if let Some(before) = self.signals {
                        let pairs = [
                            (EventKind::Cts, before.cts, now.cts),
                            (EventKind::Dsr, before.dsr, now.dsr),
                            (EventKind::Ri, before.ri, now.ri),
                            (EventKind::Cd, before.cd, now.cd),
                        ];
                        for (kind, old, new) in pairs {
                            if old != new && mask.contains(kind) {
                                events.push(self.event(kind, old, new));
                            }
                        }
                    }
                    self.signals = Some(now);
                }
                Err(e) => self.degrade(SIGNAL_KINDS, &e),
            }
        }

        if let Some(errors) = snapshot.errors {
            match errors {
                Ok(now) => {
                    if let Some(before) = self.errors {
                        let pairs = [
                            (EventKind::OverrunError, before.overrun, now.overrun),
                            (EventKind::ParityError, before.parity, now.parity),
                            (EventKind::FramingError, before.framing, now.framing),
                            (EventKind::BreakInterrupt, before.breaks, now.breaks),
                        ];
                        for (kind, old, new) in pairs {
                            if new > old && mask.contains(kind) {
                                events.push(self.event(kind, false, true));
                            }
                        }
                    }
                    self.errors = Some(now);
                }
                Err(e) => self.degrade(ERROR_KINDS, &e),
            }
        }

        events
    }

    fn event(&self, kind: EventKind, old_value: bool, new_value: bool) -> SerialPortEvent {
        SerialPortEvent {
            port: self.port.clone(),
            kind,
            old_value,
            new_value,
        }
    }

    /// Stop probing `kinds` until the device is recreated.
    fn degrade(&mut self, kinds: EventMask, err: &PortError) {
        if err.is_unsupported() {
            debug!(port = %self.port, error = %err, "event probe unsupported, disabling");
        } else {
            warn!(port = %self.port, error = %err, "event probe failed, disabling");
        }
        self.degraded = EventMask(self.degraded.0 | kinds.0);
    }
}

enum MonitorSignal {
    Wake,
}

/// The background thread of one port.
pub(crate) struct EventMonitor {
    control: Option<Sender<MonitorSignal>>,
    handle: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl EventMonitor {
    pub(crate) fn spawn<P: DeviceProbe>(
        port: &str,
        probe: Arc<P>,
        hub: Arc<EventHub>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (control, signals) = mpsc::channel();
        let mut poller = Poller::new(port);

        let handle = thread::Builder::new()
            .name(format!("comm-events:{port}"))
            .spawn(move || loop {
                match signals.recv_timeout(interval) {
                    Ok(MonitorSignal::Wake) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if probe.is_closed() {
                    break;
                }
                poll_once(&*probe, &hub, &mut poller);
            })?;

        Ok(Self {
            control: Some(control),
            thread_id: Some(handle.thread().id()),
            handle: Some(handle),
        })
    }

    /// Ask for an immediate poll.
    pub(crate) fn wake(&self) {
        if let Some(control) = &self.control {
            let _ = control.send(MonitorSignal::Wake);
        }
    }

    /// Cancel the thread and wait for it, unless called from the thread itself.
    pub(crate) fn shutdown(&mut self) {
        self.control.take();
        if let Some(handle) = self.handle.take() {
            if Some(thread::current().id()) == self.thread_id {
                return;
            }
            if handle.join().is_err() {
                warn!("event monitor thread panicked");
            }
        }
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_once<P: DeviceProbe + ?Sized>(probe: &P, hub: &EventHub, poller: &mut Poller) {
    let mask = hub.mask();
    let Some(listener) = hub.listener() else {
        return;
    };
    if hub.take_drained() {
        poller.rearm_data();
    }
    let wanted = poller.wanted(mask);
    if wanted.is_empty() {
        return;
    }

    let Some((generation, snapshot)) =
        probe.with_device(true, |device| Poller::take(device, wanted))
    else {
        return;
    };

    for event in poller.observe(generation, snapshot, mask) {
        listener.serial_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_available(n: usize) -> Snapshot {
        Snapshot {
            available: Some(Ok(n)),
            ..Default::default()
        }
    }

    #[test]
    fn test_mask_operations() {
        let mask = EventMask::empty()
            .with(EventKind::Cts)
            .with(EventKind::DataAvailable);
        assert!(mask.contains(EventKind::Cts));
        assert!(!mask.contains(EventKind::Dsr));
        assert!(!mask.without(EventKind::Cts).contains(EventKind::Cts));
        assert!(EventMask::empty().is_empty());
        assert!(EventKind::ALL.iter().all(|k| EventMask::all().contains(*k)));
    }

    #[test]
    fn test_data_available_once_per_burst() {
        let mask = EventMask::empty().with(EventKind::DataAvailable);
        let mut poller = Poller::new("MOCK0");

        assert_eq!(poller.observe(1, snapshot_available(3), mask).len(), 1);
        // More data arrives before the consumer drains: no new event.
        assert!(poller.observe(1, snapshot_available(7), mask).is_empty());
        // Drained, then a new burst fires again.
        assert!(poller.observe(1, snapshot_available(0), mask).is_empty());
        let events = poller.observe(1, snapshot_available(1), mask);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::DataAvailable);
        assert!(!events[0].old_value && events[0].new_value);
    }

    #[test]
    fn test_drain_between_polls_rearms_data_available() {
        let mask = EventMask::empty().with(EventKind::DataAvailable);
        let mut poller = Poller::new("MOCK0");

        assert_eq!(poller.observe(1, snapshot_available(5), mask).len(), 1);
        // The consumer emptied the queue and a new burst landed before the
        // next poll, so the poller never saw an empty queue.
        poller.rearm_data();
        assert_eq!(poller.observe(1, snapshot_available(6), mask).len(), 1);
        assert!(poller.observe(1, snapshot_available(6), mask).is_empty());
    }

    #[test]
    fn test_hub_drained_flag_is_consumed_once() {
        let hub = EventHub::default();
        assert!(!hub.take_drained());
        hub.mark_drained();
        assert!(hub.take_drained());
        assert!(!hub.take_drained());
    }

    #[test]
    fn test_signal_changes_report_old_and_new() {
        let mask = EventMask::empty().with(EventKind::Cts);
        let mut poller = Poller::new("MOCK0");
        let signals = |cts, dsr| Snapshot {
            signals: Some(Ok(LineSignals {
                cts,
                dsr,
                ..Default::default()
            })),
            ..Default::default()
        };

        // The first reading is a baseline.
        assert!(poller.observe(1, signals(false, false), mask).is_empty());
        let events = poller.observe(1, signals(true, true), mask);
        assert_eq!(events.len(), 1, "DSR is not enabled");
        assert_eq!(events[0].kind, EventKind::Cts);
        assert!(!events[0].old_value);
        assert!(events[0].new_value);
    }

    #[test]
    fn test_output_buffer_empty_on_drain() {
        let mask = EventMask::empty().with(EventKind::OutputBufferEmpty);
        let mut poller = Poller::new("MOCK0");
        let pending = |n| Snapshot {
            pending: Some(Ok(n)),
            ..Default::default()
        };

        assert!(poller.observe(1, pending(0), mask).is_empty());
        assert!(poller.observe(1, pending(12), mask).is_empty());
        let events = poller.observe(1, pending(0), mask);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::OutputBufferEmpty);
    }

    #[test]
    fn test_error_counters_fire_on_increase() {
        let mask = EventMask::empty()
            .with(EventKind::OverrunError)
            .with(EventKind::BreakInterrupt);
        let mut poller = Poller::new("MOCK0");
        let errors = |overrun, breaks| Snapshot {
            errors: Some(Ok(LineErrors {
                overrun,
                breaks,
                ..Default::default()
            })),
            ..Default::default()
        };

        assert!(poller.observe(1, errors(0, 0), mask).is_empty());
        let kinds: Vec<_> = poller
            .observe(1, errors(1, 2), mask)
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::OverrunError, EventKind::BreakInterrupt]);
    }

    #[test]
    fn test_unsupported_probe_degrades_until_new_generation() {
        let mask = EventMask::empty().with(EventKind::ParityError);
        let mut poller = Poller::new("MOCK0");
        let unsupported = Snapshot {
            errors: Some(Err(PortError::unsupported("line error counters"))),
            ..Default::default()
        };

        assert!(poller.observe(1, unsupported, mask).is_empty());
        assert!(poller.wanted(mask).is_empty());

        // A recreated device gets a fresh chance.
        poller.observe(2, Snapshot::default(), mask);
        assert!(poller.wanted(mask).contains(EventKind::ParityError));
    }

    #[test]
    fn test_generation_change_resets_baseline() {
        let mask = EventMask::empty().with(EventKind::DataAvailable);
        let mut poller = Poller::new("MOCK0");

        assert_eq!(poller.observe(1, snapshot_available(4), mask).len(), 1);
        // Same unread bytes seen through a recreated device count as a new burst.
        assert_eq!(poller.observe(2, snapshot_available(4), mask).len(), 1);
    }

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<dyn SerialPortEventListener> =
            Arc::new(move |event: SerialPortEvent| sink.lock().push(event.kind));

        let hub = EventHub::default();
        assert!(hub.install(listener.clone()));
        assert!(!hub.install(listener));
        hub.listener().unwrap().serial_event(SerialPortEvent {
            port: "MOCK0".into(),
            kind: EventKind::Ri,
            old_value: false,
            new_value: true,
        });
        assert_eq!(*seen.lock(), vec![EventKind::Ri]);

        hub.clear();
        assert!(hub.listener().is_none());
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::DataAvailable.to_string(), "DATA_AVAILABLE");
        assert_eq!(EventKind::BreakInterrupt.to_string(), "BI");
    }
}
