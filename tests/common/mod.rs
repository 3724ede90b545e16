//! Shared test utilities for rust-comm tests.
//!
//! This module provides common test infrastructure including:
//! - A registry wired to a mock serial driver
//! - Direct construction of mock-backed serial ports
//! - Event collection and polling helpers

#![allow(dead_code)]

use parking_lot::Mutex;
use rust_comm::port::{MockLine, MockOpener, PortConfiguration};
use rust_comm::{
    DriverSettings, EventKind, PortRegistry, SerialDriver, SerialPort, SerialPortEvent,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fast event polling so tests do not wait long.
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A registry with one mock serial driver and the ports it registered.
pub struct MockRig {
    pub opener: Arc<MockOpener>,
    pub registry: Arc<PortRegistry>,
}

impl MockRig {
    /// Register `ports` through a serial driver backed by `MockOpener`.
    pub fn new(ports: &[&str]) -> Self {
        let opener = Arc::new(MockOpener::new());
        let settings = DriverSettings {
            ports: ports.iter().map(|p| p.to_string()).collect(),
            poll_interval: TEST_POLL_INTERVAL,
            ..DriverSettings::default()
        };
        let registry = Arc::new(PortRegistry::new());
        registry
            .install(Arc::new(SerialDriver::new(opener.clone(), settings)))
            .expect("mock driver installs");
        Self { opener, registry }
    }

    pub fn line(&self, port: &str) -> MockLine {
        self.opener.line(port)
    }

    pub fn open(&self, port: &str, app: &str) -> SerialPort {
        self.registry
            .identifier(port)
            .expect("port registered")
            .open_serial(app, Duration::ZERO)
            .expect("port opens")
    }
}

/// A standalone serial port on a fresh mock line.
pub fn mock_port(config: PortConfiguration) -> (SerialPort, MockLine) {
    let opener = Arc::new(MockOpener::new());
    let line = opener.line("/dev/ttyMOCK0");
    let port = SerialPort::new("ttyMOCK0", "/dev/ttyMOCK0", opener, config)
        .with_poll_interval(TEST_POLL_INTERVAL);
    (port, line)
}

/// Configuration with the given threshold and timeout.
pub fn policy_config(threshold: Option<usize>, timeout: Option<Duration>) -> PortConfiguration {
    PortConfiguration {
        receive_threshold: threshold,
        receive_timeout: timeout,
        ..PortConfiguration::default()
    }
}

/// Collects events delivered to a listener.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SerialPortEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener closure that records into this log.
    pub fn listener(&self) -> impl Fn(SerialPortEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event| events.lock().push(event)
    }

    pub fn events(&self) -> Vec<SerialPortEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Wait until `kind` was seen at least `n` times.
    pub fn wait_for(&self, kind: EventKind, n: usize) -> bool {
        wait_until(Duration::from_secs(2), || self.count(kind) >= n)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
