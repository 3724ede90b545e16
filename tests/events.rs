//! Line-status and data events delivered by a port's monitor.

mod common;

use common::{mock_port, wait_until, EventLog};
use rust_comm::port::PortConfiguration;
use rust_comm::{CommError, EventKind, SerialPortEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_second_listener_rejected_first_keeps_receiving() {
    let (port, line) = mock_port(PortConfiguration::default());
    let first = EventLog::new();
    let second = EventLog::new();

    port.add_event_listener(first.listener()).unwrap();
    let err = port.add_event_listener(second.listener()).unwrap_err();
    assert!(matches!(err, CommError::TooManyListeners(_)));

    port.notify_on_data_available(true);
    line.feed(b"ping");

    assert!(first.wait_for(EventKind::DataAvailable, 1));
    assert!(second.events().is_empty());
}

#[test]
fn test_data_available_once_per_burst() {
    let (port, line) = mock_port(PortConfiguration::default());
    let log = EventLog::new();
    port.add_event_listener(log.listener()).unwrap();
    port.notify_on_data_available(true);

    line.feed(b"abc");
    assert!(log.wait_for(EventKind::DataAvailable, 1));
    // More bytes before the consumer drains must not re-fire.
    line.feed(b"def");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(log.count(EventKind::DataAvailable), 1);

    // Drain, then a new burst fires again even before the monitor polls.
    let mut buffer = [0u8; 16];
    assert_eq!(port.read(&mut buffer).unwrap(), 6);
    line.feed(b"g");
    assert!(log.wait_for(EventKind::DataAvailable, 2));
}

#[test]
fn test_consumer_reading_in_callback_sees_every_burst() {
    let (port, line) = mock_port(PortConfiguration::default());
    let port = Arc::new(port);
    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let port_ref = Arc::downgrade(&port);
        let received = Arc::clone(&received);
        let line = line.clone();
        let fed_next = AtomicBool::new(false);
        port.add_event_listener(move |event: SerialPortEvent| {
            if event.kind != EventKind::DataAvailable {
                return;
            }
            let Some(port) = port_ref.upgrade() else {
                return;
            };
            let mut buffer = [0u8; 64];
            let Ok(n) = port.read(&mut buffer) else {
                return;
            };
            received.lock().extend_from_slice(&buffer[..n]);
            // The next burst lands right after the drain, before any poll.
            if !fed_next.swap(true, Ordering::SeqCst) {
                line.feed(b"second");
            }
        })
        .unwrap();
    }
    port.notify_on_data_available(true);

    line.feed(b"first");

    assert!(wait_until(Duration::from_secs(2), || received.lock().len() == 11));
    assert_eq!(received.lock().as_slice(), b"firstsecond");
    assert_eq!(line.available(), 0);
}

#[test]
fn test_signal_change_events_carry_old_and_new() {
    let (port, line) = mock_port(PortConfiguration::default());
    let log = EventLog::new();
    port.add_event_listener(log.listener()).unwrap();
    port.notify_on_cts(true);
    port.notify_on_carrier_detect(true);

    // Let the monitor take its baseline reading.
    std::thread::sleep(Duration::from_millis(50));
    line.set_cts(true);
    assert!(log.wait_for(EventKind::Cts, 1));
    line.set_cd(true);
    assert!(log.wait_for(EventKind::Cd, 1));
    // DSR is not enabled.
    line.set_dsr(true);
    std::thread::sleep(Duration::from_millis(50));

    let cts: Vec<SerialPortEvent> = log
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::Cts)
        .collect();
    assert_eq!(cts.len(), 1);
    assert!(!cts[0].old_value);
    assert!(cts[0].new_value);
    assert_eq!(cts[0].port, "ttyMOCK0");
    assert_eq!(log.count(EventKind::Dsr), 0);
}

#[test]
fn test_line_error_events() {
    let (port, line) = mock_port(PortConfiguration::default());
    let log = EventLog::new();
    port.add_event_listener(log.listener()).unwrap();
    port.notify_on_overrun_error(true);
    port.notify_on_parity_error(true);
    port.notify_on_framing_error(true);
    port.notify_on_break_interrupt(true);

    std::thread::sleep(Duration::from_millis(50));
    line.raise_overrun();
    line.raise_parity_error();
    line.raise_framing_error();
    line.raise_break();

    assert!(log.wait_for(EventKind::OverrunError, 1));
    assert!(log.wait_for(EventKind::ParityError, 1));
    assert!(log.wait_for(EventKind::FramingError, 1));
    assert!(log.wait_for(EventKind::BreakInterrupt, 1));
}

#[test]
fn test_output_buffer_empty() {
    let (port, line) = mock_port(PortConfiguration::default());
    let log = EventLog::new();
    port.add_event_listener(log.listener()).unwrap();
    port.notify_on_output_empty(true);

    line.set_pending_output(32);
    std::thread::sleep(Duration::from_millis(50));
    line.set_pending_output(0);

    assert!(log.wait_for(EventKind::OutputBufferEmpty, 1));
}

#[test]
fn test_unsupported_probe_degrades_silently() {
    let (port, line) = mock_port(PortConfiguration::default());
    line.disable_line_errors();
    let log = EventLog::new();
    port.add_event_listener(log.listener()).unwrap();
    port.notify_on_parity_error(true);
    port.notify_on_data_available(true);

    line.feed(b"still works");
    assert!(log.wait_for(EventKind::DataAvailable, 1));

    // The foreground path is unaffected.
    let mut buffer = [0u8; 32];
    let n = port.read(&mut buffer).unwrap();
    assert_eq!(&buffer[..n], b"still works");
    assert_eq!(log.count(EventKind::ParityError), 0);
}

#[test]
fn test_disabled_kind_is_not_reported() {
    let (port, line) = mock_port(PortConfiguration::default());
    let log = EventLog::new();
    port.add_event_listener(log.listener()).unwrap();
    port.notify_on_ring_indicator(true);
    assert!(port.is_notify_on(EventKind::Ri));

    std::thread::sleep(Duration::from_millis(50));
    port.notify_on_ring_indicator(false);
    line.set_ri(true);
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(log.count(EventKind::Ri), 0);
}

#[test]
fn test_remove_listener_then_add_another() {
    let (port, line) = mock_port(PortConfiguration::default());
    let first = EventLog::new();
    let second = EventLog::new();

    port.add_event_listener(first.listener()).unwrap();
    port.remove_event_listener();
    port.add_event_listener(second.listener()).unwrap();
    port.notify_on_data_available(true);
    line.feed(b"x");

    assert!(second.wait_for(EventKind::DataAvailable, 1));
    assert!(first.events().is_empty());
}

#[test]
fn test_close_stops_delivery_and_deregisters() {
    let (port, line) = mock_port(PortConfiguration::default());
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    port.add_event_listener(move |_event: SerialPortEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    port.notify_on_data_available(true);

    line.feed(b"a");
    assert!(wait_until(Duration::from_secs(2), || delivered.load(Ordering::SeqCst) == 1));

    port.close();
    let _ = port.read(&mut [0u8; 4]);
    line.feed(b"b");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    let err = port.add_event_listener(|_event: SerialPortEvent| {}).unwrap_err();
    assert!(matches!(err, CommError::PortClosed(_)));
}

#[test]
fn test_listener_may_close_port_from_callback() {
    let (port, line) = mock_port(PortConfiguration::default());
    let port = Arc::new(port);
    let weak = Arc::downgrade(&port);

    port.add_event_listener(move |_event: SerialPortEvent| {
        if let Some(port) = weak.upgrade() {
            port.close();
        }
    })
    .unwrap();
    port.notify_on_data_available(true);
    line.feed(b"bye");

    assert!(wait_until(Duration::from_secs(2), || port.is_closed()));
}
