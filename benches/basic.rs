use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use rust_comm::port::{MockOpener, PortConfiguration};
use rust_comm::{DriverSettings, PortRegistry, SerialDriver, SerialPort};
use std::sync::Arc;
use std::time::Duration;

pub fn bench_registry_lookup(c: &mut Criterion) {
    let settings = DriverSettings {
        ports: (0..64).map(|n| format!("ttyS{n}")).collect(),
        ..DriverSettings::default()
    };
    let registry = PortRegistry::new();
    registry
        .install(Arc::new(SerialDriver::new(
            Arc::new(MockOpener::new()),
            settings,
        )))
        .unwrap();

    c.bench_function("registry_lookup", |b| {
        b.iter(|| {
            let id = registry.identifier(black_box("ttyS42")).unwrap();
            black_box(id);
        })
    });
}

pub fn bench_poll_read(c: &mut Criterion) {
    let opener = Arc::new(MockOpener::new());
    let line = opener.line("ttyMOCK0");
    let config = PortConfiguration {
        receive_threshold: None,
        receive_timeout: None,
        ..PortConfiguration::default()
    };
    let port = SerialPort::new("ttyMOCK0", "ttyMOCK0", opener, config);
    let mut buffer = [0u8; 64];

    c.bench_function("poll_read_64", |b| {
        b.iter(|| {
            line.feed(&[0x55; 64]);
            let n = port.read(&mut buffer).unwrap();
            black_box(n);
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_registry_lookup, bench_poll_read
}
criterion_main!(benches);
