use clap::{Parser, Subcommand};
use rust_comm::config::ConfigLoader;
use rust_comm::connection::DEFAULT_CONNECTION_BAUD;
use rust_comm::{
    logging, EventKind, PortRegistry, SerialConnection, SerialDriver, SerialPort,
    SerialPortEvent,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Application name used when claiming ports.
const APP_NAME: &str = "rust-comm";

/// How long to wait for another owner to give a port up.
const OPEN_TIMEOUT: Duration = Duration::from_millis(2000);

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "rust-comm",
    version,
    about = "Inspect and talk to serial ports.",
    long_about = "Lists registered serial ports, streams data from them, writes to them and reports line-status events. Ports are claimed by name, so two instances contending for the same port are arbitrated."
)]
struct Args {
    /// Configuration file to use instead of the standard search path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered ports with their type and current owner.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Stream data from a port to stdout until Ctrl-C.
    Read {
        port: String,
        #[arg(short, long)]
        baud: Option<u32>,
        /// Receive timeout in milliseconds; 0 disables it.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Receive threshold in bytes; 0 disables it.
        #[arg(long)]
        threshold: Option<usize>,
        /// Print bytes as hex.
        #[arg(long)]
        hex: bool,
    },
    /// Write data to a port.
    Write {
        port: String,
        data: String,
        #[arg(short, long)]
        baud: Option<u32>,
        /// Append CR LF.
        #[arg(long)]
        crlf: bool,
    },
    /// Connect to a port as an 8N1 link and echo what it receives until Ctrl-C.
    Connect {
        port: String,
        #[arg(short, long, default_value_t = DEFAULT_CONNECTION_BAUD)]
        baud: u32,
    },
    /// Print line-status events until Ctrl-C.
    Monitor {
        port: String,
        #[arg(short, long)]
        baud: Option<u32>,
        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config = loader.into_config();
    logging::init(&config.logging)?;

    let registry = Arc::new(PortRegistry::new());
    let count = registry.install(Arc::new(SerialDriver::system(&config)))?;
    info!(count, "ports registered");

    match args.command {
        Command::List { json } => list(&registry, json),
        Command::Read {
            port,
            baud,
            timeout_ms,
            threshold,
            hex,
        } => {
            let port = open(&registry, &port, baud)?;
            if let Some(ms) = timeout_ms {
                match ms {
                    0 => port.disable_receive_timeout()?,
                    ms => port.enable_receive_timeout(Duration::from_millis(ms))?,
                }
            }
            if let Some(threshold) = threshold {
                match threshold {
                    0 => port.disable_receive_threshold()?,
                    t => port.enable_receive_threshold(t)?,
                }
            }
            read(Arc::new(port), hex).await
        }
        Command::Write {
            port,
            data,
            baud,
            crlf,
        } => {
            let port = open(&registry, &port, baud)?;
            let mut bytes = data.into_bytes();
            if crlf {
                bytes.extend_from_slice(b"\r\n");
            }
            let written = port.write(&bytes)?;
            port.flush()?;
            info!(written, "data written");
            port.close();
            Ok(())
        }
        Command::Connect { port, baud } => connect(registry, port, baud).await,
        Command::Monitor { port, baud, json } => {
            let port = open(&registry, &port, baud)?;
            monitor(port, json).await
        }
    }
}

fn list(registry: &PortRegistry, json: bool) -> CliResult<()> {
    let ports: Vec<_> = registry.identifiers().map(|id| id.summary()).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }
    for port in ports {
        println!(
            "{:<24} {:<8} {}",
            port.name,
            port.port_type,
            port.owner.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn open(registry: &PortRegistry, name: &str, baud: Option<u32>) -> CliResult<SerialPort> {
    let port = registry
        .identifier(name)?
        .open_serial(APP_NAME, OPEN_TIMEOUT)?;
    if let Some(baud) = baud {
        port.set_serial_port_params(baud, port.data_bits(), port.stop_bits(), port.parity())?;
    }
    Ok(port)
}

/// Copy from the port to stdout until the port is closed.
fn pump(port: &SerialPort, hex: bool) -> CliResult<()> {
    let stdout = std::io::stdout();
    let mut buffer = [0u8; 1024];
    loop {
        let n = port.read(&mut buffer)?;
        if n == 0 {
            if port.is_closed() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        let mut out = stdout.lock();
        if hex {
            for byte in &buffer[..n] {
                write!(out, "{byte:02x} ")?;
            }
            writeln!(out)?;
        } else {
            out.write_all(&buffer[..n])?;
        }
        out.flush()?;
    }
}

async fn read(port: Arc<SerialPort>, hex: bool) -> CliResult<()> {
    let mut reader = {
        let port = Arc::clone(&port);
        tokio::task::spawn_blocking(move || pump(&port, hex))
    };

    tokio::select! {
        result = &mut reader => result?,
        _ = shutdown_signal() => {
            // Closing the port makes the blocked read return end-of-stream.
            port.close();
            reader.await?
        }
    }
}

async fn connect(registry: Arc<PortRegistry>, name: String, baud: u32) -> CliResult<()> {
    let mut connection = SerialConnection::new(registry, name, baud)?;
    connection.connect()?;

    if let Some(port) = connection.port() {
        // Reads happen on the event thread as data arrives.
        let reader = Arc::downgrade(port);
        port.add_event_listener(move |event: SerialPortEvent| {
            if event.kind != EventKind::DataAvailable {
                return;
            }
            let Some(port) = reader.upgrade() else {
                return;
            };
            let mut buffer = [0u8; 1024];
            match port.read(&mut buffer) {
                Ok(n) => {
                    let mut out = std::io::stdout().lock();
                    if let Err(err) = out.write_all(&buffer[..n]).and_then(|()| out.flush()) {
                        warn!(error = %err, "failed to write to stdout");
                    }
                }
                Err(err) => warn!(error = %err, "read failed"),
            }
        })?;
    }

    shutdown_signal().await;
    connection.disconnect();
    Ok(())
}

async fn monitor(port: SerialPort, json: bool) -> CliResult<()> {
    port.add_event_listener(move |event: SerialPortEvent| {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "failed to encode event"),
            }
        } else {
            println!(
                "{} {}: {} -> {}",
                event.port, event.kind, event.old_value, event.new_value
            );
        }
    })?;
    for kind in EventKind::ALL {
        port.notify_on(kind, true);
    }

    shutdown_signal().await;
    port.close();
    Ok(())
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, shutting down");
}
