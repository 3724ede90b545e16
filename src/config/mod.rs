//! Configuration module for rust-comm.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `RUST_COMM_CONFIG` environment variable (explicit path)
//! 2. `./config.toml` (current directory)
//! 3. `~/.config/rust-comm/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\rust-comm\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `RUST_COMM_<SECTION>_<KEY>`, for example:
//! - `RUST_COMM_SERIAL_DEFAULT_BAUD=115200`
//! - `RUST_COMM_REGISTRY_AUTO_DISCOVER=false`
//! - `RUST_COMM_LOGGING_FORMAT=json`
//!
//! # Example
//!
//! ```rust,no_run
//! use rust_comm::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("Default baud: {}", config.serial.default_baud);
//! # Ok::<(), rust_comm::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{Config, EventsConfig, LogFormat, LoggingConfig, RegistryConfig, SerialConfig};
