//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "RUST_COMM";

/// Config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "RUST_COMM_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `RUST_COMM_CONFIG` environment variable (explicit path)
    /// 2. `./config.toml` (current directory)
    /// 3. `~/.config/rust-comm/config.toml` (XDG on Linux/macOS)
    /// 4. `%APPDATA%\rust-comm\config.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        let _ = apply_env_overrides(&mut config);

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. XDG config directory (Linux/macOS) or APPDATA (Windows)
    if let Some(config_dir) = get_config_dir() {
        let app_config = config_dir.join("rust-comm").join(CONFIG_FILE_NAME);
        if app_config.exists() {
            return Some(app_config);
        }
    }

    // 4. No config file found - will use defaults
    None
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `RUST_COMM_<SECTION>_<KEY>`
/// For example:
/// - `RUST_COMM_SERIAL_DEFAULT_BAUD=115200`
/// - `RUST_COMM_EVENTS_POLL_INTERVAL_MS=20`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let Some(val) = env_override("SERIAL_DEFAULT_BAUD") {
        config.serial.default_baud = parse_env("SERIAL_DEFAULT_BAUD", &val, "Invalid baud rate")?;
    }
    if let Some(val) = env_override("SERIAL_DEFAULT_RECEIVE_TIMEOUT_MS") {
        config.serial.default_receive_timeout_ms =
            parse_optional("SERIAL_DEFAULT_RECEIVE_TIMEOUT_MS", &val, "Invalid timeout")?;
    }
    if let Some(val) = env_override("SERIAL_DEFAULT_RECEIVE_THRESHOLD") {
        config.serial.default_receive_threshold =
            parse_optional("SERIAL_DEFAULT_RECEIVE_THRESHOLD", &val, "Invalid threshold")?;
    }
    if let Some(val) = env_override("SERIAL_DEVICE_DIR") {
        config.serial.device_dir = val;
    }

    // Registry overrides
    if let Some(val) = env_override("REGISTRY_AUTO_DISCOVER") {
        config.registry.auto_discover = val.to_lowercase() == "true" || val == "1";
    }

    // Event overrides
    if let Some(val) = env_override("EVENTS_POLL_INTERVAL_MS") {
        config.events.poll_interval_ms =
            parse_env("EVENTS_POLL_INTERVAL_MS", &val, "Invalid interval")?;
    }

    // Logging overrides
    if let Some(val) = env_override("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = env_override("LOGGING_FORMAT") {
        config.logging.format = val
            .parse()
            .map_err(|e: String| ConfigError::env(env_key("LOGGING_FORMAT"), e))?;
    }

    Ok(())
}

fn env_key(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key)
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(env_key(key)).ok()
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str, message: &str) -> ConfigResult<T> {
    val.trim()
        .parse()
        .map_err(|_| ConfigError::env(env_key(key), message))
}

/// Like `parse_env`, but "none", "off" or an empty value disable the setting.
fn parse_optional<T: std::str::FromStr>(
    key: &str,
    val: &str,
    message: &str,
) -> ConfigResult<Option<T>> {
    match val.trim().to_lowercase().as_str() {
        "" | "none" | "off" => Ok(None),
        _ => parse_env(key, val, message).map(Some),
    }
}
