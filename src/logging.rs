//! Tracing subscriber setup for the CLI.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

/// Errors from installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global subscriber is already installed")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// The filter to use: `RUST_LOG` if set, else the configured level.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.level).map_err(|source| LoggingError::Filter {
            directive: config.level.clone(),
            source,
        })
    })
}

/// Install the global subscriber, writing to stderr so stdout stays free for
/// port data.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = filter(config)?;
    let base = registry().with(filter);
    let layer = fmt::layer().with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => base.with(layer.json()).try_init()?,
        LogFormat::Compact => base.with(layer.compact()).try_init()?,
        LogFormat::Pretty => base.with(layer.pretty()).try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_filter_from_config() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "rust_comm=debug".into(),
            ..LoggingConfig::default()
        };
        assert!(filter(&config).is_ok());
    }

    #[test]
    #[serial]
    fn test_invalid_filter() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "rust_comm=loud".into(),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            filter(&config),
            Err(LoggingError::Filter { .. })
        ));
    }
}
