//! Crate-level error taxonomy.

use crate::port::PortError;
use std::io;
use thiserror::Error;

/// Result alias for port, registry and driver operations.
pub type CommResult<T> = Result<T, CommError>;

/// Errors surfaced to callers of the comm API.
#[derive(Debug, Error)]
pub enum CommError {
    /// The access check before a native open failed.
    #[error("No read/write access to device {path}")]
    PermissionDenied { path: String },

    /// The native open itself failed.
    #[error("Failed to open device {path}: {source}")]
    DeviceOpenFailure {
        path: String,
        #[source]
        source: PortError,
    },

    /// Ownership was not handed over before the open timeout.
    #[error("Port {port} is in use by {owner}")]
    PortInUse { port: String, owner: String },

    /// No identifier is registered under this name.
    #[error("No such port: {0}")]
    NoSuchPort(String),

    /// The feature cannot be provided by this driver; nothing was changed.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A process-level dependency (native backend, worker thread) is missing.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// An event listener is already registered on this port.
    #[error("Port {0} already has an event listener")]
    TooManyListeners(String),

    /// The port was closed.
    #[error("Port {0} is closed")]
    PortClosed(String),

    /// A device operation failed after the port was opened.
    #[error("Device error: {0}")]
    Device(#[from] PortError),
}

impl CommError {
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::UnsupportedOperation(what.into())
    }

    /// Classify an error from `DeviceOpener::open` on `path`.
    pub(crate) fn from_open(path: &str, err: PortError) -> Self {
        match err {
            PortError::PermissionDenied(_) => Self::PermissionDenied {
                path: path.to_string(),
            },
            PortError::Unavailable(msg) => Self::ResourceUnavailable(msg),
            source => Self::DeviceOpenFailure {
                path: path.to_string(),
                source,
            },
        }
    }

    /// Classify an error from an in-place configuration change.
    pub(crate) fn from_config(err: PortError) -> Self {
        if err.is_unsupported() {
            Self::UnsupportedOperation(err.to_string())
        } else {
            Self::Device(err)
        }
    }
}

impl From<CommError> for io::Error {
    fn from(err: CommError) -> Self {
        let kind = match &err {
            CommError::PermissionDenied { .. } => io::ErrorKind::PermissionDenied,
            CommError::NoSuchPort(_) | CommError::DeviceOpenFailure { .. } => {
                io::ErrorKind::NotFound
            }
            CommError::PortInUse { .. } => io::ErrorKind::AddrInUse,
            CommError::UnsupportedOperation(_) => io::ErrorKind::Unsupported,
            CommError::PortClosed(_) => io::ErrorKind::NotConnected,
            CommError::Device(PortError::Io(e)) => e.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
