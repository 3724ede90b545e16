//! Device-level error types.
//!
//! These are the errors of the `DeviceHandle`/`DeviceOpener` seam. They are kept
//! separate from the crate-level `CommError` so that backends only need to
//! describe what went wrong with the device, not how the caller should react.

use thiserror::Error;

/// Errors raised by a device backend.
#[derive(Debug, Error)]
pub enum PortError {
    /// The device path does not exist.
    #[error("Serial device not found: {0}")]
    NotFound(String),

    /// The caller lacks read or write access to the device.
    #[error("No read/write access to device: {0}")]
    PermissionDenied(String),

    /// The backend cannot express the requested setting or feature.
    #[error("Unsupported by device: {0}")]
    Unsupported(String),

    /// A process-level dependency of the backend is missing.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a device path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PermissionDenied error from a device path.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create an Unsupported error describing the rejected feature.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// True when the backend reports the feature as not implementable.
    pub fn is_unsupported(&self) -> bool {
        match self {
            Self::Unsupported(_) => true,
            Self::Serial(e) => e.kind() == serialport::ErrorKind::InvalidInput,
            _ => false,
        }
    }
}
