//! Device layer.
//!
//! Provides the `DeviceHandle`/`DeviceOpener` seam, the system backend built on
//! the `serialport` crate, a mock backend for tests, and the read policy engine
//! that turns primitive timed reads into threshold/timeout semantics.

pub mod error;
pub mod mock;
pub mod policy;
pub mod sync_port;
pub mod traits;

pub use error::PortError;
pub use mock::{MockDevice, MockLine, MockOpener};
pub use policy::{ByteSource, ReadPolicy, ReadRegime, CANCEL_SLICE};
pub use sync_port::*;
pub use traits::*;
