#![allow(clippy::module_name_repetitions)]

/// Adaptors
mod adaptor;

/// In-memory register file
mod dummy;

/// Emulated device adaptor
pub mod emulated;

/// Hardware device adaptor
#[cfg(feature = "hw")]
pub mod hardware;

/// Register window proxy types
mod proxy;

pub use adaptor::{DeviceAdaptor, SharedDevice};
pub use dummy::DummyDevice;
pub use proxy::OffsetProxy;
