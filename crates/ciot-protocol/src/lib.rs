//! Shared wire-level vocabulary for the device link (device + session core).

pub mod claims;
pub mod device;
pub mod telemetry;
pub mod topics;

pub use claims::*;
pub use device::*;
pub use telemetry::*;
