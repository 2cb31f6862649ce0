//! Cloud IoT device agent: library crate.
//!
//! Re-exports the agent modules so the binary and `ciot-e2e-tests` share
//! config loading, the telemetry loop and the incoming dispatcher.

pub mod config;
pub mod incoming;
pub mod telemetry;
