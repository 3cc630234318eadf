//! Core functionality for the wheel bridge.
//! This module contains the connection machinery for talking to the
//! wheel controller over Bluetooth LE.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{ConnectionRegistry, RideMode, WheelError};
