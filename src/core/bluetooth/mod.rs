//! Bluetooth functionality for the wheel bridge.
//! This module handles scanning, connection lifecycle, authentication
//! and the ride-mode command protocol.

mod auth;
mod bluest_backend;
mod connection;
mod constants;
mod crc;
mod error;
mod frame;
mod mock;
mod platform;
mod queue;
mod registry;
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use bluest_backend::{BluestLink, BluestPlatform};
pub use connection::{DeviceSession, SessionCommand, SessionHandle};
pub use constants::*; // Re-export all constants
pub use crc::{crc16, swap_every_other_byte};
pub use error::WheelError;
pub use frame::{ModeFrame, RideMode};
pub use mock::{MockLink, MockPlatform};
pub use platform::{BlePlatform, DeviceLink};
pub use registry::ConnectionRegistry;
pub use scanner::WheelScanner;
pub use types::{
    ConnectionListener, ConnectionState, DeviceHandle, ListenerSet, PendingOperation, WheelDevice,
};
