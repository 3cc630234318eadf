//! Wheel bridge library.
//! Host-side connection lifecycle, authentication and ride-mode
//! control for Bluetooth LE wheel controllers.

// Module declarations
pub mod config;
pub mod core;
pub mod passcodes;
pub mod utils;

// Re-export the public surface
pub use config::BridgeConfig;
pub use core::bluetooth::{
    crc16, swap_every_other_byte, BlePlatform, BluestPlatform, ConnectionListener,
    ConnectionRegistry, ConnectionState, DeviceHandle, DeviceLink, ListenerSet, MockLink,
    MockPlatform, ModeFrame, RideMode, SessionCommand, WheelDevice, WheelError, WheelScanner,
};
pub use passcodes::PasscodeTable;

/// Initialize logging
pub fn setup_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();
    log::info!("Logging initialized");
}
