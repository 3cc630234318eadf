//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, timeouts, and other configuration values.

use uuid::Uuid;

/// The UUID the wheel controller advertises and under which it groups
/// its characteristics
pub const UUID_WHEEL_SERVICE: Uuid = Uuid::from_u128(0x52756265_6e43_6167_6e69_654350485000);

/// The UUID of the serial-number characteristic (read during setup)
pub const UUID_SERIAL_NUMBER_CHAR: Uuid = Uuid::from_u128(0x52756265_6e43_6167_6e69_654350485105);

/// The UUID of the ride-mode command characteristic
pub const UUID_RIDE_MODE_CHAR: Uuid = Uuid::from_u128(0x52756265_6e43_6167_6e69_65435048500a);

/// The UUID of the passcode-write characteristic
pub const UUID_PASSCODE_CHAR: Uuid = Uuid::from_u128(0x52756265_6e43_6167_6e69_654350485101);

/// Number of leading bytes of the serial-number value that form the
/// text serial; anything after is reserved
pub const SERIAL_NUMBER_LEN: usize = 14;

/// Mode preset payload size in bytes
pub const MODE_PAYLOAD_SIZE: usize = 16;

/// Mode frame size in bytes (payload plus checksum)
pub const MODE_FRAME_SIZE: usize = MODE_PAYLOAD_SIZE + 2;

/// Full command packet written to the ride-mode characteristic
/// (payload, reserved byte, mode flag, checksum)
pub const MODE_COMMAND_PACKET_SIZE: usize = 20;

/// Maximum number of connection retries
pub const MAX_CONNECT_RETRIES: usize = 3;

/// Delay between connection retries in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 500;

/// Timeout for the whole connect attempt in seconds (covers retries)
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Timeout for a single GATT operation in seconds
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 5;

/// Default scan timeout in seconds when waiting for the first wheel
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;

/// Minimum signal strength for a scan result to be considered
pub const MIN_RSSI_THRESHOLD: i16 = -80;

/// Placeholder shown when a device's name cannot be read
pub const DEVICE_NAME_FALLBACK: &str = "device";
