//! Ride-mode command frames for the wheel controller
//! This module contains the mode presets and the checksummed frame
//! layouts written to the ride-mode characteristic.

use crate::core::bluetooth::constants::{
    MODE_COMMAND_PACKET_SIZE, MODE_FRAME_SIZE, MODE_PAYLOAD_SIZE,
};
use crate::core::bluetooth::crc::crc16;

/// Reserved byte between the payload and the mode flag.
const MODE_COMMAND_RESERVED: u8 = 0x00;

/// Constant flag byte marking the packet as a mode-select command.
const MODE_COMMAND_FLAG: u8 = 0x01;

/// Ride modes supported by the wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideMode {
    /// Low assist, conservative current limits
    Eco,
    /// Default assist profile
    Standard,
    /// Maximum assist and current limits
    Turbo,
}

impl RideMode {
    /// Parses a mode from its lowercase name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "eco" => Some(Self::Eco),
            "standard" => Some(Self::Standard),
            "turbo" => Some(Self::Turbo),
            _ => None,
        }
    }

    /// The fixed 16-byte preset payload for this mode
    pub fn payload(self) -> [u8; MODE_PAYLOAD_SIZE] {
        match self {
            Self::Eco => [
                0x20, 0x20, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7f, 0x7f, 0x7f, 0x7f, 0x7f,
                0x00, 0x00, 0x00,
            ],
            Self::Standard => [
                0x40, 0x40, 0x1e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7f, 0x7f, 0x7f, 0x7f, 0x7f,
                0x00, 0x00, 0x00,
            ],
            Self::Turbo => [
                0x7f, 0x55, 0x00, 0x7d, 0x00, 0x00, 0x00, 0x00, 0x80, 0x40, 0x40, 0xff, 0xd5,
                0x00, 0x00, 0x00,
            ],
        }
    }

    /// Builds the checksummed payload frame for this mode
    pub fn frame(self) -> ModeFrame {
        ModeFrame::build(&self.payload())
    }

    /// Builds the full packet written to the ride-mode characteristic:
    /// payload, reserved byte, mode flag, then the checksum of those 18
    /// bytes. The firmware validates the checksum over the flagged
    /// command, not over the bare payload.
    pub fn wire_command(self) -> [u8; MODE_COMMAND_PACKET_SIZE] {
        let mut packet = [0u8; MODE_COMMAND_PACKET_SIZE];
        packet[..MODE_PAYLOAD_SIZE].copy_from_slice(&self.payload());
        packet[MODE_PAYLOAD_SIZE] = MODE_COMMAND_RESERVED;
        packet[MODE_PAYLOAD_SIZE + 1] = MODE_COMMAND_FLAG;
        let crc = crc16(&packet[..MODE_PAYLOAD_SIZE + 2]);
        packet[MODE_PAYLOAD_SIZE + 2..].copy_from_slice(&crc);
        packet
    }
}

/// A checksummed mode payload: 16 payload bytes followed by the 2-byte
/// CRC of those bytes. Construction is infallible; well-formedness of
/// received bytes is checked with [`ModeFrame::is_well_formed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeFrame {
    bytes: [u8; MODE_FRAME_SIZE],
}

impl ModeFrame {
    /// Appends the checksum to a 16-byte payload
    pub fn build(payload: &[u8; MODE_PAYLOAD_SIZE]) -> Self {
        let mut bytes = [0u8; MODE_FRAME_SIZE];
        bytes[..MODE_PAYLOAD_SIZE].copy_from_slice(payload);
        bytes[MODE_PAYLOAD_SIZE..].copy_from_slice(&crc16(payload));
        Self { bytes }
    }

    /// Returns true iff `bytes` has the exact frame length and its
    /// trailing checksum matches the recomputed one
    pub fn is_well_formed(bytes: &[u8]) -> bool {
        bytes.len() == MODE_FRAME_SIZE
            && crc16(&bytes[..MODE_PAYLOAD_SIZE]) == bytes[MODE_PAYLOAD_SIZE..]
    }

    /// The whole frame, payload plus checksum
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The payload portion of the frame
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..MODE_PAYLOAD_SIZE]
    }

    /// The two checksum bytes
    pub fn checksum(&self) -> [u8; 2] {
        [self.bytes[MODE_PAYLOAD_SIZE], self.bytes[MODE_PAYLOAD_SIZE + 1]]
    }
}
