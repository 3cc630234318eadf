//! Passcode authentication staging: turn a serial-number read into the
//! unlock bytes the wheel expects on its passcode characteristic.

use log::{debug, warn};

use crate::core::bluetooth::constants::SERIAL_NUMBER_LEN;
use crate::core::bluetooth::error::WheelError;
use crate::passcodes::PasscodeTable;
use crate::utils::decode_hex;

/// Extracts the wheel serial from a raw characteristic read.
///
/// The wheel pads the serial characteristic past the identifier itself,
/// so only the first [`SERIAL_NUMBER_LEN`] bytes are meaningful. Reads
/// shorter than that never name a provisioned wheel.
pub fn extract_serial(raw: &[u8]) -> Result<String, WheelError> {
    if raw.len() < SERIAL_NUMBER_LEN {
        warn!(
            "serial characteristic returned {} bytes, expected at least {}",
            raw.len(),
            SERIAL_NUMBER_LEN
        );
        return Err(WheelError::NoPasscode);
    }
    let serial = String::from_utf8_lossy(&raw[..SERIAL_NUMBER_LEN])
        .trim()
        .to_string();
    debug!("extracted wheel serial {:?}", serial);
    Ok(serial)
}

/// Resolves the passcode bytes to write for a raw serial read.
///
/// Fails with [`WheelError::NoPasscode`] when the table has no entry for
/// the serial and [`WheelError::MalformedPasscode`] when the stored value
/// is not valid hex.
pub fn passcode_for_serial(table: &PasscodeTable, raw: &[u8]) -> Result<Vec<u8>, WheelError> {
    let serial = extract_serial(raw)?;
    let passcode = table.lookup(&serial).ok_or_else(|| {
        warn!("no passcode entry for serial {:?}", serial);
        WheelError::NoPasscode
    })?;
    decode_hex(passcode).ok_or_else(|| {
        warn!("passcode entry for serial {:?} is not valid hex", serial);
        WheelError::MalformedPasscode
    })
}
