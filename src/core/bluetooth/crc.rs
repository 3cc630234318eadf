//! Checksum used by the wheel's command frames.
//! The controller firmware expects a non-standard CRC16: the input is
//! pair-swapped first, bits are fed LSB-first, and the result is
//! bit-reversed before being emitted little-endian.

/// Polynomial for the shift register (x^16 + x^15 + x^2 + 1).
const CRC_POLYNOMIAL: u16 = 0x8005;

/// Swaps every adjacent pair of bytes in place.
/// An odd-length slice keeps its final byte where it is. Applying the
/// swap twice restores the original order.
pub fn swap_every_other_byte(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Computes the wheel's CRC16 over `data`, returning `[low, high]`.
///
/// Do not replace this with a tabulated standard CRC-16 variant: the
/// pair swap, LSB-first bit order and final bit reversal make it
/// incompatible with the common parameterizations. The golden vectors
/// below pin the exact behavior the firmware checks against.
pub fn crc16(data: &[u8]) -> [u8; 2] {
    let mut swapped = data.to_vec();
    swap_every_other_byte(&mut swapped);

    let mut out: u16 = 0;
    for byte in swapped {
        for bit in 0..8 {
            let overflow = out >> 15;
            out <<= 1;
            out |= u16::from((byte >> bit) & 1);
            if overflow != 0 {
                out ^= CRC_POLYNOMIAL;
            }
        }
    }

    // Push the last 16 bits through the register.
    for _ in 0..16 {
        let overflow = out >> 15;
        out <<= 1;
        if overflow != 0 {
            out ^= CRC_POLYNOMIAL;
        }
    }

    let reversed = out.reverse_bits();
    [reversed as u8, (reversed >> 8) as u8]
}
