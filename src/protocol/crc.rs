//! CRC-16/CCITT as emitted by the microphone firmware: poly 0x1021,
//! init 0xFFFF, MSB-first, no reflection, no final XOR.

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

/// Checksum over `bytes[offset..offset + length]`.
///
/// The range is clamped to the slice, so an out-of-range request hashes
/// whatever overlaps instead of panicking.
pub fn crc16(bytes: &[u8], offset: usize, length: usize) -> u16 {
    let start = offset.min(bytes.len());
    let end = start.saturating_add(length).min(bytes.len());

    let mut crc = INIT;
    for &byte in &bytes[start..end] {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    crc16(bytes, 0, bytes.len())
}
