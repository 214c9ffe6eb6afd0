//! Wire layout of a PCM packet, little-endian throughout:
//!
//! ```text
//! [sync:u8 = 0xA6][length:u16][sequence:u32][timestamp_usec:u32][payload][crc16:u16]
//! ```
//!
//! `length` counts payload bytes only; the payload is mono PCM16.

use super::crc::crc16;
use crate::error::PacketError;

pub const SYNC_BYTE: u8 = 0xA6;
pub const HEADER_LEN: usize = 1 + 2 + 4 + 4;
pub const TRAILER_LEN: usize = 2;
/// Upper bound accepted by the decoder unless configured otherwise.
pub const DEFAULT_MAX_PAYLOAD: usize = 8192;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u32,
    pub timestamp_usec: u32,
    pub payload: Vec<u8>,
}

/// Fixed-size header fields, read before the payload has fully arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub payload_len: usize,
    pub sequence: u32,
    pub timestamp_usec: u32,
}

impl Header {
    /// Parses the header at the start of `bytes`. The caller checks the sync
    /// byte; this only needs `HEADER_LEN` bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            payload_len: u16::from_le_bytes([bytes[1], bytes[2]]) as usize,
            sequence: u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
            timestamp_usec: u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]),
        })
    }

    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len + TRAILER_LEN
    }
}

impl Packet {
    pub fn from_samples(sequence: u32, timestamp_usec: u32, samples: &[i16]) -> Self {
        Self {
            sequence,
            timestamp_usec,
            payload: samples_to_bytes(samples),
        }
    }

    /// Serializes the packet, computing the trailing CRC over header + payload.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload_len = u16::try_from(self.payload.len())
            .map_err(|_| PacketError::PayloadTooLarge(self.payload.len()))?;
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + TRAILER_LEN);
        out.push(SYNC_BYTE);
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.timestamp_usec.to_le_bytes());
        out.extend_from_slice(&self.payload);
        let crc = crc16(&out, 0, out.len());
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Little-endian PCM16 decode. A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
