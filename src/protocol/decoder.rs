use serde::Serialize;

use super::crc::crc16;
use super::packet::{bytes_to_samples, Header, DEFAULT_MAX_PAYLOAD, HEADER_LEN, SYNC_BYTE, TRAILER_LEN};
use crate::audio::frame::SampleFrame;

#[derive(Clone, Copy, Debug)]
pub struct DecoderOptions {
    /// Rate the producer was configured with; packets do not carry it.
    pub sample_rate: u32,
    pub verify_crc: bool,
    pub max_payload: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            verify_crc: true,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// A validated packet, already converted to samples.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPacket {
    pub frame: SampleFrame,
    pub sequence: u32,
    /// Packets missing between the previous accepted packet and this one.
    pub dropped_before: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    pub packets: u64,
    pub crc_errors: u64,
    pub framing_errors: u64,
    pub dropped_packets: u64,
    pub bytes_skipped: u64,
}

/// Resynchronizing framer for the serial PCM stream.
///
/// Bytes may arrive in chunks of any size. Whatever cannot be parsed yet
/// stays buffered until more data shows up or the session ends.
///
/// On a CRC mismatch the scan advances by a single byte rather than by the
/// declared frame length. A sync byte inside a corrupted payload therefore
/// gets its own chance, which recovers faster from short bursts of noise
/// but costs O(n²) on a stream that is mostly garbage.
#[derive(Debug)]
pub struct FrameDecoder {
    options: DecoderOptions,
    buffer: Vec<u8>,
    last_sequence: Option<u32>,
    /// Set after a complete packet; a non-sync byte right there is a framing error.
    expect_sync: bool,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            options,
            buffer: Vec::with_capacity(HEADER_LEN + options.max_payload + TRAILER_LEN),
            last_sequence: None,
            expect_sync: false,
            stats: DecoderStats::default(),
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn set_verify_crc(&mut self, verify: bool) {
        self.options.verify_crc = verify;
    }

    /// Bytes held back waiting for the rest of a packet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops buffered bytes and sequence tracking. Counters are kept.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            log::debug!("discarding {} buffered bytes", self.buffer.len());
        }
        self.buffer.clear();
        self.last_sequence = None;
        self.expect_sync = false;
    }

    /// Appends `bytes` and returns every packet that became complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<DecodedPacket> {
        self.buffer.extend_from_slice(bytes);

        let mut decoded = Vec::new();
        let mut pos = 0;

        while pos < self.buffer.len() {
            let rest = &self.buffer[pos..];

            if rest[0] != SYNC_BYTE {
                if self.expect_sync {
                    self.stats.framing_errors += 1;
                    self.expect_sync = false;
                    log::warn!("lost sync after packet, resynchronizing");
                }
                self.skip_byte(&mut pos);
                continue;
            }

            if rest.len() < HEADER_LEN + TRAILER_LEN {
                break;
            }
            let Some(header) = Header::parse(rest) else {
                break;
            };

            if !self.plausible_length(header.payload_len) {
                self.stats.framing_errors += 1;
                log::warn!("malformed payload length {}", header.payload_len);
                self.skip_byte(&mut pos);
                continue;
            }

            let frame_len = header.frame_len();
            if rest.len() < frame_len {
                break;
            }

            let body_len = HEADER_LEN + header.payload_len;
            let received = u16::from_le_bytes([rest[body_len], rest[body_len + 1]]);
            let computed = crc16(rest, 0, body_len);
            if received != computed {
                if self.options.verify_crc {
                    self.stats.crc_errors += 1;
                    log::warn!(
                        "crc mismatch on seq {} (got {:#06x}, expected {:#06x})",
                        header.sequence,
                        received,
                        computed
                    );
                    self.skip_byte(&mut pos);
                    continue;
                }
                log::debug!("crc mismatch on seq {} ignored", header.sequence);
            }

            let samples = bytes_to_samples(&rest[HEADER_LEN..body_len]);
            let dropped_before = self.track_sequence(header.sequence);
            let frame = SampleFrame::new(samples, self.options.sample_rate)
                .with_timestamp(header.timestamp_usec as u64);

            decoded.push(DecodedPacket {
                frame,
                sequence: header.sequence,
                dropped_before,
            });
            self.stats.packets += 1;
            self.expect_sync = true;
            pos += frame_len;
        }

        self.buffer.drain(..pos);
        decoded
    }

    fn plausible_length(&self, payload_len: usize) -> bool {
        payload_len > 0 && payload_len % 2 == 0 && payload_len <= self.options.max_payload
    }

    fn skip_byte(&mut self, pos: &mut usize) {
        self.expect_sync = false;
        self.stats.bytes_skipped += 1;
        *pos += 1;
    }

    fn track_sequence(&mut self, sequence: u32) -> u32 {
        let dropped = match self.last_sequence {
            Some(previous) => {
                let expected = previous.wrapping_add(1);
                sequence.wrapping_sub(expected)
            }
            None => 0,
        };
        if dropped > 0 {
            self.stats.dropped_packets += dropped as u64;
            log::warn!("sequence gap: {} packet(s) dropped before seq {}", dropped, sequence);
        }
        self.last_sequence = Some(sequence);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{samples_to_bytes, Packet};

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(DecoderOptions::default())
    }

    fn reference_packet() -> Packet {
        Packet {
            sequence: 1,
            timestamp_usec: 0x1234_5678,
            payload: vec![0, 1, 2, 3],
        }
    }

    fn numbered(seq: u32) -> Vec<u8> {
        let samples: Vec<i16> = (0..16)
            .map(|i| (seq as i16).wrapping_mul(100).wrapping_add(i))
            .collect();
        Packet::from_samples(seq, seq.wrapping_mul(1000), &samples).encode().unwrap()
    }

    #[test]
    fn round_trip_split_at_every_boundary() {
        let packet = reference_packet();
        let bytes = packet.encode().unwrap();

        for split in 0..=bytes.len() {
            let mut dec = decoder();
            let mut out = dec.push(&bytes[..split]);
            out.extend(dec.push(&bytes[split..]));

            assert_eq!(out.len(), 1, "split at {split}");
            let got = &out[0];
            assert_eq!(samples_to_bytes(&got.frame.samples), packet.payload);
            assert_eq!(got.sequence, 1);
            assert_eq!(got.frame.timestamp_us, Some(0x1234_5678));
            assert_eq!(dec.buffered(), 0);
        }
    }

    #[test]
    fn round_trip_one_byte_at_a_time() {
        let packet = reference_packet();
        let mut dec = decoder();
        let mut out = Vec::new();
        for byte in packet.encode().unwrap() {
            out.extend(dec.push(&[byte]));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].frame.samples, vec![0x0100, 0x0302]);
        assert_eq!(out[0].frame.sample_rate, 16_000);
        assert_eq!(dec.stats().packets, 1);
    }

    #[test]
    fn leading_garbage_is_skipped_without_framing_error() {
        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend(numbered(0));
        let mut dec = decoder();
        let out = dec.push(&stream);
        assert_eq!(out.len(), 1);
        assert_eq!(dec.stats().bytes_skipped, 3);
        assert_eq!(dec.stats().framing_errors, 0);
    }

    #[test]
    fn garbage_between_packets_is_a_framing_error() {
        let mut stream = numbered(0);
        stream.extend([0x01, 0x02]);
        stream.extend(numbered(1));
        let mut dec = decoder();
        let out = dec.push(&stream);
        assert_eq!(out.len(), 2);
        assert_eq!(dec.stats().framing_errors, 1);
        assert_eq!(dec.stats().bytes_skipped, 2);
    }

    #[test]
    fn corrupted_payload_is_rejected_and_stream_recovers() {
        let options = DecoderOptions {
            max_payload: 64,
            ..Default::default()
        };

        let clean = numbered(0);
        for offset in HEADER_LEN..HEADER_LEN + 32 {
            let mut dec = FrameDecoder::new(options);
            let mut bad = clean.clone();
            bad[offset] ^= 0x5A;

            let mut stream = bad;
            for seq in 1..=5 {
                stream.extend(numbered(seq));
            }

            let out = dec.push(&stream);
            let sequences: Vec<u32> = out.iter().map(|p| p.sequence).collect();
            assert_eq!(sequences, vec![1, 2, 3, 4, 5], "corruption at {offset}");
            assert!(dec.stats().crc_errors >= 1);
        }
    }

    #[test]
    fn false_sync_inside_rejected_payload_is_skipped() {
        // Payload carries what looks like a header: sync plus an even, small length.
        let mut payload = vec![0x11, SYNC_BYTE, 0x08, 0x00];
        payload.extend(1..=10u8);
        payload.extend([0x22, 0x33]);
        let mut stream = Packet {
            sequence: 0,
            timestamp_usec: 0,
            payload,
        }
        .encode()
        .unwrap();
        let last = stream.len() - 1;
        stream[last] ^= 0xFF;
        for seq in 1..=3 {
            stream.extend(numbered(seq));
        }

        let mut dec = decoder();
        let out = dec.push(&stream);
        let sequences: Vec<u32> = out.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(dec.stats().crc_errors >= 1);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn disabled_crc_still_emits_frame() {
        let mut bytes = numbered(3);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut dec = FrameDecoder::new(DecoderOptions {
            verify_crc: false,
            ..Default::default()
        });
        let out = dec.push(&bytes);
        assert_eq!(out.len(), 1);
        assert_eq!(dec.stats().crc_errors, 0);

        dec.set_verify_crc(true);
        assert!(dec.push(&bytes).is_empty());
        assert_eq!(dec.stats().crc_errors, 1);
    }

    #[test]
    fn reports_sequence_gap() {
        let mut dec = decoder();
        let mut out = Vec::new();
        for seq in [0, 1, 2, 5] {
            out.extend(dec.push(&numbered(seq)));
        }
        let gaps: Vec<u32> = out.iter().map(|p| p.dropped_before).collect();
        assert_eq!(gaps, vec![0, 0, 0, 2]);
        assert_eq!(dec.stats().dropped_packets, 2);
    }

    #[test]
    fn sequence_wraps_without_gap() {
        let mut dec = decoder();
        let mut out = dec.push(&numbered(u32::MAX));
        out.extend(dec.push(&numbered(0)));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].dropped_before, 0);
        assert_eq!(dec.stats().dropped_packets, 0);
    }

    #[test]
    fn odd_or_oversized_length_is_malformed() {
        let mut dec = FrameDecoder::new(DecoderOptions {
            max_payload: 32,
            ..Default::default()
        });
        // odd length
        let mut stream = vec![SYNC_BYTE, 3, 0];
        // oversized length
        stream.extend([SYNC_BYTE, 0x00, 0x10]);
        stream.extend([0u8; 16]);
        stream.extend(numbered(9));
        let out = dec.push(&stream);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sequence, 9);
        assert_eq!(dec.stats().framing_errors, 2);
    }

    #[test]
    fn incomplete_tail_is_retained_then_discarded() {
        let bytes = numbered(0);
        let mut dec = decoder();
        assert!(dec.push(&bytes[..bytes.len() - 1]).is_empty());
        assert_eq!(dec.buffered(), bytes.len() - 1);
        assert_eq!(dec.stats().crc_errors, 0);

        dec.reset();
        assert_eq!(dec.buffered(), 0);
        assert!(dec.push(&bytes[bytes.len() - 1..]).is_empty());
    }
}
