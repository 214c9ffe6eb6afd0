use anyhow::{Context, Result};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use super::decode::AudioData;
use super::frame::SampleFrame;
use crate::protocol::decoder::{DecoderOptions, DecoderStats, FrameDecoder};

const READ_CHUNK: usize = 4096;

/// A producer of sample frames, driven from the ingestion thread.
///
/// `next_frames` is the only place the ingestion loop blocks. It appends
/// whatever became available (possibly nothing) and returns, so callers
/// must not assume any particular number of frames per call.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Returns `Ok(false)` once the source is exhausted.
    fn next_frames(&mut self, out: &mut Vec<SampleFrame>) -> Result<bool>;

    fn decoder_stats(&self) -> Option<DecoderStats> {
        None
    }
}

/// Framed PCM arriving over a byte stream: a serial device node, a capture
/// dump or stdin. The stream must already be raw (no tty line discipline).
pub struct SerialSource {
    name: String,
    reader: Box<dyn Read + Send>,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl SerialSource {
    pub fn new(name: impl Into<String>, reader: Box<dyn Read + Send>, options: DecoderOptions) -> Self {
        Self {
            name: name.into(),
            reader,
            decoder: FrameDecoder::new(options),
            chunk: vec![0; READ_CHUNK],
        }
    }

    /// Opens `path`, or stdin when the path is `-`.
    pub fn open(path: &Path, options: DecoderOptions) -> Result<Self> {
        if path == Path::new("-") {
            return Ok(Self::new("stdin", Box::new(std::io::stdin()), options));
        }
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open serial stream: {}", path.display()))?;
        Ok(Self::new(path.display().to_string(), Box::new(file), options))
    }
}

impl FrameSource for SerialSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frames(&mut self, out: &mut Vec<SampleFrame>) -> Result<bool> {
        let n = match self.reader.read(&mut self.chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(true),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read from {}", self.name));
            }
        };
        if n == 0 {
            if self.decoder.buffered() > 0 {
                log::debug!(
                    "{}: {} trailing bytes never formed a packet",
                    self.name,
                    self.decoder.buffered()
                );
            }
            self.decoder.reset();
            return Ok(false);
        }
        out.extend(self.decoder.push(&self.chunk[..n]).into_iter().map(|p| p.frame));
        Ok(true)
    }

    fn decoder_stats(&self) -> Option<DecoderStats> {
        Some(self.decoder.stats())
    }
}

/// Decoded audio handed out in fixed-size blocks, optionally at the pace a
/// capture device would deliver them.
pub struct CaptureSource {
    name: String,
    audio: AudioData,
    block_size: usize,
    position: usize,
    realtime: bool,
    started: Option<Instant>,
}

impl CaptureSource {
    pub fn new(name: impl Into<String>, audio: AudioData, block_size: usize, realtime: bool) -> Self {
        Self {
            name: name.into(),
            audio,
            block_size: block_size.max(1),
            position: 0,
            realtime,
            started: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    pub fn total_samples(&self) -> usize {
        self.audio.samples.len()
    }
}

impl FrameSource for CaptureSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frames(&mut self, out: &mut Vec<SampleFrame>) -> Result<bool> {
        let total = self.audio.samples.len();
        if self.position >= total || self.audio.sample_rate == 0 {
            return Ok(false);
        }
        let rate = self.audio.sample_rate as f64;
        let end = (self.position + self.block_size).min(total);

        if self.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = started + Duration::from_secs_f64(end as f64 / rate);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        let timestamp_us = (self.position as f64 * 1_000_000.0 / rate) as u64;
        let samples = self.audio.samples[self.position..end].to_vec();
        out.push(SampleFrame::new(samples, self.audio.sample_rate).with_timestamp(timestamp_us));
        self.position = end;
        Ok(end < total)
    }
}
