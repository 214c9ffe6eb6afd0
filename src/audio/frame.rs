/// A block of mono PCM16 samples handed from a source to the pipeline.
///
/// Frames are moved between stages, never shared.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleFrame {
    pub samples: Vec<i16>,
    /// Rate reported by the producer, not the one requested from it.
    pub sample_rate: u32,
    /// Producer clock in microseconds, when the producer has one.
    pub timestamp_us: Option<u64>,
}

impl SampleFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp_us: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = Some(timestamp_us);
        self
    }

    /// Converts normalized `f32` audio (±1.0 full scale) to PCM16.
    #[cfg(test)]
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(to_pcm16(samples), sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Sample `index` normalized so that `i16::MIN` maps to -1.0.
    #[inline]
    pub fn normalized(&self, index: usize) -> f32 {
        self.samples[index] as f32 / 32768.0
    }
}

/// Scales ±1.0 audio to PCM16, saturating at the rails.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).round().clamp(-32768.0, 32767.0) as i16)
        .collect()
}
