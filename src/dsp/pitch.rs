use serde::Serialize;

use crate::audio::frame::SampleFrame;

/// Default for the shortest frame worth correlating.
pub const MIN_SAMPLES: usize = 512;
const EPSILON: f64 = 1e-12;

const A4_HZ: f64 = 440.0;
const A4_MIDI: f64 = 69.0;
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Result of one pitch detection pass. Nothing carries over between calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PitchEstimate {
    pub frequency_hz: Option<f64>,
    pub confidence: f64,
    pub cents_offset: Option<f64>,
    pub note_name: Option<String>,
}

impl PitchEstimate {
    pub fn empty() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn is_voiced(&self) -> bool {
        self.frequency_hz.is_some()
    }
}

/// Nearest equal-tempered note to a frequency.
#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub midi: i32,
    pub name: &'static str,
    pub octave: i32,
    /// Distance from the note in cents, within ±50.
    pub cents: f64,
}

impl Note {
    pub fn from_frequency(freq_hz: f64) -> Option<Self> {
        if !(freq_hz > 0.0 && freq_hz.is_finite()) {
            return None;
        }
        let midi_exact = A4_MIDI + 12.0 * (freq_hz / A4_HZ).log2();
        let rounded = midi_exact.round();
        let midi = rounded as i32;
        Some(Self {
            midi,
            name: NOTE_NAMES[midi.rem_euclid(12) as usize],
            octave: midi.div_euclid(12) - 1,
            cents: (midi_exact - rounded) * 100.0,
        })
    }

    pub fn label(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }
}

/// Autocorrelation pitch detector with parabolic peak refinement.
///
/// Frames shorter than `min_samples` yield an empty estimate.
pub fn estimate(
    frame: &SampleFrame,
    min_hz: f64,
    max_hz: f64,
    min_samples: usize,
) -> PitchEstimate {
    let n = frame.len();
    if n < min_samples.max(3) || frame.sample_rate == 0 || !(min_hz > 0.0 && max_hz > min_hz) {
        return PitchEstimate::empty();
    }
    let sample_rate = frame.sample_rate as f64;

    let mean = frame.samples.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
    let centered: Vec<f64> = frame.samples.iter().map(|&s| s as f64 - mean).collect();
    let energy: f64 = centered.iter().map(|v| v * v).sum();
    if energy <= EPSILON {
        return PitchEstimate::empty();
    }

    // Lags outside [min_lag, max_lag] are only computed as neighbours.
    let min_lag = ((sample_rate / max_hz).floor() as usize).max(1);
    let max_lag = ((sample_rate / min_hz).ceil() as usize).min(n - 2);
    if min_lag >= max_lag {
        return PitchEstimate::empty();
    }
    let first = min_lag - 1;
    let corr: Vec<f64> = (first..=max_lag + 1)
        .map(|lag| autocorrelation(&centered, lag))
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for lag in min_lag..=max_lag {
        let i = lag - first;
        let (prev, cur, next) = (corr[i - 1], corr[i], corr[i + 1]);
        let is_local_max = cur > prev && cur >= next && cur > 0.0;
        if is_local_max && best.map_or(true, |(_, value)| cur > value) {
            best = Some((lag, cur));
        }
    }
    let Some((lag, peak)) = best else {
        return PitchEstimate::empty();
    };

    let i = lag - first;
    let delta = parabolic_offset(corr[i - 1], corr[i], corr[i + 1]);
    let refined_lag = lag as f64 + delta;
    let frequency = sample_rate / refined_lag;
    let confidence = (peak / (energy + EPSILON)).clamp(0.0, 1.0);

    let note = Note::from_frequency(frequency);
    PitchEstimate {
        frequency_hz: Some(frequency),
        confidence,
        cents_offset: note.as_ref().map(|n| n.cents),
        note_name: note.as_ref().map(Note::label),
    }
}

fn autocorrelation(signal: &[f64], lag: usize) -> f64 {
    signal[..signal.len() - lag]
        .iter()
        .zip(&signal[lag..])
        .map(|(a, b)| a * b)
        .sum()
}

/// Vertex offset of the parabola through three equally spaced points.
fn parabolic_offset(left: f64, center: f64, right: f64) -> f64 {
    let denom = left - 2.0 * center + right;
    if denom.abs() <= EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, sample_rate: u32, len: usize, amplitude: f64) -> SampleFrame {
        let samples = (0..len)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64;
                (amplitude * 32767.0 * phase.sin()).round() as i16
            })
            .collect();
        SampleFrame::new(samples, sample_rate)
    }

    #[test]
    fn detects_a440() {
        let estimate = estimate(&tone(440.0, 16_000, 1024, 0.8), 60.0, 1500.0, MIN_SAMPLES);
        let freq = estimate.frequency_hz.unwrap();
        assert!((freq - 440.0).abs() < 4.4, "estimated {freq}");
        assert_eq!(estimate.note_name.as_deref(), Some("A4"));
        assert!(estimate.cents_offset.unwrap().abs() < 10.0);
        assert!(estimate.confidence > 0.8 && estimate.confidence <= 1.0);
    }

    #[test]
    fn detects_low_note_with_dc_offset() {
        let mut frame = tone(110.0, 16_000, 2048, 0.4);
        for s in frame.samples.iter_mut() {
            *s = s.saturating_add(4000);
        }
        let estimate = estimate(&frame, 60.0, 1500.0, MIN_SAMPLES);
        let freq = estimate.frequency_hz.unwrap();
        assert!((freq - 110.0).abs() < 1.1, "estimated {freq}");
        assert_eq!(estimate.note_name.as_deref(), Some("A2"));
    }

    #[test]
    fn short_frame_is_empty() {
        let estimate = estimate(&tone(440.0, 16_000, 511, 0.8), 60.0, 1500.0, MIN_SAMPLES);
        assert_eq!(estimate, PitchEstimate::empty());
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn lower_min_samples_admits_short_frames() {
        let estimate = estimate(&tone(440.0, 16_000, 511, 0.8), 60.0, 1500.0, 256);
        let freq = estimate.frequency_hz.unwrap();
        assert!((freq - 440.0).abs() < 5.0, "estimated {freq}");
    }

    #[test]
    fn silence_is_empty() {
        let frame = SampleFrame::new(vec![123; 1024], 16_000);
        assert!(!estimate(&frame, 60.0, 1500.0, MIN_SAMPLES).is_voiced());
    }

    #[test]
    fn invalid_range_is_empty() {
        let frame = tone(440.0, 16_000, 1024, 0.8);
        assert!(!estimate(&frame, 500.0, 100.0, MIN_SAMPLES).is_voiced());
        assert!(!estimate(&frame, 0.0, 100.0, MIN_SAMPLES).is_voiced());
    }

    #[test]
    fn note_mapping() {
        let a4 = Note::from_frequency(440.0).unwrap();
        assert_eq!((a4.midi, a4.label()), (69, "A4".to_string()));
        assert!(a4.cents.abs() < 1e-9);

        let c4 = Note::from_frequency(261.6256).unwrap();
        assert_eq!(c4.label(), "C4");

        let sharp = Note::from_frequency(440.0 * 2f64.powf(30.0 / 1200.0)).unwrap();
        assert_eq!(sharp.label(), "A4");
        assert!((sharp.cents - 30.0).abs() < 1e-6);

        let low = Note::from_frequency(8.0).unwrap();
        assert_eq!(low.octave, -1);
        assert!(Note::from_frequency(0.0).is_none());
        assert!(Note::from_frequency(f64::NAN).is_none());
    }

    #[test]
    fn parabola_vertex() {
        // y = -(x - 0.25)^2 sampled at -1, 0, 1.
        let f = |x: f64| -(x - 0.25) * (x - 0.25);
        let delta = parabolic_offset(f(-1.0), f(0.0), f(1.0));
        assert!((delta - 0.25).abs() < 1e-12);
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
    }
}
