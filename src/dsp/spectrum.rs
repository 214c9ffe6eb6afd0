use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::audio::frame::SampleFrame;
use crate::error::ConfigError;

pub const MIN_FFT_SIZE: usize = 16;
const EPSILON: f32 = 1e-12;

/// Value reported for bins that received no energy at all, and for bands
/// that fall entirely above Nyquist.
pub const DB_FLOOR: f32 = -240.0;

/// Fixed perceptual bands: (name, low Hz, high Hz).
pub const PERCEPTUAL_BANDS: [(&str, f32, f32); 7] = [
    ("sub_bass", 20.0, 60.0),
    ("bass", 60.0, 250.0),
    ("low_mid", 250.0, 500.0),
    ("mid", 500.0, 2000.0),
    ("upper_mid", 2000.0, 4000.0),
    ("presence", 4000.0, 6000.0),
    ("brilliance", 6000.0, 20000.0),
];

/// How raw FFT bins are folded into displayable columns.
#[derive(Clone, Debug, PartialEq)]
pub enum BandLayout {
    /// One value per bin, `N/2` values.
    Raw,
    /// `bands` columns whose edges follow `f(t) = t² · nyquist · k + min_hz`,
    /// with `k` chosen so the last edge lands on `max_hz`. The square puts
    /// most columns in the low end.
    Quadratic { bands: usize, min_hz: f32, max_hz: f32 },
    /// The seven [`PERCEPTUAL_BANDS`].
    Perceptual,
}

impl BandLayout {
    /// Number of values a frame analyzed with this layout carries.
    pub fn band_count(&self, fft_size: usize) -> usize {
        match self {
            BandLayout::Raw => fft_size / 2,
            BandLayout::Quadratic { bands, .. } => *bands,
            BandLayout::Perceptual => PERCEPTUAL_BANDS.len(),
        }
    }
}

/// dBFS magnitudes for one analysis pass.
#[derive(Clone, Debug, Serialize)]
pub struct SpectralFrame {
    pub values: Vec<f32>,
    /// Effective rate after stride selection.
    pub sample_rate: f32,
    pub fft_size: usize,
    /// Center frequency per value for reduced layouts; `None` for raw bins.
    pub centers_hz: Option<Vec<f32>>,
}

impl SpectralFrame {
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate / self.fft_size as f32
    }

    pub fn frequency_of(&self, index: usize) -> f32 {
        match &self.centers_hz {
            Some(centers) => centers.get(index).copied().unwrap_or(0.0),
            None => index as f32 * self.bin_hz(),
        }
    }

    /// Strongest entry as `(index, hz, db)`.
    pub fn peak(&self) -> Option<(usize, f32, f32)> {
        let (index, &db) = self
            .values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        Some((index, self.frequency_of(index), db))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct BandRange {
    lo: usize,
    hi: usize,
    center_hz: f32,
}

/// Hann-windowed FFT with full-scale dB calibration.
///
/// All buffers are sized once at construction; the per-frame path only
/// allocates the returned [`SpectralFrame`].
pub struct SpectralEngine {
    fft_size: usize,
    layout: BandLayout,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scale: f32,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    bins_db: Vec<f32>,
    /// Band ranges for `ranges_rate`; rebuilt when the analysis rate changes.
    ranges: Vec<BandRange>,
    ranges_rate: f32,
}

impl SpectralEngine {
    pub fn new(fft_size: usize, layout: BandLayout) -> Result<Self, ConfigError> {
        if fft_size < MIN_FFT_SIZE {
            return Err(ConfigError::FftSizeTooSmall {
                size: fft_size,
                min: MIN_FFT_SIZE,
            });
        }
        if !fft_size.is_power_of_two() {
            return Err(ConfigError::FftSizeNotPowerOfTwo(fft_size));
        }
        match &layout {
            BandLayout::Quadratic { bands: 0, .. } => {
                return Err(ConfigError::Zero("band count"));
            }
            &BandLayout::Quadratic { min_hz, max_hz, .. } if !(min_hz >= 0.0 && max_hz > min_hz) => {
                return Err(ConfigError::FrequencyRange {
                    name: "band layout",
                    min: min_hz,
                    max: max_hz,
                });
            }
            _ => {}
        }

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let window = hann_window(fft_size);
        let coherent_gain = window.iter().sum::<f32>() / fft_size as f32;
        let scale = 2.0 / (fft_size as f32 * coherent_gain);

        Ok(Self {
            fft_size,
            layout,
            fft,
            window,
            scale,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            bins_db: vec![DB_FLOOR; fft_size / 2],
            ranges: Vec::new(),
            ranges_rate: f32::NAN,
        })
    }

    pub fn band_count(&self) -> usize {
        self.layout.band_count(self.fft_size)
    }

    pub fn analyze(&mut self, frame: &SampleFrame) -> SpectralFrame {
        let n = self.fft_size;
        let stride = (frame.len() / n).max(1);
        let sample_rate = frame.sample_rate as f32 / stride as f32;

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let index = i * stride;
            let sample = if index < frame.len() {
                frame.normalized(index)
            } else {
                0.0
            };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (db, bin) in self.bins_db.iter_mut().zip(&self.buffer[..n / 2]) {
            *db = 20.0 * (bin.norm() * self.scale + EPSILON).log10();
        }

        if self.layout == BandLayout::Raw {
            return SpectralFrame {
                values: self.bins_db.clone(),
                sample_rate,
                fft_size: n,
                centers_hz: None,
            };
        }

        self.refresh_ranges(sample_rate);
        let bins_db = &self.bins_db;
        let values = self
            .ranges
            .iter()
            .map(|r| {
                bins_db[r.lo..r.hi]
                    .iter()
                    .copied()
                    .fold(DB_FLOOR, f32::max)
            })
            .collect();
        let centers = self.ranges.iter().map(|r| r.center_hz).collect();
        SpectralFrame {
            values,
            sample_rate,
            fft_size: n,
            centers_hz: Some(centers),
        }
    }

    fn refresh_ranges(&mut self, sample_rate: f32) {
        if self.ranges_rate == sample_rate {
            return;
        }
        self.ranges = compute_ranges(&self.layout, self.fft_size, sample_rate);
        self.ranges_rate = sample_rate;
        log::debug!("band layout rebuilt for {:.1} Hz: {} bands", sample_rate, self.ranges.len());
    }
}

impl fmt::Debug for SpectralEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralEngine")
            .field("fft_size", &self.fft_size)
            .field("layout", &self.layout)
            .finish()
    }
}

/// Lower edge of quadratic band `t ∈ [0, 1]`.
pub fn quadratic_edge(t: f32, nyquist: f32, min_hz: f32, max_hz: f32) -> f32 {
    let top = max_hz.min(nyquist);
    let offset = min_hz.min(top);
    let k = if nyquist > 0.0 { (top - offset) / nyquist } else { 0.0 };
    t * t * nyquist * k + offset
}

fn compute_ranges(layout: &BandLayout, fft_size: usize, sample_rate: f32) -> Vec<BandRange> {
    let half = fft_size / 2;
    let bin_hz = sample_rate / fft_size as f32;
    let nyquist = sample_rate / 2.0;

    let bins_for = |f0: f32, f1: f32| -> (usize, usize) {
        let lo = ((f0 / bin_hz).floor() as usize).min(half);
        let hi = ((f1 / bin_hz).ceil() as usize).min(half);
        (lo, hi)
    };

    match layout {
        BandLayout::Raw => Vec::new(),
        BandLayout::Quadratic { bands, min_hz, max_hz } => (0..*bands)
            .map(|b| {
                let t0 = b as f32 / *bands as f32;
                let t1 = (b + 1) as f32 / *bands as f32;
                let f0 = quadratic_edge(t0, nyquist, *min_hz, *max_hz);
                let f1 = quadratic_edge(t1, nyquist, *min_hz, *max_hz);
                let (lo, hi) = bins_for(f0, f1);
                // Every band reads at least one bin, even when narrower than a bin.
                let lo = lo.min(half - 1);
                let hi = hi.max(lo + 1);
                BandRange {
                    lo,
                    hi,
                    center_hz: (f0 + f1) * 0.5,
                }
            })
            .collect(),
        BandLayout::Perceptual => PERCEPTUAL_BANDS
            .iter()
            .map(|&(_, f0, f1)| {
                let (lo, hi) = bins_for(f0, f1);
                BandRange {
                    lo,
                    hi,
                    center_hz: (f0 * f1).sqrt(),
                }
            })
            .collect(),
    }
}

pub fn hann_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}
