use serde::Serialize;

use crate::audio::frame::SampleFrame;
use crate::config::{AnalysisConfig, PitchConfig};
use crate::dsp::history::WaterfallHistory;
use crate::dsp::levels::{BandState, LevelTracker};
use crate::dsp::pitch::{self, PitchEstimate};
use crate::dsp::spectrum::SpectralEngine;
use crate::error::ConfigError;

/// What one render tick produced, in a form that serializes to a JSON line.
#[derive(Clone, Debug, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub timestamp_us: Option<u64>,
    pub sample_rate: u32,
    pub samples: usize,
    pub peak_hz: Option<f32>,
    pub peak_db: Option<f32>,
    pub pitch: PitchEstimate,
    pub history_span_secs: f32,
    pub bands: Vec<BandState>,
}

/// Analysis state for one audio session.
///
/// Each [`Pipeline::tick`] runs exactly one spectral pass, one level update,
/// one history write and one pitch estimate, synchronously.
#[derive(Debug)]
pub struct Pipeline {
    engine: SpectralEngine,
    levels: LevelTracker,
    history: WaterfallHistory,
    pitch: PitchConfig,
    ticks: u64,
}

impl Pipeline {
    pub fn new(analysis: &AnalysisConfig, pitch: &PitchConfig) -> Result<Self, ConfigError> {
        analysis.validate()?;
        pitch.validate()?;

        let engine = SpectralEngine::new(analysis.fft_size, analysis.band_layout())?;
        let bands = engine.band_count();
        let levels = LevelTracker::new(
            bands,
            analysis.min_db,
            analysis.max_db,
            analysis.level_decay_db,
            analysis.peak_decay_db,
        )?;
        let history = WaterfallHistory::new(
            analysis.history_rows,
            bands,
            analysis.min_db,
            analysis.max_db,
            analysis.gamma,
        )?;

        log::info!(
            "pipeline: fft={} bands={} history={}x{}",
            analysis.fft_size,
            bands,
            analysis.history_rows,
            bands
        );

        Ok(Self {
            engine,
            levels,
            history,
            pitch: pitch.clone(),
            ticks: 0,
        })
    }

    pub fn tick(&mut self, frame: SampleFrame, dt: f32) -> TickReport {
        let spectrum = self.engine.analyze(&frame);
        self.levels.update(&spectrum, dt);
        self.history.push(&spectrum, dt);
        let pitch = pitch::estimate(
            &frame,
            self.pitch.min_hz,
            self.pitch.max_hz,
            self.pitch.min_samples,
        );
        self.ticks += 1;

        let peak = spectrum.peak();
        let report = TickReport {
            tick: self.ticks,
            timestamp_us: frame.timestamp_us,
            sample_rate: frame.sample_rate,
            samples: frame.len(),
            peak_hz: peak.map(|(_, hz, _)| hz),
            peak_db: peak.map(|(_, _, db)| db),
            pitch,
            history_span_secs: self.history.time_span_secs(),
            bands: self.levels.bands().to_vec(),
        };
        log::debug!(
            "tick {}: peak {:?} Hz, pitch {:?}",
            report.tick,
            report.peak_hz,
            report.pitch.note_name
        );

        report
    }

    pub fn bands(&self) -> &[BandState] {
        self.levels.bands()
    }

    pub fn history(&self) -> &WaterfallHistory {
        &self.history
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Zeroes band and history state for a restarted session.
    pub fn reset(&mut self) {
        self.levels.reset();
        self.history.reset();
        self.ticks = 0;
    }
}
