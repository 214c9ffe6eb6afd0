use serde::Serialize;

use super::spectrum::SpectralFrame;
use crate::error::ConfigError;

/// Weight of the previous level while rising.
const ATTACK_KEEP: f32 = 0.6;
/// Weight of the new target while rising.
const ATTACK_BLEND: f32 = 0.4;

/// Display state of one band, both values normalized to `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BandState {
    pub level: f32,
    pub peak: f32,
}

/// Per-band attack/decay smoothing with an independently falling peak marker.
///
/// Rising levels blend toward the target, falling levels drop linearly at the
/// configured dB/s rate. The band count is fixed at construction.
#[derive(Debug, Clone)]
pub struct LevelTracker {
    bands: Vec<BandState>,
    min_db: f32,
    max_db: f32,
    level_decay_db: f32,
    peak_decay_db: f32,
}

impl LevelTracker {
    pub fn new(
        band_count: usize,
        min_db: f32,
        max_db: f32,
        level_decay_db: f32,
        peak_decay_db: f32,
    ) -> Result<Self, ConfigError> {
        if band_count == 0 {
            return Err(ConfigError::Zero("band count"));
        }
        if !(min_db < max_db) {
            return Err(ConfigError::DbRange {
                floor: min_db,
                ceiling: max_db,
            });
        }
        Ok(Self {
            bands: vec![BandState::default(); band_count],
            min_db,
            max_db,
            level_decay_db: level_decay_db.max(0.0),
            peak_decay_db: peak_decay_db.max(0.0),
        })
    }

    pub fn bands(&self) -> &[BandState] {
        &self.bands
    }

    pub fn reset(&mut self) {
        self.bands.fill(BandState::default());
    }

    /// Maps a dB value onto `[0, 1]` between the configured floor and ceiling.
    pub fn normalize(&self, db: f32) -> f32 {
        ((db - self.min_db) / (self.max_db - self.min_db)).clamp(0.0, 1.0)
    }

    pub fn update(&mut self, frame: &SpectralFrame, dt: f32) {
        self.update_db(&frame.values, dt);
    }

    pub fn update_db(&mut self, values: &[f32], dt: f32) {
        if values.len() != self.bands.len() {
            log::debug!(
                "ignoring spectral frame with {} bands, tracking {}",
                values.len(),
                self.bands.len()
            );
            return;
        }

        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let range = self.max_db - self.min_db;
        let level_fall = self.level_decay_db * dt / range;
        let peak_fall = self.peak_decay_db * dt / range;

        for (index, &db) in values.iter().enumerate() {
            let target = self.normalize(db);
            let band = &mut self.bands[index];

            if target >= band.level {
                band.level = band.level * ATTACK_KEEP + target * ATTACK_BLEND;
            } else {
                band.level = (band.level - level_fall).max(0.0);
            }

            if band.level > band.peak {
                band.peak = band.level;
            } else {
                band.peak = (band.peak - peak_fall).max(0.0);
            }
        }
    }
}
