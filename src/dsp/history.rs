use super::spectrum::SpectralFrame;
use crate::error::ConfigError;

/// Scrolling spectrogram: `rows` most recent columns of normalized values.
///
/// Row 0 is the newest frame. The grid is allocated once and shifted in
/// place on every push.
#[derive(Debug, Clone)]
pub struct WaterfallHistory {
    rows: usize,
    cols: usize,
    cells: Vec<f32>,
    min_db: f32,
    max_db: f32,
    gamma: f32,
    filled: usize,
    interval_sum: f64,
    interval_count: u64,
}

impl WaterfallHistory {
    pub fn new(
        rows: usize,
        cols: usize,
        min_db: f32,
        max_db: f32,
        gamma: f32,
    ) -> Result<Self, ConfigError> {
        if rows == 0 {
            return Err(ConfigError::Zero("history rows"));
        }
        if cols == 0 {
            return Err(ConfigError::Zero("history columns"));
        }
        if !(min_db < max_db) {
            return Err(ConfigError::DbRange {
                floor: min_db,
                ceiling: max_db,
            });
        }
        if !(gamma > 0.0 && gamma.is_finite()) {
            return Err(ConfigError::Gamma(gamma));
        }
        Ok(Self {
            rows,
            cols,
            cells: vec![0.0; rows * cols],
            min_db,
            max_db,
            gamma,
            filled: 0,
            interval_sum: 0.0,
            interval_count: 0,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Rows written since construction or the last reset, capped at `rows`.
    #[cfg(test)]
    pub fn filled_rows(&self) -> usize {
        self.filled
    }

    /// Row `index` counted from the newest. Panics if out of range.
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.cols;
        &self.cells[start..start + self.cols]
    }

    pub fn push(&mut self, frame: &SpectralFrame, dt: f32) {
        self.push_db(&frame.values, dt);
    }

    /// Shifts every row back one slot and writes `values` as the newest row.
    /// Missing columns are written as zero; extra columns are dropped.
    pub fn push_db(&mut self, values: &[f32], dt: f32) {
        let cols = self.cols;
        self.cells.copy_within(0..(self.rows - 1) * cols, cols);

        let range = self.max_db - self.min_db;
        for (col, cell) in self.cells[..cols].iter_mut().enumerate() {
            *cell = match values.get(col) {
                Some(&db) => ((db - self.min_db) / range).clamp(0.0, 1.0).powf(self.gamma),
                None => 0.0,
            };
        }

        self.filled = (self.filled + 1).min(self.rows);
        if dt.is_finite() && dt > 0.0 {
            self.interval_sum += dt as f64;
            self.interval_count += 1;
        }
    }

    pub fn average_interval(&self) -> f32 {
        if self.interval_count == 0 {
            return 0.0;
        }
        (self.interval_sum / self.interval_count as f64) as f32
    }

    /// Seconds spanned by the full grid, for labeling the time axis.
    pub fn time_span_secs(&self) -> f32 {
        self.rows as f32 * self.average_interval()
    }

    pub fn reset(&mut self) {
        self.cells.fill(0.0);
        self.filled = 0;
        self.interval_sum = 0.0;
        self.interval_count = 0;
    }
}
