use super::palette::Palette;
use crate::dsp::history::WaterfallHistory;
use crate::dsp::levels::BandState;

const BACKGROUND: [u8; 4] = [12, 12, 16, 255];
const PEAK_MARKER: [u8; 4] = [255, 255, 255, 255];
/// Share of the frame height given to the bar display.
const BAR_FRACTION: f32 = 0.4;

/// CPU rasterizer for the bar display (top) and waterfall heatmap (bottom).
///
/// Reads pipeline state only; produces tightly packed RGBA rows.
pub struct FrameRenderer {
    width: u32,
    height: u32,
    palette: Palette,
}

impl FrameRenderer {
    pub fn new(width: u32, height: u32, palette: Palette) -> Self {
        Self {
            width: width.max(1),
            height: height.max(2),
            palette,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn bar_height(&self) -> u32 {
        ((self.height as f32 * BAR_FRACTION) as u32).clamp(1, self.height - 1)
    }

    pub fn render(&self, bands: &[BandState], history: &WaterfallHistory) -> Vec<u8> {
        let mut pixels = vec![0u8; (self.width * self.height * 4) as usize];
        for px in pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&BACKGROUND);
        }
        self.draw_bars(&mut pixels, bands);
        self.draw_waterfall(&mut pixels, history);
        pixels
    }

    fn put(&self, pixels: &mut [u8], x: u32, y: u32, color: [u8; 4]) {
        let idx = ((y * self.width + x) * 4) as usize;
        pixels[idx..idx + 4].copy_from_slice(&color);
    }

    fn draw_bars(&self, pixels: &mut [u8], bands: &[BandState]) {
        if bands.is_empty() {
            return;
        }
        let bar_h = self.bar_height();
        let count = bands.len() as u32;

        for x in 0..self.width {
            let band = &bands[((x * count) / self.width).min(count - 1) as usize];
            let [r, g, b] = self.palette.map(band.level);

            let filled = (band.level.clamp(0.0, 1.0) * bar_h as f32).round() as u32;
            for y in (bar_h - filled)..bar_h {
                self.put(pixels, x, y, [r, g, b, 255]);
            }

            if band.peak > 0.0 {
                let peak_y = bar_h - 1 - ((band.peak.clamp(0.0, 1.0) * (bar_h - 1) as f32) as u32);
                self.put(pixels, x, peak_y, PEAK_MARKER);
            }
        }
    }

    fn draw_waterfall(&self, pixels: &mut [u8], history: &WaterfallHistory) {
        let top = self.bar_height();
        let area = self.height - top;
        let rows = history.rows() as u32;
        let cols = history.cols() as u32;

        for y in 0..area {
            let row = history.row(((y * rows) / area).min(rows - 1) as usize);
            for x in 0..self.width {
                let value = row[((x * cols) / self.width).min(cols - 1) as usize];
                let [r, g, b] = self.palette.map(value);
                self.put(pixels, x, top + y, [r, g, b, 255]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * width + x) * 4) as usize;
        [pixels[idx], pixels[idx + 1], pixels[idx + 2], pixels[idx + 3]]
    }

    #[test]
    fn buffer_matches_dimensions() {
        let renderer = FrameRenderer::new(64, 32, Palette::Heat);
        let history = WaterfallHistory::new(8, 4, -90.0, 0.0, 1.0).unwrap();
        let pixels = renderer.render(&[BandState::default(); 4], &history);
        assert_eq!(pixels.len(), 64 * 32 * 4);
    }

    #[test]
    fn full_bar_fills_column_and_empty_bar_does_not() {
        let renderer = FrameRenderer::new(20, 50, Palette::Grayscale);
        let history = WaterfallHistory::new(4, 2, -90.0, 0.0, 1.0).unwrap();
        let bands = [
            BandState { level: 1.0, peak: 1.0 },
            BandState { level: 0.0, peak: 0.0 },
        ];
        let pixels = renderer.render(&bands, &history);
        let bar_h = renderer.bar_height();

        // Left half is band 0 at full level: white all the way up.
        assert_eq!(pixel(&pixels, 20, 2, 1), [255, 255, 255, 255]);
        assert_eq!(pixel(&pixels, 20, 2, bar_h - 1), [255, 255, 255, 255]);
        // Right half is silent: background only.
        assert_eq!(pixel(&pixels, 20, 15, bar_h - 1), BACKGROUND);
    }

    #[test]
    fn peak_marker_sits_above_level() {
        let renderer = FrameRenderer::new(10, 100, Palette::Viridis);
        let history = WaterfallHistory::new(4, 1, -90.0, 0.0, 1.0).unwrap();
        let bands = [BandState { level: 0.25, peak: 0.75 }];
        let pixels = renderer.render(&bands, &history);
        let bar_h = renderer.bar_height();

        let peak_y = bar_h - 1 - (0.75 * (bar_h - 1) as f32) as u32;
        assert_eq!(pixel(&pixels, 10, 5, peak_y), PEAK_MARKER);
        assert_eq!(pixel(&pixels, 10, 5, peak_y + 1), BACKGROUND);
    }

    #[test]
    fn waterfall_shows_newest_row_on_top() {
        let renderer = FrameRenderer::new(8, 40, Palette::Grayscale);
        let mut history = WaterfallHistory::new(4, 2, -100.0, 0.0, 1.0).unwrap();
        history.push_db(&[0.0, -100.0], 0.1);

        let pixels = renderer.render(&[BandState::default(); 2], &history);
        let top = renderer.bar_height();
        assert_eq!(pixel(&pixels, 8, 0, top), [255, 255, 255, 255]);
        assert_eq!(pixel(&pixels, 8, 7, top), [0, 0, 0, 255]);
        // Older rows are still empty.
        assert_eq!(pixel(&pixels, 8, 0, 39), [0, 0, 0, 255]);
    }
}
