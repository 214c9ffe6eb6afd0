use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::dsp::pitch;
use crate::dsp::spectrum::{BandLayout, MIN_FFT_SIZE};
use crate::error::{ConfigError, MAX_WIRE_PAYLOAD};
use crate::protocol::packet::DEFAULT_MAX_PAYLOAD;
use crate::render::palette::Palette;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub pitch: PitchConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Raw,
    Quadratic,
    Perceptual,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_layout")]
    pub layout: LayoutKind,
    #[serde(default = "default_bands")]
    pub bands: usize,
    #[serde(default = "default_min_hz")]
    pub min_hz: f32,
    #[serde(default = "default_max_hz")]
    pub max_hz: f32,
    #[serde(default = "default_min_db")]
    pub min_db: f32,
    #[serde(default = "default_max_db")]
    pub max_db: f32,
    /// Level fall rate in dB per second.
    #[serde(default = "default_level_decay")]
    pub level_decay_db: f32,
    /// Peak marker fall rate in dB per second.
    #[serde(default = "default_peak_decay")]
    pub peak_decay_db: f32,
    #[serde(default = "default_history_rows")]
    pub history_rows: usize,
    #[serde(default = "default_gamma")]
    pub gamma: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PitchConfig {
    #[serde(default = "default_pitch_min_hz")]
    pub min_hz: f64,
    #[serde(default = "default_pitch_max_hz")]
    pub max_hz: f64,
    #[serde(default = "default_pitch_min_samples")]
    pub min_samples: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Rate the firmware samples at; the wire format does not carry it.
    #[serde(default = "default_serial_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_verify_crc")]
    pub verify_crc: bool,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub palette: Palette,
    #[serde(default = "default_codec")]
    pub codec: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            layout: default_layout(),
            bands: default_bands(),
            min_hz: default_min_hz(),
            max_hz: default_max_hz(),
            min_db: default_min_db(),
            max_db: default_max_db(),
            level_decay_db: default_level_decay(),
            peak_decay_db: default_peak_decay(),
            history_rows: default_history_rows(),
            gamma: default_gamma(),
        }
    }
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            min_hz: default_pitch_min_hz(),
            max_hz: default_pitch_max_hz(),
            min_samples: default_pitch_min_samples(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_serial_rate(),
            verify_crc: default_verify_crc(),
            max_payload: default_max_payload(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            palette: Palette::default(),
            codec: default_codec(),
        }
    }
}

fn default_fft_size() -> usize { 2048 }
fn default_layout() -> LayoutKind { LayoutKind::Quadratic }
fn default_bands() -> usize { 64 }
fn default_min_hz() -> f32 { 20.0 }
fn default_max_hz() -> f32 { 8000.0 }
fn default_min_db() -> f32 { -90.0 }
fn default_max_db() -> f32 { 0.0 }
fn default_level_decay() -> f32 { 60.0 }
fn default_peak_decay() -> f32 { 15.0 }
fn default_history_rows() -> usize { 128 }
fn default_gamma() -> f32 { 0.8 }
fn default_pitch_min_hz() -> f64 { 60.0 }
fn default_pitch_max_hz() -> f64 { 1500.0 }
fn default_pitch_min_samples() -> usize { pitch::MIN_SAMPLES }
fn default_serial_rate() -> u32 { 16_000 }
fn default_verify_crc() -> bool { true }
fn default_max_payload() -> usize { DEFAULT_MAX_PAYLOAD }
fn default_block_size() -> usize { 1024 }
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_fps() -> u32 { 30 }
fn default_codec() -> String { "libx264".into() }

impl AnalysisConfig {
    pub fn band_layout(&self) -> BandLayout {
        match self.layout {
            LayoutKind::Raw => BandLayout::Raw,
            LayoutKind::Quadratic => BandLayout::Quadratic {
                bands: self.bands,
                min_hz: self.min_hz,
                max_hz: self.max_hz,
            },
            LayoutKind::Perceptual => BandLayout::Perceptual,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fft_size < MIN_FFT_SIZE {
            return Err(ConfigError::FftSizeTooSmall {
                size: self.fft_size,
                min: MIN_FFT_SIZE,
            });
        }
        if !self.fft_size.is_power_of_two() {
            return Err(ConfigError::FftSizeNotPowerOfTwo(self.fft_size));
        }
        if self.layout == LayoutKind::Quadratic {
            if self.bands == 0 {
                return Err(ConfigError::Zero("analysis.bands"));
            }
            if !(self.min_hz >= 0.0 && self.max_hz > self.min_hz) {
                return Err(ConfigError::FrequencyRange {
                    name: "analysis",
                    min: self.min_hz,
                    max: self.max_hz,
                });
            }
        }
        if !(self.min_db < self.max_db) {
            return Err(ConfigError::DbRange {
                floor: self.min_db,
                ceiling: self.max_db,
            });
        }
        if self.level_decay_db < 0.0 {
            return Err(ConfigError::Negative {
                name: "analysis.level_decay_db",
                value: self.level_decay_db,
            });
        }
        if self.peak_decay_db < 0.0 {
            return Err(ConfigError::Negative {
                name: "analysis.peak_decay_db",
                value: self.peak_decay_db,
            });
        }
        if self.history_rows == 0 {
            return Err(ConfigError::Zero("analysis.history_rows"));
        }
        if !(self.gamma > 0.0 && self.gamma.is_finite()) {
            return Err(ConfigError::Gamma(self.gamma));
        }
        Ok(())
    }
}

impl PitchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_hz > 0.0 && self.max_hz > self.min_hz) {
            return Err(ConfigError::FrequencyRange {
                name: "pitch",
                min: self.min_hz as f32,
                max: self.max_hz as f32,
            });
        }
        if self.min_samples == 0 {
            return Err(ConfigError::Zero("pitch.min_samples"));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()?;
        self.pitch.validate()?;
        if self.serial.sample_rate == 0 {
            return Err(ConfigError::Zero("serial.sample_rate"));
        }
        if self.serial.max_payload == 0 {
            return Err(ConfigError::Zero("serial.max_payload"));
        }
        if self.serial.max_payload > MAX_WIRE_PAYLOAD || self.serial.max_payload % 2 != 0 {
            return Err(ConfigError::PayloadLimit(self.serial.max_payload));
        }
        if self.capture.block_size == 0 {
            return Err(ConfigError::Zero("capture.block_size"));
        }
        if self.render.fps == 0 {
            return Err(ConfigError::Zero("render.fps"));
        }
        Ok(())
    }
}

/// Explicit path first, then `./pcmscope.toml`, then the per-user config.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("pcmscope.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("pcmscope").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("pcmscope").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.analysis.fft_size, 2048);
        assert_eq!(cfg.serial.sample_rate, 16_000);
        assert!(cfg.serial.verify_crc);
        assert_eq!(cfg.render.palette, Palette::Heat);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_config(
            r#"
            [analysis]
            fft_size = 1024
            layout = "perceptual"

            [serial]
            verify_crc = false

            [render]
            palette = "viridis"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.analysis.fft_size, 1024);
        assert_eq!(cfg.analysis.layout, LayoutKind::Perceptual);
        assert_eq!(cfg.analysis.bands, 64);
        assert!(!cfg.serial.verify_crc);
        assert_eq!(cfg.render.palette, Palette::Viridis);
        assert_eq!(cfg.analysis.band_layout(), BandLayout::Perceptual);
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        let cfg = AnalysisConfig {
            fft_size: 1000,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::FftSizeNotPowerOfTwo(1000)));
    }

    #[test]
    fn rejects_inverted_db_range() {
        let cfg = AnalysisConfig {
            min_db: 0.0,
            max_db: -10.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::DbRange { .. })));
    }

    #[test]
    fn rejects_zero_thresholds() {
        let pitch = PitchConfig {
            min_samples: 0,
            ..Default::default()
        };
        assert_eq!(pitch.validate(), Err(ConfigError::Zero("pitch.min_samples")));

        let mut cfg = Config::default();
        cfg.capture.block_size = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("capture.block_size")));
    }

    #[test]
    fn max_payload_must_fit_the_length_field() {
        let cfg = parse_config("[serial]\nmax_payload = 100000").unwrap();
        assert_eq!(cfg.validate(), Err(ConfigError::PayloadLimit(100_000)));

        let mut cfg = Config::default();
        cfg.serial.max_payload = 1001;
        assert_eq!(cfg.validate(), Err(ConfigError::PayloadLimit(1001)));

        cfg.serial.max_payload = MAX_WIRE_PAYLOAD;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(parse_config("[analysis]\nfft_size = \"big\"").is_err());
    }
}
