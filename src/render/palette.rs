use serde::Deserialize;

/// Colormaps for normalized magnitudes. Stateless; everything goes
/// through [`Palette::map`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Palette {
    Grayscale,
    #[default]
    Heat,
    Viridis,
}

const GRAYSCALE: [[u8; 3]; 2] = [[0, 0, 0], [255, 255, 255]];

const HEAT: [[u8; 3]; 5] = [
    [0, 0, 0],
    [120, 0, 10],
    [230, 80, 0],
    [255, 210, 40],
    [255, 255, 255],
];

const VIRIDIS: [[u8; 3]; 5] = [
    [68, 1, 84],
    [59, 82, 139],
    [33, 145, 140],
    [94, 201, 98],
    [253, 231, 37],
];

impl Palette {
    /// Color for `value` in `[0, 1]`; out-of-range input is clamped and NaN
    /// maps to the bottom of the scale.
    pub fn map(self, value: f32) -> [u8; 3] {
        let stops: &[[u8; 3]] = match self {
            Palette::Grayscale => &GRAYSCALE,
            Palette::Heat => &HEAT,
            Palette::Viridis => &VIRIDIS,
        };
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };

        let scaled = value * (stops.len() - 1) as f32;
        let index = (scaled.floor() as usize).min(stops.len() - 2);
        let t = scaled - index as f32;
        let (a, b) = (stops[index], stops[index + 1]);

        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = (a[c] as f32 + (b[c] as f32 - a[c] as f32) * t).round() as u8;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_match_first_and_last_stop() {
        assert_eq!(Palette::Grayscale.map(0.0), [0, 0, 0]);
        assert_eq!(Palette::Grayscale.map(1.0), [255, 255, 255]);
        assert_eq!(Palette::Heat.map(1.0), [255, 255, 255]);
        assert_eq!(Palette::Viridis.map(0.0), [68, 1, 84]);
        assert_eq!(Palette::Viridis.map(1.0), [253, 231, 37]);
    }

    #[test]
    fn interpolates_between_stops() {
        assert_eq!(Palette::Grayscale.map(0.5), [128, 128, 128]);
        assert_eq!(Palette::Heat.map(0.25), HEAT[1]);
    }

    #[test]
    fn clamps_out_of_range_and_nan() {
        assert_eq!(Palette::Heat.map(-3.0), Palette::Heat.map(0.0));
        assert_eq!(Palette::Heat.map(7.0), Palette::Heat.map(1.0));
        assert_eq!(Palette::Viridis.map(f32::NAN), VIRIDIS[0]);
    }

    #[test]
    fn grayscale_is_monotonic() {
        let mut last = 0u8;
        for i in 0..=100 {
            let [r, _, _] = Palette::Grayscale.map(i as f32 / 100.0);
            assert!(r >= last);
            last = r;
        }
    }
}
