use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;
use crate::grid::{Frame, Grid};

pub type Rgb = [u8; 3];

const LUT_SIZE: usize = 256;

/// Named perceptual colour gradients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gradient {
    #[default]
    Inferno,
    Magma,
    Plasma,
    Viridis,
    Grayscale,
}

impl Gradient {
    pub const ALL: [Gradient; 5] = [
        Gradient::Inferno,
        Gradient::Magma,
        Gradient::Plasma,
        Gradient::Viridis,
        Gradient::Grayscale,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Gradient::Inferno => "inferno",
            Gradient::Magma => "magma",
            Gradient::Plasma => "plasma",
            Gradient::Viridis => "viridis",
            Gradient::Grayscale => "grayscale",
        }
    }

    pub fn next(self) -> Gradient {
        let idx = Self::ALL.iter().position(|g| *g == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    // Evenly spaced stops sampled from the matplotlib maps.
    fn stops(self) -> &'static [Rgb; 9] {
        match self {
            Gradient::Inferno => &[
                [0, 0, 4],
                [31, 12, 72],
                [85, 15, 109],
                [136, 34, 106],
                [186, 54, 85],
                [227, 89, 51],
                [249, 140, 10],
                [249, 201, 50],
                [252, 255, 164],
            ],
            Gradient::Magma => &[
                [0, 0, 4],
                [28, 16, 68],
                [79, 18, 123],
                [129, 37, 129],
                [181, 54, 122],
                [229, 80, 100],
                [251, 135, 97],
                [254, 194, 135],
                [252, 253, 191],
            ],
            Gradient::Plasma => &[
                [13, 8, 135],
                [75, 3, 161],
                [125, 3, 168],
                [168, 34, 150],
                [203, 70, 121],
                [229, 107, 93],
                [248, 148, 65],
                [253, 195, 40],
                [240, 249, 33],
            ],
            Gradient::Viridis => &[
                [68, 1, 84],
                [71, 44, 122],
                [59, 82, 139],
                [44, 114, 142],
                [33, 145, 140],
                [40, 174, 128],
                [94, 201, 98],
                [170, 220, 50],
                [253, 231, 37],
            ],
            Gradient::Grayscale => &[
                [0, 0, 0],
                [32, 32, 32],
                [64, 64, 64],
                [96, 96, 96],
                [128, 128, 128],
                [159, 159, 159],
                [191, 191, 191],
                [223, 223, 223],
                [255, 255, 255],
            ],
        }
    }

    /// Colour for a normalized value, interpolated between stops.
    pub fn sample(self, t: f32) -> Rgb {
        let stops = self.stops();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let pos = t * (stops.len() - 1) as f32;
        let lo = (pos.floor() as usize).min(stops.len() - 2);
        let frac = pos - lo as f32;
        let (a, b) = (stops[lo], stops[lo + 1]);
        let mix = |i: usize| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * frac).round() as u8;
        [mix(0), mix(1), mix(2)]
    }

    pub fn lookup_table(self) -> Vec<Rgb> {
        (0..LUT_SIZE)
            .map(|i| self.sample(i as f32 / (LUT_SIZE - 1) as f32))
            .collect()
    }
}

impl fmt::Display for Gradient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejects ranges that would divide by zero.
pub fn check_range(vmin: f32, vmax: f32) -> Result<(), ConfigError> {
    if vmin.is_finite() && vmax.is_finite() && vmax > vmin {
        Ok(())
    } else {
        Err(ConfigError::DegenerateRange {
            min: vmin,
            max: vmax,
        })
    }
}

/// Scales readings into `[0, 1]`. An empty range falls back to a span of one.
pub fn normalize(frame: &Frame, vmin: f32, vmax: f32) -> Grid<f32> {
    let (vmin, vmax) = match check_range(vmin, vmax) {
        Ok(()) => (vmin, vmax),
        Err(e) => {
            tracing::trace!(error = %e, "substituting unit span");
            let vmin = if vmin.is_finite() { vmin } else { 0.0 };
            (vmin, vmin + 1.0)
        }
    };
    let span = vmax - vmin;
    frame.map(|&v| ((v as f32 - vmin) / span).clamp(0.0, 1.0))
}

pub fn colorize(normalized: &Grid<f32>, gradient: Gradient) -> Grid<Rgb> {
    let lut = gradient.lookup_table();
    let last = (LUT_SIZE - 1) as f32;
    normalized.map(|&t| {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        lut[(t * last).round() as usize]
    })
}
