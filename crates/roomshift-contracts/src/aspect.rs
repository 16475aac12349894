use std::fmt;

use serde::{Deserialize, Serialize};

/// Aspect ratios the generation capability accepts as a target hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
}

/// Iteration order matters: on equal distance the earlier entry wins.
pub const SUPPORTED_ASPECT_RATIOS: [AspectRatio; 5] = [
    AspectRatio::Square,
    AspectRatio::Portrait3x4,
    AspectRatio::Landscape4x3,
    AspectRatio::Portrait9x16,
    AspectRatio::Landscape16x9,
];

impl AspectRatio {
    pub fn label(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Self::Square => 1.0,
            Self::Portrait3x4 => 0.75,
            Self::Landscape4x3 => 1.333,
            Self::Portrait9x16 => 0.5625,
            Self::Landscape16x9 => 1.778,
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim();
        SUPPORTED_ASPECT_RATIOS
            .into_iter()
            .find(|candidate| candidate.label() == normalized)
    }

    /// Snaps `ratio` (width / height) to the supported label with the
    /// smallest absolute difference. Non-finite or non-positive input maps
    /// to `1:1`.
    pub fn nearest(ratio: f64) -> Self {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Self::Square;
        }
        let mut best = Self::Square;
        let mut best_delta = f64::MAX;
        for candidate in SUPPORTED_ASPECT_RATIOS {
            let delta = (candidate.value() - ratio).abs();
            if delta < best_delta {
                best = candidate;
                best_delta = delta;
            }
        }
        best
    }

    pub fn from_dimensions(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self::nearest(f64::from(width) / f64::from(height)))
    }

    /// Pixel dimensions with the given long edge, rounded to even numbers.
    pub fn dimensions_for_long_edge(self, long_edge: u32) -> (u32, u32) {
        let long_edge = long_edge.max(2);
        let value = self.value();
        let short = |scale: f64| -> u32 {
            let raw = (f64::from(long_edge) * scale).round() as u32;
            (raw.max(2) / 2) * 2
        };
        if value >= 1.0 {
            (long_edge, short(1.0 / value))
        } else {
            (short(value), long_edge)
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
