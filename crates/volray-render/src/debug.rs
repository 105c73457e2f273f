//! Debug visualisation modes.

use std::fmt;
use std::str::FromStr;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use volray_core::Error;

use crate::frame::PixelSample;

/// Debug visualization mode for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DebugMode {
    /// Normal rendering (default).
    #[default]
    None,
    /// Heatmap of density samples per pixel.
    TraversalSteps,
    /// Grey ramp of distance to the first surface or visible sample.
    Depth,
    /// Surface normals as RGB.
    Normals,
    /// Heatmap of blocks skipped per pixel.
    BlockOccupancy,
}

impl DebugMode {
    /// Cycle to the next debug mode.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::None => Self::TraversalSteps,
            Self::TraversalSteps => Self::Depth,
            Self::Depth => Self::Normals,
            Self::Normals => Self::BlockOccupancy,
            Self::BlockOccupancy => Self::None,
        }
    }

    /// Debug colour for a pixel, or `None` to keep the shaded colour.
    pub fn shade(self, sample: &PixelSample, scale: &DebugScale) -> Option<Vec3> {
        match self {
            Self::None => None,
            Self::TraversalSteps => Some(heat(sample.steps as f32 / scale.max_steps)),
            Self::Depth => {
                if sample.depth.is_finite() {
                    let span = (scale.far - scale.near).max(f32::EPSILON);
                    Some(Vec3::splat(1.0 - (sample.depth - scale.near) / span))
                } else {
                    Some(Vec3::ZERO)
                }
            }
            Self::Normals => Some(sample.normal * 0.5 + Vec3::splat(0.5)),
            Self::BlockOccupancy => Some(heat(sample.skipped as f32 / scale.max_skipped)),
        }
    }
}

impl fmt::Display for DebugMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::TraversalSteps => "steps",
            Self::Depth => "depth",
            Self::Normals => "normals",
            Self::BlockOccupancy => "blocks",
        };
        f.write_str(name)
    }
}

impl FromStr for DebugMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "steps" => Ok(Self::TraversalSteps),
            "depth" => Ok(Self::Depth),
            "normals" => Ok(Self::Normals),
            "blocks" => Ok(Self::BlockOccupancy),
            other => Err(Error::config(format!("unknown debug mode `{other}`"))),
        }
    }
}

/// Normalisation bounds for heatmaps, gathered over a whole frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebugScale {
    pub max_steps: f32,
    pub max_skipped: f32,
    pub near: f32,
    pub far: f32,
}

impl DebugScale {
    /// Scan a frame's samples.
    pub fn from_samples(samples: &[PixelSample]) -> Self {
        let mut scale = Self {
            max_steps: 1.0,
            max_skipped: 1.0,
            near: f32::INFINITY,
            far: 0.0,
        };
        for s in samples {
            scale.max_steps = scale.max_steps.max(s.steps as f32);
            scale.max_skipped = scale.max_skipped.max(s.skipped as f32);
            if s.depth.is_finite() {
                scale.near = scale.near.min(s.depth);
                scale.far = scale.far.max(s.depth);
            }
        }
        if !scale.near.is_finite() {
            scale.near = 0.0;
        }
        scale
    }
}

/// Blue to green to red ramp over `[0, 1]`.
pub fn heat(t: f32) -> Vec3 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        Vec3::new(0.0, 2.0 * t, 1.0 - 2.0 * t)
    } else {
        Vec3::new(2.0 * t - 1.0, 2.0 - 2.0 * t, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_returns_to_none() {
        let mut mode = DebugMode::None;
        for _ in 0..5 {
            mode = mode.next();
        }
        assert_eq!(mode, DebugMode::None);
    }

    #[test]
    fn parse_roundtrip() {
        for mode in [
            DebugMode::None,
            DebugMode::TraversalSteps,
            DebugMode::Depth,
            DebugMode::Normals,
            DebugMode::BlockOccupancy,
        ] {
            assert_eq!(mode.to_string().parse::<DebugMode>().unwrap(), mode);
        }
        assert!("wireframe".parse::<DebugMode>().is_err());
    }

    #[test]
    fn heat_endpoints() {
        assert_eq!(heat(0.0), Vec3::Z);
        assert_eq!(heat(1.0), Vec3::X);
        assert_eq!(heat(0.5), Vec3::Y);
    }

    #[test]
    fn misses_are_black_in_depth_mode() {
        let scale = DebugScale::from_samples(&[PixelSample::MISS]);
        assert_eq!(DebugMode::Depth.shade(&PixelSample::MISS, &scale), Some(Vec3::ZERO));
        assert_eq!(DebugMode::None.shade(&PixelSample::MISS, &scale), None);
    }
}
