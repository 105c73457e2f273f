//! Fixed ramp transfer function for direct volume rendering.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use volray_core::{Error, Result, ValueRange};

/// Maps density to colour and opacity.
///
/// Densities below `low` are fully transparent. Between `low` and `high`
/// colour and opacity ramp linearly; above `high` they hold at the top of
/// the ramp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferFunction {
    pub low: f32,
    pub high: f32,
    pub color_low: Vec3,
    pub color_high: Vec3,
    /// Opacity at the top of the ramp, per unit of `reference_step`.
    pub max_opacity: f32,
    /// Step length the opacities are specified for.
    pub reference_step: f32,
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self {
            low: 0.3,
            high: 0.8,
            color_low: Vec3::new(0.1, 0.3, 0.9),
            color_high: Vec3::new(1.0, 0.9, 0.6),
            max_opacity: 0.15,
            reference_step: 0.5,
        }
    }
}

impl TransferFunction {
    /// Create a ramp over `[low, high]`.
    pub fn ramp(low: f32, high: f32) -> Result<Self> {
        let tf = Self {
            low,
            high,
            ..Self::default()
        };
        tf.validate()?;
        Ok(tf)
    }

    /// Check the ramp bounds and opacity.
    pub fn validate(&self) -> Result<()> {
        if !(self.low.is_finite() && self.high.is_finite()) || self.low >= self.high {
            return Err(Error::config(format!(
                "transfer ramp needs low < high, got [{}, {}]",
                self.low, self.high
            )));
        }
        if !(0.0..=1.0).contains(&self.max_opacity) {
            return Err(Error::config(format!(
                "max opacity must be in [0, 1], got {}",
                self.max_opacity
            )));
        }
        if !self.reference_step.is_finite() || self.reference_step <= 0.0 {
            return Err(Error::config(format!(
                "reference step must be positive, got {}",
                self.reference_step
            )));
        }
        Ok(())
    }

    /// Densities with non-zero opacity.
    #[inline]
    pub fn visible_range(&self) -> ValueRange {
        ValueRange::new(self.low, f32::MAX)
    }

    /// Colour and opacity for a density, at the reference step.
    pub fn classify(&self, density: f32) -> Vec4 {
        if density <= self.low {
            return Vec4::ZERO;
        }
        let t = ((density - self.low) / (self.high - self.low)).min(1.0);
        self.color_low.lerp(self.color_high, t).extend(t * self.max_opacity)
    }

    /// Opacity corrected for a step of length `step`.
    #[inline]
    pub fn corrected_alpha(&self, alpha: f32, step: f32) -> f32 {
        1.0 - (1.0 - alpha).powf(step / self.reference_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn transparent_below_low() {
        let tf = TransferFunction::default();
        assert_eq!(tf.classify(0.1).w, 0.0);
        assert_eq!(tf.classify(tf.low).w, 0.0);
        assert!(!tf.visible_range().contains(0.1));
    }

    #[test]
    fn ramp_saturates() {
        let tf = TransferFunction::default();
        assert_relative_eq!(tf.classify(0.9).w, tf.max_opacity);
        assert_relative_eq!(tf.classify(1.0).w, tf.classify(0.8).w);
    }

    #[test]
    fn opacity_correction_is_identity_at_reference_step() {
        let tf = TransferFunction::default();
        assert_relative_eq!(tf.corrected_alpha(0.2, tf.reference_step), 0.2, epsilon = 1e-6);
        assert!(tf.corrected_alpha(0.2, 2.0 * tf.reference_step) > 0.2);
    }

    #[test]
    fn rejects_inverted_ramp() {
        assert!(TransferFunction::ramp(0.8, 0.3).is_err());
        assert!(TransferFunction::ramp(0.2, 0.4).is_ok());
    }
}
