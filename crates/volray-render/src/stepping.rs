//! Adaptive step selection.
//!
//! The controller is stateless: each call looks at one density sample and
//! the range of the block it was taken in, and decides how far to advance.

use serde::{Deserialize, Serialize};
use volray_core::constants::DENSITY_EPSILON;
use volray_core::{Error, Result, ValueRange};
use volray_volume::BlockRange;

/// Thresholds governing adaptive stepping.
///
/// Steps are in world units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSteppingPolicy")]
pub struct SteppingPolicy {
    target: f32,
    small_step: f32,
    large_step: f32,
    transition_range: f32,
}

/// Unchecked wire form; deserialized policies pass through
/// [`SteppingPolicy::new`].
#[derive(Deserialize)]
struct RawSteppingPolicy {
    target: f32,
    small_step: f32,
    large_step: f32,
    transition_range: f32,
}

impl TryFrom<RawSteppingPolicy> for SteppingPolicy {
    type Error = Error;

    fn try_from(raw: RawSteppingPolicy) -> Result<Self> {
        Self::new(raw.target, raw.small_step, raw.large_step, raw.transition_range)
    }
}

impl Default for SteppingPolicy {
    fn default() -> Self {
        Self {
            target: 0.5,
            small_step: 0.05,
            large_step: 1.0,
            transition_range: 0.1,
        }
    }
}

impl SteppingPolicy {
    /// Create a validated policy.
    pub fn new(target: f32, small_step: f32, large_step: f32, transition_range: f32) -> Result<Self> {
        let policy = Self {
            target,
            small_step,
            large_step,
            transition_range,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check every threshold. Values are never clamped.
    pub fn validate(&self) -> Result<()> {
        if !self.target.is_finite() {
            return Err(Error::config(format!("target value must be finite, got {}", self.target)));
        }
        if !self.small_step.is_finite() || self.small_step <= 0.0 {
            return Err(Error::config(format!(
                "small step must be positive, got {}",
                self.small_step
            )));
        }
        if !self.large_step.is_finite() || self.large_step <= 0.0 {
            return Err(Error::config(format!(
                "large step must be positive, got {}",
                self.large_step
            )));
        }
        if !self.transition_range.is_finite() || self.transition_range < 0.0 {
            return Err(Error::config(format!(
                "transition range must be non-negative, got {}",
                self.transition_range
            )));
        }
        Ok(())
    }

    /// Target isovalue.
    #[inline]
    pub const fn target(&self) -> f32 {
        self.target
    }

    /// Step used near the feature.
    #[inline]
    pub const fn small_step(&self) -> f32 {
        self.small_step
    }

    /// Step used away from the feature.
    #[inline]
    pub const fn large_step(&self) -> f32 {
        self.large_step
    }

    /// Half width of the fine-stepping band around the target.
    #[inline]
    pub const fn transition_range(&self) -> f32 {
        self.transition_range
    }

    /// `[target - range, target + range]`.
    #[inline]
    pub fn feature_range(&self) -> ValueRange {
        ValueRange::around(self.target, self.transition_range)
    }

    /// Return a copy with a new target.
    pub fn with_target(mut self, target: f32) -> Result<Self> {
        self.set_target(target)?;
        Ok(self)
    }

    /// Return a copy with new step sizes.
    pub fn with_steps(mut self, small_step: f32, large_step: f32) -> Result<Self> {
        self.set_small_step(small_step)?;
        self.set_large_step(large_step)?;
        Ok(self)
    }

    /// Return a copy with a new transition range.
    pub fn with_transition_range(mut self, range: f32) -> Result<Self> {
        self.set_transition_range(range)?;
        Ok(self)
    }

    /// Set the target. The policy is unchanged on error.
    pub fn set_target(&mut self, target: f32) -> Result<()> {
        self.update(|p| p.target = target)
    }

    /// Set the small step. The policy is unchanged on error.
    pub fn set_small_step(&mut self, step: f32) -> Result<()> {
        self.update(|p| p.small_step = step)
    }

    /// Set the large step. The policy is unchanged on error.
    pub fn set_large_step(&mut self, step: f32) -> Result<()> {
        self.update(|p| p.large_step = step)
    }

    /// Set the transition range. The policy is unchanged on error.
    pub fn set_transition_range(&mut self, range: f32) -> Result<()> {
        self.update(|p| p.transition_range = range)
    }

    fn update(&mut self, f: impl FnOnce(&mut Self)) -> Result<()> {
        let mut next = *self;
        f(&mut next);
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// What the marcher should do after a sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepDecision {
    /// Advance by the small step.
    Fine(f32),
    /// Advance by the large step.
    Coarse(f32),
    /// The block cannot hold the feature; jump to its exit.
    SkipBlock,
}

impl StepDecision {
    /// Distance to advance, or `None` for a skip.
    #[inline]
    pub const fn step(self) -> Option<f32> {
        match self {
            Self::Fine(s) | Self::Coarse(s) => Some(s),
            Self::SkipBlock => None,
        }
    }
}

/// Choose the next step for isosurface marching.
///
/// Densities within `transition_range` of the target (boundary included)
/// step finely. Otherwise a block whose range misses the feature band is
/// skipped, and any other block is crossed with the large step.
pub fn choose_step(policy: &SteppingPolicy, density: f32, block: BlockRange) -> StepDecision {
    let near = (density - policy.target).abs() <= policy.transition_range + DENSITY_EPSILON;
    decide(policy, near, &policy.feature_range(), block)
}

/// Choose the next step against an explicit feature band.
///
/// Used by direct volume rendering, where the band is the transfer
/// function's visible density interval.
pub fn choose_step_in_band(
    policy: &SteppingPolicy,
    density: f32,
    band: &ValueRange,
    block: BlockRange,
) -> StepDecision {
    let near = band.widened(DENSITY_EPSILON).contains(density);
    decide(policy, near, band, block)
}

#[inline]
fn decide(policy: &SteppingPolicy, near: bool, band: &ValueRange, block: BlockRange) -> StepDecision {
    if near {
        StepDecision::Fine(policy.small_step)
    } else if !block.overlaps(band) {
        StepDecision::SkipBlock
    } else {
        StepDecision::Coarse(policy.large_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SteppingPolicy {
        SteppingPolicy::new(0.5, 0.05, 1.0, 0.1).unwrap()
    }

    #[test]
    fn fine_inside_transition_range() {
        let d = choose_step(&policy(), 0.55, BlockRange::new(0.0, 1.0));
        assert_eq!(d, StepDecision::Fine(0.05));
    }

    #[test]
    fn boundary_favours_fine() {
        let d = choose_step(&policy(), 0.6, BlockRange::new(0.0, 1.0));
        assert_eq!(d, StepDecision::Fine(0.05));
        let d = choose_step(&policy(), 0.4, BlockRange::new(0.0, 1.0));
        assert_eq!(d, StepDecision::Fine(0.05));
    }

    #[test]
    fn skip_when_block_misses_band() {
        let d = choose_step(&policy(), 0.9, BlockRange::new(0.0, 0.3));
        assert_eq!(d, StepDecision::SkipBlock);
    }

    #[test]
    fn coarse_when_block_may_hold_feature() {
        let d = choose_step(&policy(), 0.9, BlockRange::new(0.0, 1.0));
        assert_eq!(d, StepDecision::Coarse(1.0));
    }

    #[test]
    fn empty_block_is_skipped() {
        let d = choose_step(&policy(), 0.0, BlockRange::EMPTY);
        assert_eq!(d, StepDecision::SkipBlock);
    }

    #[test]
    fn band_variant() {
        let band = ValueRange::new(0.3, 2.0);
        let p = policy();
        assert_eq!(choose_step_in_band(&p, 0.3, &band, BlockRange::new(0.0, 1.0)), StepDecision::Fine(0.05));
        assert_eq!(choose_step_in_band(&p, 0.1, &band, BlockRange::new(0.0, 0.2)), StepDecision::SkipBlock);
        assert_eq!(choose_step_in_band(&p, 0.1, &band, BlockRange::new(0.0, 0.5)), StepDecision::Coarse(1.0));
    }

    #[test]
    fn rejects_invalid_policies() {
        assert!(SteppingPolicy::new(0.5, -1.0, 1.0, 0.1).unwrap_err().is_configuration());
        assert!(SteppingPolicy::new(0.5, 0.05, 0.0, 0.1).unwrap_err().is_configuration());
        assert!(SteppingPolicy::new(0.5, 0.05, 1.0, -0.1).is_err());
        assert!(SteppingPolicy::new(f32::NAN, 0.05, 1.0, 0.1).is_err());
        assert!(SteppingPolicy::new(0.5, f32::INFINITY, 1.0, 0.1).is_err());
    }

    #[test]
    fn failed_setter_keeps_policy() {
        let mut p = policy();
        assert!(p.set_small_step(0.0).is_err());
        assert_eq!(p, policy());
        p.set_large_step(2.0).unwrap();
        assert_eq!(p.large_step(), 2.0);
    }

    #[test]
    fn zero_range_still_accepted() {
        let p = SteppingPolicy::new(0.5, 0.05, 1.0, 0.0).unwrap();
        assert_eq!(choose_step(&p, 0.5, BlockRange::new(0.0, 1.0)), StepDecision::Fine(0.05));
    }

    #[test]
    fn deserialized_policy_is_validated() {
        let bytes = bincode::serialize(&policy()).unwrap();
        assert_eq!(bincode::deserialize::<SteppingPolicy>(&bytes).unwrap(), policy());

        let zero_small = bincode::serialize(&(0.5f32, 0.0f32, 1.0f32, 0.1f32)).unwrap();
        assert!(bincode::deserialize::<SteppingPolicy>(&zero_small).is_err());

        let negative_range = bincode::serialize(&(0.5f32, 0.05f32, 1.0f32, -1.0f32)).unwrap();
        assert!(bincode::deserialize::<SteppingPolicy>(&negative_range).is_err());
    }
}
