//! Per-ray traversal loops.
//!
//! Every loop samples at the current ray parameter, asks the step controller
//! how far to go next, and advances. Each advance is strictly positive, so
//! samples along a ray are visited in increasing `t` and never revisited.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use volray_core::{BlockCoord, Ray, ValueRange};
use volray_volume::{AccelerationStructure, BlockRange, VoxelSampler};

use crate::stepping::{choose_step, choose_step_in_band, StepDecision, SteppingPolicy};
use crate::transfer::TransferFunction;

/// Accumulated opacity at which compositing stops.
pub const OPACITY_SATURATION: f32 = 0.99;

/// How densities are reconstructed between voxels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFilter {
    Nearest,
    #[default]
    Trilinear,
}

/// Per-ray options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarchParams {
    /// Upper bound on samples per ray.
    pub max_steps: u32,
    pub filter: SampleFilter,
    /// Skip through coarser pyramid levels when possible.
    pub hierarchical: bool,
}

impl Default for MarchParams {
    fn default() -> Self {
        Self {
            max_steps: 4096,
            filter: SampleFilter::Trilinear,
            hierarchical: true,
        }
    }
}

/// Everything a traversal needs that is shared across rays of a frame.
#[derive(Clone, Copy)]
pub struct MarchContext<'a> {
    pub sampler: VoxelSampler<'a>,
    pub accel: &'a AccelerationStructure,
    pub policy: &'a SteppingPolicy,
    pub params: MarchParams,
}

impl MarchContext<'_> {
    #[inline]
    fn density(&self, p: Vec3) -> f32 {
        match self.params.filter {
            SampleFilter::Nearest => self.sampler.nearest(p),
            SampleFilter::Trilinear => self.sampler.trilinear(p),
        }
    }
}

/// State of one in-flight ray.
#[derive(Clone, Copy, Debug)]
pub struct RayState {
    pub t: f32,
    pub position: Vec3,
    /// Samples taken so far.
    pub steps: u32,
    /// Accumulated opacity (direct volume rendering only).
    pub opacity: f32,
    /// Block holding the current sample.
    pub block: BlockCoord,
    /// Step chosen after the current sample.
    pub step: f32,
}

impl RayState {
    fn enter(ray: &Ray, t_near: f32) -> Self {
        Self {
            t: t_near,
            position: ray.at(t_near),
            steps: 0,
            opacity: 0.0,
            block: BlockCoord::default(),
            step: 0.0,
        }
    }
}

/// Counters gathered along one ray.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    /// Density samples taken.
    pub samples: u32,
    /// Block skips performed.
    pub skipped_blocks: u32,
    /// Set when the ray stopped on `max_steps`.
    pub exhausted: bool,
}

/// A located isosurface crossing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceHit {
    pub t: f32,
    pub position: Vec3,
    /// Unit normal pointing towards lower density.
    pub normal: Vec3,
}

/// Front-to-back composited colour.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Composite {
    /// Premultiplied colour and accumulated opacity.
    pub color: Vec4,
    /// Ray parameter of the first visible sample.
    pub first_visible: Option<f32>,
    /// Set when opacity reached [`OPACITY_SATURATION`].
    pub saturated: bool,
}

/// How a ray ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TraversalOutcome {
    Hit(SurfaceHit),
    Miss,
    Composite(Composite),
}

/// Outcome plus counters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayResult {
    pub outcome: TraversalOutcome,
    pub stats: TraversalStats,
}

fn surface_hit(ctx: &MarchContext<'_>, ray: &Ray, prev: (f32, f32), cur: (f32, f32)) -> SurfaceHit {
    let target = ctx.policy.target();
    let (t0, d0) = prev;
    let (t1, d1) = cur;
    let s = ((target - d0) / (d1 - d0)).clamp(0.0, 1.0);
    let t = t0 + s * (t1 - t0);
    let position = ray.at(t);
    let normal = -ctx.sampler.gradient(position).normalize_or_zero();
    SurfaceHit { t, position, normal }
}

/// Adaptive isosurface marching over `[t_near, t_far]`.
pub fn march_isosurface(ctx: &MarchContext<'_>, ray: &Ray, t_near: f32, t_far: f32) -> RayResult {
    march_isosurface_with(ctx, ray, t_near, t_far, |_, _| {})
}

/// [`march_isosurface`] with a callback receiving each sample's state and
/// density.
pub fn march_isosurface_with(
    ctx: &MarchContext<'_>,
    ray: &Ray,
    t_near: f32,
    t_far: f32,
    mut observe: impl FnMut(&RayState, f32),
) -> RayResult {
    let policy = ctx.policy;
    let target = policy.target();
    let query = policy.feature_range();
    let mut state = RayState::enter(ray, t_near);
    let mut stats = TraversalStats::default();
    let mut prev: Option<(f32, f32)> = None;

    while state.t <= t_far {
        if state.steps >= ctx.params.max_steps {
            stats.exhausted = true;
            break;
        }

        state.position = ray.at(state.t);
        let density = ctx.density(state.position);
        state.steps += 1;
        stats.samples += 1;

        if let Some((t0, d0)) = prev {
            if (d0 >= target) != (density >= target) {
                let hit = surface_hit(ctx, ray, (t0, d0), (state.t, density));
                observe(&state, density);
                return RayResult {
                    outcome: TraversalOutcome::Hit(hit),
                    stats,
                };
            }
        }
        prev = Some((state.t, density));

        state.block = ctx.accel.block_at_world(state.position);
        let range = ctx.accel.range(state.block).unwrap_or(BlockRange::EMPTY);
        let decision = choose_step(policy, density, range);
        let next = advance(ctx, ray, &state, &query, decision, &mut stats);
        state.step = next - state.t;
        observe(&state, density);
        state.t = next;
    }

    RayResult {
        outcome: TraversalOutcome::Miss,
        stats,
    }
}

/// Ray parameter after applying a step decision. Always greater than `state.t`.
#[inline]
fn advance(
    ctx: &MarchContext<'_>,
    ray: &Ray,
    state: &RayState,
    query: &ValueRange,
    decision: StepDecision,
    stats: &mut TraversalStats,
) -> f32 {
    match decision {
        StepDecision::Fine(step) | StepDecision::Coarse(step) => state.t + step,
        StepDecision::SkipBlock => {
            match ctx
                .accel
                .skip_exit(ray, state.t, query, ctx.params.hierarchical)
            {
                Some(exit) => {
                    stats.skipped_blocks += 1;
                    exit
                }
                // The box test can miss on a grazing ray; fall back to a plain step.
                None => state.t + ctx.policy.large_step(),
            }
        }
    }
}

/// Fixed-step isosurface marching with no skipping.
///
/// This is the unaccelerated baseline the adaptive marcher is compared to.
pub fn march_reference(
    ctx: &MarchContext<'_>,
    ray: &Ray,
    t_near: f32,
    t_far: f32,
    step: f32,
) -> RayResult {
    let target = ctx.policy.target();
    let mut stats = TraversalStats::default();
    let mut prev: Option<(f32, f32)> = None;
    let mut t = t_near;

    while t <= t_far {
        if stats.samples >= ctx.params.max_steps {
            stats.exhausted = true;
            break;
        }
        let density = ctx.density(ray.at(t));
        stats.samples += 1;

        if let Some((t0, d0)) = prev {
            if (d0 >= target) != (density >= target) {
                return RayResult {
                    outcome: TraversalOutcome::Hit(surface_hit(ctx, ray, (t0, d0), (t, density))),
                    stats,
                };
            }
        }
        prev = Some((t, density));
        t += step;
    }

    RayResult {
        outcome: TraversalOutcome::Miss,
        stats,
    }
}

/// Adaptive front-to-back compositing through a transfer function.
///
/// Fine steps are taken inside the visible density band; blocks that hold
/// no visible density are skipped.
pub fn march_dvr(
    ctx: &MarchContext<'_>,
    transfer: &TransferFunction,
    ray: &Ray,
    t_near: f32,
    t_far: f32,
) -> RayResult {
    let policy = ctx.policy;
    let band = transfer.visible_range();
    let mut state = RayState::enter(ray, t_near);
    let mut stats = TraversalStats::default();
    let mut color = Vec4::ZERO;
    let mut first_visible = None;
    let mut saturated = false;

    while state.t <= t_far {
        if state.steps >= ctx.params.max_steps {
            stats.exhausted = true;
            break;
        }

        state.position = ray.at(state.t);
        let density = ctx.density(state.position);
        state.steps += 1;
        stats.samples += 1;

        state.block = ctx.accel.block_at_world(state.position);
        let range = ctx.accel.range(state.block).unwrap_or(BlockRange::EMPTY);
        let decision = choose_step_in_band(policy, density, &band, range);
        let next = advance(ctx, ray, &state, &band, decision, &mut stats);
        state.step = next - state.t;

        let sample = transfer.classify(density);
        if sample.w > 0.0 {
            first_visible.get_or_insert(state.t);
            let step = state.step.min(t_far - state.t).max(0.0);
            let alpha = transfer.corrected_alpha(sample.w, step);
            let weight = (1.0 - state.opacity) * alpha;
            color += (sample.truncate() * weight).extend(weight);
            state.opacity = color.w;
            if state.opacity >= OPACITY_SATURATION {
                saturated = true;
                break;
            }
        }

        state.t = next;
    }

    RayResult {
        outcome: TraversalOutcome::Composite(Composite {
            color,
            first_visible,
            saturated,
        }),
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volray_core::GridDims;
    use volray_volume::{generate, ScalarField};

    struct Scene {
        field: ScalarField,
        accel: AccelerationStructure,
        policy: SteppingPolicy,
    }

    impl Scene {
        fn sphere() -> Self {
            let field = generate::sphere(GridDims::splat(32), 8.0).unwrap();
            let accel = AccelerationStructure::build_with_apron(&field, GridDims::splat(8), 1).unwrap();
            Self {
                field,
                accel,
                policy: SteppingPolicy::default(),
            }
        }

        fn ctx(&self) -> MarchContext<'_> {
            MarchContext {
                sampler: self.field.sampler().unwrap(),
                accel: &self.accel,
                policy: &self.policy,
                params: MarchParams::default(),
            }
        }
    }

    fn axis_ray() -> (Ray, f32, f32) {
        let ray = Ray::new(Vec3::new(-4.0, 16.0, 16.0), Vec3::X);
        (ray, 4.0, 36.0)
    }

    #[test]
    fn hits_sphere_near_radius() {
        let scene = Scene::sphere();
        let (ray, tn, tf) = axis_ray();
        let result = march_isosurface(&scene.ctx(), &ray, tn, tf);
        let TraversalOutcome::Hit(hit) = result.outcome else {
            panic!("expected hit, got {:?}", result.outcome);
        };
        // Surface at distance 8 from the centre (16, 16, 16).
        assert!((hit.position.x - 8.0).abs() < 0.5, "hit at {}", hit.position);
        assert!(hit.normal.x < -0.9);
        assert!(result.stats.skipped_blocks > 0);
    }

    #[test]
    fn t_strictly_increases() {
        let scene = Scene::sphere();
        let ray = Ray::new(Vec3::new(-4.0, 2.0, 3.0), Vec3::new(1.0, 0.4, 0.3));
        let mut ts = Vec::new();
        march_isosurface_with(&scene.ctx(), &ray, 0.0, 60.0, |state, _| ts.push(state.t));
        assert!(ts.len() > 1);
        assert!(ts.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn misses_past_far() {
        let scene = Scene::sphere();
        let ray = Ray::new(Vec3::new(-4.0, 1.0, 1.0), Vec3::X);
        let result = march_isosurface(&scene.ctx(), &ray, 4.0, 36.0);
        assert_eq!(result.outcome, TraversalOutcome::Miss);
        assert!(!result.stats.exhausted);
    }

    #[test]
    fn max_steps_guard() {
        let scene = Scene::sphere();
        let mut ctx = scene.ctx();
        ctx.params.max_steps = 3;
        let (ray, tn, tf) = axis_ray();
        let result = march_isosurface(&ctx, &ray, tn, tf);
        assert_eq!(result.outcome, TraversalOutcome::Miss);
        assert!(result.stats.exhausted);
        assert_eq!(result.stats.samples, 3);
    }

    #[test]
    fn adaptive_agrees_with_reference() {
        let scene = Scene::sphere();
        let ctx = scene.ctx();
        let (ray, tn, tf) = axis_ray();
        let adaptive = march_isosurface(&ctx, &ray, tn, tf);
        let reference = march_reference(&ctx, &ray, tn, tf, 0.05);
        let (TraversalOutcome::Hit(a), TraversalOutcome::Hit(b)) = (adaptive.outcome, reference.outcome) else {
            panic!("both marchers should hit");
        };
        assert!((a.t - b.t).abs() < 0.1);
        assert!(adaptive.stats.samples < reference.stats.samples);
    }

    #[test]
    fn dvr_saturates_in_dense_region() {
        let field = generate::constant(GridDims::splat(16), 1.0).unwrap();
        let accel = AccelerationStructure::build(&field, GridDims::splat(4)).unwrap();
        let policy = SteppingPolicy::default();
        let ctx = MarchContext {
            sampler: field.sampler().unwrap(),
            accel: &accel,
            policy: &policy,
            params: MarchParams::default(),
        };
        let mut transfer = TransferFunction::default();
        transfer.max_opacity = 0.5;
        let ray = Ray::new(Vec3::new(-1.0, 8.0, 8.0), Vec3::X);
        let result = march_dvr(&ctx, &transfer, &ray, 1.0, 17.0);
        let TraversalOutcome::Composite(c) = result.outcome else {
            panic!("expected composite");
        };
        assert!(c.saturated);
        assert!(c.color.w >= OPACITY_SATURATION);
        assert_eq!(c.first_visible, Some(1.0));
    }

    #[test]
    fn dvr_skips_empty_space() {
        let field = generate::constant(GridDims::splat(16), 0.0).unwrap();
        let accel = AccelerationStructure::build(&field, GridDims::splat(4)).unwrap();
        let policy = SteppingPolicy::default();
        let ctx = MarchContext {
            sampler: field.sampler().unwrap(),
            accel: &accel,
            policy: &policy,
            params: MarchParams {
                hierarchical: false,
                ..MarchParams::default()
            },
        };
        let ray = Ray::new(Vec3::new(-1.0, 8.0, 8.0), Vec3::X);
        let result = march_dvr(&ctx, &TransferFunction::default(), &ray, 1.0, 17.0);
        let TraversalOutcome::Composite(c) = result.outcome else {
            panic!("expected composite");
        };
        assert_eq!(c.color, Vec4::ZERO);
        assert!(c.first_visible.is_none());
        assert_eq!(result.stats.skipped_blocks, 4);
        assert_eq!(result.stats.samples, 4);
    }
}
