//! CPU volume renderer and its traversal stages.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use glam::{Vec3, Vec4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use volray_core::constants::DEFAULT_BLOCK_COUNT;
use volray_core::{Aabb, Error, GridDims, Ray, Result};
use volray_volume::{AccelerationStructure, BlockGrid, ScalarField};

use crate::accel_handle::AccelHandle;
use crate::camera::Camera;
use crate::debug::DebugMode;
use crate::frame::{Frame, GBuffer, GBufferTexel, PixelSample};
use crate::stepping::SteppingPolicy;
use crate::transfer::TransferFunction;
use crate::traversal::{
    march_dvr, march_isosurface, march_reference, MarchContext, MarchParams, RayResult,
    SampleFilter, TraversalOutcome,
};

/// Output configuration shared by all renderer variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub max_steps: u32,
    pub filter: SampleFilter,
    pub block_counts: GridDims,
    pub debug_mode: DebugMode,
    pub hierarchical_skip: bool,
    pub background: Vec3,
    /// Isosurface colour before the headlight term.
    pub surface_color: Vec3,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            max_steps: 4096,
            filter: SampleFilter::Trilinear,
            block_counts: GridDims::splat(DEFAULT_BLOCK_COUNT),
            debug_mode: DebugMode::None,
            hierarchical_skip: true,
            background: Vec3::splat(0.08),
            surface_color: Vec3::new(0.66, 0.6, 0.05),
        }
    }
}

impl RenderConfig {
    /// Set output resolution.
    #[must_use]
    pub const fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the block partition.
    #[must_use]
    pub const fn with_block_counts(mut self, counts: GridDims) -> Self {
        self.block_counts = counts;
        self
    }

    /// Set the per-ray sample limit.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the reconstruction filter.
    #[must_use]
    pub const fn with_filter(mut self, filter: SampleFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the debug visualisation.
    #[must_use]
    pub const fn with_debug_mode(mut self, mode: DebugMode) -> Self {
        self.debug_mode = mode;
        self
    }

    /// Enable or disable skipping through coarse pyramid levels.
    #[must_use]
    pub const fn with_hierarchical_skip(mut self, enabled: bool) -> Self {
        self.hierarchical_skip = enabled;
        self
    }

    /// Voxels of apron the block ranges need for this filter.
    ///
    /// Trilinear samples near a block face read the neighbouring voxel.
    #[inline]
    pub const fn apron(&self) -> u32 {
        match self.filter {
            SampleFilter::Nearest => 0,
            SampleFilter::Trilinear => 1,
        }
    }

    /// Check resolution, block counts and step limit.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::config(format!(
                "resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.block_counts.is_empty() {
            return Err(Error::config("block counts must be positive"));
        }
        if self.max_steps == 0 {
            return Err(Error::config("max steps must be positive"));
        }
        Ok(())
    }

    fn march_params(&self) -> MarchParams {
        MarchParams {
            max_steps: self.max_steps,
            filter: self.filter,
            hierarchical: self.hierarchical_skip,
        }
    }
}

/// Everything a stage reads while producing one frame.
pub struct FrameContext<'a> {
    pub march: MarchContext<'a>,
    pub bounds: Aabb,
    pub camera: &'a Camera,
    pub transfer: &'a TransferFunction,
    pub config: &'a RenderConfig,
}

impl FrameContext<'_> {
    /// Trace every pixel in parallel, one row per task.
    ///
    /// `trace` receives the primary ray and its entry/exit parameters; rays
    /// that miss the volume box produce `miss`.
    pub fn trace_pixels<T, F>(&self, miss: T, trace: F) -> Vec<T>
    where
        T: Copy + Send + Sync,
        F: Fn(&Ray, f32, f32) -> T + Sync,
    {
        let (width, height) = (self.config.width, self.config.height);
        (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                let trace = &trace;
                (0..width).map(move |x| {
                    let ray = self.camera.ray_for_pixel(x, y, width, height);
                    self.bounds
                        .intersect_ray(&ray)
                        .map_or(miss, |(t_near, t_far)| trace(&ray, t_near, t_far))
                })
            })
            .collect()
    }

    fn shade_surface(&self, normal: Vec3, view: Vec3) -> Vec4 {
        let headlight = normal.dot(view).abs();
        (self.config.surface_color * headlight).extend(1.0)
    }
}

/// One traversal strategy producing per-pixel samples.
pub trait TraversalStage: Sync {
    /// Short display name.
    fn name(&self) -> &'static str;

    /// Trace a frame.
    fn render(&self, ctx: &FrameContext<'_>) -> Vec<PixelSample>;
}

/// Front-to-back compositing through the transfer function.
pub struct DirectVolumeStage;

impl TraversalStage for DirectVolumeStage {
    fn name(&self) -> &'static str {
        "direct-volume"
    }

    fn render(&self, ctx: &FrameContext<'_>) -> Vec<PixelSample> {
        ctx.trace_pixels(PixelSample::MISS, |ray, t_near, t_far| {
            let RayResult { outcome, stats } = march_dvr(&ctx.march, ctx.transfer, ray, t_near, t_far);
            let (color, depth) = match outcome {
                TraversalOutcome::Composite(c) => (c.color, c.first_visible.unwrap_or(f32::INFINITY)),
                TraversalOutcome::Hit(_) | TraversalOutcome::Miss => (Vec4::ZERO, f32::INFINITY),
            };
            PixelSample {
                color,
                depth,
                normal: Vec3::ZERO,
                steps: stats.samples,
                skipped: stats.skipped_blocks,
            }
        })
    }
}

/// Single-pass isosurface marching, adaptive or fixed-step.
pub struct IsosurfaceStage {
    /// Use the step controller and block skipping; otherwise march with the
    /// small step everywhere.
    pub adaptive: bool,
}

impl TraversalStage for IsosurfaceStage {
    fn name(&self) -> &'static str {
        if self.adaptive {
            "isosurface-adaptive"
        } else {
            "isosurface-reference"
        }
    }

    fn render(&self, ctx: &FrameContext<'_>) -> Vec<PixelSample> {
        let step = ctx.march.policy.small_step();
        ctx.trace_pixels(PixelSample::MISS, |ray, t_near, t_far| {
            let result = if self.adaptive {
                march_isosurface(&ctx.march, ray, t_near, t_far)
            } else {
                march_reference(&ctx.march, ray, t_near, t_far, step)
            };
            let mut sample = PixelSample {
                steps: result.stats.samples,
                skipped: result.stats.skipped_blocks,
                ..PixelSample::MISS
            };
            if let TraversalOutcome::Hit(hit) = result.outcome {
                sample.color = ctx.shade_surface(hit.normal, ray.direction);
                sample.depth = hit.t;
                sample.normal = hit.normal;
            }
            sample
        })
    }
}

/// Two passes: adaptive marching into a G-buffer, then a resolve.
pub struct DeferredStage;

impl DeferredStage {
    /// Pass 1: surface geometry per pixel.
    pub fn geometry_pass(ctx: &FrameContext<'_>) -> GBuffer {
        let texels = ctx.trace_pixels(GBufferTexel::EMPTY, |ray, t_near, t_far| {
            let result = march_isosurface(&ctx.march, ray, t_near, t_far);
            let mut texel = GBufferTexel {
                steps: result.stats.samples,
                skipped: result.stats.skipped_blocks,
                ..GBufferTexel::EMPTY
            };
            if let TraversalOutcome::Hit(hit) = result.outcome {
                texel.position = hit.position;
                texel.normal = hit.normal;
                texel.depth = hit.t;
            }
            texel
        });
        GBuffer {
            width: ctx.config.width,
            height: ctx.config.height,
            texels,
        }
    }

    /// Pass 2: shade the G-buffer.
    pub fn resolve_pass(ctx: &FrameContext<'_>, gbuffer: &GBuffer) -> Vec<PixelSample> {
        let eye = ctx.camera.position;
        gbuffer
            .texels
            .par_iter()
            .map(|texel| {
                let mut sample = PixelSample {
                    steps: texel.steps,
                    skipped: texel.skipped,
                    ..PixelSample::MISS
                };
                if texel.depth.is_finite() {
                    let view = (texel.position - eye).normalize_or_zero();
                    sample.color = ctx.shade_surface(texel.normal, view);
                    sample.depth = texel.depth;
                    sample.normal = texel.normal;
                }
                sample
            })
            .collect()
    }
}

impl TraversalStage for DeferredStage {
    fn name(&self) -> &'static str {
        "deferred-shading"
    }

    fn render(&self, ctx: &FrameContext<'_>) -> Vec<PixelSample> {
        let gbuffer = Self::geometry_pass(ctx);
        Self::resolve_pass(ctx, &gbuffer)
    }
}

/// The available renderer variants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RendererKind {
    DirectVolume,
    #[default]
    IsosurfaceAdaptive,
    /// Fixed small step and no skipping.
    IsosurfaceReference,
    DeferredShading,
}

impl RendererKind {
    /// Every variant.
    pub const ALL: [Self; 4] = [
        Self::DirectVolume,
        Self::IsosurfaceAdaptive,
        Self::IsosurfaceReference,
        Self::DeferredShading,
    ];

    /// The stage implementing this variant.
    pub fn stage(self) -> &'static dyn TraversalStage {
        match self {
            Self::DirectVolume => &DirectVolumeStage,
            Self::IsosurfaceAdaptive => &IsosurfaceStage { adaptive: true },
            Self::IsosurfaceReference => &IsosurfaceStage { adaptive: false },
            Self::DeferredShading => &DeferredStage,
        }
    }

    /// Returns true for the variants that use the acceleration structure.
    pub const fn skips_empty_space(self) -> bool {
        !matches!(self, Self::IsosurfaceReference)
    }
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DirectVolume => "dvr",
            Self::IsosurfaceAdaptive => "iso",
            Self::IsosurfaceReference => "iso-ref",
            Self::DeferredShading => "deferred",
        };
        f.write_str(name)
    }
}

impl FromStr for RendererKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dvr" => Ok(Self::DirectVolume),
            "iso" => Ok(Self::IsosurfaceAdaptive),
            "iso-ref" => Ok(Self::IsosurfaceReference),
            "deferred" => Ok(Self::DeferredShading),
            other => Err(Error::config(format!("unknown renderer `{other}`"))),
        }
    }
}

/// Partition `field` for a variant. Variants that never skip get an
/// unbounded grid of the same shape instead of a scan of every voxel.
fn build_accel(
    kind: RendererKind,
    field: &ScalarField,
    counts: GridDims,
    apron: u32,
) -> Result<AccelerationStructure> {
    if kind.skips_empty_space() {
        return AccelerationStructure::build_with_apron(field, counts, apron);
    }
    field.sampler()?;
    let grid = BlockGrid::unbounded(field.dims(), counts, apron)?;
    Ok(AccelerationStructure::from_grid(grid, field.voxel_scale()))
}

/// A scalar field, its published acceleration structure and the settings
/// one renderer variant draws it with.
pub struct VolumeRenderer {
    kind: RendererKind,
    field: Arc<ScalarField>,
    accel: AccelHandle,
    policy: SteppingPolicy,
    transfer: TransferFunction,
    camera: Camera,
    config: RenderConfig,
    /// False while the published ranges are the unbounded placeholder.
    partitioned: bool,
    outdated: bool,
}

impl VolumeRenderer {
    /// Build the acceleration structure for `field` and frame it with an
    /// orbit camera.
    ///
    /// Fixed-step marching never reads block ranges, so the reference
    /// variant starts with an unbounded partition and skips the scan.
    pub fn new(kind: RendererKind, field: Arc<ScalarField>, config: RenderConfig) -> Result<Self> {
        config.validate()?;
        let accel = build_accel(kind, &field, config.block_counts, config.apron())?;
        Ok(Self::assemble(kind, field, config, accel, kind.skips_empty_space()))
    }

    /// Use an acceleration structure built elsewhere, such as one restored
    /// from a block cache. No partitioning runs.
    ///
    /// The structure must have been computed from `field`; only its shape is
    /// checked here.
    pub fn with_accel(
        kind: RendererKind,
        field: Arc<ScalarField>,
        config: RenderConfig,
        accel: AccelerationStructure,
    ) -> Result<Self> {
        config.validate()?;
        if accel.field_dims() != field.dims()
            || accel.counts() != config.block_counts
            || accel.grid().apron() != config.apron()
        {
            return Err(Error::config(format!(
                "acceleration structure ({:?} blocks over {:?}, apron {}) does not match \
                 field {:?} with {:?} blocks, apron {}",
                accel.counts(),
                accel.field_dims(),
                accel.grid().apron(),
                field.dims(),
                config.block_counts,
                config.apron()
            )));
        }
        Ok(Self::assemble(kind, field, config, accel, true))
    }

    fn assemble(
        kind: RendererKind,
        field: Arc<ScalarField>,
        config: RenderConfig,
        accel: AccelerationStructure,
        partitioned: bool,
    ) -> Self {
        let aspect = config.width as f32 / config.height as f32;
        let camera = Camera::orbit(&field.bounds(), 0.6, 0.4, 1.2, aspect);

        info!(
            "Renderer {} for {}x{}x{} field at {}x{}",
            kind,
            field.dims().x,
            field.dims().y,
            field.dims().z,
            config.width,
            config.height
        );

        Self {
            kind,
            field,
            accel: AccelHandle::new(accel),
            policy: SteppingPolicy::default(),
            transfer: TransferFunction::default(),
            camera,
            config,
            partitioned,
            outdated: true,
        }
    }

    #[inline]
    pub const fn kind(&self) -> RendererKind {
        self.kind
    }

    #[inline]
    pub fn field(&self) -> &Arc<ScalarField> {
        &self.field
    }

    #[inline]
    pub const fn policy(&self) -> &SteppingPolicy {
        &self.policy
    }

    #[inline]
    pub const fn transfer(&self) -> &TransferFunction {
        &self.transfer
    }

    #[inline]
    pub const fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub const fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Shared handle to the published acceleration structure.
    #[inline]
    pub const fn accel_handle(&self) -> &AccelHandle {
        &self.accel
    }

    /// Returns true if settings changed since the last redraw.
    #[inline]
    pub const fn is_outdated(&self) -> bool {
        self.outdated
    }

    /// Switch variant.
    ///
    /// Moving to a skipping variant computes the block ranges if the
    /// renderer was created without them. On error the variant is unchanged.
    pub fn set_kind(&mut self, kind: RendererKind) -> Result<()> {
        if kind.skips_empty_space() && !self.partitioned {
            let field = Arc::clone(&self.field);
            let (counts, apron) = (self.config.block_counts, self.config.apron());
            self.accel
                .rebuild(|| AccelerationStructure::build_with_apron(&field, counts, apron))?;
            self.partitioned = true;
        }
        self.kind = kind;
        self.outdated = true;
        Ok(())
    }

    /// Replace the stepping thresholds. Block ranges are not recomputed.
    pub fn set_policy(&mut self, policy: SteppingPolicy) -> Result<()> {
        policy.validate()?;
        self.policy = policy;
        self.outdated = true;
        Ok(())
    }

    /// Replace the transfer function.
    pub fn set_transfer(&mut self, transfer: TransferFunction) -> Result<()> {
        transfer.validate()?;
        self.transfer = transfer;
        self.outdated = true;
        Ok(())
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.outdated = true;
    }

    pub fn set_debug_mode(&mut self, mode: DebugMode) {
        self.config.debug_mode = mode;
        self.outdated = true;
    }

    /// Repartition the field and publish the new structure.
    ///
    /// On error the previous partition stays in use.
    pub fn set_block_counts(&mut self, counts: GridDims) -> Result<()> {
        let (kind, field) = (self.kind, Arc::clone(&self.field));
        let apron = self.config.apron();
        self.accel
            .rebuild(|| build_accel(kind, &field, counts, apron))?;
        self.partitioned = kind.skips_empty_space();
        self.config.block_counts = counts;
        self.outdated = true;
        Ok(())
    }

    /// Replace the field and publish a structure built for it.
    ///
    /// On error the previous field and structure stay in use.
    pub fn set_field(&mut self, field: Arc<ScalarField>) -> Result<()> {
        let (kind, counts) = (self.kind, self.config.block_counts);
        let apron = self.config.apron();
        self.accel.rebuild(|| build_accel(kind, &field, counts, apron))?;
        self.partitioned = kind.skips_empty_space();
        self.field = field;
        self.outdated = true;
        Ok(())
    }

    /// Replace the render configuration, rebuilding blocks if the partition
    /// or filter apron changed.
    pub fn set_config(&mut self, config: RenderConfig) -> Result<()> {
        config.validate()?;
        if config.block_counts != self.config.block_counts || config.apron() != self.config.apron() {
            let (kind, field) = (self.kind, Arc::clone(&self.field));
            self.accel
                .rebuild(|| build_accel(kind, &field, config.block_counts, config.apron()))?;
            self.partitioned = kind.skips_empty_space();
        }
        self.camera.set_aspect(config.width as f32 / config.height as f32);
        self.config = config;
        self.outdated = true;
        Ok(())
    }

    /// Render one frame against a single snapshot of the acceleration
    /// structure.
    pub fn render(&self) -> Result<Frame> {
        let accel = self.accel.snapshot();
        if accel.field_dims() != self.field.dims() {
            return Err(Error::InvalidData(format!(
                "published blocks cover {:?}, field is {:?}",
                accel.field_dims(),
                self.field.dims()
            )));
        }

        let ctx = FrameContext {
            march: MarchContext {
                sampler: self.field.sampler()?,
                accel: &accel,
                policy: &self.policy,
                params: self.config.march_params(),
            },
            bounds: self.field.bounds(),
            camera: &self.camera,
            transfer: &self.transfer,
            config: &self.config,
        };

        let stage = self.kind.stage();
        let start = Instant::now();
        let samples = stage.render(&ctx);
        let frame = Frame::compose(
            self.config.width,
            self.config.height,
            &samples,
            self.config.debug_mode,
            self.config.background,
        )?;
        debug!(
            "{} frame in {:.2?}, {} samples",
            stage.name(),
            start.elapsed(),
            frame.total_steps()
        );
        Ok(frame)
    }

    /// Render only if something changed since the last redraw.
    pub fn redraw(&mut self) -> Result<Option<Frame>> {
        if !self.outdated {
            return Ok(None);
        }
        let frame = self.render()?;
        self.outdated = false;
        Ok(Some(frame))
    }
}
