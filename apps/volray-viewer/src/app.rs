//! Viewer arguments and the orbit render loop.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use glam::Vec3;
use tracing::{info, warn};
use volray_core::{GridDims, StorageEncoding};
use volray_render::{
    parse_frame_indices, save_frame, Camera, DebugMode, RenderConfig, RendererKind,
    SampleFilter, ScreenshotConfig, SteppingPolicy, VolumeRenderer,
};
use volray_volume::{io, AccelerationStructure, NoiseBlobConfig, ScalarField};

use crate::volume::VolumeSource;

/// Camera pitch above the equator, in radians.
const CAMERA_PITCH: f32 = 0.4;

/// Camera distance as a multiple of the volume diagonal.
const CAMERA_DISTANCE: f32 = 1.2;

/// Options parsed from the command line.
#[derive(Debug, Clone)]
pub struct ViewerArgs {
    pub width: u32,
    pub height: u32,
    pub renderer: RendererKind,
    pub dims: GridDims,
    pub block_counts: Option<GridDims>,
    pub policy: SteppingPolicy,
    pub filter: SampleFilter,
    pub debug_mode: DebugMode,
    pub hierarchical_skip: bool,
    pub volume: VolumeSource,
    pub screenshot: ScreenshotConfig,
    /// Orbit rotation per frame in radians.
    pub orbit_step: f32,
    pub cache: Option<PathBuf>,
}

impl Default for ViewerArgs {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            renderer: RendererKind::default(),
            dims: GridDims::splat(64),
            block_counts: None,
            policy: SteppingPolicy::default(),
            filter: SampleFilter::default(),
            debug_mode: DebugMode::None,
            hierarchical_skip: true,
            volume: VolumeSource::default(),
            screenshot: ScreenshotConfig::new()
                .with_output("volray_{}.png")
                .with_frames([0]),
            orbit_step: 0.05,
            cache: None,
        }
    }
}

impl ViewerArgs {
    /// Render configuration for these options.
    pub fn render_config(&self) -> RenderConfig {
        let default_counts = match self.renderer {
            RendererKind::DeferredShading => {
                GridDims::splat(volray_core::constants::DEFERRED_BLOCK_COUNT)
            }
            _ => GridDims::splat(volray_core::constants::DEFAULT_BLOCK_COUNT),
        };
        RenderConfig::default()
            .with_resolution(self.width, self.height)
            .with_block_counts(self.block_counts.unwrap_or(default_counts))
            .with_filter(self.filter)
            .with_debug_mode(self.debug_mode)
            .with_hierarchical_skip(self.hierarchical_skip)
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{flag} expects a value"))
}

fn number<T: std::str::FromStr>(s: &str, flag: &str) -> anyhow::Result<T> {
    s.parse()
        .map_err(|_| anyhow!("{flag}: `{s}` is not a valid number"))
}

/// Parse `N` or `XxYxZ`. Negative and zero extents are configuration errors.
fn parse_dims(s: &str, flag: &str) -> anyhow::Result<GridDims> {
    let parts = s
        .split('x')
        .map(|p| number::<i64>(p, flag))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let dims = match parts[..] {
        [n] => GridDims::try_from_signed(n, n, n),
        [x, y, z] => GridDims::try_from_signed(x, y, z),
        _ => bail!("{flag}: expected N or XxYxZ, got `{s}`"),
    };
    dims.with_context(|| format!("{flag} {s}"))
}

/// Parse viewer arguments (without the program name).
pub fn parse_args(args: &[String]) -> anyhow::Result<ViewerArgs> {
    let mut parsed = ViewerArgs::default();
    let defaults = SteppingPolicy::default();
    let mut target = defaults.target();
    let mut small = defaults.small_step();
    let mut large = defaults.large_step();
    let mut range = defaults.transition_range();
    let mut raw: Option<PathBuf> = None;
    let mut encoding = StorageEncoding::Bits8;
    let mut scale = Vec3::ONE;
    let mut volume = "sphere".to_string();
    let mut seed = 0u32;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--size" => {
                let (w, h) = value(args, i, flag)?
                    .split_once('x')
                    .ok_or_else(|| anyhow!("--size expects WxH"))?;
                parsed.width = number(w, flag)?;
                parsed.height = number(h, flag)?;
            }
            "--blocks" => parsed.block_counts = Some(parse_dims(value(args, i, flag)?, flag)?),
            "--dims" => parsed.dims = parse_dims(value(args, i, flag)?, flag)?,
            "--renderer" => parsed.renderer = value(args, i, flag)?.parse()?,
            "--iso" => target = number(value(args, i, flag)?, flag)?,
            "--small" => small = number(value(args, i, flag)?, flag)?,
            "--large" => large = number(value(args, i, flag)?, flag)?,
            "--range" => range = number(value(args, i, flag)?, flag)?,
            "--raw" => raw = Some(PathBuf::from(value(args, i, flag)?)),
            "--encoding" => encoding = value(args, i, flag)?.parse()?,
            "--scale" => {
                let parts = value(args, i, flag)?
                    .split(',')
                    .map(|p| number::<f32>(p, flag))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                scale = match parts[..] {
                    [s] => Vec3::splat(s),
                    [x, y, z] => Vec3::new(x, y, z),
                    _ => bail!("--scale expects S or X,Y,Z"),
                };
            }
            "--volume" => volume = value(args, i, flag)?.to_string(),
            "--seed" => seed = number(value(args, i, flag)?, flag)?,
            "--debug" => parsed.debug_mode = value(args, i, flag)?.parse()?,
            "--nearest" => {
                parsed.filter = SampleFilter::Nearest;
                i += 1;
                continue;
            }
            "--flat-skip" => {
                parsed.hierarchical_skip = false;
                i += 1;
                continue;
            }
            "-f" | "--frames" => {
                let frames = parse_frame_indices(value(args, i, flag)?)?;
                if frames.is_empty() {
                    bail!("--frames selects no frames");
                }
                parsed.screenshot.frames = frames;
            }
            "-o" | "--output" => {
                parsed.screenshot.output_pattern = value(args, i, flag)?.to_string();
            }
            "--orbit-step" => parsed.orbit_step = number(value(args, i, flag)?, flag)?,
            "--cache" => parsed.cache = Some(PathBuf::from(value(args, i, flag)?)),
            other => bail!("unknown option `{other}`"),
        }
        i += 2;
    }

    parsed.policy = SteppingPolicy::new(target, small, large, range)?;
    parsed.volume = match (raw, volume.as_str()) {
        (Some(path), _) => VolumeSource::Raw {
            path,
            encoding,
            scale,
        },
        (None, "sphere") => VolumeSource::Sphere {
            radius: parsed.dims.x.min(parsed.dims.y).min(parsed.dims.z) as f32 / 4.0,
        },
        (None, "noise") => VolumeSource::Noise(NoiseBlobConfig {
            seed,
            ..NoiseBlobConfig::default()
        }),
        (None, "voxel") => VolumeSource::Voxel,
        (None, other) => bail!("unknown volume `{other}`"),
    };

    Ok(parsed)
}

/// Renders an orbit around the volume and saves the requested frames.
pub struct Viewer {
    renderer: VolumeRenderer,
    screenshot_config: ScreenshotConfig,
    camera_yaw: f32,
    orbit_step: f32,
    cache_hit: bool,
}

impl Viewer {
    pub fn new(args: ViewerArgs) -> anyhow::Result<Self> {
        let field = args.volume.load(args.dims)?;
        let config = args.render_config();
        let cache = args
            .cache
            .as_deref()
            .filter(|_| args.renderer.skips_empty_space());

        let cached = cache.and_then(|path| load_cached_accel(&field, &config, path));
        let cache_hit = cached.is_some();
        let mut renderer = match cached {
            Some(accel) => VolumeRenderer::with_accel(args.renderer, field, config, accel)?,
            None => VolumeRenderer::new(args.renderer, field, config)?,
        };
        renderer.set_policy(args.policy)?;

        if let (Some(path), false) = (cache, cache_hit) {
            let accel = renderer.accel_handle().snapshot();
            io::save_block_cache(path, renderer.field(), accel.grid())
                .with_context(|| format!("writing block cache {}", path.display()))?;
            info!("Wrote block cache {}", path.display());
        }

        info!(
            "Stepping: iso={} small={} large={} range={}",
            args.policy.target(),
            args.policy.small_step(),
            args.policy.large_step(),
            args.policy.transition_range()
        );

        Ok(Self {
            renderer,
            screenshot_config: args.screenshot,
            camera_yaw: 0.6,
            orbit_step: args.orbit_step,
            cache_hit,
        })
    }

    /// Whether the block partition came from the cache file.
    pub const fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    fn update_camera(&mut self) {
        let config = self.renderer.config();
        let aspect = config.width as f32 / config.height as f32;
        let camera = Camera::orbit(
            &self.renderer.field().bounds(),
            self.camera_yaw,
            CAMERA_PITCH,
            CAMERA_DISTANCE,
            aspect,
        );
        self.renderer.set_camera(camera);
    }

    /// Advance the orbit frame by frame, saving captured frames.
    pub fn run(&mut self) -> anyhow::Result<()> {
        for frame_index in 0..self.screenshot_config.sequence_len() {
            self.update_camera();
            if self.screenshot_config.should_capture(frame_index) {
                let frame = self.renderer.render()?;
                let path = self.screenshot_config.output_path(frame_index);
                save_frame(&frame, &path)?;
                info!(
                    "Frame {frame_index}: {} samples, {} skipped blocks",
                    frame.total_steps(),
                    frame.skipped().iter().map(|&s| u64::from(s)).sum::<u64>()
                );
            }
            self.camera_yaw += self.orbit_step;
        }
        Ok(())
    }
}

/// Finest-level partition from the cache file, if it was written for this
/// exact field and partition shape.
fn load_cached_accel(
    field: &ScalarField,
    config: &RenderConfig,
    path: &Path,
) -> Option<AccelerationStructure> {
    if !path.exists() {
        return None;
    }
    match io::load_block_cache(path, field, config.block_counts, config.apron()) {
        Ok(Some(grid)) => {
            info!("Using cached blocks from {}", path.display());
            Some(AccelerationStructure::from_grid(grid, field.voxel_scale()))
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Ignoring unreadable block cache: {e}");
            None
        }
    }
}
