//! volray benchmarks
//!
//! Times every renderer variant on a synthetic volume and compares the
//! adaptive isosurface against fixed-step marching.
//!
//! ```bash
//! cargo run --release -p volray-benchmark -- [--dims N] [--size WxH] [--blocks N] [--runs N]
//! ```
//!
//! Partitioning itself is measured by `cargo bench -p volray-volume`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;
use volray_core::GridDims;
use volray_render::{RenderConfig, RendererKind, VolumeRenderer};
use volray_test::{create_test_camera, HeadlessRenderer};
use volray_volume::{generate, NoiseBlobConfig, ScalarField};

#[derive(Debug, Clone, Copy, PartialEq)]
struct BenchArgs {
    dims: u32,
    width: u32,
    height: u32,
    blocks: u32,
    runs: u32,
}

impl Default for BenchArgs {
    fn default() -> Self {
        Self {
            dims: 128,
            width: 256,
            height: 256,
            blocks: 16,
            runs: 3,
        }
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<BenchArgs> {
    let mut parsed = BenchArgs::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args
            .get(i + 1)
            .ok_or_else(|| anyhow!("{flag} expects a value"))?;
        let number = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| anyhow!("{flag}: `{s}` is not a positive integer"))
        };
        match flag {
            "--dims" => parsed.dims = number(value)?,
            "--blocks" => parsed.blocks = number(value)?,
            "--runs" => parsed.runs = number(value)?,
            "--size" => {
                let (w, h) = value
                    .split_once('x')
                    .ok_or_else(|| anyhow!("--size expects WxH"))?;
                parsed.width = number(w)?;
                parsed.height = number(h)?;
            }
            other => bail!("unknown option `{other}`"),
        }
        i += 2;
    }
    if parsed.dims == 0 || parsed.blocks == 0 || parsed.runs == 0 {
        bail!("--dims, --blocks and --runs must be positive");
    }
    Ok(parsed)
}

/// Median wall time of `runs` renders, with the sample count of the last.
fn time_renders(renderer: &VolumeRenderer, runs: u32) -> anyhow::Result<(Duration, u64, u64)> {
    let mut times = Vec::with_capacity(runs as usize);
    let mut counts = (0, 0);
    for _ in 0..runs {
        let start = Instant::now();
        let frame = renderer.render()?;
        times.push(start.elapsed());
        counts = (
            frame.total_steps(),
            frame.skipped().iter().map(|&s| u64::from(s)).sum(),
        );
    }
    times.sort();
    Ok((times[times.len() / 2], counts.0, counts.1))
}

fn bench_field(name: &str, field: &Arc<ScalarField>, args: BenchArgs) -> anyhow::Result<()> {
    info!("== {name} ==");
    let config = RenderConfig::default()
        .with_resolution(args.width, args.height)
        .with_block_counts(GridDims::splat(args.blocks));

    for kind in RendererKind::ALL {
        for hierarchical in [true, false] {
            if !hierarchical && !kind.skips_empty_space() {
                continue;
            }
            let renderer = VolumeRenderer::new(
                kind,
                Arc::clone(field),
                config.clone().with_hierarchical_skip(hierarchical),
            )?;
            let (time, steps, skipped) = time_renders(&renderer, args.runs)?;
            info!(
                "{:<9} {:<5} {:>10.2?} {:>12} samples {:>10} skips",
                kind.to_string(),
                if hierarchical { "tree" } else { "flat" },
                time,
                steps,
                skipped
            );
        }
    }

    let harness = HeadlessRenderer::with_config(config)?;
    let camera = create_test_camera(field.dims(), 2.0);
    let cmp = harness.compare_skip_against_reference(field, &camera)?;
    info!(
        "adaptive vs reference: {:.1}x fewer samples, {} coverage mismatches, image diff {:.5}",
        cmp.step_ratio(),
        cmp.coverage_mismatch,
        cmp.image_difference
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;
    info!("volray benchmarks: {args:?}");

    let dims = GridDims::splat(args.dims);
    let sphere = Arc::new(generate::sphere(dims, args.dims as f32 / 4.0)?);
    bench_field("sphere", &sphere, args)?;

    let blob = Arc::new(generate::noise_blob(dims, &NoiseBlobConfig::default())?);
    bench_field("noise blob", &blob, args)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options() {
        let args: Vec<String> = ["--dims", "32", "--size", "40x30", "--runs", "1"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let parsed = parse_args(&args).unwrap();
        assert_eq!((parsed.dims, parsed.width, parsed.height, parsed.runs), (32, 40, 30, 1));
        assert_eq!(parsed.blocks, 16);
    }

    #[test]
    fn rejects_zero_and_unknown() {
        assert!(parse_args(&["--runs".to_string(), "0".to_string()]).is_err());
        assert!(parse_args(&["--fast".to_string(), "1".to_string()]).is_err());
        assert!(parse_args(&["--dims".to_string()]).is_err());
    }
}
