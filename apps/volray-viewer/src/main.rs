//! volray viewer
//!
//! Generates or loads a scalar volume, renders it with one of the ray
//! marching variants from an orbiting camera, and writes the selected frames
//! as images.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p volray-viewer -- [OPTIONS]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Adaptive isosurface of the default sphere
//! cargo run -p volray-viewer
//!
//! # Direct volume rendering of a noise blob, four orbit frames
//! cargo run -p volray-viewer -- --renderer dvr --volume noise -f 0-3 -o blob_{}.png
//!
//! # A raw 16-bit CT volume with anisotropic voxels
//! cargo run -p volray-viewer -- --raw head.raw --dims 256x256x113 --encoding u16 --scale 1,1,2
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod volume;

use tracing_subscriber::EnvFilter;

use crate::app::{parse_args, Viewer};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let args = parse_args(&args)?;
    Viewer::new(args)?.run()
}

fn print_help() {
    eprintln!(
        "volray viewer: adaptive ray marching of scalar volumes

USAGE:
    cargo run -p volray-viewer -- [OPTIONS]

RENDER OPTIONS:
    --renderer <KIND>       iso, iso-ref, dvr or deferred (default: iso)
    --size <WxH>            Output resolution (default: 512x512)
    --blocks <N|XxYxZ>      Block partition (default: 4, deferred: 32)
    --debug <MODE>          none, steps, depth, normals or blocks
    --nearest               Nearest-voxel sampling instead of trilinear
    --flat-skip             Skip only through the finest block level

STEPPING OPTIONS:
    --iso <V>               Target isovalue (default: 0.5)
    --small <S>             Fine step near the surface (default: 0.05)
    --large <S>             Coarse step elsewhere (default: 1.0)
    --range <R>             Half-width of the fine-step band (default: 0.1)

VOLUME OPTIONS:
    --volume <KIND>         sphere, noise or voxel (default: sphere)
    --dims <N|XxYxZ>        Grid dimensions (default: 64)
    --seed <N>              Noise seed (default: 0)
    --raw <PATH>            Load a headerless little-endian volume instead
    --encoding <ENC>        u8, u16, f32, f64 or u32 (default: u8)
    --scale <S|X,Y,Z>       World size of one voxel (default: 1)
    --cache <PATH>          Reuse or write the finest block partition

OUTPUT OPTIONS:
    -o, --output <PATTERN>  Output path pattern (use {{}} for frame number)
                            Default: volray_{{}}.png
    -f, --frames <FRAMES>   Frame indices to capture
                            Examples: \"0\" \"0,10,20\" \"0-5\" \"0,5-10,20\"
                            Default: 0
    --orbit-step <RAD>      Camera rotation per frame (default: 0.05)

OTHER:
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
