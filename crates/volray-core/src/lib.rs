//! Core types, math, and errors for the volray volume renderer.
//!
//! This crate provides the foundational types used throughout the workspace:
//! - Storage encodings of raw scalar samples
//! - Grid dimensions and voxel/block coordinates
//! - Rays and axis-aligned boxes (ray-box intersection)
//! - The workspace error taxonomy

pub mod coords;
pub mod error;
pub mod math;
pub mod types;

pub use coords::{BlockCoord, GridDims, VoxelCoord};
pub use error::{Error, Result};
pub use math::{Aabb, Ray};
pub use types::{StorageEncoding, ValueRange};

/// Workspace-wide constants
pub mod constants {
    /// Tolerance used when comparing densities against step-policy thresholds.
    ///
    /// Densities are `f32`, so a value typed as exactly `target + range` may
    /// land one ulp outside the band.
    pub const DENSITY_EPSILON: f32 = 1.0e-6;
    /// Distance pushed past a block boundary after a skip, in voxel units.
    pub const SKIP_NUDGE_VOXELS: f32 = 1.0e-3;
    /// Block partition used by the isosurface renderers by default.
    pub const DEFAULT_BLOCK_COUNT: u32 = 4;
    /// Finer block partition used by the deferred renderer by default.
    pub const DEFERRED_BLOCK_COUNT: u32 = 32;
}
