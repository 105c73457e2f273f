//! Scalar volumes and empty-space-skipping data for the volray renderer.
//!
//! - [`field`]: structured scalar fields and the normalising voxel sampler
//! - [`blocks`]: block partitioning into per-block min/max density ranges
//! - [`accel`]: the multi-level acceleration structure queried while marching
//! - [`generate`]: synthetic volumes
//! - [`io`]: raw volume loading and the block cache

pub mod accel;
pub mod blocks;
pub mod field;
pub mod generate;
pub mod io;

pub use accel::AccelerationStructure;
pub use blocks::{compute_blocks, compute_blocks_with_apron, BlockGrid, BlockRange};
pub use field::{Samples, ScalarField, VoxelSampler};
pub use generate::NoiseBlobConfig;
