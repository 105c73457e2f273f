//! Block partitioning and per-block density ranges.

use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use glam::UVec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use volray_core::{BlockCoord, Error, GridDims, Result, ValueRange, VoxelCoord};

use crate::field::{ScalarField, VoxelSampler};

/// Min/max density of one block.
///
/// Layout is two packed `f32`s so a grid can be handed out as a flat
/// `[min, max, min, max, ...]` slice.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct BlockRange {
    pub min: f32,
    pub max: f32,
}

impl BlockRange {
    /// Sentinel for a block that holds no voxels.
    pub const EMPTY: Self = Self { min: 1.0, max: 0.0 };

    /// Starting accumulator for a min/max fold.
    const SEED: Self = Self {
        min: f32::MAX,
        max: f32::MIN,
    };

    /// Create a new range.
    #[inline]
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Returns true for the empty-block sentinel (or any inverted range).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// Fold one density into the range.
    #[inline]
    pub fn include(&mut self, density: f32) {
        self.min = self.min.min(density);
        self.max = self.max.max(density);
    }

    /// Union of two ranges. An empty side contributes nothing.
    #[inline]
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self.is_empty() {
            other
        } else if other.is_empty() {
            self
        } else {
            Self::new(self.min.min(other.min), self.max.max(other.max))
        }
    }

    /// Closed-interval overlap with a query range.
    ///
    /// An empty block overlaps nothing.
    #[inline]
    pub fn overlaps(&self, query: &ValueRange) -> bool {
        !self.is_empty() && self.min <= query.high && self.max >= query.low
    }

    /// The range as a [`ValueRange`].
    #[inline]
    pub const fn to_value_range(self) -> ValueRange {
        ValueRange::new(self.min, self.max)
    }
}

/// Per-block density ranges for one partition of a field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockGrid {
    field_dims: GridDims,
    counts: GridDims,
    block_size: GridDims,
    apron: u32,
    ranges: Vec<BlockRange>,
}

impl BlockGrid {
    /// Grid dimensions of the partitioned field.
    #[inline]
    pub const fn field_dims(&self) -> GridDims {
        self.field_dims
    }

    /// Number of blocks along each axis.
    #[inline]
    pub const fn counts(&self) -> GridDims {
        self.counts
    }

    /// Voxels per block along each axis (the last block may be smaller).
    #[inline]
    pub const fn block_size(&self) -> GridDims {
        self.block_size
    }

    /// Extra voxels folded in around each block.
    #[inline]
    pub const fn apron(&self) -> u32 {
        self.apron
    }

    /// Ranges in z-major, then y, then x order.
    #[inline]
    pub fn ranges(&self) -> &[BlockRange] {
        &self.ranges
    }

    /// Returns true if the coordinate names a block of this grid.
    #[inline]
    pub const fn contains(&self, coord: BlockCoord) -> bool {
        self.counts.contains(coord.x, coord.y, coord.z)
    }

    /// Range of one block, or `None` outside the grid.
    #[inline]
    pub fn range(&self, coord: BlockCoord) -> Option<BlockRange> {
        self.contains(coord)
            .then(|| self.ranges[self.counts.index(coord.x, coord.y, coord.z)])
    }

    /// Block containing a voxel. Voxels past the last block clamp into it.
    #[inline]
    pub const fn block_of_voxel(&self, voxel: VoxelCoord) -> BlockCoord {
        BlockCoord::of_voxel(voxel, self.block_size, self.counts)
    }

    /// Half-open voxel range `[start, end)` covered by a block, without apron.
    ///
    /// Returns `None` for blocks that hold no voxels.
    pub fn voxel_bounds(&self, coord: BlockCoord) -> Option<(UVec3, UVec3)> {
        if !self.contains(coord) {
            return None;
        }
        voxel_span(coord, self.block_size, self.field_dims)
    }

    /// Iterate `(coord, range)` pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockCoord, BlockRange)> + '_ {
        self.ranges.iter().enumerate().map(|(i, range)| {
            let (x, y, z) = self.counts.coord(i);
            (BlockCoord::new(x, y, z), *range)
        })
    }

    /// Number of blocks holding no voxels.
    pub fn empty_blocks(&self) -> usize {
        self.ranges.iter().filter(|r| r.is_empty()).count()
    }

    /// Grid whose every block spans all densities.
    ///
    /// Holds the shape of a partition without reading the field: nothing
    /// is ever skipped and no range is narrower than the data.
    pub fn unbounded(field_dims: GridDims, counts: GridDims, apron: u32) -> Result<Self> {
        check_counts(counts)?;
        let block_size = field_dims.div_ceil(counts);
        let ranges = (0..counts.count())
            .map(|i| {
                let (bx, by, bz) = counts.coord(i);
                voxel_span(BlockCoord::new(bx, by, bz), block_size, field_dims)
                    .map_or(BlockRange::EMPTY, |_| BlockRange::new(f32::MIN, f32::MAX))
            })
            .collect();
        Ok(Self {
            field_dims,
            counts,
            block_size,
            apron,
            ranges,
        })
    }

    /// Check that a finest-level partition is self-consistent.
    ///
    /// Grids from [`compute_blocks`] always pass; deserialized ones may not.
    /// Pyramid levels use doubled block sizes and are not checked here.
    pub fn validate(&self) -> Result<()> {
        if self.counts.is_empty() || self.field_dims.is_empty() {
            return Err(Error::InvalidData(format!(
                "block grid has empty counts {:?} or field dims {:?}",
                self.counts, self.field_dims
            )));
        }
        let expected = self.field_dims.div_ceil(self.counts);
        if self.block_size != expected {
            return Err(Error::InvalidData(format!(
                "block size {:?} does not partition {:?} into {:?} (expected {:?})",
                self.block_size, self.field_dims, self.counts, expected
            )));
        }
        if self.ranges.len() != self.counts.count() {
            return Err(Error::InvalidData(format!(
                "block grid holds {} ranges, expected {}",
                self.ranges.len(),
                self.counts.count()
            )));
        }
        if self.ranges.iter().any(|r| r.min.is_nan() || r.max.is_nan()) {
            return Err(Error::InvalidData("block grid holds NaN ranges".to_string()));
        }
        Ok(())
    }

    /// Flat `[min, max]` pairs, length `2·bx·by·bz`.
    #[inline]
    pub fn as_flat(&self) -> &[f32] {
        bytemuck::cast_slice(&self.ranges)
    }

    /// Per-block minima in storage order.
    pub fn min_values(&self) -> Vec<f32> {
        self.ranges.iter().map(|r| r.min).collect()
    }

    /// Per-block maxima in storage order.
    pub fn max_values(&self) -> Vec<f32> {
        self.ranges.iter().map(|r| r.max).collect()
    }

    /// Merge each 2×2×2 group of blocks into one block of the next level.
    ///
    /// Odd counts round up; a parent with fewer than eight children merges
    /// only the children that exist.
    #[must_use]
    pub fn downsample_2x(&self) -> Self {
        let counts = self.counts.div_ceil(GridDims::splat(2));
        let block_size = GridDims::new(
            self.block_size.x * 2,
            self.block_size.y * 2,
            self.block_size.z * 2,
        );

        let ranges = (0..counts.count())
            .into_par_iter()
            .map(|i| {
                let (px, py, pz) = counts.coord(i);
                let mut merged = BlockRange::EMPTY;
                for dz in 0..2 {
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let child = BlockCoord::new(px * 2 + dx, py * 2 + dy, pz * 2 + dz);
                            if let Some(range) = self.range(child) {
                                merged = merged.merge(range);
                            }
                        }
                    }
                }
                merged
            })
            .collect();

        Self {
            field_dims: self.field_dims,
            counts,
            block_size,
            apron: self.apron,
            ranges,
        }
    }
}

/// Voxel span of a block in a partition with the given block size.
fn check_counts(counts: GridDims) -> Result<()> {
    if counts.is_empty() {
        return Err(Error::config(format!(
            "block counts must be positive, got {}x{}x{}",
            counts.x, counts.y, counts.z
        )));
    }
    Ok(())
}

fn voxel_span(coord: BlockCoord, size: GridDims, dims: GridDims) -> Option<(UVec3, UVec3)> {
    let start = UVec3::new(coord.x, coord.y, coord.z) * size.to_uvec3();
    let end = (start + size.to_uvec3()).min(dims.to_uvec3());
    start.cmplt(end).all().then_some((start, end))
}

/// Fold every voxel of a span into a range.
fn fold_span(sampler: &VoxelSampler<'_>, dims: GridDims, start: UVec3, end: UVec3) -> BlockRange {
    let mut range = BlockRange::SEED;
    for z in start.z..end.z {
        for y in start.y..end.y {
            let row = dims.index(0, y, z);
            for x in start.x..end.x {
                range.include(sampler.at_index(row + x as usize));
            }
        }
    }
    range
}

/// Partition a field into `counts` blocks and compute each block's range.
///
/// Block extents are `ceil(dim / count)` voxels; trailing blocks may be
/// smaller or hold no voxels, in which case they get [`BlockRange::EMPTY`].
/// The field's encoding is checked before any block is computed.
pub fn compute_blocks(field: &ScalarField, counts: GridDims) -> Result<BlockGrid> {
    compute_blocks_with_apron(field, counts, 0)
}

/// Like [`compute_blocks`], but each block also folds in `apron` voxels on
/// every side (clamped to the field).
///
/// With an apron of one voxel, a block's range bounds every trilinear sample
/// taken inside its world-space region.
pub fn compute_blocks_with_apron(
    field: &ScalarField,
    counts: GridDims,
    apron: u32,
) -> Result<BlockGrid> {
    check_counts(counts)?;

    let sampler = field.sampler()?;
    let dims = field.dims();
    let block_size = dims.div_ceil(counts);
    let start_time = Instant::now();

    let ranges: Vec<BlockRange> = (0..counts.count())
        .into_par_iter()
        .map(|i| {
            let (bx, by, bz) = counts.coord(i);
            voxel_span(BlockCoord::new(bx, by, bz), block_size, dims).map_or(
                BlockRange::EMPTY,
                |(start, end)| {
                    let start = start.saturating_sub(UVec3::splat(apron));
                    let end = (end + UVec3::splat(apron)).min(dims.to_uvec3());
                    fold_span(&sampler, dims, start, end)
                },
            )
        })
        .collect();

    let grid = BlockGrid {
        field_dims: dims,
        counts,
        block_size,
        apron,
        ranges,
    };

    let empty = grid.empty_blocks();
    if empty > 0 {
        debug!("{} of {} blocks hold no voxels", empty, counts.count());
    }
    info!(
        "Computed {}x{}x{} block ranges (block {}x{}x{}, apron {}) in {:.2?}",
        counts.x,
        counts.y,
        counts.z,
        block_size.x,
        block_size.y,
        block_size.z,
        apron,
        start_time.elapsed()
    );

    Ok(grid)
}
