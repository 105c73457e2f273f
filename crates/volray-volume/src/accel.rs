//! Queryable block-range acceleration structure.
//!
//! Level 0 is the block grid computed from the field. Each further level
//! merges 2×2×2 blocks of the previous one until a single block remains, so a
//! ray can skip the largest enclosing region that cannot hold the feature.

use glam::Vec3;
use tracing::debug;
use volray_core::constants::SKIP_NUDGE_VOXELS;
use volray_core::{Aabb, BlockCoord, GridDims, Ray, Result, ValueRange, VoxelCoord};

use crate::blocks::{compute_blocks_with_apron, BlockGrid, BlockRange};
use crate::field::ScalarField;

/// Block ranges for a field at every pyramid level.
#[derive(Clone, Debug)]
pub struct AccelerationStructure {
    levels: Vec<BlockGrid>,
    voxel_scale: Vec3,
}

impl AccelerationStructure {
    /// Partition `field` into `counts` blocks and build the pyramid.
    pub fn build(field: &ScalarField, counts: GridDims) -> Result<Self> {
        Self::build_with_apron(field, counts, 0)
    }

    /// Like [`AccelerationStructure::build`], with an apron around each block.
    pub fn build_with_apron(field: &ScalarField, counts: GridDims, apron: u32) -> Result<Self> {
        let grid = compute_blocks_with_apron(field, counts, apron)?;
        Ok(Self::from_grid(grid, field.voxel_scale()))
    }

    /// Build the pyramid over an already computed grid.
    pub fn from_grid(grid: BlockGrid, voxel_scale: Vec3) -> Self {
        let mut levels = vec![grid];
        while let Some(last) = levels.last() {
            let counts = last.counts();
            if counts.x == 1 && counts.y == 1 && counts.z == 1 {
                break;
            }
            let next = last.downsample_2x();
            levels.push(next);
        }
        debug!("Acceleration structure with {} levels", levels.len());

        Self {
            levels,
            voxel_scale,
        }
    }

    /// The finest block grid.
    #[inline]
    pub fn grid(&self) -> &BlockGrid {
        &self.levels[0]
    }

    /// Grid at a pyramid level (0 is finest).
    #[inline]
    pub fn level(&self, level: usize) -> Option<&BlockGrid> {
        self.levels.get(level)
    }

    /// Number of pyramid levels.
    #[inline]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Block counts of the finest level.
    #[inline]
    pub fn counts(&self) -> GridDims {
        self.grid().counts()
    }

    /// Dimensions of the field the structure was built from.
    #[inline]
    pub fn field_dims(&self) -> GridDims {
        self.grid().field_dims()
    }

    /// Physical voxel size of the field.
    #[inline]
    pub const fn voxel_scale(&self) -> Vec3 {
        self.voxel_scale
    }

    /// Range of a finest-level block.
    #[inline]
    pub fn range(&self, coord: BlockCoord) -> Option<BlockRange> {
        self.grid().range(coord)
    }

    /// Finest block containing a voxel.
    #[inline]
    pub fn block_at_voxel(&self, voxel: VoxelCoord) -> BlockCoord {
        self.grid().block_of_voxel(voxel)
    }

    /// Finest block at a normalised position in `[0, 1]^3`, clamped.
    pub fn block_at_normalized(&self, pos: Vec3) -> BlockCoord {
        let dims = self.field_dims();
        self.block_at_voxel(VoxelCoord::containing(pos * dims.to_vec3(), dims))
    }

    /// Finest block at a world-space position, clamped.
    pub fn block_at_world(&self, pos: Vec3) -> BlockCoord {
        self.block_at_voxel(self.voxel_at_world(pos))
    }

    fn voxel_at_world(&self, pos: Vec3) -> VoxelCoord {
        VoxelCoord::containing(pos / self.voxel_scale, self.field_dims())
    }

    /// Returns true if the block's range intersects the query.
    ///
    /// Coordinates outside the grid never overlap.
    pub fn overlaps(&self, coord: BlockCoord, query: &ValueRange) -> bool {
        self.range(coord).is_some_and(|r| r.overlaps(query))
    }

    /// World-space box of a block at a pyramid level, without apron.
    pub fn block_bounds(&self, level: usize, coord: BlockCoord) -> Option<Aabb> {
        let (start, end) = self.levels.get(level)?.voxel_bounds(coord)?;
        Some(Aabb::new(
            start.as_vec3() * self.voxel_scale,
            end.as_vec3() * self.voxel_scale,
        ))
    }

    /// Ray parameter just past the largest block around `ray.at(t)` whose
    /// range cannot intersect `query`.
    ///
    /// With `hierarchical` off only the finest level is consulted. Returns
    /// `None` when every enclosing block may hold the feature. A returned
    /// value is always greater than `t`.
    pub fn skip_exit(&self, ray: &Ray, t: f32, query: &ValueRange, hierarchical: bool) -> Option<f32> {
        let voxel = self.voxel_at_world(ray.at(t));
        let nudge = SKIP_NUDGE_VOXELS * self.voxel_scale.min_element();
        let top = if hierarchical { self.levels.len() } else { 1 };

        (0..top).rev().find_map(|level| {
            let grid = &self.levels[level];
            let coord = grid.block_of_voxel(voxel);
            let range = grid.range(coord)?;
            if range.overlaps(query) {
                return None;
            }
            let bounds = self.block_bounds(level, coord)?;
            let (_, t_exit) = bounds.intersect_ray(ray)?;
            Some(t_exit.max(t) + nudge)
        })
    }

    /// Flat `[min, max]` pairs of the finest level.
    #[inline]
    pub fn as_flat(&self) -> &[f32] {
        self.grid().as_flat()
    }

    /// Per-block minima of the finest level.
    pub fn min_values(&self) -> Vec<f32> {
        self.grid().min_values()
    }

    /// Per-block maxima of the finest level.
    pub fn max_values(&self) -> Vec<f32> {
        self.grid().max_values()
    }
}
