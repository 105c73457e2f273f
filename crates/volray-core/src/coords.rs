//! Grid dimensions and integer coordinates.

use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Extent of a 3D grid (voxels of a field, or blocks of a partition).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDims {
    /// Create new dimensions.
    #[inline]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Same extent on all three axes.
    #[inline]
    pub const fn splat(n: u32) -> Self {
        Self::new(n, n, n)
    }

    /// Dimensions from signed input, rejecting zero or negative axes.
    pub fn try_from_signed(x: i64, y: i64, z: i64) -> Result<Self> {
        let axis = |v: i64, name: &str| -> Result<u32> {
            if v <= 0 {
                return Err(Error::config(format!("{name} must be positive, got {v}")));
            }
            u32::try_from(v).map_err(|_| Error::config(format!("{name} is too large: {v}")))
        };
        Ok(Self::new(axis(x, "x")?, axis(y, "y")?, axis(z, "z")?))
    }

    /// Number of cells in the grid.
    #[inline]
    pub const fn count(self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }

    /// Returns true if any axis is zero.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }

    /// Returns true if the coordinate lies inside the grid.
    #[inline]
    pub const fn contains(self, x: u32, y: u32, z: u32) -> bool {
        x < self.x && y < self.y && z < self.z
    }

    /// Linear index in z-major, then y, then x order.
    #[inline]
    pub const fn index(self, x: u32, y: u32, z: u32) -> usize {
        z as usize * (self.x as usize * self.y as usize) + y as usize * self.x as usize + x as usize
    }

    /// Inverse of [`GridDims::index`].
    #[inline]
    pub const fn coord(self, index: usize) -> (u32, u32, u32) {
        let plane = self.x as usize * self.y as usize;
        let z = index / plane;
        let rem = index % plane;
        ((rem % self.x as usize) as u32, (rem / self.x as usize) as u32, z as u32)
    }

    /// Per-axis ceiling division `ceil(self / parts)`.
    #[inline]
    pub const fn div_ceil(self, parts: Self) -> Self {
        Self::new(
            self.x.div_ceil(parts.x),
            self.y.div_ceil(parts.y),
            self.z.div_ceil(parts.z),
        )
    }

    /// Convert to glam UVec3
    #[inline]
    pub const fn to_uvec3(self) -> UVec3 {
        UVec3::new(self.x, self.y, self.z)
    }

    /// Convert to floating point Vec3
    #[inline]
    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32)
    }
}

impl From<UVec3> for GridDims {
    fn from(v: UVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Integer voxel coordinate inside a field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VoxelCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl VoxelCoord {
    /// Create a new voxel coordinate
    #[inline]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Voxel containing a continuous voxel-space position, clamped to `dims`.
    #[inline]
    pub fn containing(pos: Vec3, dims: GridDims) -> Self {
        let clamp = |v: f32, n: u32| -> u32 {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v.floor() as u32).min(n.saturating_sub(1))
            }
        };
        Self::new(clamp(pos.x, dims.x), clamp(pos.y, dims.y), clamp(pos.z, dims.z))
    }
}

/// Coordinate of a block inside a block partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockCoord {
    /// Create a new block coordinate
    #[inline]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Block containing `voxel` for a partition with the given block size.
    #[inline]
    pub const fn of_voxel(voxel: VoxelCoord, block_size: GridDims, counts: GridDims) -> Self {
        Self::new(
            block_axis(voxel.x, block_size.x, counts.x),
            block_axis(voxel.y, block_size.y, counts.y),
            block_axis(voxel.z, block_size.z, counts.z),
        )
    }

    /// Parent block one level coarser.
    #[inline]
    pub const fn parent(self) -> Self {
        Self::new(self.x / 2, self.y / 2, self.z / 2)
    }
}

#[inline]
const fn block_axis(voxel: u32, size: u32, count: u32) -> u32 {
    let b = voxel / size;
    if b >= count {
        count - 1
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_coord_roundtrip() {
        let dims = GridDims::new(5, 3, 7);
        for index in 0..dims.count() {
            let (x, y, z) = dims.coord(index);
            assert_eq!(dims.index(x, y, z), index);
        }
    }

    #[test]
    fn index_is_z_major() {
        let dims = GridDims::new(4, 3, 2);
        assert_eq!(dims.index(1, 0, 0), 1);
        assert_eq!(dims.index(0, 1, 0), 4);
        assert_eq!(dims.index(0, 0, 1), 12);
    }

    #[test]
    fn signed_dims_reject_non_positive() {
        assert!(GridDims::try_from_signed(4, 0, 4).unwrap_err().is_configuration());
        assert!(GridDims::try_from_signed(-1, 4, 4).is_err());
        assert_eq!(GridDims::try_from_signed(4, 4, 2).unwrap(), GridDims::new(4, 4, 2));
    }

    #[test]
    fn ceil_division() {
        let block = GridDims::new(10, 8, 3).div_ceil(GridDims::splat(4));
        assert_eq!(block, GridDims::new(3, 2, 1));
    }

    #[test]
    fn voxel_containing_clamps() {
        let dims = GridDims::splat(8);
        assert_eq!(VoxelCoord::containing(Vec3::new(-2.0, 3.5, 100.0), dims), VoxelCoord::new(0, 3, 7));
    }

    #[test]
    fn block_of_voxel_clamps_to_last_block() {
        let counts = GridDims::splat(4);
        let size = GridDims::splat(3);
        let b = BlockCoord::of_voxel(VoxelCoord::new(9, 2, 11), size, counts);
        assert_eq!(b, BlockCoord::new(3, 0, 3));
    }
}
