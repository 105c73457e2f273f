//! Structured scalar fields and the voxel sampler.
//!
//! A [`ScalarField`] owns the raw samples of a `width × height × depth` grid in
//! their storage encoding. All density reads go through a [`VoxelSampler`],
//! which checks the encoding once and then normalises samples into `[0, 1]`.

use std::hash::{DefaultHasher, Hash, Hasher};

use glam::Vec3;
use tracing::debug;
use volray_core::{Aabb, Error, GridDims, Result, StorageEncoding, VoxelCoord};

/// Raw sample storage, one variant per encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    U32(Vec<u32>),
}

impl Samples {
    /// Encoding of the stored samples.
    pub const fn encoding(&self) -> StorageEncoding {
        match self {
            Self::U8(_) => StorageEncoding::Bits8,
            Self::U16(_) => StorageEncoding::Bits16,
            Self::F32(_) => StorageEncoding::NormalizedF32,
            Self::F64(_) => StorageEncoding::NormalizedF64,
            Self::U32(_) => StorageEncoding::Raw32,
        }
    }

    /// Samples as native-endian bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U8(v) => v.as_slice(),
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::F32(v) => bytemuck::cast_slice(v),
            Self::F64(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
        }
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    /// Returns true if no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode little-endian bytes in the given encoding.
    pub fn from_le_bytes(bytes: &[u8], encoding: StorageEncoding) -> Result<Self> {
        let stride = encoding.bytes_per_sample();
        if bytes.len() % stride != 0 {
            return Err(Error::InvalidData(format!(
                "{} bytes is not a whole number of {encoding} samples",
                bytes.len()
            )));
        }

        // Reinterpret through `pod_collect_to_vec` so unaligned input is fine,
        // then fix byte order per sample.
        let samples = match encoding {
            StorageEncoding::Bits8 => Self::U8(bytes.to_vec()),
            StorageEncoding::Bits16 => Self::U16(
                bytemuck::pod_collect_to_vec::<u8, u16>(bytes)
                    .into_iter()
                    .map(u16::from_le)
                    .collect(),
            ),
            StorageEncoding::NormalizedF32 => Self::F32(
                bytemuck::pod_collect_to_vec::<u8, u32>(bytes)
                    .into_iter()
                    .map(|bits| f32::from_bits(u32::from_le(bits)))
                    .collect(),
            ),
            StorageEncoding::NormalizedF64 => Self::F64(
                bytemuck::pod_collect_to_vec::<u8, u64>(bytes)
                    .into_iter()
                    .map(|bits| f64::from_bits(u64::from_le(bits)))
                    .collect(),
            ),
            StorageEncoding::Raw32 => Self::U32(
                bytemuck::pod_collect_to_vec::<u8, u32>(bytes)
                    .into_iter()
                    .map(u32::from_le)
                    .collect(),
            ),
        };
        Ok(samples)
    }
}

/// A structured scalar volume.
///
/// Samples are stored in z-major order: `index = z·(w·h) + y·w + x`.
#[derive(Clone, Debug)]
pub struct ScalarField {
    dims: GridDims,
    samples: Samples,
    voxel_scale: Vec3,
}

impl ScalarField {
    /// Create a field, validating the sample count and voxel scale.
    pub fn new(dims: GridDims, samples: Samples, voxel_scale: Vec3) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::InvalidData(format!("field dimensions {dims:?} are empty")));
        }
        if samples.len() != dims.count() {
            return Err(Error::InvalidData(format!(
                "expected {} samples for {}x{}x{}, got {}",
                dims.count(),
                dims.x,
                dims.y,
                dims.z,
                samples.len()
            )));
        }
        if !voxel_scale.is_finite() || voxel_scale.cmple(Vec3::ZERO).any() {
            return Err(Error::InvalidData(format!(
                "voxel scale must be positive, got {voxel_scale}"
            )));
        }

        debug!(
            "Scalar field {}x{}x{} ({}) scale {}",
            dims.x,
            dims.y,
            dims.z,
            samples.encoding(),
            voxel_scale
        );

        Ok(Self {
            dims,
            samples,
            voxel_scale,
        })
    }

    /// Create a field with unit voxel scale.
    pub fn with_unit_scale(dims: GridDims, samples: Samples) -> Result<Self> {
        Self::new(dims, samples, Vec3::ONE)
    }

    /// Decode a field from little-endian raw bytes.
    pub fn from_le_bytes(
        dims: GridDims,
        encoding: StorageEncoding,
        bytes: &[u8],
        voxel_scale: Vec3,
    ) -> Result<Self> {
        let expected = dims.count() * encoding.bytes_per_sample();
        if bytes.len() != expected {
            return Err(Error::InvalidData(format!(
                "expected {expected} bytes of {encoding} data, got {}",
                bytes.len()
            )));
        }
        Self::new(dims, Samples::from_le_bytes(bytes, encoding)?, voxel_scale)
    }

    /// Grid dimensions in voxels.
    #[inline]
    pub const fn dims(&self) -> GridDims {
        self.dims
    }

    /// Storage encoding of the samples.
    #[inline]
    pub const fn encoding(&self) -> StorageEncoding {
        self.samples.encoding()
    }

    /// Raw sample storage.
    #[inline]
    pub const fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Content hash of the dimensions, encoding and raw samples.
    ///
    /// Keys data derived from the samples, such as cached block ranges.
    /// Values are only comparable between builds of the same toolchain; a
    /// mismatch just forces a recompute.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.dims.hash(&mut hasher);
        self.encoding().hash(&mut hasher);
        hasher.write(self.samples.as_bytes());
        hasher.finish()
    }

    /// Physical size of one voxel.
    #[inline]
    pub const fn voxel_scale(&self) -> Vec3 {
        self.voxel_scale
    }

    /// Physical size of the whole grid.
    #[inline]
    pub fn world_extent(&self) -> Vec3 {
        self.dims.to_vec3() * self.voxel_scale
    }

    /// World-space bounding box, with the grid corner at the origin.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::new(Vec3::ZERO, self.world_extent())
    }

    /// Convert a world-space position to continuous voxel space.
    #[inline]
    pub fn world_to_voxel(&self, pos: Vec3) -> Vec3 {
        pos / self.voxel_scale
    }

    /// Create a sampler, failing if the encoding cannot be normalised.
    pub fn sampler(&self) -> Result<VoxelSampler<'_>> {
        let scale = self.encoding().normalization()?;
        Ok(VoxelSampler {
            field: self,
            inv_scale: 1.0 / scale,
        })
    }

    /// Normalised density at an integer voxel coordinate.
    pub fn sample(&self, x: u32, y: u32, z: u32) -> Result<f32> {
        self.sampler()?.at(x, y, z)
    }
}

/// Normalising reader over a [`ScalarField`] with a samplable encoding.
#[derive(Clone, Copy, Debug)]
pub struct VoxelSampler<'a> {
    field: &'a ScalarField,
    inv_scale: f64,
}

impl<'a> VoxelSampler<'a> {
    /// The field being sampled.
    #[inline]
    pub const fn field(&self) -> &'a ScalarField {
        self.field
    }

    /// Normalised density at a linear index.
    #[inline]
    pub fn at_index(&self, index: usize) -> f32 {
        match &self.field.samples {
            Samples::U8(v) => (f64::from(v[index]) * self.inv_scale) as f32,
            Samples::U16(v) => (f64::from(v[index]) * self.inv_scale) as f32,
            Samples::F32(v) => v[index],
            Samples::F64(v) => v[index] as f32,
            // Unreachable: `ScalarField::sampler` rejects Raw32.
            Samples::U32(v) => (f64::from(v[index]) * self.inv_scale) as f32,
        }
    }

    /// Normalised density at an integer voxel coordinate.
    pub fn at(&self, x: u32, y: u32, z: u32) -> Result<f32> {
        let dims = self.field.dims;
        if !dims.contains(x, y, z) {
            return Err(Error::OutOfBounds(format!(
                "voxel ({x}, {y}, {z}) outside {}x{}x{}",
                dims.x, dims.y, dims.z
            )));
        }
        Ok(self.at_index(dims.index(x, y, z)))
    }

    #[inline]
    fn at_clamped(&self, x: u32, y: u32, z: u32) -> f32 {
        let dims = self.field.dims;
        self.at_index(dims.index(x.min(dims.x - 1), y.min(dims.y - 1), z.min(dims.z - 1)))
    }

    /// Density of the voxel containing a world-space position.
    pub fn nearest(&self, world: Vec3) -> f32 {
        let v = VoxelCoord::containing(self.field.world_to_voxel(world), self.field.dims);
        self.at_index(self.field.dims.index(v.x, v.y, v.z))
    }

    /// Trilinear density at a world-space position.
    ///
    /// Voxel values sit at voxel centres; positions beyond the outermost
    /// centres clamp to the border voxels.
    pub fn trilinear(&self, world: Vec3) -> f32 {
        let dims = self.field.dims;
        let max = dims.to_vec3() - Vec3::ONE;
        let c = (self.field.world_to_voxel(world) - Vec3::splat(0.5)).clamp(Vec3::ZERO, max);
        let base = c.floor();
        let f = c - base;
        let (x0, y0, z0) = (base.x as u32, base.y as u32, base.z as u32);

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let c00 = lerp(self.at_clamped(x0, y0, z0), self.at_clamped(x0 + 1, y0, z0), f.x);
        let c10 = lerp(self.at_clamped(x0, y0 + 1, z0), self.at_clamped(x0 + 1, y0 + 1, z0), f.x);
        let c01 = lerp(self.at_clamped(x0, y0, z0 + 1), self.at_clamped(x0 + 1, y0, z0 + 1), f.x);
        let c11 = lerp(
            self.at_clamped(x0, y0 + 1, z0 + 1),
            self.at_clamped(x0 + 1, y0 + 1, z0 + 1),
            f.x,
        );
        lerp(lerp(c00, c10, f.y), lerp(c01, c11, f.y), f.z)
    }

    /// World-space density gradient by central differences of one voxel.
    pub fn gradient(&self, world: Vec3) -> Vec3 {
        let h = self.field.voxel_scale;
        let dx = Vec3::new(h.x, 0.0, 0.0);
        let dy = Vec3::new(0.0, h.y, 0.0);
        let dz = Vec3::new(0.0, 0.0, h.z);
        Vec3::new(
            (self.trilinear(world + dx) - self.trilinear(world - dx)) / (2.0 * h.x),
            (self.trilinear(world + dy) - self.trilinear(world - dy)) / (2.0 * h.y),
            (self.trilinear(world + dz) - self.trilinear(world - dz)) / (2.0 * h.z),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_x(dims: GridDims) -> ScalarField {
        let mut data = vec![0.0f32; dims.count()];
        for (i, v) in data.iter_mut().enumerate() {
            let (x, _, _) = dims.coord(i);
            *v = x as f32 / (dims.x - 1) as f32;
        }
        ScalarField::with_unit_scale(dims, Samples::F32(data)).unwrap()
    }

    #[test]
    fn fingerprint_tracks_content() {
        let dims = GridDims::new(2, 1, 1);
        let a = ScalarField::with_unit_scale(dims, Samples::U8(vec![0, 255])).unwrap();
        let b = ScalarField::with_unit_scale(dims, Samples::U8(vec![0, 255])).unwrap();
        let c = ScalarField::with_unit_scale(dims, Samples::U8(vec![0, 254])).unwrap();
        // Same normalised densities in another encoding.
        let d = ScalarField::with_unit_scale(dims, Samples::F32(vec![0.0, 1.0])).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn normalizes_u8() {
        let dims = GridDims::new(2, 1, 1);
        let field = ScalarField::with_unit_scale(dims, Samples::U8(vec![0, 255])).unwrap();
        assert_eq!(field.sample(0, 0, 0).unwrap(), 0.0);
        assert_eq!(field.sample(1, 0, 0).unwrap(), 1.0);
    }

    #[test]
    fn normalizes_u16() {
        let dims = GridDims::new(1, 1, 1);
        let field = ScalarField::with_unit_scale(dims, Samples::U16(vec![65535])).unwrap();
        assert_eq!(field.sample(0, 0, 0).unwrap(), 1.0);
    }

    #[test]
    fn float_samples_pass_through() {
        let dims = GridDims::new(1, 1, 2);
        let f32_field = ScalarField::with_unit_scale(dims, Samples::F32(vec![0.25, 0.75])).unwrap();
        assert_eq!(f32_field.sample(0, 0, 1).unwrap(), 0.75);
        let f64_field = ScalarField::with_unit_scale(dims, Samples::F64(vec![0.5, 0.125])).unwrap();
        assert_eq!(f64_field.sample(0, 0, 1).unwrap(), 0.125);
    }

    #[test]
    fn raw32_is_unsupported() {
        let dims = GridDims::new(1, 1, 1);
        let field = ScalarField::with_unit_scale(dims, Samples::U32(vec![7])).unwrap();
        assert!(matches!(field.sample(0, 0, 0), Err(Error::UnsupportedEncoding(_))));
        assert!(field.sampler().is_err());
    }

    #[test]
    fn rejects_wrong_sample_count() {
        let dims = GridDims::new(2, 2, 2);
        let err = ScalarField::with_unit_scale(dims, Samples::U8(vec![0; 7])).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn rejects_non_positive_scale() {
        let dims = GridDims::new(1, 1, 1);
        let err = ScalarField::new(dims, Samples::U8(vec![0]), Vec3::new(1.0, 0.0, 1.0));
        assert!(err.is_err());
    }

    #[test]
    fn out_of_bounds_sample() {
        let field = ramp_x(GridDims::splat(4));
        assert!(matches!(field.sample(4, 0, 0), Err(Error::OutOfBounds(_))));
    }

    #[test]
    fn decodes_little_endian_u16() {
        let dims = GridDims::new(2, 1, 1);
        let bytes = [0x00, 0x00, 0xFF, 0xFF];
        let field = ScalarField::from_le_bytes(dims, StorageEncoding::Bits16, &bytes, Vec3::ONE).unwrap();
        assert_eq!(field.sample(1, 0, 0).unwrap(), 1.0);
    }

    #[test]
    fn byte_length_mismatch() {
        let dims = GridDims::new(2, 1, 1);
        let err = ScalarField::from_le_bytes(dims, StorageEncoding::Bits16, &[0, 0, 0], Vec3::ONE);
        assert!(err.is_err());
    }

    #[test]
    fn trilinear_hits_voxel_centres() {
        let field = ramp_x(GridDims::splat(4));
        let sampler = field.sampler().unwrap();
        assert_relative_eq!(sampler.trilinear(Vec3::new(0.5, 1.5, 1.5)), 0.0);
        assert_relative_eq!(sampler.trilinear(Vec3::new(3.5, 1.5, 1.5)), 1.0);
        assert_relative_eq!(sampler.trilinear(Vec3::new(2.0, 1.5, 1.5)), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn nearest_uses_containing_voxel() {
        let field = ramp_x(GridDims::splat(4));
        let sampler = field.sampler().unwrap();
        assert_relative_eq!(sampler.nearest(Vec3::new(1.9, 0.0, 0.0)), 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn gradient_of_ramp_points_along_x() {
        let field = ramp_x(GridDims::splat(8));
        let g = field.sampler().unwrap().gradient(Vec3::splat(4.0));
        assert!(g.x > 0.0);
        assert_relative_eq!(g.y, 0.0);
        assert_relative_eq!(g.z, 0.0);
    }
}
