//! Synthetic volumes for testing and demos.

use glam::Vec3;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use volray_core::{GridDims, Result};

use crate::field::{Samples, ScalarField};

/// Fill an `f32` field in parallel, one z slice per task.
///
/// `f` receives the voxel-centre position in voxel units.
fn fill(dims: GridDims, f: impl Fn(Vec3) -> f32 + Sync) -> Result<ScalarField> {
    let plane = dims.x as usize * dims.y as usize;
    let mut data = vec![0.0f32; dims.count()];
    if plane > 0 {
        data.par_chunks_mut(plane).enumerate().for_each(|(z, slice)| {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let p = Vec3::new(x as f32, y as f32, z as f32) + Vec3::splat(0.5);
                    slice[y as usize * dims.x as usize + x as usize] = f(p).clamp(0.0, 1.0);
                }
            }
        });
    }
    ScalarField::with_unit_scale(dims, Samples::F32(data))
}

/// Radial density centred in the grid.
///
/// Density is 1 at the centre and falls linearly, crossing 0.5 at `radius`
/// voxels and reaching 0 at twice that.
pub fn sphere(dims: GridDims, radius: f32) -> Result<ScalarField> {
    let center = dims.to_vec3() * 0.5;
    let falloff = 2.0 * radius.max(f32::EPSILON);
    fill(dims, |p| 1.0 - p.distance(center) / falloff)
}

/// All zeros except one voxel at full density.
pub fn single_voxel(dims: GridDims, x: u32, y: u32, z: u32) -> Result<ScalarField> {
    let mut data = vec![0u8; dims.count()];
    if dims.contains(x, y, z) {
        data[dims.index(x, y, z)] = u8::MAX;
    }
    ScalarField::with_unit_scale(dims, Samples::U8(data))
}

/// Uniform density everywhere.
pub fn constant(dims: GridDims, value: f32) -> Result<ScalarField> {
    ScalarField::with_unit_scale(dims, Samples::F32(vec![value.clamp(0.0, 1.0); dims.count()]))
}

/// Noise blob configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseBlobConfig {
    /// Seed for the noise generator.
    pub seed: u32,
    /// Blob radius as a fraction of the smallest grid extent.
    pub radius: f32,
    /// Feature size in voxels.
    pub scale: f64,
    /// Noise amplitude added to the radial falloff.
    pub amplitude: f32,
    /// Number of noise octaves.
    pub octaves: usize,
}

impl Default for NoiseBlobConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            radius: 0.3,
            scale: 24.0,
            amplitude: 0.35,
            octaves: 4,
        }
    }
}

/// A sphere perturbed by fractal Perlin noise.
pub fn noise_blob(dims: GridDims, config: &NoiseBlobConfig) -> Result<ScalarField> {
    let noise = Fbm::<Perlin>::new(config.seed)
        .set_octaves(config.octaves)
        .set_lacunarity(2.0)
        .set_persistence(0.5);

    let center = dims.to_vec3() * 0.5;
    let min_extent = dims.x.min(dims.y).min(dims.z) as f32;
    let falloff = 2.0 * (config.radius * min_extent).max(f32::EPSILON);
    let inv_scale = 1.0 / config.scale.max(f64::EPSILON);

    fill(dims, |p| {
        let radial = 1.0 - p.distance(center) / falloff;
        let n = noise.get([
            f64::from(p.x) * inv_scale,
            f64::from(p.y) * inv_scale,
            f64::from(p.z) * inv_scale,
        ]) as f32;
        radial + config.amplitude * n
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_crosses_half_at_radius() {
        let field = sphere(GridDims::splat(32), 8.0).unwrap();
        let s = field.sampler().unwrap();
        assert!(s.at(16, 16, 16).unwrap() > 0.9);
        assert!(s.at(16, 16, 26).unwrap() < 0.5);
        assert!(s.at(16, 16, 21).unwrap() > 0.5);
        assert_eq!(s.at(0, 0, 0).unwrap(), 0.0);
    }

    #[test]
    fn single_voxel_is_hot() {
        let field = single_voxel(GridDims::splat(4), 1, 2, 3).unwrap();
        assert_eq!(field.sample(1, 2, 3).unwrap(), 1.0);
        assert_eq!(field.sample(3, 2, 1).unwrap(), 0.0);
    }

    #[test]
    fn noise_blob_is_deterministic_and_normalised() {
        let dims = GridDims::splat(16);
        let config = NoiseBlobConfig::default();
        let a = noise_blob(dims, &config).unwrap();
        let b = noise_blob(dims, &config).unwrap();
        assert_eq!(a.samples(), b.samples());

        let s = a.sampler().unwrap();
        assert!((0..dims.count()).all(|i| (0.0..=1.0).contains(&s.at_index(i))));
    }
}
