//! Volume sources selectable from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use glam::Vec3;
use tracing::info;
use volray_core::{GridDims, StorageEncoding};
use volray_volume::{generate, io, NoiseBlobConfig, ScalarField};

/// Where the rendered field comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeSource {
    /// Radial falloff crossing 0.5 at `radius` voxels.
    Sphere { radius: f32 },
    /// Noise-perturbed blob.
    Noise(NoiseBlobConfig),
    /// One hot voxel in the centre of an empty grid.
    Voxel,
    /// Headerless little-endian file.
    Raw {
        path: PathBuf,
        encoding: StorageEncoding,
        scale: Vec3,
    },
}

impl Default for VolumeSource {
    fn default() -> Self {
        Self::Sphere { radius: 16.0 }
    }
}

impl VolumeSource {
    /// Generate or load the field.
    pub fn load(&self, dims: GridDims) -> anyhow::Result<Arc<ScalarField>> {
        let field = match self {
            Self::Sphere { radius } => generate::sphere(dims, *radius)?,
            Self::Noise(config) => generate::noise_blob(dims, config)?,
            Self::Voxel => generate::single_voxel(dims, dims.x / 2, dims.y / 2, dims.z / 2)?,
            Self::Raw {
                path,
                encoding,
                scale,
            } => io::load_raw(path, dims, *encoding, *scale)?,
        };
        info!(
            "Volume {}x{}x{} ({})",
            field.dims().x,
            field.dims().y,
            field.dims().z,
            field.encoding()
        );
        Ok(Arc::new(field))
    }
}
