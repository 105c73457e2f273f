//! Raw volume loading and the on-disk block cache.

use std::fs;
use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use volray_core::{Error, GridDims, Result, StorageEncoding};

use crate::blocks::BlockGrid;
use crate::field::ScalarField;

/// Load a headerless little-endian raw volume.
///
/// The caller supplies dimensions, encoding and voxel scale; the file length
/// must match exactly.
pub fn load_raw(
    path: impl AsRef<Path>,
    dims: GridDims,
    encoding: StorageEncoding,
    voxel_scale: Vec3,
) -> Result<ScalarField> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    info!(
        "Loaded {} ({} bytes, {}x{}x{} {})",
        path.display(),
        bytes.len(),
        dims.x,
        dims.y,
        dims.z,
        encoding
    );
    ScalarField::from_le_bytes(dims, encoding, &bytes, voxel_scale)
}

const CACHE_MAGIC: u32 = 0x5652_4243; // "VRBC"
const CACHE_VERSION: u32 = 2;

#[derive(Serialize, Deserialize)]
struct CacheFile {
    magic: u32,
    version: u32,
    encoding: StorageEncoding,
    fingerprint: u64,
    grid: BlockGrid,
}

/// Write the block grid computed from `field` to disk.
pub fn save_block_cache(path: impl AsRef<Path>, field: &ScalarField, grid: &BlockGrid) -> Result<()> {
    if grid.field_dims() != field.dims() {
        return Err(Error::InvalidData(format!(
            "block grid covers {:?}, field is {:?}",
            grid.field_dims(),
            field.dims()
        )));
    }
    let file = CacheFile {
        magic: CACHE_MAGIC,
        version: CACHE_VERSION,
        encoding: field.encoding(),
        fingerprint: field.fingerprint(),
        grid: grid.clone(),
    };
    let bytes = bincode::serialize(&file).map_err(|e| Error::Serialization(e.to_string()))?;
    fs::write(path.as_ref(), bytes)?;
    Ok(())
}

/// Read a cached block grid if it was computed from this exact field with
/// the same partition.
///
/// Returns `Ok(None)` when the cache belongs to other samples or another
/// partition, so the caller can recompute. A cache whose grid is malformed
/// is an `InvalidData` error.
pub fn load_block_cache(
    path: impl AsRef<Path>,
    field: &ScalarField,
    counts: GridDims,
    apron: u32,
) -> Result<Option<BlockGrid>> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let file: CacheFile =
        bincode::deserialize(&bytes).map_err(|e| Error::Serialization(e.to_string()))?;

    if file.magic != CACHE_MAGIC || file.version != CACHE_VERSION {
        return Err(Error::InvalidData(format!(
            "{} is not a version {CACHE_VERSION} block cache",
            path.display()
        )));
    }

    let grid = file.grid;
    grid.validate()?;

    if file.encoding != field.encoding() || file.fingerprint != field.fingerprint() {
        warn!("Block cache {} was built from other samples, ignoring", path.display());
        return Ok(None);
    }
    if grid.field_dims() != field.dims() || grid.counts() != counts || grid.apron() != apron {
        warn!("Block cache {} is stale, ignoring", path.display());
        return Ok(None);
    }
    Ok(Some(grid))
}
