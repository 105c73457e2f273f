//! End-to-end partitioning checks over generated and decoded fields.

use glam::Vec3;
use volray_core::{BlockCoord, GridDims, StorageEncoding, ValueRange, VoxelCoord};
use volray_volume::{compute_blocks, compute_blocks_with_apron, generate, AccelerationStructure, BlockRange, ScalarField};

#[test]
fn hot_voxel_scenario() {
    let field = generate::single_voxel(GridDims::splat(8), 3, 3, 3).unwrap();
    let accel = AccelerationStructure::build(&field, GridDims::splat(4)).unwrap();

    assert_eq!(accel.range(BlockCoord::new(1, 1, 1)), Some(BlockRange::new(0.0, 1.0)));
    let zero_blocks = accel
        .grid()
        .iter()
        .filter(|(_, r)| *r == BlockRange::new(0.0, 0.0))
        .count();
    assert_eq!(zero_blocks, 63);

    let iso = ValueRange::around(0.5, 0.1);
    assert!(accel.overlaps(BlockCoord::new(1, 1, 1), &iso));
    assert!(!accel.overlaps(BlockCoord::new(2, 1, 1), &iso));
}

#[test]
fn encodings_agree_on_ranges() {
    let dims = GridDims::new(6, 5, 4);
    let raw: Vec<u8> = (0..dims.count()).map(|i| (i * 37 % 256) as u8).collect();
    let as_u8 = ScalarField::from_le_bytes(dims, StorageEncoding::Bits8, &raw, Vec3::ONE).unwrap();

    let wide: Vec<u8> = raw
        .iter()
        .flat_map(|&v| (u16::from(v) * 257).to_le_bytes())
        .collect();
    let as_u16 = ScalarField::from_le_bytes(dims, StorageEncoding::Bits16, &wide, Vec3::ONE).unwrap();

    let counts = GridDims::new(2, 2, 3);
    let a = compute_blocks(&as_u8, counts).unwrap();
    let b = compute_blocks(&as_u16, counts).unwrap();
    for ((_, ra), (_, rb)) in a.iter().zip(b.iter()) {
        assert!((ra.min - rb.min).abs() < 1e-6);
        assert!((ra.max - rb.max).abs() < 1e-6);
    }
}

#[test]
fn apron_ranges_bound_trilinear_samples() {
    let dims = GridDims::splat(16);
    let field = generate::sphere(dims, 5.0).unwrap();
    let grid = compute_blocks_with_apron(&field, GridDims::splat(4), 1).unwrap();
    let accel = AccelerationStructure::from_grid(grid, field.voxel_scale());
    let sampler = field.sampler().unwrap();

    // Sweep positions on a grid finer than the voxels, including block faces.
    let steps = 64;
    for k in 0..steps {
        for j in 0..steps {
            for i in 0..steps {
                let p = Vec3::new(i as f32, j as f32, k as f32) * (16.0 / (steps - 1) as f32);
                let d = sampler.trilinear(p);
                let block = accel.block_at_world(p);
                let range = accel.range(block).unwrap();
                assert!(
                    range.min - 1e-6 <= d && d <= range.max + 1e-6,
                    "sample {d} at {p} outside {range:?}"
                );
            }
        }
    }
}

#[test]
fn pyramid_levels_bound_their_children() {
    let field = generate::noise_blob(GridDims::new(40, 24, 33), &Default::default()).unwrap();
    let accel = AccelerationStructure::build(&field, GridDims::new(10, 6, 7)).unwrap();

    for level in 1..accel.level_count() {
        let fine = accel.level(level - 1).unwrap();
        let coarse = accel.level(level).unwrap();
        for (coord, range) in fine.iter().filter(|(_, r)| !r.is_empty()) {
            let parent = coarse.range(coord.parent()).unwrap();
            assert!(parent.min <= range.min && parent.max >= range.max);
        }
    }
}

#[test]
fn voxel_lookup_matches_floor_for_even_dims() {
    let field = generate::constant(GridDims::splat(16), 0.2).unwrap();
    let accel = AccelerationStructure::build(&field, GridDims::splat(4)).unwrap();
    for i in 0..16 {
        let n = (i as f32 + 0.5) / 16.0;
        let expected = (n * 4.0).floor() as u32;
        let b = accel.block_at_normalized(Vec3::splat(n));
        assert_eq!(b, BlockCoord::new(expected, expected, expected));
        assert_eq!(b, accel.block_at_voxel(VoxelCoord::new(i, i, i)));
    }
}
