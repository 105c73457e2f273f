//! Whole-frame checks across renderer variants.

use std::sync::Arc;
use std::thread;

use volray_core::GridDims;
use volray_render::{DebugMode, RenderConfig, RendererKind, SteppingPolicy, VolumeRenderer};
use volray_volume::{generate, AccelerationStructure, ScalarField};

fn sphere() -> Arc<ScalarField> {
    Arc::new(generate::sphere(GridDims::splat(32), 8.0).unwrap())
}

fn config() -> RenderConfig {
    RenderConfig::default()
        .with_resolution(48, 48)
        .with_block_counts(GridDims::splat(8))
}

fn mismatches(a: &[bool], b: &[bool]) -> usize {
    a.iter().zip(b).filter(|(x, y)| x != y).count()
}

#[test]
fn adaptive_matches_reference_coverage() {
    let adaptive = VolumeRenderer::new(RendererKind::IsosurfaceAdaptive, sphere(), config()).unwrap();
    let reference = VolumeRenderer::new(RendererKind::IsosurfaceReference, sphere(), config()).unwrap();

    let a = adaptive.render().unwrap();
    let r = reference.render().unwrap();
    let hits = a.hit_mask().iter().filter(|&&h| h).count();
    assert!(hits > 50, "sphere covers only {hits} pixels");

    // Rays that graze the surface over less than one fine step may differ.
    assert!(mismatches(&a.hit_mask(), &r.hit_mask()) <= 2);
    assert!(a.total_steps() * 3 < r.total_steps());

    for (da, dr) in a.depth().iter().zip(r.depth()) {
        if da.is_finite() && dr.is_finite() {
            assert!((da - dr).abs() < 0.25, "depth {da} vs {dr}");
        }
    }
}

#[test]
fn deferred_matches_single_pass_geometry() {
    let single = VolumeRenderer::new(RendererKind::IsosurfaceAdaptive, sphere(), config()).unwrap();
    let deferred = VolumeRenderer::new(RendererKind::DeferredShading, sphere(), config()).unwrap();

    let s = single.render().unwrap();
    let d = deferred.render().unwrap();
    assert_eq!(s.hit_mask(), d.hit_mask());
    assert_eq!(s.steps(), d.steps());
    for (a, b) in s.rgba().iter().zip(d.rgba()) {
        assert!(a.abs_diff(*b) <= 2);
    }
}

#[test]
fn hierarchical_skip_does_not_change_coverage() {
    let flat_config = config().with_hierarchical_skip(false);
    let flat = VolumeRenderer::new(RendererKind::IsosurfaceAdaptive, sphere(), flat_config).unwrap();
    let pyramid = VolumeRenderer::new(RendererKind::IsosurfaceAdaptive, sphere(), config()).unwrap();

    let f = flat.render().unwrap();
    let p = pyramid.render().unwrap();
    assert!(mismatches(&f.hit_mask(), &p.hit_mask()) <= 2);
    assert!(p.skipped().iter().sum::<u32>() > 0);
}

#[test]
fn target_change_moves_surface() {
    let mut renderer = VolumeRenderer::new(RendererKind::IsosurfaceAdaptive, sphere(), config()).unwrap();
    let small = renderer.render().unwrap();

    // A lower isovalue is a larger sphere.
    renderer
        .set_policy(SteppingPolicy::default().with_target(0.3).unwrap())
        .unwrap();
    let large = renderer.render().unwrap();

    let count = |m: Vec<bool>| m.into_iter().filter(|&h| h).count();
    assert!(count(large.hit_mask()) > count(small.hit_mask()));
    assert_eq!(renderer.accel_handle().generation(), 0);
}

#[test]
fn debug_modes_render() {
    for mode in [
        DebugMode::TraversalSteps,
        DebugMode::Depth,
        DebugMode::Normals,
        DebugMode::BlockOccupancy,
    ] {
        let renderer = VolumeRenderer::new(
            RendererKind::IsosurfaceAdaptive,
            sphere(),
            config().with_debug_mode(mode),
        )
        .unwrap();
        let frame = renderer.render().unwrap();
        assert_eq!(frame.rgba().len(), 48 * 48 * 4);
    }
}

#[test]
fn frames_render_while_structures_are_swapped() {
    let field = sphere();
    let renderer = VolumeRenderer::new(RendererKind::IsosurfaceAdaptive, Arc::clone(&field), config()).unwrap();
    let handle = renderer.accel_handle().clone();

    let publisher = thread::spawn(move || {
        for counts in [2, 4, 8, 16, 4] {
            let accel = AccelerationStructure::build_with_apron(&field, GridDims::splat(counts), 1).unwrap();
            handle.publish(accel);
        }
    });

    let baseline = renderer.render().unwrap().hit_mask();
    for _ in 0..3 {
        let frame = renderer.render().unwrap();
        assert!(mismatches(&baseline, &frame.hit_mask()) <= 4);
    }
    publisher.join().unwrap();
    assert_eq!(renderer.accel_handle().generation(), 5);
}
