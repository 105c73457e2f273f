use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use volray_core::GridDims;
use volray_volume::{compute_blocks, generate, AccelerationStructure, NoiseBlobConfig};

fn partition(c: &mut Criterion) {
    let field = generate::noise_blob(GridDims::splat(128), &NoiseBlobConfig::default())
        .expect("generate field");

    let mut group = c.benchmark_group("compute_blocks");
    for count in [4u32, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| compute_blocks(black_box(&field), GridDims::splat(count)));
        });
    }
    group.finish();

    c.bench_function("accel_pyramid_32", |b| {
        b.iter(|| AccelerationStructure::build(black_box(&field), GridDims::splat(32)));
    });
}

criterion_group!(benches, partition);
criterion_main!(benches);
