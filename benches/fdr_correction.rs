//! FDR correction and masked codec benchmarks
//!
//! Line-level runs correct one p-value per masked voxel, so both paths scale
//! with the mask size (typically 10^5 to 10^7 voxels).
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array3;
use phenostat::fdr::benjamini_hochberg;
use phenostat::masked::{flatten, rebuild, Mask};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn random_pvalues(n: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n).map(|_| rng.gen::<f32>()).collect()
}

fn bench_benjamini_hochberg(c: &mut Criterion) {
    let mut group = c.benchmark_group("benjamini_hochberg");
    for size in [10_000usize, 100_000, 1_000_000] {
        let pvalues = random_pvalues(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &pvalues, |b, p| {
            b.iter(|| benjamini_hochberg(black_box(p)))
        });
    }
    group.finish();
}

fn bench_flatten_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("masked_codec");
    for edge in [32usize, 64, 128] {
        let mut rng = StdRng::seed_from_u64(7);
        let volume = Array3::from_shape_fn((edge, edge, edge), |_| rng.gen::<f32>());
        // Roughly a sphere, like an embryo mask
        let centre = edge as f32 / 2.0;
        let mask = Mask::new(Array3::from_shape_fn((edge, edge, edge), |(x, y, z)| {
            let d = [x, y, z].iter().map(|&i| (i as f32 - centre).powi(2)).sum::<f32>();
            d.sqrt() < centre
        }));

        group.throughput(Throughput::Elements((edge * edge * edge) as u64));
        group.bench_with_input(BenchmarkId::new("flatten", edge), &volume, |b, v| {
            b.iter(|| flatten(black_box(v), &mask))
        });

        let flat = flatten(&volume, &mask).unwrap();
        group.bench_with_input(BenchmarkId::new("rebuild", edge), &flat, |b, f| {
            b.iter(|| rebuild(black_box(f), &mask, 0.0))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_benjamini_hochberg, bench_flatten_rebuild);
criterion_main!(benches);
