//! HNSW benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kombu_hnsw::{build_graph, search, write_graph, HnswFile, HnswParams};
use kombu_vector::{Metric, SliceSource};
use tempfile::tempdir;

fn generate_vectors(n: usize, dims: usize) -> Vec<f32> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    (0..n * dims)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) as f32) / (u32::MAX >> 1) as f32
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_build");
    group.sample_size(10);

    for n in [1000, 5000].iter() {
        let data = generate_vectors(*n, 128);
        let params = HnswParams::default();

        group.bench_with_input(BenchmarkId::from_parameter(n), n, |bencher, _| {
            bencher.iter(|| {
                let source = SliceSource::new(black_box(&data), 128);
                build_graph(&source, &params, &mut |_, _| {}).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search");

    for n in [1000, 10000].iter() {
        let data = generate_vectors(*n, 128);
        let params = HnswParams::default();
        let source = SliceSource::new(&data, 128);
        let graph = build_graph(&source, &params, &mut |_, _| {}).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.graph");
        write_graph(&graph, &path).unwrap();
        let file = HnswFile::open(&path).unwrap();

        let query: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), n, |bencher, _| {
            bencher.iter(|| {
                let mut src = SliceSource::new(&data, 128);
                search(&file, &mut src, black_box(&query), Metric::Cosine, 10, 64).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
