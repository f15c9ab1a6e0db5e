use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use phylomotif::data::{AlignmentBlock, CountTable, PathKey};
use phylomotif::io::cache::write_cache;
use phylomotif::model::{EmissionTable, ModelParams, MotifPhyloHmm, MotifSpec, PathSampler};
use phylomotif::pipelines::CacheMerger;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

const KEY_LEN: usize = 10;
const COUNT_LEN: usize = 5;

fn random_keys(n: usize, distinct: u32, seed: u64) -> Vec<(PathKey, usize)> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let base = rng.random_range(0..distinct);
            let key: Vec<u32> = (0..KEY_LEN as u32).map(|i| base + i).collect();
            (PathKey::new(key), rng.random_range(1..COUNT_LEN))
        })
        .collect()
}

/// Benchmark recording sampled keys into a count table
fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_table_record");

    for distinct in [100u32, 10_000, 1_000_000] {
        let keys = random_keys(100_000, distinct, 7);
        group.throughput(Throughput::Elements(keys.len() as u64));

        group.bench_with_input(BenchmarkId::new("distinct", distinct), &keys, |b, keys| {
            b.iter(|| {
                let mut table = CountTable::new(KEY_LEN, COUNT_LEN);
                for (key, slot) in keys {
                    table.record(key.clone(), *slot).expect("record");
                }
                black_box(table.len())
            })
        });
    }

    group.finish();
}

/// Benchmark merging spill caches from disk
fn bench_merge_caches(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_merge");
    let dir = tempfile::tempdir().expect("Create temp dir");

    for n_files in [4usize, 16, 64] {
        let paths: Vec<_> = (0..n_files)
            .map(|i| {
                let mut table = CountTable::new(KEY_LEN, COUNT_LEN);
                for (key, slot) in random_keys(20_000, 50_000, i as u64) {
                    table.record(key, slot).expect("record");
                }
                table.record_sample(200);
                let path = dir.path().join(format!("bench_{}_{}.cache", n_files, i));
                write_cache(&path, &table).expect("write cache");
                path
            })
            .collect();
        group.throughput(Throughput::Elements(n_files as u64));

        group.bench_with_input(BenchmarkId::new("files", n_files), &paths, |b, paths| {
            let merger = CacheMerger::new(KEY_LEN, COUNT_LEN);
            b.iter(|| {
                let merged = merger.merge(black_box(paths)).expect("merge");
                black_box(merged.n_samples())
            })
        });
    }

    group.finish();
}

/// Benchmark the forward pass plus one sampled path per block
fn bench_block_sampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_sampling");
    let hmm = MotifPhyloHmm::new(MotifSpec::new("bench", 8), ModelParams::default()).expect("hmm");
    let n_tuples = 16;
    let mut rng = SmallRng::seed_from_u64(3);
    let scores: Vec<f64> = (0..hmm.n_states() * n_tuples)
        .map(|_| -rng.random::<f64>() * 3.0)
        .collect();
    let emissions = EmissionTable::new(hmm.n_states(), n_tuples, scores).expect("emissions");

    for n_cols in [100usize, 1_000, 10_000] {
        let block = AlignmentBlock {
            name: "bench".into(),
            seqname: None,
            starts: vec![1],
            columns: (0..n_cols).map(|_| rng.random_range(0..n_tuples as u32)).collect(),
        };
        group.throughput(Throughput::Elements(n_cols as u64));

        group.bench_with_input(BenchmarkId::new("columns", n_cols), &block, |b, block| {
            let mut sample_rng = SmallRng::seed_from_u64(11);
            let mut out = Vec::new();
            b.iter(|| {
                let lattice = hmm.prepare(0, black_box(block), &emissions).expect("prepare");
                out.clear();
                hmm.sample(&lattice, &mut sample_rng, &mut out).expect("sample");
                black_box(out.len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record, bench_merge_caches, bench_block_sampling);
criterion_main!(benches);
