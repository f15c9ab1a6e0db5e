use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use phylomotif::data::{CountTable, CountVector, PathKey};
use phylomotif::io::cache::{write_cache, CacheNamer, SpillWriter};
use phylomotif::pipelines::CacheMerger;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const KEY_LEN: usize = 4;
const COUNT_LEN: usize = 5;

/// One recorded sample: the motifs (key, slot) it produced
type Sample = Vec<(Vec<u32>, usize)>;

fn random_stream(seed: u64, n_samples: usize) -> Vec<Sample> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n_samples)
        .map(|_| {
            let n_motifs = rng.random_range(0..4);
            (0..n_motifs)
                .map(|_| {
                    let key = (0..KEY_LEN).map(|_| rng.random_range(0..3u32)).collect();
                    (key, rng.random_range(1..COUNT_LEN))
                })
                .collect()
        })
        .collect()
}

fn record_all(table: &mut CountTable, samples: &[Sample]) -> Result<()> {
    for sample in samples {
        for (key, slot) in sample {
            table.record(PathKey::from_slice(key), *slot)?;
        }
        table.record_sample(1);
    }
    Ok(())
}

fn scenario_table(entries: &[(&[u32], u64)]) -> CountTable {
    let mut table = CountTable::new(KEY_LEN, 1);
    let mut n = 0;
    for (key, count) in entries {
        table
            .add(PathKey::from_slice(key), CountVector::from_vec(vec![*count]))
            .expect("add entry");
        n += count;
    }
    table.record_sample(n);
    table
}

#[test]
fn two_file_scenario_merges_in_either_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.cache");
    let b = dir.path().join("b.cache");
    write_cache(&a, &scenario_table(&[(&[1, 2, 1, 2], 3)]))?;
    write_cache(&b, &scenario_table(&[(&[1, 2, 1, 2], 5), (&[2, 2, 1, 1], 1)]))?;

    let merger = CacheMerger::new(KEY_LEN, 1);
    for order in [vec![a.clone(), b.clone()], vec![b, a]] {
        let merged = merger.merge(&order)?;
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(&PathKey::new(vec![1, 2, 1, 2])).map(|c| c.occurrences()), Some(8));
        assert_eq!(merged.get(&PathKey::new(vec![2, 2, 1, 1])).map(|c| c.occurrences()), Some(1));
        assert_eq!(merged.n_samples(), 9);
    }
    Ok(())
}

#[test]
fn merge_is_independent_of_partition_and_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stream = random_stream(11, 500);

    let mut reference = CountTable::new(KEY_LEN, COUNT_LEN);
    record_all(&mut reference, &stream)?;

    let mut rng = SmallRng::seed_from_u64(99);
    for trial in 0..8 {
        // Random cut points split the stream into contiguous files
        let n_files = rng.random_range(1..12);
        let mut cuts: Vec<usize> = (0..n_files - 1).map(|_| rng.random_range(0..=stream.len())).collect();
        cuts.push(0);
        cuts.push(stream.len());
        cuts.sort_unstable();

        let mut paths: Vec<PathBuf> = Vec::new();
        for (i, w) in cuts.windows(2).enumerate() {
            let mut part = CountTable::new(KEY_LEN, COUNT_LEN);
            record_all(&mut part, &stream[w[0]..w[1]])?;
            let path = dir.path().join(format!("t{}_{}.cache", trial, i));
            write_cache(&path, &part)?;
            paths.push(path);
        }
        paths.shuffle(&mut rng);

        let merged = CacheMerger::new(KEY_LEN, COUNT_LEN).merge(&paths)?;
        assert_eq!(merged, reference, "trial {} with {} files", trial, paths.len());
        assert_eq!(merged.n_samples(), 500);
    }
    Ok(())
}

#[test]
fn spilling_is_transparent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stream = random_stream(5, 300);

    let mut in_memory = CountTable::new(KEY_LEN, COUNT_LEN);
    record_all(&mut in_memory, &stream)?;

    let namer = Arc::new(CacheNamer::new(dir.path().join("spill")));
    let mut spill = SpillWriter::new(namer);
    let mut local = CountTable::new(KEY_LEN, COUNT_LEN);
    for chunk in stream.chunks(37) {
        record_all(&mut local, chunk)?;
        spill.spill(&mut local)?;
    }
    spill.spill(&mut local)?;

    let merged = CacheMerger::new(KEY_LEN, COUNT_LEN).merge(spill.written())?;
    assert_eq!(merged, in_memory);
    assert_eq!(spill.written().len(), 300usize.div_ceil(37));
    Ok(())
}

#[test]
fn keys_stay_unique_through_merges() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stream = random_stream(23, 200);
    let mut paths = Vec::new();
    for (i, chunk) in stream.chunks(50).enumerate() {
        let mut part = CountTable::new(KEY_LEN, COUNT_LEN);
        record_all(&mut part, chunk)?;
        let path = dir.path().join(format!("{}.cache", i));
        write_cache(&path, &part)?;
        paths.push(path);
    }
    // The same file twice doubles its counts but never duplicates keys
    paths.push(paths[0].clone());

    let merged = CacheMerger::new(KEY_LEN, COUNT_LEN).merge(&paths)?;
    let mut keys: Vec<_> = merged.iter().map(|(k, _)| k.clone()).collect();
    let n = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), n);
    assert_eq!(merged.n_samples(), 250);
    Ok(())
}
