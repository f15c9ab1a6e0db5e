//! # Cache Merger
//!
//! ## Role
//! Reduce any number of spill caches into one `CountTable`. Counts for equal
//! keys are added element-wise and sample tallies are summed, so the result
//! does not depend on file order or on how samples were split between files.
//! That holds equally for one session's own spills and for caches produced by
//! independent runs.
//!
//! Runs single-threaded after all workers finish. A cache that cannot be read
//! fails the whole merge: skipping it would silently lose samples.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::data::CountTable;
use crate::error::Result;
use crate::io::cache::CacheReader;
use crate::utils::telemetry::TelemetryBlackboard;

/// Initial bucket estimate for merged tables
const DEFAULT_CAPACITY: usize = 10_000;

pub struct CacheMerger {
    key_len: usize,
    count_len: usize,
    capacity: usize,
    telemetry: Option<Arc<TelemetryBlackboard>>,
}

impl CacheMerger {
    pub fn new(key_len: usize, count_len: usize) -> Self {
        Self {
            key_len,
            count_len,
            capacity: DEFAULT_CAPACITY,
            telemetry: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Option<Arc<TelemetryBlackboard>>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Fresh accumulation over `paths`
    #[instrument(skip_all, fields(n_caches = paths.len()))]
    pub fn merge(&self, paths: &[PathBuf]) -> Result<CountTable> {
        let mut merged = CountTable::with_capacity(self.key_len, self.count_len, self.capacity);
        for path in paths {
            self.fold(path, &mut merged)?;
        }
        info!(
            n_caches = paths.len(),
            n_keys = merged.len(),
            n_samples = merged.n_samples(),
            "merged caches"
        );
        Ok(merged)
    }

    /// One cache's content, unmodified
    pub fn flatten(&self, path: &Path) -> Result<CountTable> {
        let mut table = CountTable::new(self.key_len, self.count_len);
        self.fold(path, &mut table)?;
        Ok(table)
    }

    fn fold(&self, path: &Path, into: &mut CountTable) -> Result<()> {
        let reader = CacheReader::open(path)?;
        let header = reader.header();
        reader.fold_into(into)?;
        debug!(
            path = %path.display(),
            n_keys = header.n_keys,
            n_samples = header.n_samples,
            "folded cache"
        );
        if let Some(t) = &self.telemetry {
            t.cache_merged();
        }
        Ok(())
    }
}

/// Fold in-memory tables the same way caches are folded
pub fn merge_tables(key_len: usize, count_len: usize, tables: impl IntoIterator<Item = CountTable>) -> Result<CountTable> {
    let mut merged = CountTable::new(key_len, count_len);
    for table in tables {
        merged.merge_from(table)?;
    }
    Ok(merged)
}

/// Delete session caches (and their manifest) after a successful merge.
///
/// Failures are logged rather than returned; the merged result is already safe.
pub fn remove_caches(paths: &[PathBuf], manifest: Option<&Path>) -> usize {
    let mut removed = 0;
    for path in paths.iter().map(PathBuf::as_path).chain(manifest) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), "could not remove cache: {}", e),
        }
    }
    debug!(removed, "removed session caches");
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountVector, PathKey};
    use crate::io::cache::write_cache;

    fn table(entries: &[(&[u32], u64)], n_samples: u64) -> CountTable {
        let mut t = CountTable::new(4, 1);
        for (key, count) in entries {
            t.add(PathKey::from_slice(key), CountVector::from_vec(vec![*count]))
                .unwrap();
        }
        t.record_sample(n_samples);
        t
    }

    #[test]
    fn test_merge_order_independent() {
        let dir = tempfile::tempdir().expect("Create temp dir");
        let a = dir.path().join("a.cache");
        let b = dir.path().join("b.cache");
        write_cache(&a, &table(&[(&[1, 2, 1, 2], 3)], 3)).unwrap();
        write_cache(&b, &table(&[(&[1, 2, 1, 2], 5), (&[2, 2, 1, 1], 1)], 6)).unwrap();

        let merger = CacheMerger::new(4, 1);
        let ab = merger.merge(&[a.clone(), b.clone()]).unwrap();
        let ba = merger.merge(&[b, a]).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.get(&PathKey::new(vec![1, 2, 1, 2])).unwrap().occurrences(), 8);
        assert_eq!(ab.get(&PathKey::new(vec![2, 2, 1, 1])).unwrap().occurrences(), 1);
        assert_eq!(ab.n_samples(), 9);
        assert_eq!(ab.total_occurrences(), 9);
    }

    #[test]
    fn test_flatten_is_identity() {
        let dir = tempfile::tempdir().expect("Create temp dir");
        let path = dir.path().join("one.cache");
        let original = table(&[(&[0, 0, 3, 0], 2), (&[0, 1, 4, 1], 7)], 12);
        write_cache(&path, &original).unwrap();
        assert_eq!(CacheMerger::new(4, 1).flatten(&path).unwrap(), original);
    }

    #[test]
    fn test_corrupt_cache_fails_merge() {
        let dir = tempfile::tempdir().expect("Create temp dir");
        let good = dir.path().join("good.cache");
        let bad = dir.path().join("bad.cache");
        write_cache(&good, &table(&[(&[1, 1, 1, 1], 1)], 1)).unwrap();
        std::fs::write(&bad, b"garbage").unwrap();

        let err = CacheMerger::new(4, 1).merge(&[good, bad]).unwrap_err();
        assert!(err.is_cache_error());
        assert!(err.to_string().contains("bad.cache"));
    }

    #[test]
    fn test_missing_cache_fails_merge() {
        let err = CacheMerger::new(4, 1)
            .merge(&[PathBuf::from("/nonexistent/x.cache")])
            .unwrap_err();
        assert!(err.is_cache_error());
    }

    #[test]
    fn test_merge_tables_matches_cache_merge() {
        let a = table(&[(&[1, 2, 1, 2], 3)], 3);
        let b = table(&[(&[1, 2, 1, 2], 5), (&[2, 2, 1, 1], 1)], 6);
        let merged = merge_tables(4, 1, [b, a]).unwrap();
        assert_eq!(merged.n_samples(), 9);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_remove_caches() {
        let dir = tempfile::tempdir().expect("Create temp dir");
        let a = dir.path().join("a.cache");
        let manifest = dir.path().join("run.caches");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&manifest, b"x").unwrap();
        let missing = dir.path().join("missing.cache");

        let removed = remove_caches(&[a.clone(), missing], Some(&manifest));
        assert_eq!(removed, 2);
        assert!(!a.exists());
        assert!(!manifest.exists());
    }
}
