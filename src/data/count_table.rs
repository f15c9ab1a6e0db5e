//! # Count Tables
//!
//! The fundamental aggregation unit: PathKey -> CountVector, plus the number
//! of recorded samples the table represents.
//!
//! Slot 0 of every CountVector is the occurrence count; remaining slots are
//! model-defined sub-counts. Merging adds vectors element-wise, which is
//! commutative and associative, so the result of folding any set of tables is
//! independent of order and of how samples were partitioned between them.

use rustc_hash::FxHashMap;

use crate::data::path_key::PathKey;
use crate::error::{MotifError, Result};

/// Slot holding the occurrence count
pub const OCCURRENCE_SLOT: usize = 0;

/// Per-key counts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountVector(Box<[u64]>);

impl CountVector {
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0; len].into_boxed_slice())
    }

    pub fn from_vec(values: Vec<u64>) -> Self {
        Self(values.into_boxed_slice())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn occurrences(&self) -> u64 {
        self.0.first().copied().unwrap_or(0)
    }

    #[inline]
    pub fn get(&self, slot: usize) -> u64 {
        self.0.get(slot).copied().unwrap_or(0)
    }

    /// Element-wise add; callers guarantee equal lengths
    #[inline]
    fn add_assign(&mut self, other: &[u64]) {
        for (a, b) in self.0.iter_mut().zip(other) {
            *a += *b;
        }
    }
}

/// Mapping PathKey -> CountVector with unique keys
#[derive(Clone, Debug)]
pub struct CountTable {
    key_len: usize,
    count_len: usize,
    n_samples: u64,
    entries: FxHashMap<PathKey, CountVector>,
}

impl CountTable {
    /// Create an empty table
    pub fn new(key_len: usize, count_len: usize) -> Self {
        Self::with_capacity(key_len, count_len, 0)
    }

    /// Create an empty table with a bucket estimate
    pub fn with_capacity(key_len: usize, count_len: usize, capacity: usize) -> Self {
        Self {
            key_len,
            count_len: count_len.max(1),
            n_samples: 0,
            entries: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    #[inline]
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    #[inline]
    pub fn count_len(&self) -> usize {
        self.count_len
    }

    /// Number of recorded samples this table represents
    #[inline]
    pub fn n_samples(&self) -> u64 {
        self.n_samples
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &PathKey) -> Option<&CountVector> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathKey, &CountVector)> {
        self.entries.iter()
    }

    /// Entries in ascending key order
    pub fn sorted_entries(&self) -> Vec<(&PathKey, &CountVector)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Sum of the occurrence slot across all entries
    pub fn total_occurrences(&self) -> u64 {
        self.entries.values().map(CountVector::occurrences).sum()
    }

    /// Add to the recorded-sample tally
    #[inline]
    pub fn record_sample(&mut self, n: u64) {
        self.n_samples += n;
    }

    /// Count one occurrence of `key`, also bumping sub-count `slot`.
    ///
    /// Pass `OCCURRENCE_SLOT` to count the occurrence only.
    pub fn record(&mut self, key: PathKey, slot: usize) -> Result<()> {
        self.check_key(&key)?;
        if slot >= self.count_len {
            return Err(MotifError::config(format!(
                "count slot {} out of range for count vectors of length {}",
                slot, self.count_len
            )));
        }
        let count_len = self.count_len;
        let counts = self
            .entries
            .entry(key)
            .or_insert_with(|| CountVector::zeroed(count_len));
        counts.0[OCCURRENCE_SLOT] += 1;
        if slot != OCCURRENCE_SLOT {
            counts.0[slot] += 1;
        }
        Ok(())
    }

    /// Merge one entry: element-wise add if present, insert as-is otherwise
    pub fn add(&mut self, key: PathKey, counts: CountVector) -> Result<()> {
        self.check_key(&key)?;
        if counts.len() != self.count_len {
            return Err(MotifError::config(format!(
                "count vector length {} does not match table ({})",
                counts.len(),
                self.count_len
            )));
        }
        match self.entries.get_mut(&key) {
            Some(existing) => existing.add_assign(counts.as_slice()),
            None => {
                self.entries.insert(key, counts);
            }
        }
        Ok(())
    }

    /// Fold another table into this one, including its sample tally
    pub fn merge_from(&mut self, other: CountTable) -> Result<()> {
        if other.key_len != self.key_len || other.count_len != self.count_len {
            return Err(MotifError::config(format!(
                "cannot merge table with shape {}x{} into {}x{}",
                other.key_len, other.count_len, self.key_len, self.count_len
            )));
        }
        self.n_samples += other.n_samples;
        for (key, counts) in other.entries {
            match self.entries.get_mut(&key) {
                Some(existing) => existing.add_assign(counts.as_slice()),
                None => {
                    self.entries.insert(key, counts);
                }
            }
        }
        Ok(())
    }

    /// Hand the current contents to the caller and reset to empty
    pub fn take(&mut self) -> CountTable {
        let snapshot = CountTable {
            key_len: self.key_len,
            count_len: self.count_len,
            n_samples: self.n_samples,
            entries: std::mem::take(&mut self.entries),
        };
        self.n_samples = 0;
        snapshot
    }

    fn check_key(&self, key: &PathKey) -> Result<()> {
        if key.len() != self.key_len {
            return Err(MotifError::config(format!(
                "path key length {} does not match table key length {}",
                key.len(),
                self.key_len
            )));
        }
        Ok(())
    }
}

impl PartialEq for CountTable {
    fn eq(&self, other: &Self) -> bool {
        self.key_len == other.key_len
            && self.count_len == other.count_len
            && self.n_samples == other.n_samples
            && self.entries == other.entries
    }
}

impl Eq for CountTable {}
