//! # Path Keys
//!
//! Fixed-length integer encoding of one sampled state-path instance.
//! Keys are immutable and compare by value, so they can be used directly
//! as hash map keys during accumulation and merging.

use std::fmt;
use std::str::FromStr;

use crate::error::{MotifError, Result};

/// Key length for a motif of width `k`
#[inline]
pub fn key_len_for_width(k: usize) -> usize {
    2 * k + 2
}

/// Immutable, value-comparable state-path key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(Box<[u32]>);

impl PathKey {
    pub fn new(values: Vec<u32>) -> Self {
        Self(values.into_boxed_slice())
    }

    pub fn from_slice(values: &[u32]) -> Self {
        Self(values.into())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u32] {
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
    pub fn get(&self, idx: usize) -> Option<u32> {
        self.0.get(idx).copied()
    }
}

impl From<Vec<u32>> for PathKey {
    fn from(values: Vec<u32>) -> Self {
        Self::new(values)
    }
}

/// Comma-joined integers, as written in hash dumps
impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

impl FromStr for PathKey {
    type Err = MotifError;

    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .map_err(|e| MotifError::parse(0, format!("bad key element '{}': {}", v, e)))
            })
            .collect::<Result<Vec<u32>>>()?;
        Ok(Self::new(values))
    }
}
