//! # Alignment Blocks
//!
//! Pre-digested multi-species alignment blocks. Each block stores, per column,
//! an index into a shared table of distinct column tuples, so emission scores
//! only need computing once per tuple rather than once per column.
//!
//! Gap characters inside tuples drive the mapping from alignment columns to
//! gap-free genomic coordinates of any row.

use serde::{Deserialize, Serialize};

use crate::error::{MotifError, Result};

/// Gap character in column tuples
pub const GAP: u8 = b'-';

/// One alignment block
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignmentBlock {
    /// Block identifier; also the sequence name for alignment-frame output
    pub name: String,
    /// Optional sequence name used for reference-frame output
    #[serde(default)]
    pub seqname: Option<String>,
    /// 1-based genomic start of each row's first aligned base
    pub starts: Vec<u64>,
    /// Tuple index for each alignment column
    pub columns: Vec<u32>,
}

impl AlignmentBlock {
    #[inline]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn tuple_at(&self, col: usize) -> usize {
        self.columns[col] as usize
    }
}

/// A set of blocks sharing one tuple table and one list of row names
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AlignmentBundle {
    /// Alignment row (species) names
    pub seqnames: Vec<String>,
    /// Distinct column tuples, one character per row
    pub tuples: Vec<String>,
    /// Alignment blocks
    pub blocks: Vec<AlignmentBlock>,
}

impl AlignmentBundle {
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.seqnames.len()
    }

    #[inline]
    pub fn n_tuples(&self) -> usize {
        self.tuples.len()
    }

    #[inline]
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, idx: usize) -> Option<&AlignmentBlock> {
        self.blocks.get(idx)
    }

    /// Check internal consistency of rows, tuples and blocks
    pub fn validate(&self) -> Result<()> {
        let n_rows = self.n_rows();
        if n_rows == 0 {
            return Err(MotifError::config("alignment bundle has no sequences"));
        }
        if self.blocks.is_empty() {
            return Err(MotifError::config("alignment bundle has no blocks"));
        }
        for (i, tuple) in self.tuples.iter().enumerate() {
            if tuple.len() != n_rows {
                return Err(MotifError::config(format!(
                    "tuple {} has {} characters, expected {}",
                    i,
                    tuple.len(),
                    n_rows
                )));
            }
        }
        let n_tuples = self.n_tuples() as u32;
        for block in &self.blocks {
            if block.starts.len() != n_rows {
                return Err(MotifError::config(format!(
                    "block {} has {} row starts, expected {}",
                    block.name,
                    block.starts.len(),
                    n_rows
                )));
            }
            if let Some(bad) = block.columns.iter().find(|&&t| t >= n_tuples) {
                return Err(MotifError::config(format!(
                    "block {} references tuple {} but only {} tuples exist",
                    block.name, bad, n_tuples
                )));
            }
        }
        Ok(())
    }

    /// Build the column -> genomic coordinate map for one row
    pub fn coordinate_map(&self, row: usize) -> CoordinateMap {
        let blocks = self
            .blocks
            .iter()
            .map(|block| {
                let mut offset = 0u64;
                block
                    .columns
                    .iter()
                    .map(|&t| {
                        if self.tuples[t as usize].as_bytes()[row] == GAP {
                            None
                        } else {
                            let pos = block.starts[row] + offset;
                            offset += 1;
                            Some(pos)
                        }
                    })
                    .collect()
            })
            .collect();
        CoordinateMap { row, blocks }
    }
}

/// Gap-aware column -> 1-based coordinate lookup for one alignment row
#[derive(Clone, Debug)]
pub struct CoordinateMap {
    row: usize,
    blocks: Vec<Vec<Option<u64>>>,
}

impl CoordinateMap {
    #[inline]
    pub fn row(&self) -> usize {
        self.row
    }

    /// Coordinate of `col` in `block`, or None at a gap
    pub fn coordinate(&self, block: usize, col: usize) -> Option<u64> {
        self.blocks.get(block)?.get(col).copied().flatten()
    }
}
