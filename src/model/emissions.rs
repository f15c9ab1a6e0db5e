//! # Emission Scores
//!
//! Dense `n_states x n_tuples` table of natural-log emission scores, indexed
//! by HMM state and distinct alignment-column tuple. Built once before any
//! worker starts and shared read-only behind an `Arc`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info_span;

use crate::data::AlignmentBundle;
use crate::error::{MotifError, Result};
use crate::io::load_json;
use crate::model::motif_hmm::MotifPhyloHmm;

/// Row-major emission score matrix
#[derive(Clone, Debug)]
pub struct EmissionTable {
    n_states: usize,
    n_tuples: usize,
    scores: Vec<f64>,
}

impl EmissionTable {
    /// Build from a flat row-major score vector
    pub fn new(n_states: usize, n_tuples: usize, scores: Vec<f64>) -> Result<Self> {
        if scores.len() != n_states * n_tuples {
            return Err(MotifError::config(format!(
                "emission table has {} scores, expected {} x {}",
                scores.len(),
                n_states,
                n_tuples
            )));
        }
        Ok(Self {
            n_states,
            n_tuples,
            scores,
        })
    }

    /// Build from one row per state
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_states = rows.len();
        let n_tuples = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((state, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_tuples) {
            return Err(MotifError::config(format!(
                "emission row {} has {} scores, expected {}",
                state,
                row.len(),
                n_tuples
            )));
        }
        Self::new(n_states, n_tuples, rows.into_iter().flatten().collect())
    }

    #[inline]
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    #[inline]
    pub fn n_tuples(&self) -> usize {
        self.n_tuples
    }

    #[inline]
    pub fn get(&self, state: usize, tuple: usize) -> f64 {
        self.scores[state * self.n_tuples + tuple]
    }
}

/// Source of the emission table for a model and alignment
pub trait EmissionProvider {
    fn emissions(&self, hmm: &MotifPhyloHmm, bundle: &AlignmentBundle) -> Result<EmissionTable>;
}

#[derive(Deserialize)]
struct EmissionsFile {
    scores: Vec<Vec<f64>>,
}

/// Emission scores computed elsewhere and loaded from JSON
pub struct PrecomputedEmissions {
    path: PathBuf,
}

impl PrecomputedEmissions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EmissionProvider for PrecomputedEmissions {
    fn emissions(&self, hmm: &MotifPhyloHmm, bundle: &AlignmentBundle) -> Result<EmissionTable> {
        info_span!("load_emissions", path = %self.path.display()).in_scope(|| {
            let file: EmissionsFile = load_json(&self.path)?;
            let table = EmissionTable::from_rows(file.scores)?;
            if table.n_states() != hmm.n_states() || table.n_tuples() != bundle.n_tuples() {
                return Err(MotifError::config(format!(
                    "emission table is {} x {}, model and alignment need {} x {}",
                    table.n_states(),
                    table.n_tuples(),
                    hmm.n_states(),
                    bundle.n_tuples()
                )));
            }
            Ok(table)
        })
    }
}
