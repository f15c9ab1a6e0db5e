//! # Motif Phylo-HMM
//!
//! ## Role
//! Reference state space for motif sampling: a background state plus, for
//! each evolutionary category and strand, a chain of `k` motif-position
//! states. Emission scores come from the emission provider; this module owns
//! transitions, forward filtering, stochastic traceback, and the mapping
//! between sampled paths and `PathKey`s.
//!
//! ## State Layout
//! ```text
//! 0                       background
//! 1 + (2c + s) * k + i    category c, strand s, motif position i
//! ```
//! with `c` in neutral, conserved, gain, loss and `s` in +, -.
//!
//! ## Transitions
//! "Free" states are background and the last position of every motif.
//! From a free state the chain moves to background with `1 - mu` and to the
//! first position of `(c, s)` with `mu * w_c / 2`. Motif positions advance
//! deterministically. A path must end in a free state, so motifs are never
//! truncated at the end of a block.
//!
//! ## Key Layout
//! `[block, strand, col_0, pos_0, ..., col_{k-1}, pos_{k-1}]`, where
//! `pos_i = strand * k + i`.

use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{key_len_for_width, AlignmentBlock, PathKey, Strand};
use crate::error::{MotifError, Result};
use crate::io::load_json;
use crate::model::emissions::EmissionTable;
use crate::model::sampler::{DecodedPath, PathDecoder, PathSampler, ReferenceFrame, SampledMotif, SamplingError};

/// Number of evolutionary categories
pub const N_CATEGORIES: usize = 4;

/// Category labels, in count-vector slot order (slot = 1 + category)
pub const CATEGORY_LABELS: [&str; N_CATEGORIES] = ["neutral", "conserved", "gain", "loss"];

/// Occurrence slot plus one slot per category
pub const COUNT_LEN: usize = 1 + N_CATEGORIES;

const N_STRANDS: usize = 2;

/// Motif definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifSpec {
    pub name: String,
    pub width: usize,
}

impl MotifSpec {
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let motif: MotifSpec = load_json(path)?;
        if motif.width == 0 {
            return Err(MotifError::config(format!(
                "motif {} in {} has width 0",
                motif.name,
                path.display()
            )));
        }
        Ok(motif)
    }
}

/// Transition hyperparameters
#[derive(Clone, Debug, PartialEq)]
pub struct ModelParams {
    /// Probability of leaving a free state for a motif
    pub mu: f64,
    /// Relative weight of each category when entering a motif
    pub category_weights: [f64; N_CATEGORIES],
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            mu: 0.01,
            category_weights: [1.0; N_CATEGORIES],
        }
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.mu > 0.0 && self.mu < 1.0) {
            return Err(MotifError::config(format!("mu must be in (0, 1), got {}", self.mu)));
        }
        if self
            .category_weights
            .iter()
            .any(|w| !w.is_finite() || *w <= 0.0)
        {
            return Err(MotifError::config(format!(
                "category weights must be positive, got {:?}",
                self.category_weights
            )));
        }
        Ok(())
    }
}

/// Motif phylo-HMM over one motif width
#[derive(Clone, Debug)]
pub struct MotifPhyloHmm {
    motif: MotifSpec,
    params: ModelParams,
    /// Probability of entering each category/strand start: mu * w_c / 2
    enter: [f64; N_CATEGORIES],
}

impl MotifPhyloHmm {
    pub fn new(motif: MotifSpec, params: ModelParams) -> Result<Self> {
        if motif.width == 0 {
            return Err(MotifError::config("motif width must be at least 1"));
        }
        params.validate()?;
        let total: f64 = params.category_weights.iter().sum();
        let mut enter = [0.0; N_CATEGORIES];
        for (e, w) in enter.iter_mut().zip(&params.category_weights) {
            *e = params.mu * (w / total) / N_STRANDS as f64;
        }
        Ok(Self { motif, params, enter })
    }

    #[inline]
    pub fn motif(&self) -> &MotifSpec {
        &self.motif
    }

    #[inline]
    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.motif.width
    }

    /// Background plus `2 * N_CATEGORIES * k` motif states
    #[inline]
    pub fn n_states(&self) -> usize {
        1 + N_STRANDS * N_CATEGORIES * self.motif.width
    }

    #[inline]
    pub fn state(&self, category: usize, strand: usize, pos: usize) -> usize {
        1 + (N_STRANDS * category + strand) * self.motif.width + pos
    }

    /// `(category, strand, position)` of a motif state; None for background
    #[inline]
    pub fn motif_state(&self, state: usize) -> Option<(usize, usize, usize)> {
        if state == 0 {
            return None;
        }
        let k = self.motif.width;
        let chain = (state - 1) / k;
        Some((chain / N_STRANDS, chain % N_STRANDS, (state - 1) % k))
    }

    #[inline]
    fn is_free(&self, state: usize) -> bool {
        match self.motif_state(state) {
            None => true,
            Some((_, _, pos)) => pos + 1 == self.motif.width,
        }
    }

    fn free_mass(&self, column: &[f64]) -> f64 {
        let k = self.motif.width;
        let mut mass = column[0];
        for chain in 0..N_STRANDS * N_CATEGORIES {
            mass += column[1 + chain * k + k - 1];
        }
        mass
    }

    /// Prior for the first column: as if preceded by background
    fn initial(&self, state: usize) -> f64 {
        match self.motif_state(state) {
            None => 1.0 - self.params.mu,
            Some((c, _, 0)) => self.enter[c],
            Some(_) => 0.0,
        }
    }

    fn key_for(&self, block_idx: u32, category: usize, strand: usize, start_col: usize) -> SampledMotif {
        let k = self.motif.width;
        let mut key = Vec::with_capacity(key_len_for_width(k));
        key.push(block_idx);
        key.push(strand as u32);
        for i in 0..k {
            key.push((start_col + i) as u32);
            key.push((strand * k + i) as u32);
        }
        SampledMotif {
            key: PathKey::new(key),
            slot: 1 + category,
        }
    }
}

/// Scaled forward probabilities for one block
#[derive(Clone, Debug)]
pub struct MotifLattice {
    block_idx: u32,
    n_cols: usize,
    n_states: usize,
    /// Row-major `n_cols x n_states`; each row sums to 1
    alpha: Vec<f64>,
    /// Free-state mask
    free: Vec<bool>,
}

impl MotifLattice {
    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    fn column(&self, t: usize) -> &[f64] {
        &self.alpha[t * self.n_states..(t + 1) * self.n_states]
    }
}

/// Draw an index proportional to `weights`; None if the weights are degenerate
fn sample_from_weights<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let mut threshold = rng.random::<f64>() * total;
    let mut last_positive = None;
    for (i, w) in weights.iter().enumerate() {
        if *w > 0.0 {
            last_positive = Some(i);
            threshold -= *w;
            if threshold <= 0.0 {
                return Some(i);
            }
        }
    }
    last_positive
}

impl PathSampler for MotifPhyloHmm {
    type Lattice = MotifLattice;

    fn key_len(&self) -> usize {
        key_len_for_width(self.motif.width)
    }

    fn count_len(&self) -> usize {
        COUNT_LEN
    }

    fn prepare(
        &self,
        block_idx: usize,
        block: &AlignmentBlock,
        emissions: &EmissionTable,
    ) -> std::result::Result<MotifLattice, SamplingError> {
        let n_states = self.n_states();
        let n_cols = block.n_columns();
        let k = self.motif.width;
        if emissions.n_states() != n_states {
            return Err(SamplingError::new(format!(
                "emission table has {} states, model has {}",
                emissions.n_states(),
                n_states
            )));
        }

        let mut alpha = vec![0.0f64; n_cols * n_states];
        let mut emit = vec![0.0f64; n_states];

        for t in 0..n_cols {
            let tuple = block.tuple_at(t);

            // Emissions relative to the column maximum keep exp() in range
            let mut max_score = f64::NEG_INFINITY;
            for (j, e) in emit.iter_mut().enumerate() {
                let score = emissions.get(j, tuple);
                if score.is_nan() || score == f64::INFINITY {
                    return Err(SamplingError::at_column(t, format!("invalid emission score {} for state {}", score, j)));
                }
                *e = score;
                max_score = max_score.max(score);
            }
            if max_score == f64::NEG_INFINITY {
                return Err(SamplingError::at_column(t, "all emission scores are -inf"));
            }
            for e in emit.iter_mut() {
                *e = (*e - max_score).exp();
            }

            let (prev, cur) = alpha.split_at_mut(t * n_states);
            let cur = &mut cur[..n_states];
            if t == 0 {
                for (j, a) in cur.iter_mut().enumerate() {
                    *a = self.initial(j) * emit[j];
                }
            } else {
                let prev = &prev[(t - 1) * n_states..];
                let free = self.free_mass(prev);
                cur[0] = free * (1.0 - self.params.mu) * emit[0];
                for c in 0..N_CATEGORIES {
                    for s in 0..N_STRANDS {
                        let base = self.state(c, s, 0);
                        cur[base] = free * self.enter[c] * emit[base];
                        for i in 1..k {
                            cur[base + i] = prev[base + i - 1] * emit[base + i];
                        }
                    }
                }
            }

            let sum: f64 = cur.iter().sum();
            if !sum.is_finite() || sum <= 0.0 {
                return Err(SamplingError::at_column(t, "forward probabilities vanished"));
            }
            for a in cur.iter_mut() {
                *a /= sum;
            }
        }

        let free = (0..n_states).map(|j| self.is_free(j)).collect();
        debug!(block = block_idx, n_cols, n_states, "forward pass complete");

        Ok(MotifLattice {
            block_idx: block_idx as u32,
            n_cols,
            n_states,
            alpha,
            free,
        })
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        lattice: &MotifLattice,
        rng: &mut R,
        out: &mut Vec<SampledMotif>,
    ) -> std::result::Result<(), SamplingError> {
        let n_cols = lattice.n_cols;
        if n_cols == 0 {
            return Ok(());
        }

        let mut weights = vec![0.0f64; lattice.n_states];
        let free_weights = |col: &[f64], weights: &mut [f64]| {
            for (j, w) in weights.iter_mut().enumerate() {
                *w = if lattice.free[j] { col[j] } else { 0.0 };
            }
        };

        let last = n_cols - 1;
        free_weights(lattice.column(last), &mut weights);
        let mut state = sample_from_weights(&weights, rng)
            .ok_or_else(|| SamplingError::at_column(last, "no free state can end the block"))?;

        // Walk backwards; a motif ends where the traceback leaves its first position
        let mut t = last;
        loop {
            if let Some((c, s, pos)) = self.motif_state(state) {
                if pos == 0 {
                    out.push(self.key_for(lattice.block_idx, c, s, t));
                }
            }
            if t == 0 {
                break;
            }
            t -= 1;
            state = match self.motif_state(state) {
                Some((c, s, pos)) if pos > 0 => self.state(c, s, pos - 1),
                _ => {
                    free_weights(lattice.column(t), &mut weights);
                    sample_from_weights(&weights, rng)
                        .ok_or_else(|| SamplingError::at_column(t, "degenerate traceback weights"))?
                }
            };
        }

        Ok(())
    }
}

/// Smallest and largest position, None when there are none
fn span(positions: impl Iterator<Item = u64>) -> Option<(u64, u64)> {
    positions.fold(None, |range, pos| match range {
        Some((lo, hi)) => Some((u64::min(lo, pos), u64::max(hi, pos))),
        None => Some((pos, pos)),
    })
}

impl PathDecoder for MotifPhyloHmm {
    fn decode(&self, key: &PathKey, frame: &ReferenceFrame<'_>) -> Result<Option<DecodedPath>> {
        let k = self.motif.width;
        if key.len() != key_len_for_width(k) {
            return Err(MotifError::model(format!(
                "key {} has length {}, motif width {} needs {}",
                key,
                key.len(),
                k,
                key_len_for_width(k)
            )));
        }
        let values = key.as_slice();
        let block_idx = values[0] as usize;
        let block = frame
            .bundle()
            .block(block_idx)
            .ok_or_else(|| MotifError::model(format!("key {} references missing block {}", key, block_idx)))?;
        let strand = match values[1] {
            0 => Strand::Plus,
            1 => Strand::Minus,
            other => {
                return Err(MotifError::model(format!("key {} has invalid strand {}", key, other)));
            }
        };
        let cols = (0..k).map(|i| values[2 + 2 * i] as usize);

        let range = if frame.refidx() == 0 {
            span(cols.map(|col| col as u64 + 1))
        } else {
            span(cols.filter_map(|col| frame.coordinate(block_idx, col)))
        };

        Ok(range.map(|(start, end)| DecodedPath {
            seqname: frame.seqname_for(block),
            start,
            end,
            strand,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AlignmentBundle, CountTable};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn hmm(width: usize) -> MotifPhyloHmm {
        MotifPhyloHmm::new(MotifSpec::new("m", width), ModelParams::default()).unwrap()
    }

    fn block(n_cols: usize) -> AlignmentBlock {
        AlignmentBlock {
            name: "b0".into(),
            seqname: None,
            starts: vec![1],
            columns: vec![0; n_cols],
        }
    }

    fn flat_emissions(model: &MotifPhyloHmm) -> EmissionTable {
        EmissionTable::new(model.n_states(), 1, vec![0.0; model.n_states()]).unwrap()
    }

    #[test]
    fn test_state_layout() {
        let m = hmm(3);
        assert_eq!(m.n_states(), 25);
        assert_eq!(m.state(0, 0, 0), 1);
        assert_eq!(m.state(3, 1, 2), 24);
        assert_eq!(m.motif_state(0), None);
        assert_eq!(m.motif_state(m.state(2, 1, 1)), Some((2, 1, 1)));
        assert!(m.is_free(0));
        assert!(m.is_free(m.state(1, 0, 2)));
        assert!(!m.is_free(m.state(1, 0, 1)));
    }

    #[test]
    fn test_params_validation() {
        let bad_mu = ModelParams {
            mu: 1.0,
            ..ModelParams::default()
        };
        assert!(MotifPhyloHmm::new(MotifSpec::new("m", 2), bad_mu).is_err());
        let bad_w = ModelParams {
            mu: 0.1,
            category_weights: [1.0, 0.0, 1.0, 1.0],
        };
        assert!(bad_w.validate().is_err());
        assert!(MotifPhyloHmm::new(MotifSpec::new("m", 0), ModelParams::default()).is_err());
    }

    #[test]
    fn test_lattice_rows_normalized() {
        let m = hmm(2);
        let lattice = m.prepare(0, &block(6), &flat_emissions(&m)).unwrap();
        for t in 0..lattice.n_cols() {
            let sum: f64 = lattice.column(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sampled_motifs_are_complete() {
        let m = MotifPhyloHmm::new(
            MotifSpec::new("m", 3),
            ModelParams {
                mu: 0.4,
                category_weights: [1.0, 2.0, 1.0, 1.0],
            },
        )
        .unwrap();
        let blk = block(20);
        let lattice = m.prepare(5, &blk, &flat_emissions(&m)).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut table = CountTable::new(m.key_len(), m.count_len());
        let mut out = Vec::new();
        let mut n_found = 0;

        for _ in 0..200 {
            out.clear();
            m.sample(&lattice, &mut rng, &mut out).unwrap();
            for motif in &out {
                let key = motif.key.as_slice();
                assert_eq!(key[0], 5);
                let strand = key[1] as usize;
                let start = key[2] as usize;
                assert!(start + 3 <= 20);
                for i in 0..3 {
                    assert_eq!(key[2 + 2 * i] as usize, start + i);
                    assert_eq!(key[3 + 2 * i] as usize, strand * 3 + i);
                }
                assert!((1..COUNT_LEN).contains(&motif.slot));
                table.record(motif.key.clone(), motif.slot).unwrap();
                n_found += 1;
            }
        }
        assert!(n_found > 0);
        assert_eq!(table.total_occurrences(), n_found);
    }

    #[test]
    fn test_strong_emissions_place_motif() {
        // Only conserved + strand motif states can emit tuple 1
        let m = hmm(2);
        let n_states = m.n_states();
        let mut scores = vec![0.0; n_states * 2];
        for j in 0..n_states {
            scores[j * 2 + 1] = f64::NEG_INFINITY;
        }
        scores[m.state(1, 0, 0) * 2 + 1] = 0.0;
        scores[m.state(1, 0, 1) * 2 + 1] = 0.0;
        let emissions = EmissionTable::new(n_states, 2, scores).unwrap();

        let blk = AlignmentBlock {
            name: "b".into(),
            seqname: None,
            starts: vec![1],
            columns: vec![0, 0, 1, 1, 0],
        };
        let lattice = m.prepare(0, &blk, &emissions).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut out = Vec::new();
        m.sample(&lattice, &mut rng, &mut out).unwrap();

        assert!(out.iter().any(|s| s.key.as_slice() == [0, 0, 2, 0, 3, 1] && s.slot == 2));
    }

    #[test]
    fn test_nan_emissions_fail() {
        let m = hmm(1);
        let emissions = EmissionTable::new(m.n_states(), 1, vec![f64::NAN; m.n_states()]).unwrap();
        let err = m.prepare(0, &block(3), &emissions).unwrap_err();
        assert_eq!(err.column, Some(0));
    }

    #[test]
    fn test_width_longer_than_block_fails() {
        let m = hmm(4);
        let lattice = m.prepare(0, &block(2), &flat_emissions(&m)).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut out = Vec::new();
        // Background is always free, so short blocks still sample
        m.sample(&lattice, &mut rng, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_decode_frames() {
        let bundle = AlignmentBundle {
            seqnames: vec!["hg".into(), "mm".into()],
            tuples: vec!["AA".into(), "-C".into()],
            blocks: vec![AlignmentBlock {
                name: "blk".into(),
                seqname: None,
                starts: vec![100, 50],
                columns: vec![0, 1, 0, 0],
            }],
        };
        let m = hmm(2);
        let key = PathKey::new(vec![0, 1, 1, 2, 2, 3]);

        let aln = ReferenceFrame::new(&bundle, 0, None).unwrap();
        let d = m.decode(&key, &aln).unwrap().unwrap();
        assert_eq!((d.seqname.as_str(), d.start, d.end, d.strand), ("blk", 2, 3, Strand::Minus));

        // hg has a gap at column 1, so only column 2 maps (100, gap, 101)
        let hg = ReferenceFrame::new(&bundle, 1, None).unwrap();
        let d = m.decode(&key, &hg).unwrap().unwrap();
        assert_eq!((d.seqname.as_str(), d.start, d.end), ("hg", 101, 101));

        let mm = ReferenceFrame::new(&bundle, 2, Some("chrM".into())).unwrap();
        let d = m.decode(&key, &mm).unwrap().unwrap();
        assert_eq!((d.seqname.as_str(), d.start, d.end), ("chrM", 51, 52));
        assert!(ReferenceFrame::new(&bundle, 3, None).is_err());
    }

    #[test]
    fn test_decode_gapped_reference_is_unmapped() {
        let bundle = AlignmentBundle {
            seqnames: vec!["hg".into(), "mm".into()],
            tuples: vec!["AA".into(), "-A".into()],
            blocks: vec![AlignmentBlock {
                name: "blk".into(),
                seqname: None,
                starts: vec![100, 50],
                columns: vec![0, 1, 1, 0],
            }],
        };
        let m = hmm(2);
        let gapped = PathKey::new(vec![0, 0, 1, 0, 2, 1]);

        let hg = ReferenceFrame::new(&bundle, 1, None).unwrap();
        assert_eq!(m.decode(&gapped, &hg).unwrap(), None);
        // Still mappable in the alignment frame and in the ungapped row
        let aln = ReferenceFrame::new(&bundle, 0, None).unwrap();
        assert!(m.decode(&gapped, &aln).unwrap().is_some());
        let mm = ReferenceFrame::new(&bundle, 2, None).unwrap();
        let d = m.decode(&gapped, &mm).unwrap().unwrap();
        assert_eq!((d.start, d.end), (51, 52));

        let bad_strand = PathKey::new(vec![0, 7, 1, 0, 2, 1]);
        assert!(matches!(m.decode(&bad_strand, &hg), Err(MotifError::ModelCompat { .. })));
    }
}
