//! # Sampler and Decoder Contracts
//!
//! ## Role
//! The seams between the sampling pipeline and the phylo-HMM. Workers only
//! see `PathSampler`; the feature emitter only sees `PathDecoder`. Neither
//! needs to know how states, emissions or keys are laid out internally.
//!
//! ## Lifecycle
//! 1. `prepare` runs the deterministic forward pass for one block once.
//! 2. `sample` draws one stochastic traceback per iteration from that lattice,
//!    appending the motif instances it contains.

use rand::Rng;
use thiserror::Error;

use crate::data::{AlignmentBlock, AlignmentBundle, CoordinateMap, PathKey, Strand};
use crate::error::{MotifError, Result};
use crate::model::emissions::EmissionTable;

/// Numerical failure inside one block's sampler
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct SamplingError {
    pub column: Option<usize>,
    pub message: String,
}

impl SamplingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            column: None,
            message: message.into(),
        }
    }

    pub fn at_column(column: usize, message: impl Into<String>) -> Self {
        Self {
            column: Some(column),
            message: format!("column {}: {}", column, message.into()),
        }
    }
}

/// One motif instance found in a sampled path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampledMotif {
    pub key: PathKey,
    /// Count-vector slot to bump alongside the occurrence count
    pub slot: usize,
}

/// Stochastic state-path sampler over alignment blocks
pub trait PathSampler: Send + Sync {
    /// Per-block state reused across iterations
    type Lattice: Send;

    /// Integers per key
    fn key_len(&self) -> usize;

    /// Slots per count vector
    fn count_len(&self) -> usize;

    /// Forward pass for one block
    fn prepare(
        &self,
        block_idx: usize,
        block: &AlignmentBlock,
        emissions: &EmissionTable,
    ) -> std::result::Result<Self::Lattice, SamplingError>;

    /// Draw one path and append its motif instances to `out`
    fn sample<R: Rng + ?Sized>(
        &self,
        lattice: &Self::Lattice,
        rng: &mut R,
        out: &mut Vec<SampledMotif>,
    ) -> std::result::Result<(), SamplingError>;
}

/// Genomic placement of one decoded key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedPath {
    pub seqname: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
}

/// Coordinate frame used when decoding keys.
///
/// `refidx = 0` reports alignment columns on the block name. `refidx = r > 0`
/// reports gap-free coordinates of alignment row `r - 1`.
pub struct ReferenceFrame<'a> {
    bundle: &'a AlignmentBundle,
    refidx: usize,
    coords: Option<CoordinateMap>,
    seqname: Option<String>,
}

impl<'a> ReferenceFrame<'a> {
    pub fn new(bundle: &'a AlignmentBundle, refidx: usize, seqname: Option<String>) -> Result<Self> {
        if refidx > bundle.n_rows() {
            return Err(MotifError::config(format!(
                "reference index {} out of range; alignment has {} sequences",
                refidx,
                bundle.n_rows()
            )));
        }
        let coords = (refidx > 0).then(|| bundle.coordinate_map(refidx - 1));
        Ok(Self {
            bundle,
            refidx,
            coords,
            seqname,
        })
    }

    #[inline]
    pub fn bundle(&self) -> &AlignmentBundle {
        self.bundle
    }

    #[inline]
    pub fn refidx(&self) -> usize {
        self.refidx
    }

    /// Coordinate of a column in the reference row; None in alignment frame or at a gap
    pub fn coordinate(&self, block: usize, col: usize) -> Option<u64> {
        self.coords.as_ref()?.coordinate(block, col)
    }

    /// Output sequence name for `block`
    pub fn seqname_for(&self, block: &AlignmentBlock) -> String {
        if self.refidx == 0 {
            return block.name.clone();
        }
        if let Some(name) = &self.seqname {
            return name.clone();
        }
        match &block.seqname {
            Some(name) => name.clone(),
            None => self.bundle.seqnames[self.refidx - 1].clone(),
        }
    }
}

/// Maps keys back to genomic coordinates
pub trait PathDecoder {
    /// `Ok(None)` when the key has no base in the reference row (all gaps);
    /// errors are reserved for keys the model could not have produced.
    fn decode(&self, key: &PathKey, frame: &ReferenceFrame<'_>) -> Result<Option<DecodedPath>>;
}
