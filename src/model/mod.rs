//! # Model Module
//!
//! ## Role
//! Collaborators the sampling pipeline calls through:
//! - `tree`: tree/substitution-model loading, validation and leaf pruning
//! - `emissions`: dense emission-score table and its providers
//! - `sampler`: `PathSampler` / `PathDecoder` contracts
//! - `motif_hmm`: the reference motif phylo-HMM implementing both

pub mod emissions;
pub mod motif_hmm;
pub mod sampler;
pub mod tree;

pub use emissions::{EmissionProvider, EmissionTable, PrecomputedEmissions};
pub use motif_hmm::{ModelParams, MotifLattice, MotifPhyloHmm, MotifSpec, CATEGORY_LABELS, COUNT_LEN, N_CATEGORIES};
pub use sampler::{DecodedPath, PathDecoder, PathSampler, ReferenceFrame, SampledMotif, SamplingError};
pub use tree::{SubstModel, TreeModel, TreeNode};
