//! # Phylomotif Library
//!
//! Motif discovery in multi-species alignments by sampling state paths through
//! a phylo-HMM and aggregating the sampled paths into scored genomic features.
//!
//! ## Modules
//! - `config`: CLI argument parsing and validation
//! - `data`: Path keys, count tables, alignment blocks, feature records
//! - `error`: Error types and result aliases
//! - `io`: Spill caches, hash dumps, GFF, JSON inputs
//! - `model`: Tree model, emissions, and the motif phylo-HMM
//! - `pipelines`: Sampling session, cache merge, feature emission
//! - `utils`: Thread pool and telemetry

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod model;
pub mod pipelines;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use data::{CountTable, CountVector, Feature, FeatureSet, PathKey};
pub use error::{MotifError, Result};
pub use io::{CacheReader, GffWriter};
pub use model::{MotifPhyloHmm, PathDecoder, PathSampler};
pub use pipelines::{CacheMerger, FeatureEmitter, MotifPipeline, SamplingSession};
