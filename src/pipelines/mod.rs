//! # Pipeline Module
//!
//! High-level orchestration: parallel sampling with disk spills, the cache
//! merge, feature emission, and the top-level pipeline tying them together.

pub mod emit;
pub mod merge;
pub mod motif;
pub mod sampling;

pub use emit::{scorer_for, Emission, FeatureEmitter, Scorer};
pub use merge::{merge_tables, remove_caches, CacheMerger};
pub use motif::{MotifPipeline, PipelineReport};
pub use sampling::{partition_units, SampleSchedule, SamplingChain, SamplingSession, SessionSummary, BlockFailure, UnitOutcome, WorkUnit};
