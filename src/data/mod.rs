//! # Data Module
//!
//! In-memory representations: sampled path keys and their count tables,
//! pre-digested alignment blocks, and output feature records.
//!
//! ## Design Notes
//! - **Value keys:** `PathKey` is an immutable boxed slice compared by value,
//!   so tables hash key content rather than key identity.
//! - **One aggregation type:** workers, spills, merges and dumps all move
//!   `CountTable`s around; the recorded-sample tally travels with the table.

pub mod alignment;
pub mod count_table;
pub mod feature;
pub mod path_key;

// Re-export commonly used types
pub use alignment::{AlignmentBlock, AlignmentBundle, CoordinateMap};
pub use count_table::{CountTable, CountVector, OCCURRENCE_SLOT};
pub use feature::{Feature, FeatureGroup, FeatureSet, Strand};
pub use path_key::{key_len_for_width, PathKey};
