//! # I/O Module
//!
//! File reading/writing boundaries. Converts between disk formats and the
//! in-memory `CountTable` and `FeatureSet` representations.

pub mod cache;
pub mod gff;
pub mod inputs;

pub use cache::{
    read_cache, read_cache_list, read_hash_dump_file, write_cache, write_hash_dump_file, CacheNamer,
    CacheReader, SpillWriter,
};
pub use gff::{read_gff, read_gff_file, GffWriter};
pub use inputs::{load_bundle, load_json, open_input};
