//! # Threading Configuration
//!
//! ## Role
//! Resolve the configured worker count and build the rayon pool that runs
//! sampling units. A count of 0 means "all available execution units" and is
//! resolved once, at session start.

use rayon::ThreadPool;

use crate::error::{MotifError, Result};

/// Resolve a requested thread count; 0 uses all available cores
pub fn resolve_threads(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Create a dedicated pool for sampling workers
pub fn build_thread_pool(n_threads: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(resolve_threads(n_threads))
        .thread_name(|i| format!("phylomotif-worker-{}", i))
        .build()
        .map_err(|e| MotifError::config(format!("Failed to create thread pool: {}", e)))
}
