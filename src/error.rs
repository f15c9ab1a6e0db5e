//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.
//!
//! Per-unit sampling failures are not errors at this level: the scheduler
//! collects them as values so one degenerate block cannot abort a session.
//! Only a session in which every unit failed surfaces as [`MotifError::Sampling`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for phylomotif operations
#[derive(Error, Debug)]
pub enum MotifError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (invalid CLI arguments, unreadable inputs)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Tree model and alignment disagree, or the model uses unsupported options
    #[error("Model compatibility error: {message}")]
    ModelCompat { message: String },

    /// Sampling failed for a block (numerical degeneracy)
    #[error("Sampling error in block {block}: {message}")]
    Sampling { block: String, message: String },

    /// Cache or hash dump is unreadable or corrupt
    #[error("Cache error in {}: {message}", path.display())]
    CacheFormat { path: PathBuf, message: String },

    /// File not found errors
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Text parse errors
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// JSON input errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results using MotifError
pub type Result<T> = std::result::Result<T, MotifError>;

impl MotifError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a model compatibility error
    pub fn model(message: impl Into<String>) -> Self {
        Self::ModelCompat {
            message: message.into(),
        }
    }

    /// Create a sampling error for a named block
    pub fn sampling(block: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sampling {
            block: block.into(),
            message: message.into(),
        }
    }

    /// Create a cache format error
    pub fn cache(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CacheFormat {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// True for errors that describe a broken cache file
    pub fn is_cache_error(&self) -> bool {
        matches!(self, Self::CacheFormat { .. })
    }
}
