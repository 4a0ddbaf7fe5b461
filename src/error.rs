//! Error types for the file cache
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the file cache.
///
/// A missing entry is never an error: lookups report absence as `None`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O failure while writing, removing or listing entries
    #[error("Storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stored bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Key or value could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// The platform has no standard cache location
    #[error("No cache directory available: {0}")]
    NoCacheDirectory(String),
}

impl CacheError {
    /// Wraps an I/O error with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors caused by unreadable stored data.
    pub fn is_decode(&self) -> bool {
        matches!(self, CacheError::Decode(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the file cache.
pub type Result<T> = std::result::Result<T, CacheError>;
