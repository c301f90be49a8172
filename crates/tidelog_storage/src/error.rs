//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A flush or sync still failed after the bounded retry budget.
    ///
    /// A writer that cannot durably persist must stop accepting writes,
    /// so callers treat this as fatal.
    #[error("durability failure after {attempts} attempts: {source}")]
    DurabilityExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final I/O error.
        source: io::Error,
    },

    /// Attempted to truncate to a size larger than the current size.
    #[error("cannot truncate to {requested} bytes, current size is {size}")]
    TruncateBeyondEnd {
        /// Requested new size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}
