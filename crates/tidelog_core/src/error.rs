//! Error types for the Tidelog core engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Tidelog core operations.
///
/// Expected, frequent conditions (wrong expected version, stream deleted,
/// chunk full) are modelled as typed results on the relevant operations,
/// not as variants here. This enum covers the conditions that stop an
/// operation: I/O failures, corruption, misuse.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidelog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A chunk file is corrupted or a record failed framing validation.
    #[error("chunk corruption: {message}")]
    ChunkCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected in a chunk footer or ptable.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A ptable or checkpoint file has an invalid format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// An argument failed validation before touching storage.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the bad argument.
        message: String,
    },

    /// The database directory is locked by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The requested position does not fall inside any known chunk.
    #[error("no chunk covers log position {position}")]
    ChunkNotFound {
        /// The global log position requested.
        position: i64,
    },

    /// This node is not the leader; writes and scavenges are refused.
    #[error("not leader: writes and scavenges require leadership")]
    NotLeader,

    /// The operation was cancelled by its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Stream metadata payload could not be encoded or decoded.
    #[error("metadata codec error: {message}")]
    MetadataCodec {
        /// Description of the codec failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a chunk corruption error.
    pub fn chunk_corruption(message: impl Into<String>) -> Self {
        Self::ChunkCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a metadata codec error.
    pub fn metadata_codec(message: impl Into<String>) -> Self {
        Self::MetadataCodec {
            message: message.into(),
        }
    }
}
