//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for Tidelog.
///
/// Storage backends are **opaque byte stores**. They provide simple
/// operations for reading, appending, flushing, and truncating data.
/// Tidelog owns all file-format interpretation: backends do not understand
/// chunk headers, record framing, position maps, or checkpoints.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - After `flush` returns, appended data survives process termination
/// - `truncate` never grows the store
/// - Backends must be `Send + Sync` for concurrent readers
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent chunk, ptable, and temp files
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size
    /// or an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to durable storage.
    ///
    /// Checkpoint values covering appended bytes must only be advanced
    /// after this returns successfully.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails after the retry budget.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// Stronger than `flush`: file metadata (size) is also durable.
    /// Used before a chunk file is switched in by rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails after the retry budget.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// Used to discard a torn tail write found during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
