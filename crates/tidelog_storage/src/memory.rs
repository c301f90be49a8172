//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests (chunk, checkpoint, and index logic without disk)
/// - Crash-scenario tests that snapshot and corrupt raw bytes
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads. Clones
/// share the same underlying buffer, so a test can keep a handle to the
/// bytes after handing the backend to a chunk.
///
/// # Example
///
/// ```rust
/// use tidelog_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery over torn or corrupted bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites a single byte in place.
    ///
    /// Only exists so corruption tests can flip bits without going through
    /// the append-only interface.
    pub fn corrupt_byte(&self, offset: usize, value: u8) {
        let mut data = self.data.write();
        if offset < data.len() {
            data[offset] = value;
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"abc").unwrap(), 0);
        assert_eq!(backend.append(b"defg").unwrap(), 3);
        assert_eq!(backend.size().unwrap(), 7);
    }

    #[test]
    fn read_at_returns_written_bytes() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"ab").unwrap();
        assert!(matches!(
            backend.read_at(1, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn truncate_discards_tail() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abcdef").unwrap();
        backend.truncate(3).unwrap();
        assert_eq!(backend.size().unwrap(), 3);
        assert_eq!(backend.data(), b"abc");
    }

    #[test]
    fn truncate_beyond_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"ab").unwrap();
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));
    }

    #[test]
    fn corrupt_byte_flips_in_place() {
        let mut backend = InMemoryBackend::new();
        backend.append(&[1, 2, 3]).unwrap();
        backend.corrupt_byte(1, 0xFF);
        assert_eq!(backend.data(), vec![1, 0xFF, 3]);
    }

    #[test]
    fn with_data_preserves_contents() {
        let backend = InMemoryBackend::with_data(vec![9, 8, 7]);
        assert_eq!(backend.size().unwrap(), 3);
        assert_eq!(backend.read_at(0, 3).unwrap(), vec![9, 8, 7]);
    }
}
