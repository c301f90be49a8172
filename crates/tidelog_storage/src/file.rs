//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How many times flush/sync is retried before turning a transient I/O
/// failure into a fatal [`StorageError::DurabilityExhausted`].
const DURABILITY_RETRIES: u32 = 3;

/// A file-based storage backend.
///
/// Backs chunk files, ptable files, and scavenge temp files. Data survives
/// process restarts.
///
/// # Durability
///
/// - `flush()` pushes buffered data to the OS, retrying transient failures
/// - `sync()` calls `File::sync_all()` so data and metadata are on disk
///
/// A flush or sync that still fails after the retry budget is surfaced as
/// [`StorageError::DurabilityExhausted`]; the writer owning this file must
/// stop accepting appends rather than continue past unflushed bytes.
///
/// # Thread Safety
///
/// This backend is thread-safe; internal locking keeps the tracked size and
/// the file cursor consistent across concurrent readers.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists it is opened for reading and appending,
    /// otherwise a new empty file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn retry_durable<F>(mut op: F) -> StorageResult<()>
    where
        F: FnMut() -> std::io::Result<()>,
    {
        let mut attempts = 0;
        loop {
            match op() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempts += 1;
                    if attempts >= DURABILITY_RETRIES {
                        return Err(StorageError::DurabilityExhausted {
                            attempts,
                            source: err,
                        });
                    }
                }
            }
        }
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        Self::retry_durable(|| file.flush())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        Self::retry_durable(|| file.sync_all())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        *size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_backend(dir: &TempDir) -> FileBackend {
        FileBackend::open(&dir.path().join("data.bin")).unwrap()
    }

    #[test]
    fn append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let mut backend = temp_backend(&dir);

        let offset = backend.append(b"persistent bytes").unwrap();
        assert_eq!(offset, 0);
        assert_eq!(backend.read_at(0, 16).unwrap(), b"persistent bytes");
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 7);
        assert_eq!(backend.read_at(0, 7).unwrap(), b"durable");
    }

    #[test]
    fn appends_continue_from_existing_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"first").unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        let offset = backend.append(b"second").unwrap();
        assert_eq!(offset, 5);
    }

    #[test]
    fn read_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let mut backend = temp_backend(&dir);
        backend.append(b"abc").unwrap();

        assert!(matches!(
            backend.read_at(2, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn truncate_discards_tail() {
        let dir = TempDir::new().unwrap();
        let mut backend = temp_backend(&dir);
        backend.append(b"abcdef").unwrap();

        backend.truncate(2).unwrap();
        assert_eq!(backend.size().unwrap(), 2);
        assert_eq!(backend.read_at(0, 2).unwrap(), b"ab");
    }

    #[test]
    fn open_with_create_dirs_makes_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("data.bin");
        let mut backend = FileBackend::open_with_create_dirs(&path).unwrap();
        backend.append(b"x").unwrap();
        assert!(path.exists());
    }
}
