//! Crash recovery testing helpers.
//!
//! Simulates crashes by corrupting log files on disk or by injecting
//! failures into a storage backend, then verifies that the database
//! recovers to its last flushed state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidelog_testkit::crash::{append_garbage, newest_chunk_file};
//!
//! let chunk = newest_chunk_file(db_root).unwrap();
//! append_garbage(&chunk, 64).unwrap();
//! // Reopen the database and assert the committed events are intact.
//! ```

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tidelog_core::chunk::manager::parse_chunk_file_name;
use tidelog_storage::{StorageBackend, StorageError, StorageResult};

/// Finds the chunk file with the highest chunk number under a database
/// root, preferring the highest version where several exist.
pub fn newest_chunk_file(root: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut best: Option<(i32, u32, PathBuf)> = None;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((start, _end, version)) = parse_chunk_file_name(name) else {
            continue;
        };
        let key = (start.as_i32(), version);
        if best
            .as_ref()
            .is_none_or(|(s, v, _)| key > (*s, *v))
        {
            best = Some((key.0, key.1, entry.path()));
        }
    }
    Ok(best.map(|(_, _, path)| path))
}

/// Appends `len` bytes of garbage to a file, simulating a torn write
/// that reached the disk before a crash.
pub fn append_garbage(path: &Path, len: usize) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(&vec![0xFF; len])?;
    file.sync_all()
}

/// Truncates the last `len` bytes off a file.
pub fn truncate_tail(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let size = file.metadata()?.len();
    file.set_len(size.saturating_sub(len))?;
    file.sync_all()
}

/// Flips every bit of one byte, `offset_from_end` bytes before the end
/// of the file.
pub fn flip_byte(path: &Path, offset_from_end: u64) -> std::io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let size = file.metadata()?.len();
    let offset = size
        .checked_sub(offset_from_end + 1)
        .expect("offset_from_end past start of file");
    let mut byte = [0u8];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut byte)?;
    byte[0] = !byte[0];
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)?;
    file.sync_all()
}

/// A storage backend wrapper that can simulate crashes.
///
/// Writes past the configured budget fail with an I/O error, as do all
/// subsequent appends, flushes, and syncs, mimicking a process that
/// died mid-write.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl CrashableBackend {
    /// Wraps an inner backend with crash injection disabled.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
        }
    }

    /// Arms the backend to crash once `bytes` have been appended.
    pub fn crash_after(&self, bytes: usize) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Makes every flush and sync fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Clears all injected failures.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_flush.store(false, Ordering::SeqCst);
    }

    /// Whether an injected crash has fired.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn crash_error(context: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!(
            "simulated crash during {context}"
        )))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(Self::crash_error("append"));
        }
        let current = self.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.crash_after_bytes.load(Ordering::SeqCst);
        if current + data.len() > threshold {
            // Write only the bytes that fit, then die.
            let partial = threshold.saturating_sub(current);
            if partial > 0 {
                self.inner.append(&data[..partial])?;
            }
            self.crashed.store(true, Ordering::SeqCst);
            return Err(Self::crash_error("append"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.crashed.load(Ordering::SeqCst) || self.fail_on_flush.load(Ordering::SeqCst) {
            return Err(Self::crash_error("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.crashed.load(Ordering::SeqCst) || self.fail_on_flush.load(Ordering::SeqCst) {
            return Err(Self::crash_error("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
