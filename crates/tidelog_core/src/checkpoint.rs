//! Durable monotonic position checkpoints.
//!
//! Each subsystem persists its progress through a named checkpoint:
//! the writer, the chaser, the replication layer, the index committer,
//! plus the epoch and truncate markers. A checkpoint holds a single i64
//! log position; `write` is immediately visible in-process, `flush`
//! makes it durable.
//!
//! ## Invariants
//!
//! - `writer >= chaser >= replication >= index` at every instant
//! - A checkpoint is flushed only after the bytes it covers are flushed
//! - After a crash, `read()` returns a value no greater than the last
//!   flushed value

use crate::error::{CoreError, CoreResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A persisted monotonic log-position marker.
///
/// `write` updates the in-process value; concurrent readers in the same
/// process observe it without a flush. `flush` persists it durably.
/// Flush failures are fatal to the owning subsystem and must propagate.
pub trait Checkpoint: Send + Sync {
    /// Returns the checkpoint's name.
    fn name(&self) -> &str;

    /// Returns the current in-process value.
    fn read(&self) -> i64;

    /// Updates the in-process value.
    fn write(&self, value: i64);

    /// Persists the current value durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be made durable.
    fn flush(&self) -> CoreResult<()>;
}

/// A checkpoint backed by a dedicated 8-byte file.
///
/// The value is stored little-endian and rewritten in place; `flush`
/// issues `sync_all` so the value survives power loss. 8-byte writes to
/// the start of a file are atomic on the filesystems Tidelog targets,
/// so the file never holds a half-written value.
pub struct FileCheckpoint {
    name: String,
    value: AtomicI64,
    file: parking_lot::Mutex<File>,
}

impl FileCheckpoint {
    /// Opens or creates a checkpoint file.
    ///
    /// A missing or empty file yields `initial_value`; an existing file
    /// must contain exactly 8 bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or holds a value of
    /// unexpected length.
    pub fn open(path: &Path, name: impl Into<String>, initial_value: i64) -> CoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let value = match len {
            0 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&initial_value.to_le_bytes());
                file.write_all(&buf)?;
                file.sync_all()?;
                initial_value
            }
            8 => {
                let mut buf = [0u8; 8];
                file.seek(SeekFrom::Start(0))?;
                file.read_exact(&mut buf)?;
                i64::from_le_bytes(buf)
            }
            other => {
                return Err(CoreError::invalid_format(format!(
                    "checkpoint file {path:?} has invalid length {other}"
                )))
            }
        };

        Ok(Self {
            name: name.into(),
            value: AtomicI64::new(value),
            file: parking_lot::Mutex::new(file),
        })
    }
}

impl Checkpoint for FileCheckpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    fn write(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    fn flush(&self) -> CoreResult<()> {
        let value = self.value.load(Ordering::Acquire);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&value.to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCheckpoint")
            .field("name", &self.name)
            .field("value", &self.read())
            .finish_non_exhaustive()
    }
}

/// An in-memory checkpoint for tests and ephemeral databases.
#[derive(Debug)]
pub struct InMemoryCheckpoint {
    name: String,
    value: AtomicI64,
    flushed: AtomicI64,
}

impl InMemoryCheckpoint {
    /// Creates a new in-memory checkpoint.
    #[must_use]
    pub fn new(name: impl Into<String>, initial_value: i64) -> Self {
        Self {
            name: name.into(),
            value: AtomicI64::new(initial_value),
            flushed: AtomicI64::new(initial_value),
        }
    }

    /// Returns the last flushed value, for asserting flush ordering.
    #[must_use]
    pub fn flushed(&self) -> i64 {
        self.flushed.load(Ordering::Acquire)
    }
}

impl Checkpoint for InMemoryCheckpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    fn write(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    fn flush(&self) -> CoreResult<()> {
        self.flushed
            .store(self.value.load(Ordering::Acquire), Ordering::Release);
        Ok(())
    }
}

/// The named checkpoints of one database instance.
///
/// Ownership is one subsystem per checkpoint: the writer advances
/// `writer`, the chaser advances `chaser`, the index committer advances
/// `index`, and so on. Everyone else only reads.
pub struct CheckpointSet {
    /// Tail of durably written log bytes.
    pub writer: Arc<dyn Checkpoint>,
    /// Confirmed (chased) position; never ahead of `writer`.
    pub chaser: Arc<dyn Checkpoint>,
    /// Replication-safe position; never ahead of `chaser`.
    pub replication: Arc<dyn Checkpoint>,
    /// Position up to which the table index is durably committed.
    pub index: Arc<dyn Checkpoint>,
    /// Position of the last epoch record, -1 if none.
    pub epoch: Arc<dyn Checkpoint>,
    /// Truncation target set during recovery, -1 if none.
    pub truncate: Arc<dyn Checkpoint>,
}

impl CheckpointSet {
    /// Opens all checkpoint files inside `dir`, creating missing ones
    /// with their standard initial values.
    ///
    /// # Errors
    ///
    /// Returns an error if any checkpoint file cannot be opened.
    pub fn open(dir: &Path) -> CoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let open = |file: &str, name: &str, initial: i64| -> CoreResult<Arc<dyn Checkpoint>> {
            Ok(Arc::new(FileCheckpoint::open(
                &dir.join(file),
                name,
                initial,
            )?))
        };
        Ok(Self {
            writer: open("writer.chk", "writer", 0)?,
            chaser: open("chaser.chk", "chaser", 0)?,
            replication: open("replication.chk", "replication", 0)?,
            index: open("index.chk", "index", -1)?,
            epoch: open("epoch.chk", "epoch", -1)?,
            truncate: open("truncate.chk", "truncate", -1)?,
        })
    }

    /// Creates an in-memory checkpoint set for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            writer: Arc::new(InMemoryCheckpoint::new("writer", 0)),
            chaser: Arc::new(InMemoryCheckpoint::new("chaser", 0)),
            replication: Arc::new(InMemoryCheckpoint::new("replication", 0)),
            index: Arc::new(InMemoryCheckpoint::new("index", -1)),
            epoch: Arc::new(InMemoryCheckpoint::new("epoch", -1)),
            truncate: Arc::new(InMemoryCheckpoint::new("truncate", -1)),
        }
    }

    /// Flushes every checkpoint, writer-first.
    ///
    /// # Errors
    ///
    /// Returns the first flush failure.
    pub fn flush_all(&self) -> CoreResult<()> {
        self.writer.flush()?;
        self.chaser.flush()?;
        self.replication.flush()?;
        self.index.flush()?;
        self.epoch.flush()?;
        self.truncate.flush()?;
        Ok(())
    }

    /// Asserts the progress ordering between the dependent checkpoints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if any persisted progress runs ahead of
    /// the data it depends on.
    pub fn verify_ordering(&self) -> CoreResult<()> {
        let writer = self.writer.read();
        let chaser = self.chaser.read();
        let replication = self.replication.read();
        let index = self.index.read();

        if chaser > writer || replication > chaser || index > replication.max(chaser) {
            return Err(CoreError::invalid_operation(format!(
                "checkpoint ordering violated: writer={writer} chaser={chaser} \
                 replication={replication} index={index}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CheckpointSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointSet")
            .field("writer", &self.writer.read())
            .field("chaser", &self.chaser.read())
            .field("replication", &self.replication.read())
            .field("index", &self.index.read())
            .field("epoch", &self.epoch.read())
            .field("truncate", &self.truncate.read())
            .finish()
    }
}
