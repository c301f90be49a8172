//! Database directory layout and process-exclusive locking.
//!
//! One database is one directory:
//!
//! ```text
//! <root>/
//!   LOCK             advisory exclusive lock, held while open
//!   chunk-*.??????   chunk files (managed by the chunk manager)
//!   chk/             checkpoint files
//!   index/           memtable dumps and the table map
//!   scavenge.chk     scavenge run checkpoint
//! ```
//!
//! Chunk files share the root with the lock file and scavenge state; the
//! chunk manager ignores names it does not recognize.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

const LOCK_FILE: &str = "LOCK";
const CHECKPOINT_DIR: &str = "chk";
const INDEX_DIR: &str = "index";

/// An opened, locked database directory.
///
/// The advisory lock is released when the value drops.
#[derive(Debug)]
pub struct LogDir {
    root: PathBuf,
    _lock: File,
}

impl LogDir {
    /// Opens a database directory and takes its exclusive lock.
    ///
    /// With `create_if_missing` the directory and subdirectories are
    /// created; otherwise a missing directory is an error. A lock held by
    /// another process yields [`CoreError::DatabaseLocked`].
    pub fn open(root: impl Into<PathBuf>, create_if_missing: bool) -> CoreResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            if !create_if_missing {
                return Err(CoreError::invalid_operation(format!(
                    "database directory {} does not exist",
                    root.display()
                )));
            }
            fs::create_dir_all(&root)?;
        }
        fs::create_dir_all(root.join(CHECKPOINT_DIR))?;
        fs::create_dir_all(root.join(INDEX_DIR))?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| CoreError::DatabaseLocked)?;

        info!(root = %root.display(), "locked database directory");
        Ok(Self { root, _lock: lock })
    }

    /// The database root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where chunk files live (the root itself).
    #[must_use]
    pub fn chunks_dir(&self) -> &Path {
        &self.root
    }

    /// The checkpoint directory.
    #[must_use]
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join(CHECKPOINT_DIR)
    }

    /// The index directory.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    /// Where scavenge state lives (the root itself).
    #[must_use]
    pub fn scavenge_dir(&self) -> &Path {
        &self.root
    }

    /// True if the directory already holds at least one chunk file.
    pub fn has_chunks(&self) -> CoreResult<bool> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if crate::chunk::manager::parse_chunk_file_name(name).is_some() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
