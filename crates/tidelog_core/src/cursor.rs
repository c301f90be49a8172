//! Sequential readers over the chunked log.
//!
//! A [`SeqReader`] walks records forward or backward across chunk
//! boundaries, bounded above by a checkpoint so it never observes bytes
//! the chaser (or writer) has not accounted for. A [`PinnedCursor`] is a
//! named, heap-stable position cell shared between an embedder and the
//! engine; it implements [`Checkpoint`] so it can bound a reader
//! directly.

use crate::checkpoint::Checkpoint;
use crate::chunk::manager::ChunkManager;
use crate::chunk::SeqReadResult;
use crate::error::CoreResult;
use crate::record::LogRecord;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// One record yielded by a sequential reader.
#[derive(Debug)]
pub struct SeqRead {
    /// The decoded record.
    pub record: LogRecord,
    /// Global log position of the record.
    pub position: i64,
    /// Bytes the record occupies on disk, including framing.
    pub length: usize,
}

/// A sequential reader over the log.
///
/// The reader holds a position between records. Forward reads yield the
/// next record at or after the position and advance past it; backward
/// reads yield the record ending at or before the position and move to
/// its start. Records at or past the bounding checkpoint are never
/// yielded.
pub struct SeqReader {
    manager: Arc<ChunkManager>,
    limit: Arc<dyn Checkpoint>,
    position: i64,
}

impl SeqReader {
    /// Creates a reader starting at `position`, bounded by `limit`.
    #[must_use]
    pub fn new(manager: Arc<ChunkManager>, limit: Arc<dyn Checkpoint>, position: i64) -> Self {
        Self {
            manager,
            limit,
            position,
        }
    }

    /// The current position.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Repositions the reader.
    pub fn set_position(&mut self, position: i64) {
        self.position = position;
    }

    /// Reads the next record at or after the current position.
    ///
    /// Returns `Ok(None)` at the bound.
    pub fn try_read_next(&mut self) -> CoreResult<Option<SeqRead>> {
        loop {
            let limit = self.limit.read();
            if self.position >= limit {
                return Ok(None);
            }
            let chunk = match self.manager.chunk_for(self.position) {
                Ok(chunk) => chunk,
                Err(crate::error::CoreError::ChunkNotFound { .. }) => return Ok(None),
                Err(err) => return Err(err),
            };
            let local = self.position - chunk.start_position();
            match chunk.try_read_closest_forward(local)? {
                SeqReadResult::Success {
                    record,
                    length,
                    local_position,
                    next_position,
                } => {
                    let position = chunk.start_position() + local_position;
                    if position >= limit {
                        return Ok(None);
                    }
                    self.position = chunk.start_position() + next_position;
                    return Ok(Some(SeqRead {
                        record,
                        position,
                        length,
                    }));
                }
                SeqReadResult::Eof => {
                    // Nothing further in this chunk; continue in the next.
                    self.position = chunk.end_position();
                }
            }
        }
    }

    /// Reads the record ending at or before the current position.
    ///
    /// Returns `Ok(None)` at the start of the log.
    pub fn try_read_prev(&mut self) -> CoreResult<Option<SeqRead>> {
        loop {
            if self.position <= 0 {
                return Ok(None);
            }
            let chunk = self.manager.chunk_for(self.position - 1)?;
            let local = self.position - chunk.start_position();
            match chunk.try_read_closest_backward(local)? {
                SeqReadResult::Success {
                    record,
                    length,
                    local_position,
                    ..
                } => {
                    self.position = chunk.start_position() + local_position;
                    return Ok(Some(SeqRead {
                        record,
                        position: self.position,
                        length,
                    }));
                }
                SeqReadResult::Eof => {
                    self.position = chunk.start_position();
                }
            }
        }
    }
}

impl std::fmt::Debug for SeqReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqReader")
            .field("position", &self.position)
            .field("limit", &self.limit.read())
            .finish_non_exhaustive()
    }
}

/// A named in-memory position cell with a stable heap address.
///
/// Handed out as `Arc<PinnedCursor>` so an embedder and the engine can
/// share one cell; subscription bookkeeping keeps the `Arc` alive while
/// either side still reads it.
#[derive(Debug)]
pub struct PinnedCursor {
    name: String,
    position: AtomicI64,
}

impl PinnedCursor {
    /// Creates a cursor with an initial position.
    #[must_use]
    pub fn new(name: impl Into<String>, initial: i64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            position: AtomicI64::new(initial),
        })
    }
}

impl Checkpoint for PinnedCursor {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    fn write(&self, value: i64) {
        self.position.store(value, Ordering::Release);
    }

    fn flush(&self) -> CoreResult<()> {
        Ok(())
    }
}
