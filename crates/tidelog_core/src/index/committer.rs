//! Applies committed log records to the stream index.
//!
//! The index checkpoint only covers entries that reached a ptable.
//! Memtable entries are rebuilt after a restart by re-reading the log
//! from the checkpoint, which is why [`MemTable::add`] tolerates
//! duplicates.

use crate::bus::{Publisher, StorageEvent};
use crate::checkpoint::CheckpointSet;
use crate::error::CoreResult;
use crate::index::TableIndex;
use crate::types::{EventNumber, LogPosition, StreamHash};
use std::sync::Arc;
use tracing::debug;

#[cfg(doc)]
use crate::index::MemTable;

/// Feeds committed events into the [`TableIndex`] and keeps the index
/// checkpoint honest.
pub struct IndexCommitter {
    index: Arc<TableIndex>,
    checkpoints: Arc<CheckpointSet>,
    publisher: Arc<dyn Publisher>,
}

impl IndexCommitter {
    /// Creates a committer over an open index.
    pub fn new(
        index: Arc<TableIndex>,
        checkpoints: Arc<CheckpointSet>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            index,
            checkpoints,
            publisher,
        }
    }

    /// The index this committer writes into.
    #[must_use]
    pub fn index(&self) -> &Arc<TableIndex> {
        &self.index
    }

    /// Indexes one committed event.
    ///
    /// `next_position` is where reading resumes after this record; the
    /// index checkpoint advances there when the add triggers a memtable
    /// persist.
    pub fn commit_event(
        &self,
        stream_id: &str,
        event_number: EventNumber,
        position: i64,
        next_position: i64,
    ) -> CoreResult<()> {
        let hash = StreamHash::of(stream_id);
        let persisted = self.index.add(hash, event_number, position)?;
        self.publisher.publish(StorageEvent::EventCommitted {
            stream_id: stream_id.to_string(),
            event_number,
            log_position: LogPosition::new(position),
        });
        if persisted {
            self.advance_checkpoint(next_position)?;
        }
        Ok(())
    }

    /// Indexes a stream deletion.
    ///
    /// The tombstone is an ordinary index entry at the highest possible
    /// event number, so it sorts after every real event of the stream.
    pub fn commit_delete(
        &self,
        stream_id: &str,
        position: i64,
        next_position: i64,
    ) -> CoreResult<()> {
        let hash = StreamHash::of(stream_id);
        let persisted = self.index.add(hash, EventNumber::TOMBSTONE, position)?;
        self.publisher.publish(StorageEvent::StreamDeleted {
            stream_id: stream_id.to_string(),
            log_position: LogPosition::new(position),
        });
        if persisted {
            self.advance_checkpoint(next_position)?;
        }
        Ok(())
    }

    /// Persists the memtable and advances the checkpoint to `position`.
    ///
    /// Called on shutdown so a clean restart replays nothing.
    pub fn persist(&self, position: i64) -> CoreResult<()> {
        self.index.persist_memtable()?;
        self.advance_checkpoint(position)
    }

    fn advance_checkpoint(&self, position: i64) -> CoreResult<()> {
        if position > self.checkpoints.index.read() {
            self.checkpoints.index.write(position);
            self.checkpoints.index.flush()?;
            debug!(position, "index checkpoint advanced");
        }
        Ok(())
    }
}
