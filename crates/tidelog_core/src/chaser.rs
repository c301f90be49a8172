//! The chaser follows the writer and feeds the index.
//!
//! It reads records between the chaser checkpoint and the writer
//! checkpoint, resolves event numbers, and hands committed events to the
//! [`IndexCommitter`]. The chaser checkpoint never passes the writer
//! checkpoint, and reads never surface records the chaser has not
//! processed.
//!
//! After a restart the chaser resumes from the index checkpoint rather
//! than its own: memtable entries above the index checkpoint were lost
//! with the process, and replaying them is safe because memtable adds
//! are idempotent.

use crate::checkpoint::{Checkpoint, CheckpointSet};
use crate::chunk::manager::ChunkManager;
use crate::cursor::{PinnedCursor, SeqReader};
use crate::error::{CoreError, CoreResult};
use crate::index::IndexCommitter;
use crate::record::prepare::{PrepareFlags, PrepareRecord};
use crate::record::LogRecord;
use crate::types::EventNumber;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// Applies written records to the index, in log order.
pub struct Chaser {
    manager: Arc<ChunkManager>,
    checkpoints: Arc<CheckpointSet>,
    committer: Arc<IndexCommitter>,
    reader: Mutex<SeqReader>,
}

impl Chaser {
    /// Creates a chaser resuming from the index checkpoint.
    pub fn new(
        manager: Arc<ChunkManager>,
        checkpoints: Arc<CheckpointSet>,
        committer: Arc<IndexCommitter>,
    ) -> Self {
        let start = checkpoints.index.read().max(0);
        let reader = SeqReader::new(
            Arc::clone(&manager),
            Arc::clone(&checkpoints.writer),
            start,
        );
        checkpoints.chaser.write(start);
        Self {
            manager,
            checkpoints,
            committer,
            reader: Mutex::new(reader),
        }
    }

    /// The position of the next unprocessed record.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.reader.lock().position()
    }

    /// Processes at most one record. Returns false when caught up with
    /// the writer checkpoint.
    pub fn chase_once(&self) -> CoreResult<bool> {
        let mut reader = self.reader.lock();
        let Some(read) = reader.try_read_next()? else {
            return Ok(false);
        };
        let next_position = reader.position();
        self.apply(&read.record, next_position)?;
        self.checkpoints.chaser.write(next_position);
        trace!(position = read.position, "chased record");
        Ok(true)
    }

    /// Processes every record up to the writer checkpoint, then flushes
    /// the chaser checkpoint. Returns the number of records processed.
    pub fn chase_all(&self) -> CoreResult<u64> {
        let mut processed = 0u64;
        while self.chase_once()? {
            processed += 1;
        }
        if processed > 0 {
            self.checkpoints.chaser.flush()?;
            debug!(processed, position = self.position(), "chaser caught up");
        }
        Ok(processed)
    }

    fn apply(&self, record: &LogRecord, next_position: i64) -> CoreResult<()> {
        match record {
            LogRecord::Prepare(prepare) => {
                // Uncommitted prepares wait for their commit record.
                if prepare.is_committed() {
                    self.apply_prepare(prepare, committed_event_number(prepare)?, next_position)?;
                }
                Ok(())
            }
            LogRecord::Commit(commit) => {
                self.apply_transaction(
                    commit.transaction_position,
                    commit.first_event_number,
                    commit.log_position.as_i64(),
                    next_position,
                )
            }
            LogRecord::System(_) => Ok(()),
        }
    }

    fn apply_prepare(
        &self,
        prepare: &PrepareRecord,
        event_number: i64,
        next_position: i64,
    ) -> CoreResult<()> {
        let position = prepare.log_position.as_i64();
        if prepare.is_tombstone() {
            self.committer
                .commit_delete(&prepare.stream_id, position, next_position)
        } else {
            self.committer.commit_event(
                &prepare.stream_id,
                EventNumber::new(event_number),
                position,
                next_position,
            )
        }
    }

    /// Indexes the prepares of an explicit transaction once its commit
    /// record arrives.
    fn apply_transaction(
        &self,
        transaction_position: i64,
        first_event_number: i64,
        commit_position: i64,
        next_position: i64,
    ) -> CoreResult<()> {
        let bound: Arc<dyn Checkpoint> = PinnedCursor::new("transaction-scan", commit_position);
        let mut reader = SeqReader::new(Arc::clone(&self.manager), bound, transaction_position);
        let mut assigned = first_event_number;
        loop {
            let Some(read) = reader.try_read_next()? else {
                // The transaction's tail was scavenged away; whatever
                // survives has already been indexed and filtered.
                return Ok(());
            };
            let LogRecord::Prepare(prepare) = &read.record else {
                continue;
            };
            if prepare.transaction_position != transaction_position {
                continue;
            }
            if prepare.flags.contains(PrepareFlags::DATA)
                || prepare.flags.contains(PrepareFlags::STREAM_DELETE)
            {
                self.apply_prepare(prepare, assigned, next_position)?;
                assigned += 1;
            }
            if prepare.flags.contains(PrepareFlags::TRANSACTION_END) {
                return Ok(());
            }
        }
    }
}

/// The event number a committed prepare carries implicitly.
///
/// The writer resolves `Any`/`NoStream` to an exact version before the
/// prepare hits the log, so a committed data prepare always encodes its
/// predecessor's number. Tombstones keep `Any` and are indexed at the
/// tombstone number instead.
fn committed_event_number(prepare: &PrepareRecord) -> CoreResult<i64> {
    if prepare.is_tombstone() {
        return Ok(EventNumber::TOMBSTONE.as_i64());
    }
    let event_number = prepare.expected_version.as_i64() + 1 + i64::from(prepare.transaction_offset);
    if event_number < 0 {
        return Err(CoreError::chunk_corruption(format!(
            "committed prepare at {} has unresolved expected version",
            prepare.log_position.as_i64()
        )));
    }
    Ok(event_number)
}
