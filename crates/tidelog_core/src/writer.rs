//! The single log writer.
//!
//! Exactly one writer exists per database. It stamps records with their
//! log position, appends them to the tail chunk, rotates chunks when
//! full, and advances the writer checkpoint only after the appended
//! bytes are durable. Appends are refused while the node is not leader.
//!
//! Rotation abandons the unused tail of a full chunk: positions are
//! logical log offsets, so the next record lands at the start of the new
//! chunk and the gap is simply never addressed.

use crate::bus::{NodeStatus, Publisher, StorageEvent};
use crate::checkpoint::CheckpointSet;
use crate::chunk::manager::ChunkManager;
use crate::chunk::AppendOutcome;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::record::system::{SystemRecord, SystemRecordKind};
use crate::record::LogRecord;
use crate::types::{now_millis, LogPosition};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Appends records to the log.
pub struct LogWriter {
    manager: Arc<ChunkManager>,
    checkpoints: Arc<CheckpointSet>,
    node_status: Arc<dyn NodeStatus>,
    publisher: Arc<dyn Publisher>,
    config: Config,
    /// In-memory head: position after the last appended (not necessarily
    /// flushed) record. Also serializes appends.
    position: Mutex<i64>,
}

impl LogWriter {
    /// Creates a writer over an opened chunk set, repairing any torn
    /// tail left by a crash.
    ///
    /// Bytes in the tail chunk beyond the flushed writer checkpoint were
    /// never covered by a successful flush and are truncated away.
    pub fn recover(
        manager: Arc<ChunkManager>,
        checkpoints: Arc<CheckpointSet>,
        node_status: Arc<dyn NodeStatus>,
        publisher: Arc<dyn Publisher>,
        config: Config,
    ) -> CoreResult<Self> {
        let mut tail = manager.tail();
        if tail.is_completed() {
            // Crash between completing the old tail and creating its
            // successor. Start the successor now.
            tail = manager.add_new_chunk(now_millis())?;
        }

        let flushed = checkpoints.writer.read();
        let head = tail.next_append_position()?;
        let position = if flushed < tail.start_position() {
            // The checkpoint never reached this chunk: everything in it
            // is torn.
            if head > tail.start_position() {
                warn!(
                    torn = head - tail.start_position(),
                    "discarding torn tail chunk data"
                );
                tail.truncate_data(0)?;
            }
            tail.next_append_position()?
        } else if flushed < head {
            warn!(torn = head - flushed, "discarding torn writes past checkpoint");
            tail.truncate_data((flushed - tail.start_position()) as u32)?;
            flushed
        } else if flushed == head {
            head
        } else {
            return Err(CoreError::chunk_corruption(format!(
                "writer checkpoint {flushed} is past the end of the log {head}"
            )));
        };

        // The checkpoint may lag the true head after a rotation crash;
        // bring it up to date so readers see a consistent bound.
        if checkpoints.writer.read() != position {
            checkpoints.writer.write(position);
            checkpoints.writer.flush()?;
        }

        info!(position, "log writer recovered");
        Ok(Self {
            manager,
            checkpoints,
            node_status,
            publisher,
            config,
            position: Mutex::new(position),
        })
    }

    /// Position after the last appended record. May be ahead of the
    /// flushed writer checkpoint.
    #[must_use]
    pub fn position(&self) -> i64 {
        *self.position.lock()
    }

    /// The durable writer checkpoint value.
    #[must_use]
    pub fn flushed_position(&self) -> i64 {
        self.checkpoints.writer.read()
    }

    /// Stamps and appends a record, rotating the tail chunk if full.
    ///
    /// Returns the record's log position. The record is not durable
    /// until [`flush`](Self::flush) succeeds.
    pub fn append(&self, record: &mut LogRecord) -> CoreResult<i64> {
        if !self.node_status.is_leader() {
            return Err(CoreError::NotLeader);
        }
        let mut position = self.position.lock();
        loop {
            let tail = self.manager.tail();
            record.set_log_position(LogPosition::new(tail.next_append_position()?));
            match tail.append(record)? {
                AppendOutcome::Appended { position: at, new_size } => {
                    *position = tail.start_position() + i64::from(new_size);
                    debug!(position = at, kind = ?record.record_type(), "appended record");
                    return Ok(at);
                }
                AppendOutcome::Full => {
                    self.rotate(&tail)?;
                }
            }
        }
    }

    /// Appends and immediately flushes a record.
    pub fn append_flushed(&self, record: &mut LogRecord) -> CoreResult<i64> {
        let at = self.append(record)?;
        self.flush()?;
        Ok(at)
    }

    /// Makes all appended records durable and advances the writer
    /// checkpoint to cover them.
    pub fn flush(&self) -> CoreResult<i64> {
        let position = self.position.lock();
        let tail = self.manager.tail();
        if self.config.sync_on_flush {
            tail.sync()?;
        } else {
            tail.flush()?;
        }
        self.checkpoints.writer.write(*position);
        self.checkpoints.writer.flush()?;
        Ok(*position)
    }

    /// Writes an epoch record announcing this node's leadership term.
    ///
    /// The record chains to the previous epoch via the epoch checkpoint.
    pub fn write_epoch(&self, epoch_number: i64, leader_instance_id: Uuid) -> CoreResult<i64> {
        let prev = self.checkpoints.epoch.read();
        let mut record = LogRecord::System(SystemRecord::new(
            LogPosition::NONE,
            now_millis(),
            SystemRecordKind::Epoch {
                epoch_number,
                prev_epoch_position: prev,
                epoch_id: Uuid::new_v4(),
                leader_instance_id,
            },
        ));
        let at = self.append_flushed(&mut record)?;
        self.checkpoints.epoch.write(at);
        self.checkpoints.epoch.flush()?;
        self.publisher.publish(StorageEvent::EpochWritten {
            epoch_number,
            log_position: LogPosition::new(at),
        });
        info!(epoch_number, position = at, "wrote epoch record");
        Ok(at)
    }

    /// Writes a scavenge point record.
    pub fn write_scavenge_point(&self, scavenge_id: Uuid, threshold: i64) -> CoreResult<i64> {
        let mut record = LogRecord::System(SystemRecord::new(
            LogPosition::NONE,
            now_millis(),
            SystemRecordKind::ScavengePoint {
                scavenge_id,
                threshold,
            },
        ));
        self.append_flushed(&mut record)
    }

    /// Completes the tail chunk and opens the next one. The position
    /// jumps to the new chunk's start.
    fn rotate(&self, tail: &Arc<crate::chunk::Chunk>) -> CoreResult<()> {
        // Flush before sealing so the footer never covers unflushed data.
        if self.config.sync_on_flush {
            tail.sync()?;
        } else {
            tail.flush()?;
        }
        let completed_number = tail.chunk_end_number();
        let new_tail = self.manager.add_new_chunk(now_millis())?;
        self.publisher.publish(StorageEvent::ChunkCompleted {
            chunk_number: completed_number,
        });
        info!(
            completed = completed_number.as_i32(),
            next = new_tail.chunk_start_number().as_i32(),
            "rotated chunk"
        );
        Ok(())
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("position", &self.position())
            .field("flushed", &self.flushed_position())
            .finish_non_exhaustive()
    }
}
