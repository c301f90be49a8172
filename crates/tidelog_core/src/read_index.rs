//! Stream and $all reads over the table index.
//!
//! The index maps a 64-bit stream hash to log positions. Hashes can
//! collide, so every candidate entry is verified by re-reading its
//! prepare and comparing stream ids; the number of verification reads
//! per operation is bounded by `hash_collision_read_limit`.
//!
//! Retention metadata is applied here, at read time: events a stream's
//! `max_count`, `max_age` or `truncate_before` exclude are invisible to
//! readers even before the scavenger reclaims their bytes. A hard-deleted
//! stream reads as [`ReadEventResult::StreamDeleted`] forever.

use crate::checkpoint::CheckpointSet;
use crate::chunk::manager::ChunkManager;
use crate::chunk::RecordReadResult;
use crate::config::Config;
use crate::cursor::SeqReader;
use crate::error::{CoreError, CoreResult};
use crate::index::{PrepareLookup, TableIndex};
use crate::metadata::{self, StreamMetadata};
use crate::record::prepare::PrepareRecord;
use crate::record::LogRecord;
use crate::types::{now_millis, EventNumber, LogPosition, StreamHash};
use std::sync::Arc;
use uuid::Uuid;

/// A committed event as surfaced to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// The stream the event belongs to.
    pub stream_id: String,
    /// Position of the event in its stream.
    pub event_number: EventNumber,
    /// Caller-assigned unique id.
    pub event_id: Uuid,
    /// Caller-assigned type tag.
    pub event_type: String,
    /// Event payload.
    pub data: Vec<u8>,
    /// Caller-supplied metadata payload.
    pub metadata: Vec<u8>,
    /// Position of the prepare record in the log.
    pub log_position: LogPosition,
    /// Unix-millis creation timestamp.
    pub timestamp: i64,
}

impl RecordedEvent {
    fn from_prepare(prepare: &PrepareRecord, event_number: EventNumber) -> Self {
        Self {
            stream_id: prepare.stream_id.clone(),
            event_number,
            event_id: prepare.event_id,
            event_type: prepare.event_type.clone(),
            data: prepare.data.clone(),
            metadata: prepare.metadata.clone(),
            log_position: prepare.log_position,
            timestamp: prepare.timestamp,
        }
    }
}

/// Outcome of a single-event read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEventResult {
    /// The event exists and is visible.
    Success(Box<RecordedEvent>),
    /// The stream exists but has no visible event with that number.
    NotFound,
    /// No such stream.
    NoStream,
    /// The stream was hard-deleted.
    StreamDeleted,
}

/// Outcome of a stream slice read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStreamResult {
    /// A slice of the stream, possibly empty.
    Success {
        /// Visible events, in request order.
        events: Vec<RecordedEvent>,
        /// Where the next read in the same direction should start.
        next_event_number: i64,
        /// The stream's current last event number.
        last_event_number: i64,
        /// True if the slice reached the end in the read direction.
        is_end_of_stream: bool,
    },
    /// No such stream, or every event was deleted by retention.
    NoStream,
    /// The stream was hard-deleted.
    StreamDeleted,
}

/// A slice of the global log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllEventsSlice {
    /// Committed events, in request order.
    pub events: Vec<RecordedEvent>,
    /// Where the next read in the same direction should start.
    pub next_position: i64,
}

/// Read-side facade over the chunks, the table index and metadata.
pub struct ReadIndex {
    manager: Arc<ChunkManager>,
    index: Arc<TableIndex>,
    checkpoints: Arc<CheckpointSet>,
    config: Config,
}

impl ReadIndex {
    /// Creates a read index over open storage.
    pub fn new(
        manager: Arc<ChunkManager>,
        index: Arc<TableIndex>,
        checkpoints: Arc<CheckpointSet>,
        config: Config,
    ) -> Self {
        Self {
            manager,
            index,
            checkpoints,
            config,
        }
    }

    /// The table index this facade reads from.
    #[must_use]
    pub fn table_index(&self) -> &Arc<TableIndex> {
        &self.index
    }

    /// Reads one event from a stream.
    pub fn read_event(&self, stream_id: &str, event_number: i64) -> CoreResult<ReadEventResult> {
        let hash = StreamHash::of(stream_id);
        if self.is_deleted(stream_id, hash)? {
            return Ok(ReadEventResult::StreamDeleted);
        }
        let Some(last) = self.last_event_number(stream_id)? else {
            return Ok(ReadEventResult::NoStream);
        };
        let metadata = self.stream_metadata(stream_id)?;
        let first = first_visible(last, &metadata);

        let wanted = if event_number < 0 { last } else { event_number };
        if wanted < first || wanted > last {
            return Ok(ReadEventResult::NotFound);
        }
        let Some(prepare) = self.verified_prepare(stream_id, hash, wanted)? else {
            return Ok(ReadEventResult::NotFound);
        };
        if expired(&prepare, &metadata, now_millis()) {
            return Ok(ReadEventResult::NotFound);
        }
        Ok(ReadEventResult::Success(Box::new(
            RecordedEvent::from_prepare(&prepare, EventNumber::new(wanted)),
        )))
    }

    /// Reads up to `max` events of a stream, ascending from `from`.
    pub fn read_stream_forward(
        &self,
        stream_id: &str,
        from: i64,
        max: usize,
    ) -> CoreResult<ReadStreamResult> {
        let hash = StreamHash::of(stream_id);
        if self.is_deleted(stream_id, hash)? {
            return Ok(ReadStreamResult::StreamDeleted);
        }
        let Some(last) = self.last_event_number(stream_id)? else {
            return Ok(ReadStreamResult::NoStream);
        };
        let metadata = self.stream_metadata(stream_id)?;
        let first = first_visible(last, &metadata);
        if first > last {
            return Ok(ReadStreamResult::NoStream);
        }

        let start = from.max(first);
        let now = now_millis();
        let mut events = Vec::new();
        let mut next = start;
        for number in start..=last {
            if events.len() >= max {
                break;
            }
            next = number + 1;
            if let Some(prepare) = self.verified_prepare(stream_id, hash, number)? {
                if expired(&prepare, &metadata, now) {
                    continue;
                }
                events.push(RecordedEvent::from_prepare(
                    &prepare,
                    EventNumber::new(number),
                ));
            }
        }
        Ok(ReadStreamResult::Success {
            events,
            next_event_number: next,
            last_event_number: last,
            is_end_of_stream: next > last,
        })
    }

    /// Reads up to `max` events of a stream, descending from `from`.
    ///
    /// `from == -1` starts at the stream's last event.
    pub fn read_stream_backward(
        &self,
        stream_id: &str,
        from: i64,
        max: usize,
    ) -> CoreResult<ReadStreamResult> {
        let hash = StreamHash::of(stream_id);
        if self.is_deleted(stream_id, hash)? {
            return Ok(ReadStreamResult::StreamDeleted);
        }
        let Some(last) = self.last_event_number(stream_id)? else {
            return Ok(ReadStreamResult::NoStream);
        };
        let metadata = self.stream_metadata(stream_id)?;
        let first = first_visible(last, &metadata);
        if first > last {
            return Ok(ReadStreamResult::NoStream);
        }

        let start = if from < 0 { last } else { from.min(last) };
        let now = now_millis();
        let mut events = Vec::new();
        let mut next = start;
        let mut number = start;
        while number >= first {
            if events.len() >= max {
                break;
            }
            next = number - 1;
            if let Some(prepare) = self.verified_prepare(stream_id, hash, number)? {
                if !expired(&prepare, &metadata, now) {
                    events.push(RecordedEvent::from_prepare(
                        &prepare,
                        EventNumber::new(number),
                    ));
                }
            }
            number -= 1;
        }
        Ok(ReadStreamResult::Success {
            events,
            next_event_number: next,
            last_event_number: last,
            is_end_of_stream: next < first,
        })
    }

    /// Reads up to `max` committed events from the global log, ascending
    /// from `position`. Never surfaces records past the chaser checkpoint.
    pub fn read_all_forward(&self, position: i64, max: usize) -> CoreResult<AllEventsSlice> {
        let mut reader = SeqReader::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.checkpoints.chaser),
            position.max(0),
        );
        let mut events = Vec::new();
        while events.len() < max {
            let Some(read) = reader.try_read_next()? else {
                break;
            };
            if let Some(event) = self.committed_event(&read.record)? {
                events.push(event);
            }
        }
        Ok(AllEventsSlice {
            events,
            next_position: reader.position(),
        })
    }

    /// Reads up to `max` committed events from the global log, descending
    /// from `position`. `position == -1` starts at the chaser checkpoint.
    pub fn read_all_backward(&self, position: i64, max: usize) -> CoreResult<AllEventsSlice> {
        let limit = self.checkpoints.chaser.read();
        let start = if position < 0 { limit } else { position.min(limit) };
        let mut reader = SeqReader::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.checkpoints.chaser),
            start,
        );
        let mut events = Vec::new();
        while events.len() < max {
            let Some(read) = reader.try_read_prev()? else {
                break;
            };
            if let Some(event) = self.committed_event(&read.record)? {
                events.push(event);
            }
        }
        Ok(AllEventsSlice {
            events,
            next_position: reader.position(),
        })
    }

    /// The stream's last event number, ignoring retention. None if the
    /// stream has no committed events at all.
    pub fn last_event_number(&self, stream_id: &str) -> CoreResult<Option<i64>> {
        let hash = StreamHash::of(stream_id);
        let Some(latest) = self.index.latest(hash)? else {
            return Ok(None);
        };
        // Fast path: no colliding stream sits above ours.
        if !latest.event_number.is_tombstone() {
            if let Some(prepare) = self.prepare_at(latest.position)? {
                if prepare.stream_id == stream_id {
                    return Ok(Some(latest.event_number.as_i64()));
                }
            }
        }
        // Walk downward through collisions.
        let entries = self.index.range(hash, 0, i64::MAX)?;
        let mut budget = self.config.hash_collision_read_limit;
        for entry in entries.iter().rev() {
            if entry.event_number.is_tombstone() {
                continue;
            }
            if budget == 0 {
                return Err(CoreError::invalid_operation(format!(
                    "hash collision read limit exhausted resolving {stream_id}"
                )));
            }
            budget -= 1;
            if let Some(prepare) = self.prepare_at(entry.position)? {
                if prepare.stream_id == stream_id {
                    return Ok(Some(entry.event_number.as_i64()));
                }
            }
        }
        Ok(None)
    }

    /// The retention metadata of a stream, `empty()` if none was ever set.
    pub fn stream_metadata(&self, stream_id: &str) -> CoreResult<StreamMetadata> {
        if metadata::is_metadata_stream(stream_id) {
            return Ok(StreamMetadata::empty());
        }
        let meta_stream = metadata::metadata_stream_of(stream_id);
        let hash = StreamHash::of(&meta_stream);
        let Some(last) = self.last_event_number(&meta_stream)? else {
            return Ok(StreamMetadata::empty());
        };
        match self.verified_prepare(&meta_stream, hash, last)? {
            Some(prepare) => StreamMetadata::from_bytes(&prepare.data),
            None => Ok(StreamMetadata::empty()),
        }
    }

    /// True if the stream has a verified tombstone.
    pub fn is_deleted(&self, stream_id: &str, hash: StreamHash) -> CoreResult<bool> {
        let tombstones = self.index.range(
            hash,
            EventNumber::TOMBSTONE.as_i64(),
            EventNumber::TOMBSTONE.as_i64(),
        )?;
        for entry in tombstones.iter().take(self.config.hash_collision_read_limit) {
            if let Some(prepare) = self.prepare_at(entry.position)? {
                if prepare.stream_id == stream_id && prepare.is_tombstone() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Finds the prepare for `(stream, event_number)`, skipping entries of
    /// colliding streams.
    fn verified_prepare(
        &self,
        stream_id: &str,
        hash: StreamHash,
        event_number: i64,
    ) -> CoreResult<Option<PrepareRecord>> {
        let candidates = self.index.range(hash, event_number, event_number)?;
        for entry in candidates.iter().take(self.config.hash_collision_read_limit) {
            if let Some(prepare) = self.prepare_at(entry.position)? {
                if prepare.stream_id == stream_id {
                    return Ok(Some(prepare));
                }
            }
        }
        Ok(None)
    }

    /// Reads the prepare at a log position. None if it was scavenged.
    fn prepare_at(&self, position: i64) -> CoreResult<Option<PrepareRecord>> {
        let chunk = match self.manager.chunk_for(position) {
            Ok(chunk) => chunk,
            Err(CoreError::ChunkNotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        match chunk.try_read_at(position, true)? {
            RecordReadResult::Success { record, .. } => match record {
                LogRecord::Prepare(prepare) => Ok(Some(prepare)),
                other => Err(CoreError::chunk_corruption(format!(
                    "index entry at {position} points at a {:?} record",
                    other.record_type()
                ))),
            },
            RecordReadResult::Scavenged | RecordReadResult::OutOfRange => Ok(None),
        }
    }

    fn committed_event(&self, record: &LogRecord) -> CoreResult<Option<RecordedEvent>> {
        let LogRecord::Prepare(prepare) = record else {
            return Ok(None);
        };
        if !prepare.is_committed() || prepare.is_tombstone() {
            return Ok(None);
        }
        let number = prepare.expected_version.as_i64() + 1 + i64::from(prepare.transaction_offset);
        if number < 0 {
            return Ok(None);
        }
        Ok(Some(RecordedEvent::from_prepare(
            prepare,
            EventNumber::new(number),
        )))
    }
}

impl PrepareLookup for ReadIndex {
    fn stream_id_at(&self, position: i64) -> CoreResult<Option<String>> {
        Ok(self.prepare_at(position)?.map(|p| p.stream_id))
    }
}

/// First event number still visible under the stream's retention rules.
fn first_visible(last: i64, metadata: &StreamMetadata) -> i64 {
    let mut first = 0;
    if let Some(max_count) = metadata.max_count {
        first = first.max(last - max_count + 1);
    }
    if let Some(truncate_before) = metadata.truncate_before {
        first = first.max(truncate_before);
    }
    first
}

/// True if `max_age` puts the event out of reach.
fn expired(prepare: &PrepareRecord, metadata: &StreamMetadata, now: i64) -> bool {
    metadata
        .max_age_secs
        .is_some_and(|secs| prepare.timestamp < now - secs * 1000)
}
