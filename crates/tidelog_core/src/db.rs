//! The embeddable database facade.
//!
//! [`LogDb`] wires the directory, chunk manager, checkpoints, writer,
//! chaser, index and scavenger together behind a stream-oriented API.
//! Appends are synchronous: when `append_to_stream` returns, the events
//! are durable, indexed and readable.

use crate::bus::{NodeStatus, Publisher};
use crate::chaser::Chaser;
use crate::checkpoint::CheckpointSet;
use crate::chunk::manager::ChunkManager;
use crate::chunk::transform::TransformSet;
use crate::config::Config;
use crate::cursor::SeqReader;
use crate::dir::LogDir;
use crate::error::CoreResult;
use crate::index::{IndexCommitter, TableIndex};
use crate::metadata::{self, StreamMetadata};
use crate::read_index::{AllEventsSlice, ReadEventResult, ReadIndex, ReadStreamResult};
use crate::record::prepare::PrepareRecord;
use crate::record::LogRecord;
use crate::scavenge::{
    CancellationToken, ScavengeOutcome, Scavenger, ScavengerLog, TracingScavengerLog,
};
use crate::types::{now_millis, ExpectedVersion, LogPosition};
use crate::writer::LogWriter;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One event to append.
#[derive(Debug, Clone)]
pub struct EventData {
    /// Unique id; duplicates are the caller's concern.
    pub event_id: Uuid,
    /// Caller-assigned type tag.
    pub event_type: String,
    /// Event payload.
    pub data: Vec<u8>,
    /// Caller-supplied metadata payload.
    pub metadata: Vec<u8>,
}

impl EventData {
    /// An event with a fresh id and no metadata.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            metadata: Vec::new(),
        }
    }
}

/// Outcome of an append or delete.
///
/// Version conflicts and deleted streams are expected conditions and
/// come back as values; errors mean the operation could not run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// The events were written and indexed.
    Success {
        /// Number of the first appended event.
        first_event_number: i64,
        /// Number of the last appended event.
        last_event_number: i64,
        /// Log position of the last written record.
        log_position: i64,
    },
    /// The stream's version did not match `expected_version`.
    WrongExpectedVersion {
        /// The stream's actual last event number, if it exists.
        current: Option<i64>,
    },
    /// The stream was hard-deleted; it can never be written again.
    StreamDeleted,
}

/// An open Tidelog database.
pub struct LogDb {
    _dir: LogDir,
    manager: Arc<ChunkManager>,
    checkpoints: Arc<CheckpointSet>,
    writer: LogWriter,
    chaser: Chaser,
    read: ReadIndex,
    scavenger: Scavenger,
    /// Serializes version check against append across callers.
    append_lock: Mutex<()>,
}

impl LogDb {
    /// Opens a database with default transforms, leadership and bus.
    pub fn open(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        Self::open_with(
            path,
            config,
            Arc::new(TransformSet::identity()),
            Arc::new(crate::bus::AlwaysLeader),
            Arc::new(crate::bus::NullPublisher),
        )
    }

    /// Opens a database with explicit collaborators.
    pub fn open_with(
        path: impl AsRef<Path>,
        config: Config,
        transforms: Arc<TransformSet>,
        node_status: Arc<dyn NodeStatus>,
        publisher: Arc<dyn Publisher>,
    ) -> CoreResult<Self> {
        let dir = LogDir::open(path.as_ref(), config.create_if_missing)?;
        let checkpoints = Arc::new(CheckpointSet::open(&dir.checkpoints_dir())?);

        let manager = if dir.has_chunks()? {
            Arc::new(ChunkManager::open(
                dir.chunks_dir(),
                config.clone(),
                transforms,
            )?)
        } else {
            Arc::new(ChunkManager::create(
                dir.chunks_dir(),
                config.clone(),
                transforms,
                now_millis(),
            )?)
        };

        let index = Arc::new(TableIndex::open(dir.index_dir(), config.max_mem_table_entries)?);
        if index.rebuild_required() {
            // Force the chaser back to the start of the log.
            checkpoints.index.write(-1);
            checkpoints.index.flush()?;
        }

        let writer = LogWriter::recover(
            Arc::clone(&manager),
            Arc::clone(&checkpoints),
            Arc::clone(&node_status),
            Arc::clone(&publisher),
            config.clone(),
        )?;

        let committer = Arc::new(IndexCommitter::new(
            Arc::clone(&index),
            Arc::clone(&checkpoints),
            Arc::clone(&publisher),
        ));
        let chaser = Chaser::new(Arc::clone(&manager), Arc::clone(&checkpoints), committer);
        // Repopulate the memtable and catch the index up with the log.
        let replayed = chaser.chase_all()?;

        let read = ReadIndex::new(
            Arc::clone(&manager),
            index,
            Arc::clone(&checkpoints),
            config.clone(),
        );
        let scavenger = Scavenger::new(
            Arc::clone(&manager),
            node_status,
            publisher,
            dir.scavenge_dir(),
            config,
        );

        info!(
            path = %dir.root().display(),
            position = writer.position(),
            replayed,
            "opened database"
        );
        Ok(Self {
            _dir: dir,
            manager,
            checkpoints,
            writer,
            chaser,
            read,
            scavenger,
            append_lock: Mutex::new(()),
        })
    }

    /// Appends events to a stream.
    pub fn append_to_stream(
        &self,
        stream_id: &str,
        expected_version: ExpectedVersion,
        events: Vec<EventData>,
    ) -> CoreResult<AppendResult> {
        if events.is_empty() {
            return Err(crate::error::CoreError::invalid_argument(
                "append requires at least one event",
            ));
        }
        let guard = self.append_lock.lock();
        let current = match self.check_version(stream_id, expected_version)? {
            Ok(current) => current,
            Err(result) => return Ok(result),
        };

        let first = current + 1;
        let mut last_position = 0;
        for (i, event) in events.iter().enumerate() {
            let mut record = LogRecord::Prepare(self.prepare_for(
                stream_id,
                current + i as i64,
                event,
            ));
            last_position = self.writer.append(&mut record)?;
        }
        self.writer.flush()?;
        self.chaser.chase_all()?;
        drop(guard);

        Ok(AppendResult::Success {
            first_event_number: first,
            last_event_number: current + events.len() as i64,
            log_position: last_position,
        })
    }

    /// Hard-deletes a stream. Irreversible.
    pub fn delete_stream(
        &self,
        stream_id: &str,
        expected_version: ExpectedVersion,
    ) -> CoreResult<AppendResult> {
        let guard = self.append_lock.lock();
        if let Err(result) = self.check_version(stream_id, expected_version)? {
            return Ok(result);
        }
        let mut record = LogRecord::Prepare(PrepareRecord::tombstone(
            LogPosition::NONE,
            stream_id,
            now_millis(),
        ));
        let at = self.writer.append(&mut record)?;
        self.writer.flush()?;
        self.chaser.chase_all()?;
        drop(guard);

        info!(stream_id, position = at, "stream deleted");
        Ok(AppendResult::Success {
            first_event_number: -1,
            last_event_number: -1,
            log_position: at,
        })
    }

    /// Sets a stream's retention metadata.
    pub fn set_stream_metadata(
        &self,
        stream_id: &str,
        stream_metadata: StreamMetadata,
    ) -> CoreResult<AppendResult> {
        let meta_stream = metadata::metadata_stream_of(stream_id);
        let payload = stream_metadata.to_bytes()?;
        let mut event = EventData::new(metadata::METADATA_EVENT_TYPE, payload);
        event.metadata = Vec::new();
        self.append_to_stream(&meta_stream, ExpectedVersion::Any, vec![event])
    }

    /// Reads a stream's retention metadata.
    pub fn get_stream_metadata(&self, stream_id: &str) -> CoreResult<StreamMetadata> {
        self.read.stream_metadata(stream_id)
    }

    /// Reads one event.
    pub fn read_event(&self, stream_id: &str, event_number: i64) -> CoreResult<ReadEventResult> {
        self.read.read_event(stream_id, event_number)
    }

    /// Reads a stream slice, ascending.
    pub fn read_stream_forward(
        &self,
        stream_id: &str,
        from: i64,
        max: usize,
    ) -> CoreResult<ReadStreamResult> {
        self.read.read_stream_forward(stream_id, from, max)
    }

    /// Reads a stream slice, descending. `from == -1` starts at the end.
    pub fn read_stream_backward(
        &self,
        stream_id: &str,
        from: i64,
        max: usize,
    ) -> CoreResult<ReadStreamResult> {
        self.read.read_stream_backward(stream_id, from, max)
    }

    /// Reads the global log, ascending.
    pub fn read_all_forward(&self, position: i64, max: usize) -> CoreResult<AllEventsSlice> {
        self.read.read_all_forward(position, max)
    }

    /// Reads the global log, descending. `position == -1` starts at the
    /// end.
    pub fn read_all_backward(&self, position: i64, max: usize) -> CoreResult<AllEventsSlice> {
        self.read.read_all_backward(position, max)
    }

    /// A sequential reader over committed records, starting at `from`,
    /// bounded by the chaser checkpoint. Catch-up subscriptions poll it.
    #[must_use]
    pub fn subscribe(&self, from: i64) -> SeqReader {
        SeqReader::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.checkpoints.chaser),
            from.max(0),
        )
    }

    /// Runs a scavenge with default logging and no cancellation.
    pub fn scavenge(&self) -> CoreResult<ScavengeOutcome> {
        self.scavenge_with(&TracingScavengerLog, &CancellationToken::new())
    }

    /// Runs a scavenge with an explicit log and cancellation token.
    pub fn scavenge_with(
        &self,
        log: &dyn ScavengerLog,
        token: &CancellationToken,
    ) -> CoreResult<ScavengeOutcome> {
        self.scavenger.run(&self.writer, &self.read, log, token)
    }

    /// Position after the last durable record.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.writer.flushed_position()
    }

    /// Flushes chunks, the index memtable and every checkpoint.
    pub fn flush(&self) -> CoreResult<()> {
        self.writer.flush()?;
        self.chaser.chase_all()?;
        self.manager.flush()?;
        self.read.table_index().persist_memtable()?;
        self.checkpoints.index.write(self.checkpoints.chaser.read());
        self.checkpoints.index.flush()?;
        self.checkpoints.chaser.flush()?;
        Ok(())
    }

    /// Flushes everything and releases the directory lock.
    pub fn close(self) -> CoreResult<()> {
        self.flush()?;
        info!(position = self.position(), "closed database");
        Ok(())
    }

    fn prepare_for(&self, stream_id: &str, predecessor: i64, event: &EventData) -> PrepareRecord {
        let mut prepare = PrepareRecord::single_write(
            LogPosition::NONE,
            stream_id,
            ExpectedVersion::Exact(predecessor),
            event.event_type.clone(),
            event.data.clone(),
            event.metadata.clone(),
            now_millis(),
        );
        prepare.event_id = event.event_id;
        prepare
    }

    /// Resolves `expected` against the stream's current state. `Ok(n)`
    /// is the stream's last event number (-1 if absent); `Err` carries
    /// the typed refusal.
    #[allow(clippy::result_large_err)]
    fn check_version(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
    ) -> CoreResult<Result<i64, AppendResult>> {
        let hash = crate::types::StreamHash::of(stream_id);
        if self.read.is_deleted(stream_id, hash)? {
            return Ok(Err(AppendResult::StreamDeleted));
        }
        let current = self.read.last_event_number(stream_id)?;
        let ok = match expected {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => current.is_none(),
            ExpectedVersion::Exact(n) => current == Some(n),
        };
        if ok {
            Ok(Ok(current.unwrap_or(-1)))
        } else {
            Ok(Err(AppendResult::WrongExpectedVersion { current }))
        }
    }
}

impl std::fmt::Debug for LogDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDb")
            .field("root", &self._dir.root())
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use tempfile::TempDir;

    fn config() -> Config {
        Config::default().chunk_size(16 * 1024).sync_on_flush(false)
    }

    fn event(data: &[u8]) -> EventData {
        EventData::new("test-event", data.to_vec())
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let db = LogDb::open(dir.path(), config()).unwrap();

        let result = db
            .append_to_stream(
                "orders-1",
                ExpectedVersion::NoStream,
                vec![event(b"a"), event(b"b")],
            )
            .unwrap();
        match result {
            AppendResult::Success {
                first_event_number,
                last_event_number,
                ..
            } => {
                assert_eq!(first_event_number, 0);
                assert_eq!(last_event_number, 1);
            }
            other => panic!("append failed: {other:?}"),
        }

        match db.read_event("orders-1", 1).unwrap() {
            ReadEventResult::Success(read) => assert_eq!(read.data, b"b"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn wrong_expected_version_is_a_value() {
        let dir = TempDir::new().unwrap();
        let db = LogDb::open(dir.path(), config()).unwrap();
        db.append_to_stream("orders-1", ExpectedVersion::NoStream, vec![event(b"a")])
            .unwrap();

        let result = db
            .append_to_stream("orders-1", ExpectedVersion::Exact(5), vec![event(b"b")])
            .unwrap();
        assert_eq!(result, AppendResult::WrongExpectedVersion { current: Some(0) });

        let result = db
            .append_to_stream("orders-1", ExpectedVersion::NoStream, vec![event(b"b")])
            .unwrap();
        assert_eq!(result, AppendResult::WrongExpectedVersion { current: Some(0) });
    }

    #[test]
    fn deleted_stream_refuses_appends() {
        let dir = TempDir::new().unwrap();
        let db = LogDb::open(dir.path(), config()).unwrap();
        db.append_to_stream("orders-1", ExpectedVersion::NoStream, vec![event(b"a")])
            .unwrap();
        db.delete_stream("orders-1", ExpectedVersion::Any).unwrap();

        let result = db
            .append_to_stream("orders-1", ExpectedVersion::Any, vec![event(b"b")])
            .unwrap();
        assert_eq!(result, AppendResult::StreamDeleted);
        assert_eq!(
            db.read_event("orders-1", 0).unwrap(),
            ReadEventResult::StreamDeleted
        );
    }

    #[test]
    fn metadata_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let meta = StreamMetadata::empty().with_max_count(3);
        {
            let db = LogDb::open(dir.path(), config()).unwrap();
            db.append_to_stream("orders-1", ExpectedVersion::Any, vec![event(b"a")])
                .unwrap();
            db.set_stream_metadata("orders-1", meta).unwrap();
            db.close().unwrap();
        }
        let db = LogDb::open(dir.path(), config()).unwrap();
        assert_eq!(db.get_stream_metadata("orders-1").unwrap(), meta);
    }

    #[test]
    fn events_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = LogDb::open(dir.path(), config()).unwrap();
            for n in 0..20 {
                db.append_to_stream(
                    "orders-1",
                    ExpectedVersion::from_i64(n - 1),
                    vec![event(format!("e{n}").as_bytes())],
                )
                .unwrap();
            }
            db.close().unwrap();
        }
        let db = LogDb::open(dir.path(), config()).unwrap();
        match db.read_stream_backward("orders-1", -1, 1).unwrap() {
            ReadStreamResult::Success { events, .. } => {
                assert_eq!(events[0].data, b"e19");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn double_open_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let _db = LogDb::open(dir.path(), config()).unwrap();
        match LogDb::open(dir.path(), config()) {
            Err(CoreError::DatabaseLocked) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_append_is_rejected() {
        let dir = TempDir::new().unwrap();
        let db = LogDb::open(dir.path(), config()).unwrap();
        assert!(db
            .append_to_stream("orders-1", ExpectedVersion::Any, Vec::new())
            .is_err());
    }

    #[test]
    fn subscription_sees_committed_records() {
        let dir = TempDir::new().unwrap();
        let db = LogDb::open(dir.path(), config()).unwrap();
        db.append_to_stream("orders-1", ExpectedVersion::Any, vec![event(b"a")])
            .unwrap();

        let mut sub = db.subscribe(0);
        let read = sub.try_read_next().unwrap().unwrap();
        match read.record {
            LogRecord::Prepare(prepare) => assert_eq!(prepare.stream_id, "orders-1"),
            other => panic!("unexpected record: {other:?}"),
        }
        assert!(sub.try_read_next().unwrap().is_none());

        db.append_to_stream("orders-1", ExpectedVersion::Exact(0), vec![event(b"b")])
            .unwrap();
        assert!(sub.try_read_next().unwrap().is_some());
    }
}
