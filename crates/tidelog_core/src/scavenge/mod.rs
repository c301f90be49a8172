//! The scavenger reclaims space from completed chunks.
//!
//! A run walks five phases: accumulate per-stream facts, calculate
//! discard points, rewrite each completed chunk keeping only live
//! records, merge adjacent shrunken chunks, and finally compact the
//! index and clean up. Progress is persisted after every unit of work in
//! a checkpoint file, so an interrupted run resumes where it stopped and
//! re-running a finished phase reaches the same result.
//!
//! Tombstones are never removed; a hard-deleted stream stays deleted
//! across any number of scavenges. A chunk whose records were all
//! discarded is still rewritten (empty, with a position map) so the
//! chunk range stays contiguous.

pub mod accumulator;
pub mod calculator;

use crate::bus::{NodeStatus, Publisher, StorageEvent};
use crate::chunk::header::{ChunkHeader, CHUNK_FORMAT_VERSION};
use crate::chunk::manager::ChunkManager;
use crate::chunk::transform::TransformId;
use crate::chunk::{Chunk, SeqReadResult};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexEntry, PrepareLookup};
use crate::read_index::ReadIndex;
use crate::record::LogRecord;
use crate::types::now_millis;
use crate::writer::LogWriter;
use accumulator::{accumulate, Accumulated};
use calculator::{calculate, DiscardPlan};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidelog_storage::FileBackend;
use tracing::{info, warn};
use uuid::Uuid;

const CHECKPOINT_FILE: &str = "scavenge.chk";
const CHECKPOINT_VERSION: u32 = 1;

/// The phases of a scavenge run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScavengePhase {
    /// Scanning the log for per-stream facts.
    Accumulating,
    /// Turning facts into discard points.
    Calculating,
    /// Rewriting completed chunks.
    ExecutingChunks,
    /// Merging adjacent shrunken chunks.
    MergingChunks,
    /// Compacting the index and removing temp state.
    Cleaning,
    /// The run finished.
    Done,
}

impl ScavengePhase {
    /// Stable phase name for logs and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accumulating => "accumulating",
            Self::Calculating => "calculating",
            Self::ExecutingChunks => "executing-chunks",
            Self::MergingChunks => "merging-chunks",
            Self::Cleaning => "cleaning",
            Self::Done => "done",
        }
    }
}

/// Persisted progress of a scavenge run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScavengeCheckpoint {
    version: u32,
    /// Id of the run this checkpoint belongs to.
    pub scavenge_id: Uuid,
    /// Log position the run considers; later records are untouched.
    pub threshold: i64,
    /// Phase to resume in.
    pub phase: ScavengePhase,
    /// Start numbers of chunks already rewritten this run.
    pub done_chunks: Vec<i32>,
    /// Bytes reclaimed so far.
    pub space_saved: i64,
}

/// Cooperative cancellation for a scavenge run.
///
/// The scavenger checks the token between units of work, never inside
/// one, so cancellation always leaves a consistent checkpoint behind.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once `cancel` was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Receives operational progress of a scavenge run.
pub trait ScavengerLog: Send + Sync {
    /// A phase started.
    fn phase_changed(&self, scavenge_id: Uuid, phase: ScavengePhase);
    /// One chunk was rewritten.
    fn chunk_scavenged(&self, chunk_number: i32, space_saved: i64);
    /// A range of chunks was merged into one file.
    fn chunks_merged(&self, start: i32, end: i32);
    /// The run finished.
    fn completed(&self, scavenge_id: Uuid, space_saved: i64);
}

/// Default [`ScavengerLog`] reporting through `tracing`.
#[derive(Debug, Default)]
pub struct TracingScavengerLog;

impl ScavengerLog for TracingScavengerLog {
    fn phase_changed(&self, scavenge_id: Uuid, phase: ScavengePhase) {
        info!(%scavenge_id, phase = phase.as_str(), "scavenge phase started");
    }

    fn chunk_scavenged(&self, chunk_number: i32, space_saved: i64) {
        info!(chunk_number, space_saved, "chunk scavenged");
    }

    fn chunks_merged(&self, start: i32, end: i32) {
        info!(start, end, "chunks merged");
    }

    fn completed(&self, scavenge_id: Uuid, space_saved: i64) {
        info!(%scavenge_id, space_saved, "scavenge completed");
    }
}

/// How a scavenge run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScavengeOutcome {
    /// The run finished all phases.
    Completed {
        /// Bytes reclaimed across all rewritten chunks.
        space_saved: i64,
    },
    /// The run stopped at a phase boundary; rerun to resume.
    Cancelled,
    /// This node is not the leader; nothing was done.
    NotLeader,
}

/// Drives scavenge runs over an open database.
pub struct Scavenger {
    manager: Arc<ChunkManager>,
    node_status: Arc<dyn NodeStatus>,
    publisher: Arc<dyn Publisher>,
    state_dir: PathBuf,
    config: Config,
}

impl Scavenger {
    /// Creates a scavenger; `state_dir` holds the run checkpoint.
    pub fn new(
        manager: Arc<ChunkManager>,
        node_status: Arc<dyn NodeStatus>,
        publisher: Arc<dyn Publisher>,
        state_dir: impl Into<PathBuf>,
        config: Config,
    ) -> Self {
        Self {
            manager,
            node_status,
            publisher,
            state_dir: state_dir.into(),
            config,
        }
    }

    /// Runs (or resumes) a scavenge.
    pub fn run(
        &self,
        writer: &LogWriter,
        read_index: &ReadIndex,
        log: &dyn ScavengerLog,
        token: &CancellationToken,
    ) -> CoreResult<ScavengeOutcome> {
        if !self.node_status.is_leader() {
            return Ok(ScavengeOutcome::NotLeader);
        }
        fs::create_dir_all(&self.state_dir)?;

        let mut cp = match self.load_checkpoint()? {
            Some(cp) if cp.phase != ScavengePhase::Done => {
                info!(scavenge_id = %cp.scavenge_id, phase = cp.phase.as_str(), "resuming scavenge");
                cp
            }
            _ => {
                let scavenge_id = Uuid::new_v4();
                let threshold = writer.flushed_position();
                writer.write_scavenge_point(scavenge_id, threshold)?;
                let cp = ScavengeCheckpoint {
                    version: CHECKPOINT_VERSION,
                    scavenge_id,
                    threshold,
                    phase: ScavengePhase::Accumulating,
                    done_chunks: Vec::new(),
                    space_saved: 0,
                };
                self.save_checkpoint(&cp)?;
                log.phase_changed(scavenge_id, ScavengePhase::Accumulating);
                cp
            }
        };

        if token.is_cancelled() {
            return Ok(ScavengeOutcome::Cancelled);
        }

        // The first two phases are pure reads and cheap to redo, so a
        // resumed run recomputes them no matter where it stopped.
        let facts = accumulate(&self.manager, cp.threshold)?;
        if cp.phase == ScavengePhase::Accumulating {
            self.advance(&mut cp, ScavengePhase::Calculating, log)?;
        }
        let plan = calculate(&facts, now_millis());
        if cp.phase == ScavengePhase::Calculating {
            self.advance(&mut cp, ScavengePhase::ExecutingChunks, log)?;
        }

        if cp.phase == ScavengePhase::ExecutingChunks {
            for chunk in self.manager.completed_chunks() {
                if chunk.end_position() > cp.threshold {
                    continue;
                }
                let number = chunk.chunk_start_number().as_i32();
                if cp.done_chunks.contains(&number) {
                    continue;
                }
                if token.is_cancelled() {
                    return Ok(ScavengeOutcome::Cancelled);
                }
                let saved = self.rewrite_chunk(&chunk, &facts, &plan)?;
                cp.space_saved += saved;
                cp.done_chunks.push(number);
                self.save_checkpoint(&cp)?;
                log.chunk_scavenged(number, saved);
            }
            self.advance(&mut cp, ScavengePhase::MergingChunks, log)?;
        }

        if cp.phase == ScavengePhase::MergingChunks {
            loop {
                if token.is_cancelled() {
                    return Ok(ScavengeOutcome::Cancelled);
                }
                if !self.merge_one(&cp, log)? {
                    break;
                }
            }
            self.advance(&mut cp, ScavengePhase::Cleaning, log)?;
        }

        if cp.phase == ScavengePhase::Cleaning {
            let keep = |entry: &IndexEntry| {
                // An entry whose prepare is gone was discarded; keep on a
                // read error rather than losing index data.
                read_index
                    .stream_id_at(entry.position)
                    .map(|stream| stream.is_some())
                    .unwrap_or(true)
            };
            read_index.table_index().merge(read_index, keep)?;
            self.advance(&mut cp, ScavengePhase::Done, log)?;
        }

        self.publisher.publish(StorageEvent::ScavengeCompleted {
            scavenge_id: cp.scavenge_id,
            space_saved: cp.space_saved,
        });
        log.completed(cp.scavenge_id, cp.space_saved);
        Ok(ScavengeOutcome::Completed {
            space_saved: cp.space_saved,
        })
    }

    fn advance(
        &self,
        cp: &mut ScavengeCheckpoint,
        phase: ScavengePhase,
        log: &dyn ScavengerLog,
    ) -> CoreResult<()> {
        cp.phase = phase;
        self.save_checkpoint(cp)?;
        self.publisher.publish(StorageEvent::ScavengePhaseChanged {
            scavenge_id: cp.scavenge_id,
            phase: phase.as_str(),
        });
        log.phase_changed(cp.scavenge_id, phase);
        Ok(())
    }

    /// Rewrites one chunk with only its live records. Returns the bytes
    /// reclaimed.
    fn rewrite_chunk(
        &self,
        chunk: &Arc<Chunk>,
        facts: &Accumulated,
        plan: &DiscardPlan,
    ) -> CoreResult<i64> {
        let records = collect_records(chunk, |record| keep_record(record, facts, plan))?;
        let header = ChunkHeader {
            version: CHUNK_FORMAT_VERSION,
            transform: TransformId::Identity,
            chunk_start_number: chunk.chunk_start_number(),
            chunk_end_number: chunk.chunk_end_number(),
            chunk_size: chunk.header().chunk_size,
            chunk_id: Uuid::new_v4(),
            created_at: now_millis(),
        };
        let tmp = self.manager.temp_file_path();
        let backend = FileBackend::open(&tmp)?;
        let replacement = Chunk::write_completed(
            Box::new(backend),
            header,
            &records,
            self.manager.transforms().active(),
            chunk.logical_data_size(),
        )?;
        let new_size = i64::from(replacement.physical_data_size());
        drop(replacement);

        let old_size = i64::from(chunk.physical_data_size());
        let switched = self.manager.switch_in(
            &tmp,
            chunk.chunk_start_number(),
            chunk.chunk_end_number(),
        )?;
        self.publisher.publish(StorageEvent::ChunkSwitchedIn {
            start: switched.chunk_start_number(),
            end: switched.chunk_end_number(),
        });
        self.manager.cache_within_budget(&switched)?;
        Ok((old_size - new_size).max(0))
    }

    /// Merges the first adjacent pair of scavenged chunks that fits in
    /// one chunk file. Returns false when no pair qualifies.
    fn merge_one(&self, cp: &ScavengeCheckpoint, log: &dyn ScavengerLog) -> CoreResult<bool> {
        let chunks = self.manager.completed_chunks();
        for pair in chunks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if b.end_position() > cp.threshold {
                continue;
            }
            if a.chunk_end_number().as_i32() + 1 != b.chunk_start_number().as_i32() {
                continue;
            }
            let scavenged_this_run = |c: &Arc<Chunk>| {
                cp.done_chunks.contains(&c.chunk_start_number().as_i32())
                    || c.chunk_start_number() != c.chunk_end_number()
            };
            if !scavenged_this_run(a) || !scavenged_this_run(b) {
                continue;
            }
            let combined = u64::from(a.physical_data_size()) + u64::from(b.physical_data_size());
            if combined > u64::from(self.config.chunk_size) {
                continue;
            }

            let mut records = collect_records(a, |_| true)?;
            records.extend(collect_records(b, |_| true)?);
            let header = ChunkHeader {
                version: CHUNK_FORMAT_VERSION,
                transform: TransformId::Identity,
                chunk_start_number: a.chunk_start_number(),
                chunk_end_number: b.chunk_end_number(),
                chunk_size: a.header().chunk_size,
                chunk_id: Uuid::new_v4(),
                created_at: now_millis(),
            };
            let logical = (b.start_position() + b.logical_data_size()) - a.start_position();
            let tmp = self.manager.temp_file_path();
            let backend = FileBackend::open(&tmp)?;
            let replacement = Chunk::write_completed(
                Box::new(backend),
                header,
                &records,
                self.manager.transforms().active(),
                logical,
            )?;
            drop(replacement);

            let start = a.chunk_start_number();
            let end = b.chunk_end_number();
            let switched = self.manager.switch_in(&tmp, start, end)?;
            self.publisher.publish(StorageEvent::ChunkSwitchedIn {
                start: switched.chunk_start_number(),
                end: switched.chunk_end_number(),
            });
            self.manager.cache_within_budget(&switched)?;
            log.chunks_merged(start.as_i32(), end.as_i32());
            return Ok(true);
        }
        Ok(false)
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join(CHECKPOINT_FILE)
    }

    fn load_checkpoint(&self) -> CoreResult<Option<ScavengeCheckpoint>> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        match ciborium::from_reader::<ScavengeCheckpoint, _>(bytes.as_slice()) {
            Ok(cp) if cp.version == CHECKPOINT_VERSION => Ok(Some(cp)),
            Ok(cp) => Err(CoreError::invalid_format(format!(
                "unsupported scavenge checkpoint version {}",
                cp.version
            ))),
            Err(err) => {
                // A torn checkpoint write aborts the old run, not the new.
                warn!(%err, "discarding unreadable scavenge checkpoint");
                fs::remove_file(&path)?;
                Ok(None)
            }
        }
    }

    fn save_checkpoint(&self, cp: &ScavengeCheckpoint) -> CoreResult<()> {
        let mut bytes = Vec::new();
        ciborium::into_writer(cp, &mut bytes)
            .map_err(|e| CoreError::metadata_codec(format!("scavenge checkpoint encode: {e}")))?;
        let tmp = self.state_dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, self.checkpoint_path())?;
        let dir = fs::File::open(&self.state_dir)?;
        dir.sync_all()?;
        Ok(())
    }
}

/// Reads every record of a completed chunk, keeping those `keep` accepts.
fn collect_records(
    chunk: &Chunk,
    mut keep: impl FnMut(&LogRecord) -> bool,
) -> CoreResult<Vec<LogRecord>> {
    let mut out = Vec::new();
    let mut local = 0i64;
    loop {
        match chunk.try_read_closest_forward(local)? {
            SeqReadResult::Success {
                record,
                next_position,
                ..
            } => {
                if keep(&record) {
                    out.push(record);
                }
                local = next_position;
            }
            SeqReadResult::Eof => break,
        }
    }
    Ok(out)
}

/// Whether a record survives the scavenge.
fn keep_record(record: &LogRecord, facts: &Accumulated, plan: &DiscardPlan) -> bool {
    let LogRecord::Prepare(prepare) = record else {
        // Commit and system records carry ordering facts; keep them.
        return true;
    };
    if prepare.is_tombstone() {
        return true;
    }
    let event_number = if prepare.is_committed() {
        prepare.expected_version.as_i64() + 1 + i64::from(prepare.transaction_offset)
    } else {
        match facts.first_event_of(prepare.transaction_position) {
            Some(first) => first + i64::from(prepare.transaction_offset),
            // Never committed below the threshold: dead weight.
            None => return false,
        }
    };
    !plan.should_discard(&prepare.stream_id, event_number, prepare.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{AlwaysLeader, CollectingPublisher, LeaderFlag, NullPublisher};
    use crate::chaser::Chaser;
    use crate::checkpoint::CheckpointSet;
    use crate::chunk::transform::TransformSet;
    use crate::chunk::RecordReadResult;
    use crate::index::{IndexCommitter, TableIndex};
    use crate::metadata::{self, StreamMetadata};
    use crate::read_index::{ReadEventResult, ReadStreamResult};
    use crate::record::prepare::PrepareRecord;
    use crate::types::{ExpectedVersion, LogPosition};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        writer: LogWriter,
        chaser: Chaser,
        read: ReadIndex,
        scavenger: Scavenger,
        manager: Arc<ChunkManager>,
        publisher: Arc<CollectingPublisher>,
    }

    fn fixture(chunk_size: u32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = Config::default()
            .chunk_size(chunk_size)
            .sync_on_flush(false)
            .max_mem_table_entries(4);
        let manager = Arc::new(
            ChunkManager::create(
                dir.path().join("chunks"),
                config.clone(),
                Arc::new(TransformSet::identity()),
                now_millis(),
            )
            .unwrap(),
        );
        let checkpoints = Arc::new(CheckpointSet::open(&dir.path().join("checkpoints")).unwrap());
        let index = Arc::new(TableIndex::open(dir.path().join("index"), 4).unwrap());
        let committer = Arc::new(IndexCommitter::new(
            Arc::clone(&index),
            Arc::clone(&checkpoints),
            Arc::new(NullPublisher),
        ));
        let publisher = Arc::new(CollectingPublisher::new());
        let writer = LogWriter::recover(
            Arc::clone(&manager),
            Arc::clone(&checkpoints),
            Arc::new(AlwaysLeader),
            Arc::new(NullPublisher),
            config.clone(),
        )
        .unwrap();
        let chaser = Chaser::new(Arc::clone(&manager), Arc::clone(&checkpoints), committer);
        let read = ReadIndex::new(
            Arc::clone(&manager),
            index,
            Arc::clone(&checkpoints),
            config.clone(),
        );
        let scavenger = Scavenger::new(
            Arc::clone(&manager),
            Arc::new(AlwaysLeader),
            Arc::clone(&publisher) as Arc<dyn Publisher>,
            dir.path().join("scavenge"),
            config,
        );
        Fixture {
            _dir: dir,
            writer,
            chaser,
            read,
            scavenger,
            manager,
            publisher,
        }
    }

    fn append(f: &Fixture, stream: &str, current_version: i64, data: Vec<u8>) -> i64 {
        let mut record = LogRecord::Prepare(PrepareRecord::single_write(
            LogPosition::NONE,
            stream,
            ExpectedVersion::from_i64(current_version),
            "test-event",
            data,
            Vec::new(),
            now_millis(),
        ));
        let at = f.writer.append(&mut record).unwrap();
        f.writer.flush().unwrap();
        f.chaser.chase_all().unwrap();
        at
    }

    fn set_metadata(f: &Fixture, stream: &str, meta: StreamMetadata) {
        let meta_stream = metadata::metadata_stream_of(stream);
        let current = f.read.last_event_number(&meta_stream).unwrap().unwrap_or(-1);
        let mut record = LogRecord::Prepare(PrepareRecord::single_write(
            LogPosition::NONE,
            meta_stream,
            ExpectedVersion::from_i64(current),
            metadata::METADATA_EVENT_TYPE,
            meta.to_bytes().unwrap(),
            Vec::new(),
            now_millis(),
        ));
        f.writer.append(&mut record).unwrap();
        f.writer.flush().unwrap();
        f.chaser.chase_all().unwrap();
    }

    fn run(f: &Fixture) -> ScavengeOutcome {
        f.scavenger
            .run(&f.writer, &f.read, &TracingScavengerLog, &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn max_count_scavenge_removes_old_events() {
        let f = fixture(2048);
        let mut positions = Vec::new();
        for n in 0..5 {
            positions.push(append(&f, "orders-1", n - 1, vec![b'x'; 700]));
        }
        set_metadata(&f, "orders-1", StreamMetadata::empty().with_max_count(2));
        // Push the retained events out of the tail chunk.
        for n in 0..4 {
            append(&f, "filler", n - 1, vec![b'y'; 700]);
        }
        assert!(f.manager.chunk_count() > 2);

        let outcome = run(&f);
        assert!(matches!(outcome, ScavengeOutcome::Completed { space_saved } if space_saved > 0));

        match f.read.read_stream_forward("orders-1", 0, 10).unwrap() {
            ReadStreamResult::Success { events, .. } => {
                let numbers: Vec<i64> =
                    events.iter().map(|e| e.event_number.as_i64()).collect();
                assert_eq!(numbers, vec![3, 4]);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        // The first event's bytes are really gone.
        let chunk = f.manager.chunk_for(positions[0]).unwrap();
        assert!(chunk.is_scavenged());
        assert!(matches!(
            chunk.try_read_at(positions[0], true).unwrap(),
            RecordReadResult::Scavenged
        ));
    }

    #[test]
    fn tombstone_survives_scavenge() {
        let f = fixture(2048);
        for n in 0..3 {
            append(&f, "orders-1", n - 1, vec![b'x'; 600]);
        }
        let mut tombstone = LogRecord::Prepare(PrepareRecord::tombstone(
            LogPosition::NONE,
            "orders-1",
            now_millis(),
        ));
        f.writer.append(&mut tombstone).unwrap();
        f.writer.flush().unwrap();
        f.chaser.chase_all().unwrap();
        for n in 0..4 {
            append(&f, "filler", n - 1, vec![b'y'; 600]);
        }

        run(&f);
        run(&f);

        assert_eq!(
            f.read.read_event("orders-1", 0).unwrap(),
            ReadEventResult::StreamDeleted
        );
        assert_eq!(
            f.read.read_stream_forward("orders-1", 0, 10).unwrap(),
            ReadStreamResult::StreamDeleted
        );
    }

    #[test]
    fn fully_discarded_chunk_is_rewritten_empty() {
        let f = fixture(1024);
        for n in 0..3 {
            append(&f, "doomed", n - 1, vec![b'x'; 700]);
        }
        let mut tombstone = LogRecord::Prepare(PrepareRecord::tombstone(
            LogPosition::NONE,
            "doomed",
            now_millis(),
        ));
        f.writer.append(&mut tombstone).unwrap();
        f.writer.flush().unwrap();
        f.chaser.chase_all().unwrap();
        append(&f, "filler", -1, vec![b'y'; 700]);

        let count_before = f.manager.chunk_count();
        run(&f);
        assert_eq!(f.manager.chunk_count(), count_before);

        // Chunk 0 held only the first doomed event; it is now empty but
        // still addressable.
        let chunk = f.manager.chunk_at(crate::types::ChunkNumber::new(0)).unwrap();
        assert!(chunk.is_completed());
        match chunk.try_read_at(chunk.start_position(), true).unwrap() {
            RecordReadResult::Scavenged | RecordReadResult::OutOfRange => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn adjacent_scavenged_chunks_are_merged() {
        let f = fixture(1024);
        for n in 0..6 {
            append(&f, "doomed", n - 1, vec![b'x'; 700]);
        }
        let mut tombstone = LogRecord::Prepare(PrepareRecord::tombstone(
            LogPosition::NONE,
            "doomed",
            now_millis(),
        ));
        f.writer.append(&mut tombstone).unwrap();
        f.writer.flush().unwrap();
        f.chaser.chase_all().unwrap();
        append(&f, "filler", -1, vec![b'y'; 700]);

        let distinct_before = f.manager.distinct_chunks().len();
        run(&f);
        let distinct_after = f.manager.distinct_chunks().len();
        assert!(distinct_after < distinct_before);

        // All merged positions resolve to the same file.
        let a = f.manager.chunk_for(0).unwrap();
        let b = f.manager.chunk_for(1024).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(f
            .publisher
            .events()
            .iter()
            .any(|e| matches!(e, StorageEvent::ScavengeCompleted { .. })));
    }

    #[test]
    fn cancellation_stops_at_phase_boundary_and_resumes() {
        let f = fixture(2048);
        for n in 0..5 {
            append(&f, "orders-1", n - 1, vec![b'x'; 700]);
        }
        set_metadata(&f, "orders-1", StreamMetadata::empty().with_max_count(1));
        for n in 0..4 {
            append(&f, "filler", n - 1, vec![b'y'; 700]);
        }

        let token = CancellationToken::new();
        token.cancel();
        let outcome = f
            .scavenger
            .run(&f.writer, &f.read, &TracingScavengerLog, &token)
            .unwrap();
        assert_eq!(outcome, ScavengeOutcome::Cancelled);

        // The interrupted run resumes and completes.
        let outcome = run(&f);
        assert!(matches!(outcome, ScavengeOutcome::Completed { .. }));
        match f.read.read_stream_forward("orders-1", 0, 10).unwrap() {
            ReadStreamResult::Success { events, .. } => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].event_number.as_i64(), 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn follower_refuses_to_scavenge() {
        let dir = TempDir::new().unwrap();
        let config = Config::default().chunk_size(2048).sync_on_flush(false);
        let manager = Arc::new(
            ChunkManager::create(
                dir.path().join("chunks"),
                config.clone(),
                Arc::new(TransformSet::identity()),
                now_millis(),
            )
            .unwrap(),
        );
        let checkpoints = Arc::new(CheckpointSet::open(&dir.path().join("checkpoints")).unwrap());
        let flag = LeaderFlag::new(false);
        let scavenger = Scavenger::new(
            Arc::clone(&manager),
            flag,
            Arc::new(NullPublisher),
            dir.path().join("scavenge"),
            config.clone(),
        );
        let writer = LogWriter::recover(
            manager,
            Arc::clone(&checkpoints),
            Arc::new(AlwaysLeader),
            Arc::new(NullPublisher),
            config.clone(),
        )
        .unwrap();
        let index = Arc::new(TableIndex::open(dir.path().join("index"), 4).unwrap());
        let read = ReadIndex::new(
            scavenger.manager.clone(),
            index,
            checkpoints,
            config,
        );

        let outcome = scavenger
            .run(&writer, &read, &TracingScavengerLog, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, ScavengeOutcome::NotLeader);
    }
}
