//! First scavenge phase: collect per-stream facts from the log.

use crate::checkpoint::Checkpoint;
use crate::chunk::manager::ChunkManager;
use crate::cursor::{PinnedCursor, SeqReader};
use crate::error::CoreResult;
use crate::metadata::{self, StreamMetadata};
use crate::record::prepare::PrepareFlags;
use crate::record::LogRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What the accumulator learned about one stream.
#[derive(Debug, Clone, Default)]
pub struct StreamFacts {
    /// Highest committed event number seen.
    pub last_event_number: i64,
    /// Latest retention metadata, empty if never set.
    pub metadata: StreamMetadata,
    /// True if a tombstone was seen.
    pub tombstoned: bool,
}

/// Everything the calculator needs, gathered in one sequential pass.
#[derive(Debug, Default)]
pub struct Accumulated {
    /// Facts keyed by stream id.
    pub streams: HashMap<String, StreamFacts>,
    /// Committed transactions: start position to first event number.
    pub committed: HashMap<i64, i64>,
}

impl Accumulated {
    /// True if the transaction starting at `position` was committed,
    /// either implicitly or by a commit record below the threshold.
    #[must_use]
    pub fn first_event_of(&self, transaction_position: i64) -> Option<i64> {
        self.committed.get(&transaction_position).copied()
    }
}

/// Scans `[0, threshold)` and gathers stream facts.
pub fn accumulate(manager: &Arc<ChunkManager>, threshold: i64) -> CoreResult<Accumulated> {
    let bound: Arc<dyn Checkpoint> = PinnedCursor::new("scavenge-accumulate", threshold);
    let mut reader = SeqReader::new(Arc::clone(manager), bound, 0);
    let mut acc = Accumulated::default();
    // Prepares of explicit transactions, waiting for their commit.
    let mut pending: HashMap<i64, Vec<(String, i32, bool)>> = HashMap::new();

    while let Some(read) = reader.try_read_next()? {
        match &read.record {
            LogRecord::Prepare(prepare) => {
                if prepare.is_committed() {
                    let event_number =
                        prepare.expected_version.as_i64() + 1 + i64::from(prepare.transaction_offset);
                    acc.committed
                        .insert(prepare.transaction_position, event_number);
                    note_committed(
                        &mut acc,
                        &prepare.stream_id,
                        event_number,
                        prepare.is_tombstone(),
                        &prepare.data,
                    );
                } else if prepare.flags.contains(PrepareFlags::DATA)
                    || prepare.is_tombstone()
                {
                    pending.entry(prepare.transaction_position).or_default().push((
                        prepare.stream_id.clone(),
                        prepare.transaction_offset,
                        prepare.is_tombstone(),
                    ));
                }
            }
            LogRecord::Commit(commit) => {
                acc.committed
                    .insert(commit.transaction_position, commit.first_event_number);
                if let Some(prepares) = pending.remove(&commit.transaction_position) {
                    for (stream_id, offset, tombstone) in prepares {
                        let event_number = commit.first_event_number + i64::from(offset);
                        note_committed(&mut acc, &stream_id, event_number, tombstone, &[]);
                    }
                }
            }
            LogRecord::System(_) => {}
        }
    }

    debug!(
        streams = acc.streams.len(),
        transactions = acc.committed.len(),
        threshold,
        "scavenge accumulation finished"
    );
    Ok(acc)
}

fn note_committed(
    acc: &mut Accumulated,
    stream_id: &str,
    event_number: i64,
    tombstone: bool,
    data: &[u8],
) {
    if let Some(subject) = metadata::original_stream_of(stream_id) {
        // A metadata event configures its subject stream.
        if let Ok(meta) = StreamMetadata::from_bytes(data) {
            acc.streams.entry(subject.to_string()).or_default().metadata = meta;
        }
    }
    let facts = acc.streams.entry(stream_id.to_string()).or_default();
    if tombstone {
        facts.tombstoned = true;
    } else {
        facts.last_event_number = facts.last_event_number.max(event_number);
    }
}
