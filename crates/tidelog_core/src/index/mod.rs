//! The two-level stream index.
//!
//! Index state **must** be derivable from the log; persisted tables are
//! an acceleration, not a source of truth. Entries map a 64-bit stream
//! hash and event number to the log position of the committed prepare.
//! Hashes may collide between streams, so every lookup that must be
//! exact re-reads the candidate prepare and compares stream ids.
//!
//! Recent entries live in a [`MemTable`]; when it fills, it is dumped to
//! an immutable sorted [`PTable`] file and registered in the table map.
//! [`TableIndex`] merges lookups across the memtable and all ptables.

pub mod committer;
pub mod memtable;
pub mod ptable;
pub mod table_index;

pub use committer::IndexCommitter;
pub use memtable::MemTable;
pub use ptable::PTable;
pub use table_index::TableIndex;

use crate::error::CoreResult;
use crate::types::{EventNumber, StreamHash};

/// One index entry: a committed event's location in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Hash of the stream id.
    pub hash: StreamHash,
    /// Event number within the stream.
    pub event_number: EventNumber,
    /// Log position of the prepare record.
    pub position: i64,
}

impl IndexEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(hash: StreamHash, event_number: EventNumber, position: i64) -> Self {
        Self {
            hash,
            event_number,
            position,
        }
    }
}

/// Sort key used everywhere entries are ordered: hash, then event
/// number, then position.
#[must_use]
pub fn entry_order(entry: &IndexEntry) -> (u64, i64, i64) {
    (
        entry.hash.as_u64(),
        entry.event_number.as_i64(),
        entry.position,
    )
}

/// Resolves the stream id behind a log position.
///
/// Used to disambiguate hash collisions and to recover full 64-bit
/// hashes when merging version-1 tables.
pub trait PrepareLookup: Send + Sync {
    /// Returns the stream id of the prepare at `position`, or `None` if
    /// the record was scavenged away.
    fn stream_id_at(&self, position: i64) -> CoreResult<Option<String>>;
}
