//! In-process event bus and node status.
//!
//! Storage components publish coarse notifications (commits, chunk
//! lifecycle, scavenge completion) through a [`Publisher`] so embedders
//! can drive projections or metrics without polling. Writes are gated on
//! [`NodeStatus::is_leader`]; a standalone database uses
//! [`AlwaysLeader`].

use crate::types::{ChunkNumber, EventNumber, LogPosition};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A notification emitted by the storage engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// A committed event became readable.
    EventCommitted {
        /// Stream the event belongs to.
        stream_id: String,
        /// Event number within the stream.
        event_number: EventNumber,
        /// Log position of the prepare record.
        log_position: LogPosition,
    },
    /// A stream was hard-deleted.
    StreamDeleted {
        /// The deleted stream.
        stream_id: String,
        /// Log position of the tombstone.
        log_position: LogPosition,
    },
    /// The tail chunk was sealed and a new one started.
    ChunkCompleted {
        /// Number of the sealed chunk.
        chunk_number: ChunkNumber,
    },
    /// A scavenged or merged chunk replaced its sources.
    ChunkSwitchedIn {
        /// First chunk number covered by the replacement.
        start: ChunkNumber,
        /// Last chunk number covered by the replacement.
        end: ChunkNumber,
    },
    /// A scavenge run moved to its next phase.
    ScavengePhaseChanged {
        /// Id of the scavenge run.
        scavenge_id: Uuid,
        /// Name of the phase now running.
        phase: &'static str,
    },
    /// A scavenge run finished.
    ScavengeCompleted {
        /// Id of the scavenge run.
        scavenge_id: Uuid,
        /// Bytes reclaimed across all rewritten chunks.
        space_saved: i64,
    },
    /// A new epoch record was written.
    EpochWritten {
        /// Monotonic epoch number.
        epoch_number: i64,
        /// Log position of the epoch record.
        log_position: LogPosition,
    },
}

/// Receives storage notifications.
///
/// Implementations must be cheap and non-blocking; they run on engine
/// threads.
pub trait Publisher: Send + Sync {
    /// Delivers one event.
    fn publish(&self, event: StorageEvent);
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _event: StorageEvent) {}
}

/// Buffers events for inspection. Intended for tests.
#[derive(Debug, Default)]
pub struct CollectingPublisher {
    events: Mutex<Vec<StorageEvent>>,
}

impl CollectingPublisher {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all events seen so far.
    #[must_use]
    pub fn events(&self) -> Vec<StorageEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns all buffered events.
    #[must_use]
    pub fn take(&self) -> Vec<StorageEvent> {
        std::mem::take(&mut self.events.lock())
    }
}

impl Publisher for CollectingPublisher {
    fn publish(&self, event: StorageEvent) {
        self.events.lock().push(event);
    }
}

/// Reports whether this node currently holds the write lease.
pub trait NodeStatus: Send + Sync {
    /// Returns true if writes are currently allowed.
    fn is_leader(&self) -> bool;
}

/// A node that is always leader. Used by standalone databases.
#[derive(Debug, Default)]
pub struct AlwaysLeader;

impl NodeStatus for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}

/// A toggleable node status for tests and embedders with external
/// leader election.
#[derive(Debug)]
pub struct LeaderFlag {
    leader: AtomicBool,
}

impl LeaderFlag {
    /// Creates a flag with the given initial leadership.
    #[must_use]
    pub fn new(leader: bool) -> Arc<Self> {
        Arc::new(Self {
            leader: AtomicBool::new(leader),
        })
    }

    /// Grants or revokes leadership.
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl NodeStatus for LeaderFlag {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}
