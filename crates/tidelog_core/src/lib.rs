//! # Tidelog Core
//!
//! Chunked append-only transaction log engine.
//!
//! This crate provides:
//! - A framed log record codec (prepares, commits, system records)
//! - Chunk files with completion footers, checksums, and position maps
//! - Durable named checkpoints ordered writer >= chaser >= index
//! - A single writer, a chaser, and bounded read cursors over the log
//! - A two-level stream index (memtable plus persisted ptables)
//! - Stream reads with metadata-driven retention
//! - A resumable, chunk-at-a-time scavenger
//!
//! The entry point is [`LogDb`], which wires the pieces together over a
//! locked database directory.
//!
//! ## Example
//!
//! ```no_run
//! use tidelog_core::{Config, EventData, ExpectedVersion, LogDb};
//!
//! let db = LogDb::open("./data", Config::new())?;
//! db.append_to_stream(
//!     "orders-1",
//!     ExpectedVersion::NoStream,
//!     vec![EventData::new("order-placed", br#"{"total": 12}"#.to_vec())],
//! )?;
//! # Ok::<(), tidelog_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod chaser;
pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod cursor;
pub mod db;
pub mod dir;
pub mod error;
pub mod index;
pub mod metadata;
pub mod read_index;
pub mod record;
pub mod scavenge;
pub mod types;
pub mod writer;

pub use bus::{
    AlwaysLeader, CollectingPublisher, LeaderFlag, NodeStatus, NullPublisher, Publisher,
    StorageEvent,
};
pub use checkpoint::{Checkpoint, CheckpointSet, FileCheckpoint, InMemoryCheckpoint};
pub use config::Config;
pub use cursor::{PinnedCursor, SeqReader};
pub use db::{AppendResult, EventData, LogDb};
pub use dir::LogDir;
pub use error::{CoreError, CoreResult};
pub use metadata::StreamMetadata;
pub use read_index::{
    AllEventsSlice, ReadEventResult, ReadIndex, ReadStreamResult, RecordedEvent,
};
pub use scavenge::{
    CancellationToken, ScavengeOutcome, ScavengePhase, ScavengerLog, TracingScavengerLog,
};
pub use types::{ChunkNumber, EventNumber, ExpectedVersion, LogPosition, StreamHash};
