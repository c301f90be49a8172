//! Core type definitions for Tidelog.

use std::fmt;

/// A byte offset into the logical, infinite log.
///
/// Positions are global: they keep growing across chunk boundaries for the
/// lifetime of the database. `LogPosition::NONE` (-1) marks "no position".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition(pub i64);

impl LogPosition {
    /// Sentinel for "no position recorded".
    pub const NONE: Self = Self(-1);

    /// The start of the log.
    pub const START: Self = Self(0);

    /// Creates a new log position.
    #[must_use]
    pub const fn new(pos: i64) -> Self {
        Self(pos)
    }

    /// Returns the raw position value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true if this is the `NONE` sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos:{}", self.0)
    }
}

/// Zero-based ordinal of a chunk within the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkNumber(pub i32);

impl ChunkNumber {
    /// Creates a new chunk number.
    #[must_use]
    pub const fn new(n: i32) -> Self {
        Self(n)
    }

    /// Returns the raw chunk number.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns the next chunk number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ChunkNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk:{}", self.0)
    }
}

/// Zero-based event number within a stream.
///
/// `EventNumber::TOMBSTONE` (`i64::MAX`) marks the hard-delete record,
/// which always sorts after every real event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventNumber(pub i64);

impl EventNumber {
    /// Event number assigned to a stream's hard-delete tombstone.
    pub const TOMBSTONE: Self = Self(i64::MAX);

    /// Creates a new event number.
    #[must_use]
    pub const fn new(n: i64) -> Self {
        Self(n)
    }

    /// Returns the raw event number.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true if this is the tombstone sentinel.
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        self.0 == i64::MAX
    }
}

impl fmt::Display for EventNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tombstone() {
            write!(f, "ev:tombstone")
        } else {
            write!(f, "ev:{}", self.0)
        }
    }
}

/// Expected stream revision passed to an append.
///
/// Carries the usual sentinels alongside exact revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append regardless of the stream's current state.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event number must equal this value.
    Exact(i64),
}

impl ExpectedVersion {
    /// Encodes the expected version as the on-disk i64.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Any => -2,
            Self::NoStream => -1,
            Self::Exact(n) => n,
        }
    }

    /// Decodes an on-disk i64 into an expected version.
    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        match value {
            -2 => Self::Any,
            -1 => Self::NoStream,
            n => Self::Exact(n),
        }
    }
}

/// 64-bit hash of a stream id used by the table index.
///
/// Different stream ids may collide; the index disambiguates by re-reading
/// the prepare record at the candidate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamHash(pub u64);

impl StreamHash {
    /// Creates a stream hash from a raw value.
    #[must_use]
    pub const fn new(hash: u64) -> Self {
        Self(hash)
    }

    /// Returns the raw hash value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Hashes a stream id.
    ///
    /// The hash is the first 8 bytes (big-endian) of the SHA-256 digest of
    /// the UTF-8 stream id, so it is stable across platforms and releases.
    #[must_use]
    pub fn of(stream_id: &str) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(stream_id.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    /// Truncates to the 32-bit hash used by version-1 ptables.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for StreamHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hash:{:016x}", self.0)
    }
}

/// Current wall-clock time as Unix milliseconds.
///
/// Timestamps are advisory (record metadata, chunk creation times); they
/// never participate in ordering decisions.
#[must_use]
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
