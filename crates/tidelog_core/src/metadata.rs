//! Stream metadata and the `$$<stream>` naming scheme.
//!
//! Metadata lives in a companion stream: the metadata for `orders-1` is
//! the latest event of `$$orders-1`, with a CBOR-encoded
//! [`StreamMetadata`] payload. Retention rules are applied at read time
//! and enforced permanently by the scavenger.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Event type of metadata events.
pub const METADATA_EVENT_TYPE: &str = "$metadata";

/// Event type of hard-delete tombstones.
pub const TOMBSTONE_EVENT_TYPE: &str = "$streamDeleted";

/// Retention and truncation settings for one stream.
///
/// All fields are optional; an empty value imposes no limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Keep at most this many of the latest events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<i64>,

    /// Keep only events younger than this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<i64>,

    /// Events below this number are gone; the soft-delete marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_before: Option<i64>,
}

impl StreamMetadata {
    /// Metadata with no limits set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            max_count: None,
            max_age_secs: None,
            truncate_before: None,
        }
    }

    /// True if no limit is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.max_count.is_none() && self.max_age_secs.is_none() && self.truncate_before.is_none()
    }

    /// Limits retention to the latest `count` events.
    #[must_use]
    pub const fn with_max_count(mut self, count: i64) -> Self {
        self.max_count = Some(count);
        self
    }

    /// Limits retention to events younger than `secs` seconds.
    #[must_use]
    pub const fn with_max_age_secs(mut self, secs: i64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    /// Discards events numbered below `event_number`.
    #[must_use]
    pub const fn with_truncate_before(mut self, event_number: i64) -> Self {
        self.truncate_before = Some(event_number);
        self
    }

    /// Encodes to CBOR for storage in a metadata event.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CoreError::metadata_codec(format!("metadata encode failed: {e}")))?;
        Ok(bytes)
    }

    /// Decodes from a metadata event payload.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| CoreError::metadata_codec(format!("metadata decode failed: {e}")))
    }
}

/// The metadata stream for `stream_id`.
#[must_use]
pub fn metadata_stream_of(stream_id: &str) -> String {
    format!("$${stream_id}")
}

/// True if `stream_id` names a metadata stream.
#[must_use]
pub fn is_metadata_stream(stream_id: &str) -> bool {
    stream_id.starts_with("$$")
}

/// The stream a metadata stream describes, if it is one.
#[must_use]
pub fn original_stream_of(stream_id: &str) -> Option<&str> {
    stream_id.strip_prefix("$$")
}
