//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use tidelog_core::{EventData, StreamMetadata};
use uuid::Uuid;

/// Strategy for generating valid stream ids.
pub fn stream_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_-]{0,31}")
        .expect("Invalid regex")
        .prop_filter("Stream id must not be a metadata stream", |s| {
            !s.starts_with('$')
        })
}

/// Strategy for generating event type tags.
pub fn event_type_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,23}").expect("Invalid regex")
}

/// Strategy for generating event payloads (arbitrary bytes).
pub fn event_payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024)
}

/// Strategy for generating a single event.
pub fn event_data_strategy() -> impl Strategy<Value = EventData> {
    (
        event_type_strategy(),
        event_payload_strategy(),
        prop::collection::vec(any::<u8>(), 0..128),
        prop::array::uniform16(any::<u8>()),
    )
        .prop_map(|(event_type, data, metadata, id_bytes)| EventData {
            event_id: Uuid::from_bytes(id_bytes),
            event_type,
            data,
            metadata,
        })
}

/// Strategy for generating non-empty event batches.
pub fn event_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<EventData>> {
    prop::collection::vec(event_data_strategy(), 1..=max_len)
}

/// Strategy for generating stream metadata with at least one rule set.
pub fn stream_metadata_strategy() -> impl Strategy<Value = StreamMetadata> {
    (
        prop::option::of(1i64..1000),
        prop::option::of(1i64..86_400),
        prop::option::of(0i64..1000),
    )
        .prop_filter_map("Metadata must carry at least one rule", |(c, a, t)| {
            let metadata = StreamMetadata {
                max_count: c,
                max_age_secs: a,
                truncate_before: t,
            };
            (!metadata.is_empty()).then_some(metadata)
        })
}
