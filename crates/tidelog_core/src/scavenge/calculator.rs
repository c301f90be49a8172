//! Second scavenge phase: turn accumulated facts into discard decisions.

use crate::scavenge::accumulator::Accumulated;
use std::collections::HashMap;
use tracing::debug;

/// Discard thresholds for one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardPoint {
    /// Events numbered below this are discarded.
    pub before: i64,
    /// Events older than this unix-millis timestamp are discarded.
    pub age_cutoff: Option<i64>,
}

/// Per-stream discard decisions for one scavenge run.
#[derive(Debug, Default)]
pub struct DiscardPlan {
    points: HashMap<String, DiscardPoint>,
}

impl DiscardPlan {
    /// Whether a committed event should be removed.
    ///
    /// Tombstones are never discarded; callers must not ask about them.
    #[must_use]
    pub fn should_discard(&self, stream_id: &str, event_number: i64, timestamp: i64) -> bool {
        let Some(point) = self.points.get(stream_id) else {
            return false;
        };
        event_number < point.before
            || point.age_cutoff.is_some_and(|cutoff| timestamp < cutoff)
    }

    /// Number of streams with at least one discard rule.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if nothing will be discarded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Computes discard points from accumulated facts.
///
/// A tombstoned stream discards everything except the tombstone itself.
/// Otherwise `max_count` and `truncate_before` translate into an event
/// number bound and `max_age` into a timestamp cutoff relative to `now`.
pub fn calculate(acc: &Accumulated, now: i64) -> DiscardPlan {
    let mut points = HashMap::new();
    for (stream_id, facts) in &acc.streams {
        let mut point = DiscardPoint::default();
        if facts.tombstoned {
            point.before = i64::MAX;
        } else {
            if let Some(max_count) = facts.metadata.max_count {
                point.before = point.before.max(facts.last_event_number - max_count + 1);
            }
            if let Some(truncate_before) = facts.metadata.truncate_before {
                point.before = point.before.max(truncate_before);
            }
            point.age_cutoff = facts.metadata.max_age_secs.map(|secs| now - secs * 1000);
        }
        if point.before > 0 || point.age_cutoff.is_some() {
            points.insert(stream_id.clone(), point);
        }
    }
    debug!(streams = points.len(), "scavenge calculation finished");
    DiscardPlan { points }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StreamMetadata;
    use crate::scavenge::accumulator::StreamFacts;

    fn facts(last: i64, metadata: StreamMetadata, tombstoned: bool) -> StreamFacts {
        StreamFacts {
            last_event_number: last,
            metadata,
            tombstoned,
        }
    }

    #[test]
    fn max_count_keeps_the_tail() {
        let mut acc = Accumulated::default();
        acc.streams.insert(
            "s".into(),
            facts(9, StreamMetadata::empty().with_max_count(3), false),
        );
        let plan = calculate(&acc, 0);
        assert!(plan.should_discard("s", 6, 0));
        assert!(!plan.should_discard("s", 7, 0));
        assert!(!plan.should_discard("other", 0, 0));
    }

    #[test]
    fn tombstone_discards_everything() {
        let mut acc = Accumulated::default();
        acc.streams
            .insert("s".into(), facts(4, StreamMetadata::empty(), true));
        let plan = calculate(&acc, 0);
        assert!(plan.should_discard("s", i64::MAX - 1, 0));
    }

    #[test]
    fn max_age_discards_by_timestamp() {
        let now = 1_000_000;
        let mut acc = Accumulated::default();
        acc.streams.insert(
            "s".into(),
            facts(5, StreamMetadata::empty().with_max_age_secs(10), false),
        );
        let plan = calculate(&acc, now);
        assert!(plan.should_discard("s", 5, now - 11_000));
        assert!(!plan.should_discard("s", 5, now - 9_000));
    }

    #[test]
    fn unlimited_streams_produce_no_rules() {
        let mut acc = Accumulated::default();
        acc.streams
            .insert("s".into(), facts(100, StreamMetadata::empty(), false));
        assert!(calculate(&acc, 0).is_empty());
    }
}
