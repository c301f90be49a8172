//! In-memory tier of the stream index.

use crate::index::{entry_order, IndexEntry};
use crate::types::{EventNumber, StreamHash};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Mutable index of recently committed events.
///
/// Entries per hash are kept sorted by (event number, position).
/// Duplicate entries are ignored; the same event may be replayed into
/// the memtable after a restart.
#[derive(Debug, Default)]
pub struct MemTable {
    map: RwLock<HashMap<u64, Vec<(i64, i64)>>>,
}

impl MemTable {
    /// Creates an empty memtable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().values().map(Vec::len).sum()
    }

    /// Returns true if the memtable holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Adds an entry. Idempotent.
    pub fn add(&self, hash: StreamHash, event_number: EventNumber, position: i64) {
        let mut map = self.map.write();
        let entries = map.entry(hash.as_u64()).or_default();
        let key = (event_number.as_i64(), position);
        match entries.binary_search(&key) {
            Ok(_) => {}
            Err(at) => entries.insert(at, key),
        }
    }

    /// The entry with the highest event number for a hash.
    #[must_use]
    pub fn latest(&self, hash: StreamHash) -> Option<IndexEntry> {
        self.map.read().get(&hash.as_u64()).and_then(|entries| {
            entries
                .last()
                .map(|&(ev, pos)| IndexEntry::new(hash, EventNumber::new(ev), pos))
        })
    }

    /// The entry with the lowest event number for a hash.
    #[must_use]
    pub fn oldest(&self, hash: StreamHash) -> Option<IndexEntry> {
        self.map.read().get(&hash.as_u64()).and_then(|entries| {
            entries
                .first()
                .map(|&(ev, pos)| IndexEntry::new(hash, EventNumber::new(ev), pos))
        })
    }

    /// Entries for a hash with event numbers in `from..=to`, ascending.
    pub fn range(&self, hash: StreamHash, from: i64, to: i64, out: &mut Vec<IndexEntry>) {
        if let Some(entries) = self.map.read().get(&hash.as_u64()) {
            let start = entries.partition_point(|&(ev, _)| ev < from);
            for &(ev, pos) in &entries[start..] {
                if ev > to {
                    break;
                }
                out.push(IndexEntry::new(hash, EventNumber::new(ev), pos));
            }
        }
    }

    /// All entries in the table's canonical order.
    #[must_use]
    pub fn sorted_entries(&self) -> Vec<IndexEntry> {
        let map = self.map.read();
        let mut out: Vec<IndexEntry> = map
            .iter()
            .flat_map(|(&hash, entries)| {
                entries.iter().map(move |&(ev, pos)| {
                    IndexEntry::new(StreamHash::new(hash), EventNumber::new(ev), pos)
                })
            })
            .collect();
        out.sort_by_key(entry_order);
        out
    }

    /// Discards all entries.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_lookup() {
        let table = MemTable::new();
        let hash = StreamHash::of("orders-1");
        table.add(hash, EventNumber::new(1), 100);
        table.add(hash, EventNumber::new(0), 50);
        table.add(hash, EventNumber::new(2), 150);

        assert_eq!(table.len(), 3);
        assert_eq!(table.latest(hash).unwrap().event_number, EventNumber::new(2));
        assert_eq!(table.oldest(hash).unwrap().event_number, EventNumber::new(0));
        assert!(table.latest(StreamHash::of("missing")).is_none());
    }

    #[test]
    fn add_is_idempotent() {
        let table = MemTable::new();
        let hash = StreamHash::of("orders-1");
        table.add(hash, EventNumber::new(0), 50);
        table.add(hash, EventNumber::new(0), 50);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn range_is_bounded_and_ascending() {
        let table = MemTable::new();
        let hash = StreamHash::of("orders-1");
        for n in 0..5 {
            table.add(hash, EventNumber::new(n), n * 10);
        }

        let mut out = Vec::new();
        table.range(hash, 1, 3, &mut out);
        let numbers: Vec<i64> = out.iter().map(|e| e.event_number.as_i64()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn tombstone_sorts_after_all_events() {
        let table = MemTable::new();
        let hash = StreamHash::of("orders-1");
        table.add(hash, EventNumber::new(7), 100);
        table.add(hash, EventNumber::TOMBSTONE, 200);
        assert!(table.latest(hash).unwrap().event_number.is_tombstone());
    }

    #[test]
    fn sorted_entries_follow_canonical_order() {
        let table = MemTable::new();
        let a = StreamHash::new(2);
        let b = StreamHash::new(1);
        table.add(a, EventNumber::new(0), 10);
        table.add(b, EventNumber::new(1), 30);
        table.add(b, EventNumber::new(0), 20);

        let entries = table.sorted_entries();
        let keys: Vec<(u64, i64)> = entries
            .iter()
            .map(|e| (e.hash.as_u64(), e.event_number.as_i64()))
            .collect();
        assert_eq!(keys, vec![(1, 0), (1, 1), (2, 0)]);

        table.clear();
        assert!(table.is_empty());
    }
}
