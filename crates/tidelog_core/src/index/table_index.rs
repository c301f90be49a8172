//! The merged view over the memtable and all persisted tables.
//!
//! The set of live ptables is recorded in `index.map`, a small CBOR
//! document replaced atomically by write-to-temp-then-rename. A ptable
//! file not listed in the map is an orphan from an interrupted persist
//! and is deleted at open. A map or table that fails validation does not
//! fail the database: the index is an acceleration, so the open falls
//! back to an empty index and reports that a rebuild from the log is
//! needed.

use crate::error::{CoreError, CoreResult};
use crate::index::{entry_order, IndexEntry, MemTable, PTable, PrepareLookup};
use crate::types::{EventNumber, StreamHash};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TABLE_MAP_FILE: &str = "index.map";
const TABLE_MAP_VERSION: u32 = 1;

/// On-disk list of live ptables, newest first.
#[derive(Debug, Serialize, Deserialize)]
struct TableMapFile {
    version: u32,
    ptables: Vec<String>,
}

/// The two-level stream index: one memtable over a stack of ptables.
pub struct TableIndex {
    dir: PathBuf,
    max_mem_table_entries: usize,
    memtable: MemTable,
    /// Newest first.
    ptables: RwLock<Vec<Arc<PTable>>>,
    rebuild_required: bool,
}

impl TableIndex {
    /// Opens the index directory.
    ///
    /// After a validation failure the returned index is empty and
    /// [`rebuild_required`](Self::rebuild_required) is true; the caller
    /// must replay the log from the start to repopulate it.
    pub fn open(dir: impl Into<PathBuf>, max_mem_table_entries: usize) -> CoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut rebuild_required = false;
        let listed = match load_table_map(&dir.join(TABLE_MAP_FILE)) {
            Ok(listed) => listed,
            Err(err) => {
                warn!(%err, "table map unreadable, rebuilding index from the log");
                rebuild_required = true;
                Vec::new()
            }
        };

        let mut ptables = Vec::with_capacity(listed.len());
        if !rebuild_required {
            for name in &listed {
                match PTable::open(&dir.join(name)) {
                    Ok(table) => ptables.push(Arc::new(table)),
                    Err(err) => {
                        warn!(table = %name, %err, "ptable unreadable, rebuilding index from the log");
                        rebuild_required = true;
                        ptables.clear();
                        break;
                    }
                }
            }
        }
        if rebuild_required {
            // Start over: every table file is stale once we replay.
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "ptb" || e == "tmp") {
                    fs::remove_file(&path)?;
                }
            }
            persist_table_map(&dir, &[])?;
        } else {
            // Remove orphans from an interrupted persist.
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let is_orphan_table =
                    name.ends_with(".ptb") && !listed.iter().any(|l| l == name);
                if is_orphan_table || name.ends_with(".tmp") {
                    warn!(path = %path.display(), "removing orphan index file");
                    fs::remove_file(&path)?;
                }
            }
        }

        info!(
            tables = ptables.len(),
            rebuild = rebuild_required,
            "opened table index"
        );
        Ok(Self {
            dir,
            max_mem_table_entries,
            memtable: MemTable::new(),
            ptables: RwLock::new(ptables),
            rebuild_required,
        })
    }

    /// True if the persisted tables were discarded at open and the index
    /// must be repopulated from the log.
    #[must_use]
    pub fn rebuild_required(&self) -> bool {
        self.rebuild_required
    }

    /// Number of persisted tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.ptables.read().len()
    }

    /// Entries currently in the memtable.
    #[must_use]
    pub fn mem_table_len(&self) -> usize {
        self.memtable.len()
    }

    /// Adds a committed event to the index.
    ///
    /// Returns true if the memtable filled up and was persisted to a new
    /// ptable: the caller may then advance its index checkpoint.
    pub fn add(
        &self,
        hash: StreamHash,
        event_number: EventNumber,
        position: i64,
    ) -> CoreResult<bool> {
        self.memtable.add(hash, event_number, position);
        if self.memtable.len() >= self.max_mem_table_entries {
            self.persist_memtable()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Dumps the memtable into a new ptable and registers it.
    pub fn persist_memtable(&self) -> CoreResult<()> {
        let entries = self.memtable.sorted_entries();
        if entries.is_empty() {
            return Ok(());
        }
        let name = format!("ptable-{}.ptb", Uuid::new_v4());
        let table = PTable::write(&self.dir.join(&name), &entries)?;
        debug!(table = %name, entries = entries.len(), "persisted memtable");

        let mut ptables = self.ptables.write();
        ptables.insert(0, Arc::new(table));
        let names: Vec<String> = ptables.iter().map(file_name_of).collect();
        persist_table_map(&self.dir, &names)?;
        drop(ptables);

        self.memtable.clear();
        Ok(())
    }

    /// The entry with the highest event number for a hash.
    pub fn latest(&self, hash: StreamHash) -> CoreResult<Option<IndexEntry>> {
        let mut best = self.memtable.latest(hash);
        for table in self.ptables.read().iter() {
            if let Some(entry) = table.latest(hash)? {
                if best.is_none_or(|b| {
                    (entry.event_number, entry.position) > (b.event_number, b.position)
                }) {
                    best = Some(entry);
                }
            }
        }
        Ok(best)
    }

    /// The entry with the lowest event number for a hash.
    pub fn oldest(&self, hash: StreamHash) -> CoreResult<Option<IndexEntry>> {
        let mut best = self.memtable.oldest(hash);
        for table in self.ptables.read().iter() {
            if let Some(entry) = table.oldest(hash)? {
                if best.is_none_or(|b| {
                    (entry.event_number, entry.position) < (b.event_number, b.position)
                }) {
                    best = Some(entry);
                }
            }
        }
        Ok(best)
    }

    /// Entries for a hash with event numbers in `from..=to`, ascending,
    /// deduplicated across tiers.
    pub fn range(&self, hash: StreamHash, from: i64, to: i64) -> CoreResult<Vec<IndexEntry>> {
        let mut out = Vec::new();
        self.memtable.range(hash, from, to, &mut out);
        for table in self.ptables.read().iter() {
            table.range(hash, from, to, &mut out)?;
        }
        out.sort_by_key(entry_order);
        out.dedup_by_key(|e| (e.event_number, e.position));
        Ok(out)
    }

    /// Merges all ptables into one, dropping entries `keep` rejects.
    ///
    /// Version-1 entries carry only truncated hashes; their full hashes
    /// are recovered by re-reading the prepare through `lookup`. Entries
    /// whose prepare was scavenged away are dropped.
    pub fn merge(
        &self,
        lookup: &dyn PrepareLookup,
        keep: impl Fn(&IndexEntry) -> bool,
    ) -> CoreResult<()> {
        let old: Vec<Arc<PTable>> = self.ptables.read().clone();
        if old.is_empty() {
            return Ok(());
        }

        let mut entries: Vec<IndexEntry> = Vec::new();
        for table in &old {
            for idx in 0..table.len() {
                let (raw, ev, pos) = table.raw_entry(idx)?;
                let hash = if table.version() == super::ptable::PTABLE_VERSION_V1 {
                    match lookup.stream_id_at(pos)? {
                        Some(stream_id) => StreamHash::of(&stream_id),
                        None => continue,
                    }
                } else {
                    StreamHash::new(raw)
                };
                let entry = IndexEntry::new(hash, EventNumber::new(ev), pos);
                if keep(&entry) {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by_key(entry_order);
        entries.dedup_by_key(|e| entry_order(e));

        let name = format!("ptable-{}.ptb", Uuid::new_v4());
        let merged = PTable::write(&self.dir.join(&name), &entries)?;

        let mut ptables = self.ptables.write();
        let displaced: Vec<PathBuf> = old.iter().map(|t| t.path().to_path_buf()).collect();
        *ptables = vec![Arc::new(merged)];
        persist_table_map(&self.dir, &[name.clone()])?;
        drop(ptables);

        for path in displaced {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), %err, "failed to remove merged ptable");
            }
        }
        info!(table = %name, entries = entries.len(), merged = old.len(), "merged ptables");
        Ok(())
    }
}

impl std::fmt::Debug for TableIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableIndex")
            .field("dir", &self.dir)
            .field("tables", &self.table_count())
            .field("mem_entries", &self.mem_table_len())
            .finish_non_exhaustive()
    }
}

fn file_name_of(table: &Arc<PTable>) -> String {
    table
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

fn load_table_map(path: &Path) -> CoreResult<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path)?;
    let map: TableMapFile = ciborium::from_reader(bytes.as_slice())
        .map_err(|e| CoreError::metadata_codec(format!("table map decode failed: {e}")))?;
    if map.version != TABLE_MAP_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported table map version {}",
            map.version
        )));
    }
    Ok(map.ptables)
}

fn persist_table_map(dir: &Path, names: &[String]) -> CoreResult<()> {
    let map = TableMapFile {
        version: TABLE_MAP_VERSION,
        ptables: names.to_vec(),
    };
    let mut bytes = Vec::new();
    ciborium::into_writer(&map, &mut bytes)
        .map_err(|e| CoreError::metadata_codec(format!("table map encode failed: {e}")))?;

    let tmp = dir.join(format!("{TABLE_MAP_FILE}.{}.tmp", Uuid::new_v4()));
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, dir.join(TABLE_MAP_FILE))?;
    let handle = fs::File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ptable::{PTABLE_VERSION_V1, PTABLE_VERSION_V2};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct MapLookup {
        streams: Mutex<HashMap<i64, String>>,
    }

    impl MapLookup {
        fn new(pairs: &[(i64, &str)]) -> Self {
            Self {
                streams: Mutex::new(
                    pairs
                        .iter()
                        .map(|&(pos, s)| (pos, s.to_string()))
                        .collect(),
                ),
            }
        }
    }

    impl PrepareLookup for MapLookup {
        fn stream_id_at(&self, position: i64) -> CoreResult<Option<String>> {
            Ok(self.streams.lock().get(&position).cloned())
        }
    }

    #[test]
    fn add_and_lookup_across_tiers() {
        let dir = TempDir::new().unwrap();
        let index = TableIndex::open(dir.path(), 2).unwrap();
        let hash = StreamHash::of("orders-1");

        // Third add crosses the memtable limit and persists a table.
        assert!(!index.add(hash, EventNumber::new(0), 0).unwrap());
        assert!(index.add(hash, EventNumber::new(1), 100).unwrap());
        assert!(!index.add(hash, EventNumber::new(2), 200).unwrap());
        assert_eq!(index.table_count(), 1);
        assert_eq!(index.mem_table_len(), 1);

        assert_eq!(
            index.latest(hash).unwrap().unwrap().event_number,
            EventNumber::new(2)
        );
        assert_eq!(
            index.oldest(hash).unwrap().unwrap().event_number,
            EventNumber::new(0)
        );
        let numbers: Vec<i64> = index
            .range(hash, 0, 2)
            .unwrap()
            .iter()
            .map(|e| e.event_number.as_i64())
            .collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[test]
    fn persisted_tables_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let hash = StreamHash::of("orders-1");
        {
            let index = TableIndex::open(dir.path(), 2).unwrap();
            index.add(hash, EventNumber::new(0), 0).unwrap();
            index.add(hash, EventNumber::new(1), 100).unwrap();
        }

        let index = TableIndex::open(dir.path(), 2).unwrap();
        assert!(!index.rebuild_required());
        assert_eq!(index.table_count(), 1);
        assert_eq!(
            index.latest(hash).unwrap().unwrap().event_number,
            EventNumber::new(1)
        );
        // Memtable entries were never persisted; they come back via replay.
        assert_eq!(index.mem_table_len(), 0);
    }

    #[test]
    fn orphan_tables_removed_at_open() {
        let dir = TempDir::new().unwrap();
        {
            let index = TableIndex::open(dir.path(), 2).unwrap();
            let hash = StreamHash::of("orders-1");
            index.add(hash, EventNumber::new(0), 0).unwrap();
            index.add(hash, EventNumber::new(1), 100).unwrap();
        }
        let orphan = dir.path().join("ptable-orphan.ptb");
        fs::write(&orphan, b"never registered").unwrap();

        let index = TableIndex::open(dir.path(), 2).unwrap();
        assert!(!orphan.exists());
        assert!(!index.rebuild_required());
    }

    #[test]
    fn corrupt_table_forces_rebuild() {
        let dir = TempDir::new().unwrap();
        let hash = StreamHash::of("orders-1");
        let table_path;
        {
            let index = TableIndex::open(dir.path(), 2).unwrap();
            index.add(hash, EventNumber::new(0), 0).unwrap();
            index.add(hash, EventNumber::new(1), 100).unwrap();
            let ptables = index.ptables.read();
            table_path = ptables[0].path().to_path_buf();
        }
        let mut bytes = fs::read(&table_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&table_path, bytes).unwrap();

        let index = TableIndex::open(dir.path(), 2).unwrap();
        assert!(index.rebuild_required());
        assert_eq!(index.table_count(), 0);
        assert!(index.latest(hash).unwrap().is_none());
    }

    #[test]
    fn merge_collapses_tables_and_applies_filter() {
        let dir = TempDir::new().unwrap();
        let index = TableIndex::open(dir.path(), 2).unwrap();
        let hash = StreamHash::of("orders-1");
        for n in 0..6 {
            index.add(hash, EventNumber::new(n), n * 100).unwrap();
        }
        assert_eq!(index.table_count(), 3);

        let lookup = MapLookup::new(&[]);
        // Drop the entry at position 200 (event 2), as a scavenge would.
        index.merge(&lookup, |e| e.position != 200).unwrap();
        assert_eq!(index.table_count(), 1);

        let numbers: Vec<i64> = index
            .range(hash, 0, 10)
            .unwrap()
            .iter()
            .map(|e| e.event_number.as_i64())
            .collect();
        assert_eq!(numbers, vec![0, 1, 3, 4, 5]);
    }

    #[test]
    fn merge_recovers_full_hashes_from_v1_tables() {
        let dir = TempDir::new().unwrap();
        let index = TableIndex::open(dir.path(), 100).unwrap();

        // A version-1 table written by an older release.
        let hash = StreamHash::of("orders-1");
        let v1_entries = vec![
            IndexEntry::new(hash, EventNumber::new(0), 0),
            IndexEntry::new(hash, EventNumber::new(1), 100),
        ];
        let name = "ptable-legacy.ptb".to_string();
        PTable::write_with_version(&dir.path().join(&name), PTABLE_VERSION_V1, &v1_entries)
            .unwrap();
        {
            let mut ptables = index.ptables.write();
            ptables.insert(0, Arc::new(PTable::open(&dir.path().join(&name)).unwrap()));
        }

        let lookup = MapLookup::new(&[(0, "orders-1"), (100, "orders-1")]);
        index.merge(&lookup, |_| true).unwrap();

        let merged = index.ptables.read()[0].clone();
        assert_eq!(merged.version(), PTABLE_VERSION_V2);
        let latest = merged.latest(hash).unwrap().unwrap();
        assert_eq!(latest.event_number, EventNumber::new(1));
    }
}
