//! Persisted index tables.
//!
//! A ptable is an immutable sorted run of index entries:
//!
//! ```text
//! [magic "TLPT"][version u8][reserved 3][entry count u64 LE]
//! [entries, sorted by (hash, event number, position)]
//! [crc32 over header and entries, u32 LE]
//! ```
//!
//! Version 1 tables store 32-bit stream hashes in 20-byte entries and
//! are readable only; version 2 stores the full 64-bit hash in 24-byte
//! entries and is what new tables are written as. Lookups against a
//! version-1 table compare the truncated hash, which widens the
//! collision set; callers disambiguate by re-reading prepares either
//! way.

use crate::error::{CoreError, CoreResult};
use crate::index::{entry_order, IndexEntry};
use crate::record::compute_crc32;
use crate::types::{EventNumber, StreamHash};
use std::path::{Path, PathBuf};
use tidelog_storage::{FileBackend, StorageBackend};

/// Magic bytes identifying a ptable file.
pub const PTABLE_MAGIC: [u8; 4] = *b"TLPT";

/// Version with 32-bit hashes. Read-only.
pub const PTABLE_VERSION_V1: u8 = 1;

/// Version with 64-bit hashes. Written by this release.
pub const PTABLE_VERSION_V2: u8 = 2;

const HEADER_SIZE: usize = 16;
const ENTRY_SIZE_V1: usize = 20;
const ENTRY_SIZE_V2: usize = 24;

/// An immutable persisted index table.
pub struct PTable {
    backend: Box<dyn StorageBackend>,
    path: PathBuf,
    version: u8,
    count: u64,
}

impl PTable {
    /// Writes a version-2 table.
    ///
    /// Entries must be in canonical order.
    pub fn write(path: &Path, entries: &[IndexEntry]) -> CoreResult<Self> {
        Self::write_with_version(path, PTABLE_VERSION_V2, entries)
    }

    /// Writes a table at an explicit version. Version 1 drops the upper
    /// 32 hash bits; it exists so upgrade handling stays testable.
    pub fn write_with_version(
        path: &Path,
        version: u8,
        entries: &[IndexEntry],
    ) -> CoreResult<Self> {
        let entry_size = entry_size_for(version)?;
        // Order is checked on the hash as stored: version 1 truncates, so
        // two full hashes sharing their top 32 bits compare equal there.
        let stored_key = |e: &IndexEntry| -> (u64, i64, i64) {
            if version == PTABLE_VERSION_V1 {
                (
                    u64::from(e.hash.as_u32()),
                    e.event_number.as_i64(),
                    e.position,
                )
            } else {
                entry_order(e)
            }
        };
        for pair in entries.windows(2) {
            if stored_key(&pair[0]) >= stored_key(&pair[1]) {
                return Err(CoreError::invalid_argument(
                    "ptable entries out of order or duplicated",
                ));
            }
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + entries.len() * entry_size);
        buf.extend_from_slice(&PTABLE_MAGIC);
        buf.push(version);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        for entry in entries {
            match version {
                PTABLE_VERSION_V1 => {
                    buf.extend_from_slice(&entry.hash.as_u32().to_le_bytes());
                }
                _ => buf.extend_from_slice(&entry.hash.as_u64().to_le_bytes()),
            }
            buf.extend_from_slice(&entry.event_number.as_i64().to_le_bytes());
            buf.extend_from_slice(&entry.position.to_le_bytes());
        }
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        let mut backend = FileBackend::open(path)?;
        backend.append(&buf)?;
        backend.sync()?;

        Ok(Self {
            backend: Box::new(backend),
            path: path.to_path_buf(),
            version,
            count: entries.len() as u64,
        })
    }

    /// Opens and validates an existing table.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        let size = backend.size()?;
        if size < (HEADER_SIZE + 4) as u64 {
            return Err(CoreError::invalid_format(format!(
                "ptable {} is truncated",
                path.display()
            )));
        }
        let header = backend.read_at(0, HEADER_SIZE)?;
        if header[0..4] != PTABLE_MAGIC {
            return Err(CoreError::invalid_format(format!(
                "invalid ptable magic in {}",
                path.display()
            )));
        }
        let version = header[4];
        let entry_size = entry_size_for(version)?;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[8..16]);
        let count = u64::from_le_bytes(count_bytes);

        let expected = HEADER_SIZE as u64 + count * entry_size as u64 + 4;
        if expected != size {
            return Err(CoreError::invalid_format(format!(
                "ptable {} size {size} does not match entry count {count}",
                path.display()
            )));
        }

        let body = backend.read_at(0, (size - 4) as usize)?;
        let crc_bytes = backend.read_at(size - 4, 4)?;
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = compute_crc32(&body);
        if stored != actual {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        Ok(Self {
            backend: Box::new(backend),
            path: path.to_path_buf(),
            version,
            count,
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.count
    }

    /// Returns true if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Format version.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The hash value this table compares a query hash as.
    fn hash_key(&self, hash: StreamHash) -> u64 {
        if self.version == PTABLE_VERSION_V1 {
            u64::from(hash.as_u32())
        } else {
            hash.as_u64()
        }
    }

    /// Raw entry at an index: (stored hash, event number, position).
    ///
    /// For version-1 tables the stored hash is the truncated 32-bit
    /// value widened to u64.
    pub fn raw_entry(&self, idx: u64) -> CoreResult<(u64, i64, i64)> {
        if idx >= self.count {
            return Err(CoreError::invalid_argument(format!(
                "ptable entry index {idx} out of range"
            )));
        }
        let entry_size = entry_size_for(self.version)?;
        let offset = HEADER_SIZE as u64 + idx * entry_size as u64;
        let bytes = self.backend.read_at(offset, entry_size)?;
        let (hash, rest) = if self.version == PTABLE_VERSION_V1 {
            let h = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (u64::from(h), &bytes[4..])
        } else {
            let mut h = [0u8; 8];
            h.copy_from_slice(&bytes[0..8]);
            (u64::from_le_bytes(h), &bytes[8..])
        };
        let mut ev = [0u8; 8];
        ev.copy_from_slice(&rest[0..8]);
        let mut pos = [0u8; 8];
        pos.copy_from_slice(&rest[8..16]);
        Ok((hash, i64::from_le_bytes(ev), i64::from_le_bytes(pos)))
    }

    /// First index whose entry key is >= `(hash, event, position)`.
    fn lower_bound(&self, hash: u64, event: i64, position: i64) -> CoreResult<u64> {
        let mut lo = 0u64;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (h, ev, pos) = self.raw_entry(mid)?;
            if (h, ev, pos) < (hash, event, position) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// The entry with the highest event number for a hash.
    pub fn latest(&self, hash: StreamHash) -> CoreResult<Option<IndexEntry>> {
        let key = self.hash_key(hash);
        let end = if key == u64::MAX {
            self.count
        } else {
            self.lower_bound(key + 1, i64::MIN, i64::MIN)?
        };
        if end == 0 {
            return Ok(None);
        }
        let (h, ev, pos) = self.raw_entry(end - 1)?;
        if h != key {
            return Ok(None);
        }
        Ok(Some(IndexEntry::new(hash, EventNumber::new(ev), pos)))
    }

    /// The entry with the lowest event number for a hash.
    pub fn oldest(&self, hash: StreamHash) -> CoreResult<Option<IndexEntry>> {
        let key = self.hash_key(hash);
        let start = self.lower_bound(key, i64::MIN, i64::MIN)?;
        if start >= self.count {
            return Ok(None);
        }
        let (h, ev, pos) = self.raw_entry(start)?;
        if h != key {
            return Ok(None);
        }
        Ok(Some(IndexEntry::new(hash, EventNumber::new(ev), pos)))
    }

    /// Appends entries for a hash with event numbers in `from..=to`,
    /// ascending.
    pub fn range(
        &self,
        hash: StreamHash,
        from: i64,
        to: i64,
        out: &mut Vec<IndexEntry>,
    ) -> CoreResult<()> {
        let key = self.hash_key(hash);
        let mut idx = self.lower_bound(key, from, i64::MIN)?;
        while idx < self.count {
            let (h, ev, pos) = self.raw_entry(idx)?;
            if h != key || ev > to {
                break;
            }
            out.push(IndexEntry::new(hash, EventNumber::new(ev), pos));
            idx += 1;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PTable")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

fn entry_size_for(version: u8) -> CoreResult<usize> {
    match version {
        PTABLE_VERSION_V1 => Ok(ENTRY_SIZE_V1),
        PTABLE_VERSION_V2 => Ok(ENTRY_SIZE_V2),
        other => Err(CoreError::invalid_format(format!(
            "unsupported ptable version {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries_for(streams: &[(&str, i64, i64)]) -> Vec<IndexEntry> {
        let mut out: Vec<IndexEntry> = streams
            .iter()
            .map(|&(s, ev, pos)| IndexEntry::new(StreamHash::of(s), EventNumber::new(ev), pos))
            .collect();
        out.sort_by_key(entry_order);
        out
    }

    #[test]
    fn write_open_lookup_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ptb");
        let entries = entries_for(&[
            ("orders-1", 0, 0),
            ("orders-1", 1, 100),
            ("orders-1", 2, 200),
            ("carts-9", 0, 50),
        ]);
        PTable::write(&path, &entries).unwrap();

        let table = PTable::open(&path).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.version(), PTABLE_VERSION_V2);

        let orders = StreamHash::of("orders-1");
        assert_eq!(
            table.latest(orders).unwrap().unwrap().event_number,
            EventNumber::new(2)
        );
        assert_eq!(
            table.oldest(orders).unwrap().unwrap().event_number,
            EventNumber::new(0)
        );
        assert!(table.latest(StreamHash::of("missing")).unwrap().is_none());

        let mut out = Vec::new();
        table.range(orders, 1, 2, &mut out).unwrap();
        let numbers: Vec<i64> = out.iter().map(|e| e.event_number.as_i64()).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn unsorted_entries_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ptb");
        let entries = vec![
            IndexEntry::new(StreamHash::new(2), EventNumber::new(0), 0),
            IndexEntry::new(StreamHash::new(1), EventNumber::new(0), 10),
        ];
        assert!(PTable::write(&path, &entries).is_err());
    }

    #[test]
    fn corruption_detected_at_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ptb");
        let entries = entries_for(&[("orders-1", 0, 0), ("orders-1", 1, 64)]);
        PTable::write(&path, &entries).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 3] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            PTable::open(&path),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ptb");
        std::fs::write(&path, PTABLE_MAGIC).unwrap();
        assert!(PTable::open(&path).is_err());
    }

    #[test]
    fn v1_tables_compare_truncated_hashes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ptb");
        let entries = entries_for(&[("orders-1", 0, 0), ("orders-1", 1, 80)]);
        PTable::write_with_version(&path, PTABLE_VERSION_V1, &entries).unwrap();

        let table = PTable::open(&path).unwrap();
        assert_eq!(table.version(), PTABLE_VERSION_V1);
        let latest = table.latest(StreamHash::of("orders-1")).unwrap().unwrap();
        assert_eq!(latest.event_number, EventNumber::new(1));
        assert_eq!(latest.position, 80);
    }

    #[test]
    fn empty_table_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ptb");
        PTable::write(&path, &[]).unwrap();
        let table = PTable::open(&path).unwrap();
        assert!(table.is_empty());
        assert!(table.latest(StreamHash::new(1)).unwrap().is_none());
    }
}
