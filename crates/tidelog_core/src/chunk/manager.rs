//! Chunk file discovery, addressing, and the switch-in protocol.
//!
//! The manager owns the `chunks/` directory. Files are named
//! `chunk-SSSSSS-EEEEEE.VVVVVV` where `SSSSSS..EEEEEE` is the covered
//! chunk-number range and `VVVVVV` a monotonically increasing version.
//! When a scavenge or merge rewrites a range, the replacement is built
//! in a temp file, synced, and renamed in under the next version; the
//! highest version for a range always wins at open and superseded files
//! are deleted. Leftover `.tmp` files from an interrupted rewrite are
//! discarded during the opening scan.

use crate::chunk::transform::TransformSet;
use crate::chunk::Chunk;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::types::ChunkNumber;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidelog_storage::FileBackend;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builds the file name for a chunk covering `start..=end` at `version`.
#[must_use]
pub fn chunk_file_name(start: ChunkNumber, end: ChunkNumber, version: u32) -> String {
    format!(
        "chunk-{:06}-{:06}.{:06}",
        start.as_i32(),
        end.as_i32(),
        version
    )
}

/// Parses a chunk file name into `(start, end, version)`.
#[must_use]
pub fn parse_chunk_file_name(name: &str) -> Option<(ChunkNumber, ChunkNumber, u32)> {
    let rest = name.strip_prefix("chunk-")?;
    let (range, version) = rest.split_once('.')?;
    let (start, end) = range.split_once('-')?;
    if start.len() != 6 || end.len() != 6 || version.len() != 6 {
        return None;
    }
    let start: i32 = start.parse().ok()?;
    let end: i32 = end.parse().ok()?;
    let version: u32 = version.parse().ok()?;
    if start < 0 || end < start {
        return None;
    }
    Some((ChunkNumber::new(start), ChunkNumber::new(end), version))
}

struct ChunkSlot {
    chunk: Arc<Chunk>,
    path: PathBuf,
    version: u32,
}

/// Manages the set of chunk files making up the log.
///
/// Slots are indexed by chunk number; a merged chunk occupies every slot
/// in its range. The last slot is the tail, the only chunk that may be
/// writable.
pub struct ChunkManager {
    dir: PathBuf,
    config: Config,
    transforms: Arc<TransformSet>,
    slots: RwLock<Vec<Arc<ChunkSlot>>>,
}

impl ChunkManager {
    /// Creates a manager over an empty directory with an initial
    /// writable chunk 0.
    pub fn create(
        dir: impl Into<PathBuf>,
        config: Config,
        transforms: Arc<TransformSet>,
        created_at: i64,
    ) -> CoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let path = dir.join(chunk_file_name(ChunkNumber::new(0), ChunkNumber::new(0), 0));
        let backend = FileBackend::open(&path)?;
        let chunk = Chunk::create(
            Box::new(backend),
            ChunkNumber::new(0),
            config.chunk_size,
            created_at,
        )?;
        info!(path = %path.display(), "created initial chunk");
        let slot = Arc::new(ChunkSlot {
            chunk: Arc::new(chunk),
            path,
            version: 0,
        });
        Ok(Self {
            dir,
            config,
            transforms,
            slots: RwLock::new(vec![slot]),
        })
    }

    /// Opens a manager over an existing directory.
    ///
    /// Scans chunk files, keeps the highest version per range, deletes
    /// superseded and temp files, and requires the surviving files to
    /// cover chunk numbers `0..=N` contiguously with every non-tail
    /// chunk completed.
    pub fn open(
        dir: impl Into<PathBuf>,
        config: Config,
        transforms: Arc<TransformSet>,
    ) -> CoreResult<Self> {
        let dir = dir.into();
        let mut candidates: Vec<(ChunkNumber, ChunkNumber, u32, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".tmp") {
                warn!(path = %path.display(), "removing leftover temp file");
                fs::remove_file(&path)?;
                continue;
            }
            match parse_chunk_file_name(name) {
                Some((start, end, version)) => {
                    candidates.push((start, end, version, path));
                }
                None => {
                    debug!(path = %path.display(), "ignoring unrecognized file");
                }
            }
        }
        if candidates.is_empty() {
            return Err(CoreError::invalid_format(format!(
                "no chunk files found in {}",
                dir.display()
            )));
        }

        let mut slots: Vec<Arc<ChunkSlot>> = Vec::new();
        let mut used: Vec<PathBuf> = Vec::new();
        let mut number = 0i32;
        loop {
            let best = candidates
                .iter()
                .filter(|(start, end, ..)| start.as_i32() <= number && number <= end.as_i32())
                .max_by_key(|(.., version, _)| *version);
            let Some((start, end, version, path)) = best else {
                break;
            };
            if start.as_i32() != number {
                return Err(CoreError::chunk_corruption(format!(
                    "chunk file {} does not start at chunk number {number}",
                    path.display()
                )));
            }
            let backend = FileBackend::open(path)?;
            let chunk = match Chunk::open(Box::new(backend), &transforms) {
                Ok(chunk) => chunk,
                Err(
                    err @ (CoreError::ChunkCorruption { .. } | CoreError::ChecksumMismatch { .. }),
                ) => {
                    // Set the damaged file aside so a re-open does not trip
                    // over it again; repair is an operator decision.
                    let quarantined = dir.join(format!(
                        "{}.quarantine",
                        path.file_name().and_then(|n| n.to_str()).unwrap_or("chunk")
                    ));
                    warn!(
                        path = %path.display(),
                        quarantined = %quarantined.display(),
                        "quarantining corrupt chunk file"
                    );
                    fs::rename(path, &quarantined)?;
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            if chunk.chunk_start_number() != *start || chunk.chunk_end_number() != *end {
                return Err(CoreError::chunk_corruption(format!(
                    "chunk file {} header disagrees with its name",
                    path.display()
                )));
            }
            let slot = Arc::new(ChunkSlot {
                chunk: Arc::new(chunk),
                path: path.clone(),
                version: *version,
            });
            for _ in start.as_i32()..=end.as_i32() {
                slots.push(Arc::clone(&slot));
            }
            used.push(path.clone());
            number = end.as_i32() + 1;
        }
        if slots.is_empty() {
            return Err(CoreError::chunk_corruption(
                "no chunk file covers chunk number 0",
            ));
        }

        // Files beyond where the walk stopped mean a chunk in the middle
        // is missing, not that the log ends here.
        if let Some((start, .., path)) = candidates
            .iter()
            .filter(|(start, ..)| start.as_i32() >= number)
            .min_by_key(|(start, ..)| start.as_i32())
        {
            return Err(CoreError::chunk_corruption(format!(
                "no chunk file covers chunk number {number} but {} starts at {}",
                path.display(),
                start.as_i32()
            )));
        }

        // Non-tail chunks must be sealed. A writable non-tail chunk means
        // the file set is inconsistent, not merely torn.
        let last = slots.len() - 1;
        for (n, slot) in slots.iter().enumerate() {
            if n < last && !slot.chunk.is_completed() {
                return Err(CoreError::chunk_corruption(format!(
                    "non-tail chunk {n} is not completed"
                )));
            }
        }

        for (.., path) in &candidates {
            if !used.contains(path) {
                warn!(path = %path.display(), "removing superseded chunk file");
                fs::remove_file(path)?;
            }
        }

        info!(chunks = slots.len(), dir = %dir.display(), "opened chunk set");
        Ok(Self {
            dir,
            config,
            transforms,
            slots: RwLock::new(slots),
        })
    }

    /// The chunks directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The transforms available for reading and writing chunks.
    #[must_use]
    pub fn transforms(&self) -> Arc<TransformSet> {
        Arc::clone(&self.transforms)
    }

    /// Number of chunk slots (one per chunk number).
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.slots.read().len()
    }

    /// The highest chunk number.
    #[must_use]
    pub fn last_chunk_number(&self) -> ChunkNumber {
        ChunkNumber::new(self.slots.read().len() as i32 - 1)
    }

    /// The writable tail chunk (the chunk in the last slot; it may be
    /// completed briefly during rotation).
    #[must_use]
    pub fn tail(&self) -> Arc<Chunk> {
        let slots = self.slots.read();
        Arc::clone(&slots[slots.len() - 1].chunk)
    }

    /// The chunk covering a chunk number.
    pub fn chunk_at(&self, number: ChunkNumber) -> CoreResult<Arc<Chunk>> {
        let slots = self.slots.read();
        let idx = number.as_i32();
        if idx < 0 || idx as usize >= slots.len() {
            return Err(CoreError::ChunkNotFound {
                position: i64::from(idx) * i64::from(self.config.chunk_size),
            });
        }
        Ok(Arc::clone(&slots[idx as usize].chunk))
    }

    /// The chunk covering a global log position.
    pub fn chunk_for(&self, position: i64) -> CoreResult<Arc<Chunk>> {
        if position < 0 {
            return Err(CoreError::ChunkNotFound { position });
        }
        let number = position / i64::from(self.config.chunk_size);
        let slots = self.slots.read();
        if number as usize >= slots.len() {
            return Err(CoreError::ChunkNotFound { position });
        }
        Ok(Arc::clone(&slots[number as usize].chunk))
    }

    /// Every distinct chunk in order.
    #[must_use]
    pub fn distinct_chunks(&self) -> Vec<Arc<Chunk>> {
        let slots = self.slots.read();
        let mut out: Vec<Arc<Chunk>> = Vec::new();
        for slot in slots.iter() {
            if out
                .last()
                .is_none_or(|prev| !Arc::ptr_eq(prev, &slot.chunk))
            {
                out.push(Arc::clone(&slot.chunk));
            }
        }
        out
    }

    /// Every distinct completed chunk in order.
    #[must_use]
    pub fn completed_chunks(&self) -> Vec<Arc<Chunk>> {
        self.distinct_chunks()
            .into_iter()
            .filter(|c| c.is_completed())
            .collect()
    }

    /// Completes the tail chunk and appends a fresh writable chunk after
    /// it.
    pub fn add_new_chunk(&self, created_at: i64) -> CoreResult<Arc<Chunk>> {
        let mut slots = self.slots.write();
        let tail = &slots[slots.len() - 1];
        tail.chunk.complete()?;

        let number = tail.chunk.chunk_end_number().next();
        let path = self.dir.join(chunk_file_name(number, number, 0));
        let backend = FileBackend::open(&path)?;
        let chunk = Arc::new(Chunk::create(
            Box::new(backend),
            number,
            self.config.chunk_size,
            created_at,
        )?);
        debug!(chunk = number.as_i32(), path = %path.display(), "added new chunk");
        slots.push(Arc::new(ChunkSlot {
            chunk: Arc::clone(&chunk),
            path,
            version: 0,
        }));
        Ok(chunk)
    }

    /// Path for a new scavenge/merge output temp file.
    #[must_use]
    pub fn temp_file_path(&self) -> PathBuf {
        self.dir.join(format!("scavenge-{}.tmp", Uuid::new_v4()))
    }

    /// Atomically replaces the chunks covering `start..=end` with the
    /// completed chunk built in `tmp_path`.
    ///
    /// The temp file must already be synced. It is renamed in under the
    /// next version for the range, the directory is synced so the rename
    /// survives a crash, the slots are swapped, and the superseded files
    /// are deleted. Readers holding the old `Arc<Chunk>` finish
    /// undisturbed.
    pub fn switch_in(
        &self,
        tmp_path: &Path,
        start: ChunkNumber,
        end: ChunkNumber,
    ) -> CoreResult<Arc<Chunk>> {
        let mut slots = self.slots.write();
        let lo = start.as_i32();
        let hi = end.as_i32();
        if lo < 0 || hi < lo || hi as usize >= slots.len() {
            return Err(CoreError::invalid_argument(format!(
                "switch-in range {lo}..={hi} outside chunk set"
            )));
        }
        if hi as usize == slots.len() - 1 {
            return Err(CoreError::invalid_operation(
                "cannot switch in over the tail chunk",
            ));
        }
        if slots[lo as usize].chunk.chunk_start_number() != start
            || slots[hi as usize].chunk.chunk_end_number() != end
        {
            return Err(CoreError::invalid_argument(
                "switch-in range splits an existing chunk",
            ));
        }

        let version = slots[lo as usize..=hi as usize]
            .iter()
            .map(|s| s.version)
            .max()
            .unwrap_or(0)
            + 1;
        let target = self.dir.join(chunk_file_name(start, end, version));
        fs::rename(tmp_path, &target)?;
        sync_dir(&self.dir)?;

        let backend = FileBackend::open(&target)?;
        let chunk = Arc::new(Chunk::open(Box::new(backend), &self.transforms)?);
        if !chunk.is_completed() {
            return Err(CoreError::invalid_operation(
                "switched-in chunk is not completed",
            ));
        }

        let mut displaced: Vec<PathBuf> = Vec::new();
        for slot in &slots[lo as usize..=hi as usize] {
            if !displaced.contains(&slot.path) {
                displaced.push(slot.path.clone());
            }
        }
        let slot = Arc::new(ChunkSlot {
            chunk: Arc::clone(&chunk),
            path: target.clone(),
            version,
        });
        for idx in lo..=hi {
            slots[idx as usize] = Arc::clone(&slot);
        }
        drop(slots);

        for path in displaced {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), %err, "failed to remove superseded chunk file");
            }
        }
        info!(
            start = lo,
            end = hi,
            version,
            path = %target.display(),
            "switched in rewritten chunk"
        );
        Ok(chunk)
    }

    /// Caches a completed chunk's data region and evicts the
    /// lowest-numbered cached chunks beyond the configured budget.
    pub fn cache_within_budget(&self, chunk: &Arc<Chunk>) -> CoreResult<()> {
        if !chunk.is_completed() {
            return Ok(());
        }
        chunk.cache()?;
        let cached: Vec<Arc<Chunk>> = self
            .distinct_chunks()
            .into_iter()
            .filter(|c| c.is_cached() && c.is_completed())
            .collect();
        if cached.len() > self.config.cached_chunk_limit {
            let excess = cached.len() - self.config.cached_chunk_limit;
            for victim in cached.iter().take(excess) {
                if !Arc::ptr_eq(victim, chunk) {
                    victim.evict_cache();
                }
            }
        }
        Ok(())
    }

    /// Flushes the tail chunk.
    pub fn flush(&self) -> CoreResult<()> {
        self.tail().flush()
    }
}

impl std::fmt::Debug for ChunkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkManager")
            .field("dir", &self.dir)
            .field("chunk_count", &self.chunk_count())
            .finish_non_exhaustive()
    }
}

/// Syncs directory metadata so a completed rename survives a crash.
fn sync_dir(dir: &Path) -> CoreResult<()> {
    let handle = fs::File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::transform::IdentityTransform;
    use crate::chunk::{stamp_and_append, RecordReadResult};
    use crate::record::prepare::PrepareRecord;
    use crate::record::LogRecord;
    use crate::types::{ExpectedVersion, LogPosition};
    use tempfile::TempDir;

    const CHUNK_SIZE: u32 = 4096;

    fn test_config() -> Config {
        Config::new().chunk_size(CHUNK_SIZE).cached_chunk_limit(2)
    }

    fn new_manager(dir: &TempDir) -> ChunkManager {
        ChunkManager::create(
            dir.path(),
            test_config(),
            Arc::new(TransformSet::identity()),
            1_700_000_000_000,
        )
        .unwrap()
    }

    fn prepare(stream: &str, data: &[u8]) -> LogRecord {
        LogRecord::Prepare(PrepareRecord::single_write(
            LogPosition::new(0),
            stream,
            ExpectedVersion::Any,
            "test-event",
            data.to_vec(),
            Vec::new(),
            1_700_000_000_000,
        ))
    }

    #[test]
    fn file_name_roundtrip() {
        let name = chunk_file_name(ChunkNumber::new(2), ChunkNumber::new(5), 3);
        assert_eq!(name, "chunk-000002-000005.000003");
        let (start, end, version) = parse_chunk_file_name(&name).unwrap();
        assert_eq!(start, ChunkNumber::new(2));
        assert_eq!(end, ChunkNumber::new(5));
        assert_eq!(version, 3);

        assert!(parse_chunk_file_name("chunk-000005-000002.000000").is_none());
        assert!(parse_chunk_file_name("chunk-2-5.3").is_none());
        assert!(parse_chunk_file_name("notachunk").is_none());
    }

    #[test]
    fn create_then_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let manager = new_manager(&dir);
            let tail = manager.tail();
            let mut record = prepare("stream-a", b"data");
            stamp_and_append(&tail, &mut record).unwrap().unwrap();
            tail.flush().unwrap();
        }

        let manager = ChunkManager::open(
            dir.path(),
            test_config(),
            Arc::new(TransformSet::identity()),
        )
        .unwrap();
        assert_eq!(manager.chunk_count(), 1);
        assert!(!manager.tail().is_completed());
    }

    #[test]
    fn rotation_adds_chunks() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);

        manager.add_new_chunk(1_700_000_000_001).unwrap();
        manager.add_new_chunk(1_700_000_000_002).unwrap();
        assert_eq!(manager.chunk_count(), 3);
        assert_eq!(manager.last_chunk_number(), ChunkNumber::new(2));
        assert!(manager
            .chunk_at(ChunkNumber::new(0))
            .unwrap()
            .is_completed());
        assert!(manager
            .chunk_at(ChunkNumber::new(1))
            .unwrap()
            .is_completed());
        assert!(!manager.tail().is_completed());
    }

    #[test]
    fn chunk_for_addresses_by_position() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        manager.add_new_chunk(1_700_000_000_001).unwrap();

        let first = manager.chunk_for(0).unwrap();
        assert_eq!(first.chunk_start_number(), ChunkNumber::new(0));
        let second = manager.chunk_for(i64::from(CHUNK_SIZE)).unwrap();
        assert_eq!(second.chunk_start_number(), ChunkNumber::new(1));
        assert!(matches!(
            manager.chunk_for(i64::from(CHUNK_SIZE) * 2),
            Err(CoreError::ChunkNotFound { .. })
        ));
        assert!(manager.chunk_for(-1).is_err());
    }

    #[test]
    fn reopen_requires_contiguous_chunks() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        manager.add_new_chunk(1_700_000_000_001).unwrap();
        manager.add_new_chunk(1_700_000_000_002).unwrap();
        drop(manager);

        fs::remove_file(dir.path().join(chunk_file_name(
            ChunkNumber::new(1),
            ChunkNumber::new(1),
            0,
        )))
        .unwrap();
        let result = ChunkManager::open(
            dir.path(),
            test_config(),
            Arc::new(TransformSet::identity()),
        );
        assert!(matches!(result, Err(CoreError::ChunkCorruption { .. })));

        // The chunks past the gap must survive the failed open.
        assert!(dir
            .path()
            .join(chunk_file_name(ChunkNumber::new(2), ChunkNumber::new(2), 0))
            .exists());
    }

    #[test]
    fn leftover_temp_files_removed_at_open() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        let tmp = manager.temp_file_path();
        fs::write(&tmp, b"partial scavenge output").unwrap();
        drop(manager);

        let manager = ChunkManager::open(
            dir.path(),
            test_config(),
            Arc::new(TransformSet::identity()),
        )
        .unwrap();
        assert!(!tmp.exists());
        assert_eq!(manager.chunk_count(), 1);
    }

    #[test]
    fn corrupt_completed_chunk_is_quarantined_at_open() {
        use crate::chunk::header::CHUNK_HEADER_SIZE;
        use std::io::{Seek, SeekFrom, Write};

        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        let tail = manager.tail();
        let mut record = prepare("stream-a", b"soon to rot");
        stamp_and_append(&tail, &mut record).unwrap().unwrap();
        manager.add_new_chunk(1_700_000_000_001).unwrap();
        drop(manager);

        let name = chunk_file_name(ChunkNumber::new(0), ChunkNumber::new(0), 0);
        let path = dir.path().join(&name);
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        file.seek(SeekFrom::Start(CHUNK_HEADER_SIZE as u64 + 10))
            .unwrap();
        file.write_all(&[0xEE]).unwrap();
        drop(file);

        let result = ChunkManager::open(
            dir.path(),
            test_config(),
            Arc::new(TransformSet::identity()),
        );
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { .. })));
        assert!(!path.exists());
        assert!(dir.path().join(format!("{name}.quarantine")).exists());
    }

    #[test]
    fn switch_in_replaces_range_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);

        // Fill chunk 0 with records, then rotate so it becomes non-tail.
        let tail = manager.tail();
        let mut records = Vec::new();
        for n in 0..3 {
            let mut record = prepare("stream-a", format!("payload-{n}").as_bytes());
            stamp_and_append(&tail, &mut record).unwrap().unwrap();
            records.push(record);
        }
        manager.add_new_chunk(1_700_000_000_001).unwrap();

        // Rewrite chunk 0 keeping only the last record.
        let source = manager.chunk_at(ChunkNumber::new(0)).unwrap();
        let tmp = manager.temp_file_path();
        let kept = vec![records[2].clone()];
        Chunk::write_completed(
            Box::new(FileBackend::open(&tmp).unwrap()),
            source.header().clone(),
            &kept,
            Arc::new(IdentityTransform),
            source.logical_data_size(),
        )
        .unwrap();

        let swapped = manager
            .switch_in(&tmp, ChunkNumber::new(0), ChunkNumber::new(0))
            .unwrap();
        assert!(swapped.is_scavenged());

        let p0 = records[0].log_position().as_i64();
        let p2 = records[2].log_position().as_i64();
        let current = manager.chunk_for(p0).unwrap();
        assert!(matches!(
            current.try_read_at(p0, true).unwrap(),
            RecordReadResult::Scavenged
        ));
        match current.try_read_at(p2, true).unwrap() {
            RecordReadResult::Success { record, .. } => assert_eq!(record, records[2]),
            other => panic!("unexpected read result: {other:?}"),
        }

        // The old version-0 file is gone; reopening picks the new version.
        assert!(!dir
            .path()
            .join(chunk_file_name(ChunkNumber::new(0), ChunkNumber::new(0), 0))
            .exists());
        drop(manager);
        let reopened = ChunkManager::open(
            dir.path(),
            test_config(),
            Arc::new(TransformSet::identity()),
        )
        .unwrap();
        assert!(reopened
            .chunk_at(ChunkNumber::new(0))
            .unwrap()
            .is_scavenged());
    }

    #[test]
    fn switch_in_rejects_tail() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        let tmp = manager.temp_file_path();
        fs::write(&tmp, b"anything").unwrap();
        assert!(manager
            .switch_in(&tmp, ChunkNumber::new(0), ChunkNumber::new(0))
            .is_err());
    }

    #[test]
    fn cache_budget_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        for n in 1..4 {
            manager.add_new_chunk(1_700_000_000_000 + n).unwrap();
        }

        let chunks = manager.completed_chunks();
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            manager.cache_within_budget(chunk).unwrap();
        }
        // Budget is 2: the oldest completed chunk was evicted.
        assert!(!chunks[0].is_cached());
        assert!(chunks[1].is_cached());
        assert!(chunks[2].is_cached());
    }
}
