//! Chunk files: fixed-capacity containers for framed log records.
//!
//! The log is split into chunks of `chunk_size` logical bytes each. The
//! tail chunk is writable; every chunk before it is completed and
//! read-only. A completed chunk carries a footer with a checksum, and a
//! scavenged chunk additionally carries a position map translating the
//! logical offsets records were written at into the physical offsets
//! they survive at.
//!
//! Lock order within a chunk is state before backend; helpers that take
//! both acquire them in that order.

pub mod header;
pub mod manager;
pub mod transform;

use crate::error::{CoreError, CoreResult};
use crate::record::{compute_crc32, LogRecord, FRAME_OVERHEAD, MAX_RECORD_SIZE};
use crate::types::{ChunkNumber, LogPosition};
use header::{ChunkFooter, ChunkHeader, PosMap, CHUNK_FOOTER_SIZE, CHUNK_HEADER_SIZE};
use parking_lot::RwLock;
use std::sync::Arc;
use tidelog_storage::StorageBackend;
use transform::{ChunkTransform, IdentityTransform, TransformSet};
use uuid::Uuid;

/// Outcome of appending a record to a writable chunk.
#[derive(Debug)]
pub enum AppendOutcome {
    /// The record was written at `position`.
    Appended {
        /// Global log position of the record.
        position: i64,
        /// Physical data size of the chunk after the append.
        new_size: u32,
    },
    /// The record does not fit; the chunk must be completed and a new
    /// one started.
    Full,
}

/// Outcome of a positioned record read.
#[derive(Debug)]
pub enum RecordReadResult {
    /// A record exists at the requested position.
    Success {
        /// The decoded record.
        record: LogRecord,
        /// Bytes the record occupies on disk, including framing.
        length: usize,
        /// Global position immediately after the record.
        next_position: i64,
    },
    /// The position was valid once but its record was scavenged away.
    Scavenged,
    /// The position lies outside the chunk's written data.
    OutOfRange,
}

/// Outcome of a closest-match sequential read.
#[derive(Debug)]
pub enum SeqReadResult {
    /// A record was found.
    Success {
        /// The decoded record.
        record: LogRecord,
        /// Bytes the record occupies on disk, including framing.
        length: usize,
        /// Local logical offset where the record starts.
        local_position: i64,
        /// Local logical offset to continue the scan from.
        next_position: i64,
    },
    /// No further record in the scan direction.
    Eof,
}

enum ChunkState {
    Writable { physical_size: u32 },
    Completed {
        footer: ChunkFooter,
        posmap: Option<PosMap>,
    },
}

/// A single chunk file.
pub struct Chunk {
    header: ChunkHeader,
    backend: RwLock<Box<dyn StorageBackend>>,
    state: RwLock<ChunkState>,
    /// Untransformed data region, populated on demand for completed chunks.
    cache: RwLock<Option<Arc<Vec<u8>>>>,
    transform: Arc<dyn ChunkTransform>,
}

impl Chunk {
    /// Creates a fresh writable chunk on an empty backend.
    pub fn create(
        mut backend: Box<dyn StorageBackend>,
        chunk_number: ChunkNumber,
        chunk_size: u32,
        created_at: i64,
    ) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::invalid_operation(
                "cannot create a chunk on a non-empty backend",
            ));
        }
        let header = ChunkHeader::new(
            chunk_number,
            chunk_size,
            transform::TransformId::Identity,
            created_at,
        );
        backend.append(&header.encode())?;
        backend.flush()?;
        Ok(Self {
            header,
            backend: RwLock::new(backend),
            state: RwLock::new(ChunkState::Writable { physical_size: 0 }),
            cache: RwLock::new(None),
            transform: Arc::new(IdentityTransform),
        })
    }

    /// Writes a completed chunk in one pass: header, transformed data
    /// region, position map, footer. Used for scavenge and merge output.
    ///
    /// Records must be in position order and covered by `header`.
    pub fn write_completed(
        mut backend: Box<dyn StorageBackend>,
        mut header: ChunkHeader,
        records: &[LogRecord],
        transform: Arc<dyn ChunkTransform>,
        logical_data_size: i64,
    ) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::invalid_operation(
                "cannot write a completed chunk on a non-empty backend",
            ));
        }
        header.transform = transform.id();

        let start = header.start_position();
        let mut plain = Vec::new();
        let mut posmap = PosMap::new();
        for record in records {
            let position = record.log_position().as_i64();
            if !header.covers(position) {
                return Err(CoreError::invalid_argument(format!(
                    "record at {position} outside chunk range"
                )));
            }
            posmap.push(position - start, plain.len() as u32);
            record.write_to(&mut plain)?;
        }

        let stored = transform.apply(header.chunk_id, &plain)?;
        let map_bytes = posmap.encode();
        let mut checksum_input = stored.clone();
        checksum_input.extend_from_slice(&map_bytes);
        let footer = ChunkFooter {
            physical_data_size: stored.len() as u32,
            logical_data_size,
            map_size: map_bytes.len() as u32,
            checksum: compute_crc32(&checksum_input),
            completed: true,
        };

        backend.append(&header.encode())?;
        backend.append(&stored)?;
        backend.append(&map_bytes)?;
        backend.append(&footer.encode())?;
        backend.sync()?;

        Ok(Self {
            header,
            backend: RwLock::new(backend),
            state: RwLock::new(ChunkState::Completed {
                footer,
                posmap: Some(posmap),
            }),
            cache: RwLock::new(Some(Arc::new(plain))),
            transform,
        })
    }

    /// Opens an existing chunk file.
    ///
    /// A file with a valid footer opens completed and has its checksum
    /// verified; anything else opens writable, leaving torn-tail repair
    /// to the writer's recovery pass.
    pub fn open(backend: Box<dyn StorageBackend>, transforms: &TransformSet) -> CoreResult<Self> {
        let file_size = backend.size()?;
        if file_size < CHUNK_HEADER_SIZE as u64 {
            return Err(CoreError::chunk_corruption("chunk file smaller than header"));
        }
        let header = ChunkHeader::decode(&backend.read_at(0, CHUNK_HEADER_SIZE)?)?;
        let transform = transforms.get(header.transform)?;

        let footer = if file_size >= (CHUNK_HEADER_SIZE + CHUNK_FOOTER_SIZE) as u64 {
            let bytes =
                backend.read_at(file_size - CHUNK_FOOTER_SIZE as u64, CHUNK_FOOTER_SIZE)?;
            ChunkFooter::decode(&bytes).ok().filter(|f| f.completed)
        } else {
            None
        };

        let state = match footer {
            Some(footer) => {
                let expected = CHUNK_HEADER_SIZE as u64
                    + u64::from(footer.physical_data_size)
                    + u64::from(footer.map_size)
                    + CHUNK_FOOTER_SIZE as u64;
                if expected != file_size {
                    return Err(CoreError::chunk_corruption(format!(
                        "chunk file size {file_size} does not match footer extents {expected}"
                    )));
                }
                let stored = backend
                    .read_at(CHUNK_HEADER_SIZE as u64, footer.physical_data_size as usize)?;
                let map_bytes = backend.read_at(
                    CHUNK_HEADER_SIZE as u64 + u64::from(footer.physical_data_size),
                    footer.map_size as usize,
                )?;
                let mut checksum_input = stored;
                checksum_input.extend_from_slice(&map_bytes);
                let actual = compute_crc32(&checksum_input);
                if actual != footer.checksum {
                    return Err(CoreError::ChecksumMismatch {
                        expected: footer.checksum,
                        actual,
                    });
                }
                let posmap = if footer.has_map() {
                    Some(PosMap::decode(&map_bytes)?)
                } else {
                    None
                };
                ChunkState::Completed { footer, posmap }
            }
            None => {
                if header.transform != transform::TransformId::Identity {
                    return Err(CoreError::chunk_corruption(
                        "writable chunk with a non-identity transform",
                    ));
                }
                ChunkState::Writable {
                    physical_size: (file_size - CHUNK_HEADER_SIZE as u64) as u32,
                }
            }
        };

        Ok(Self {
            header,
            backend: RwLock::new(backend),
            state: RwLock::new(state),
            cache: RwLock::new(None),
            transform,
        })
    }

    /// The immutable chunk header.
    #[must_use]
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Unique id of this chunk file.
    #[must_use]
    pub fn chunk_id(&self) -> Uuid {
        self.header.chunk_id
    }

    /// First chunk number covered.
    #[must_use]
    pub fn chunk_start_number(&self) -> ChunkNumber {
        self.header.chunk_start_number
    }

    /// Last chunk number covered.
    #[must_use]
    pub fn chunk_end_number(&self) -> ChunkNumber {
        self.header.chunk_end_number
    }

    /// Global log position where this chunk's logical space begins.
    #[must_use]
    pub fn start_position(&self) -> i64 {
        self.header.start_position()
    }

    /// Global log position just past this chunk's logical space.
    #[must_use]
    pub fn end_position(&self) -> i64 {
        self.header.end_position()
    }

    /// Returns true once the chunk has been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(&*self.state.read(), ChunkState::Completed { .. })
    }

    /// Returns true if the chunk carries a position map.
    #[must_use]
    pub fn is_scavenged(&self) -> bool {
        matches!(
            &*self.state.read(),
            ChunkState::Completed { posmap: Some(_), .. }
        )
    }

    /// The footer, if the chunk is completed.
    #[must_use]
    pub fn footer(&self) -> Option<ChunkFooter> {
        match &*self.state.read() {
            ChunkState::Completed { footer, .. } => Some(*footer),
            ChunkState::Writable { .. } => None,
        }
    }

    /// Bytes of record data currently in the chunk. For a transformed
    /// chunk this is the stored size, not the plaintext size.
    #[must_use]
    pub fn physical_data_size(&self) -> u32 {
        match &*self.state.read() {
            ChunkState::Writable { physical_size } => *physical_size,
            ChunkState::Completed { footer, .. } => footer.physical_data_size,
        }
    }

    /// Logical extent of the data the chunk represents.
    #[must_use]
    pub fn logical_data_size(&self) -> i64 {
        match &*self.state.read() {
            ChunkState::Writable { physical_size } => i64::from(*physical_size),
            ChunkState::Completed { footer, .. } => footer.logical_data_size,
        }
    }

    /// Global position the next append would be written at.
    pub fn next_append_position(&self) -> CoreResult<i64> {
        match &*self.state.read() {
            ChunkState::Writable { physical_size } => {
                Ok(self.start_position() + i64::from(*physical_size))
            }
            ChunkState::Completed { .. } => Err(CoreError::invalid_operation(
                "cannot append to a completed chunk",
            )),
        }
    }

    /// Appends a record. The record's stamped position must equal the
    /// chunk's next append position.
    pub fn append(&self, record: &LogRecord) -> CoreResult<AppendOutcome> {
        let mut state = self.state.write();
        let physical_size = match &mut *state {
            ChunkState::Writable { physical_size } => physical_size,
            ChunkState::Completed { .. } => {
                return Err(CoreError::invalid_operation(
                    "cannot append to a completed chunk",
                ))
            }
        };

        let frame = record.size_on_disk();
        if frame > self.header.chunk_size as usize {
            return Err(CoreError::invalid_argument(format!(
                "record of {frame} bytes can never fit a chunk of {} bytes",
                self.header.chunk_size
            )));
        }
        if *physical_size as usize + frame > self.header.chunk_size as usize {
            return Ok(AppendOutcome::Full);
        }

        let expected = self.start_position() + i64::from(*physical_size);
        let stamped = record.log_position().as_i64();
        if stamped != expected {
            return Err(CoreError::invalid_operation(format!(
                "record stamped at {stamped} but chunk expects {expected}"
            )));
        }

        let bytes = record.to_bytes()?;
        self.backend.write().append(&bytes)?;
        *physical_size += frame as u32;
        Ok(AppendOutcome::Appended {
            position: expected,
            new_size: *physical_size,
        })
    }

    /// Flushes appended records to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.write().flush()?;
        Ok(())
    }

    /// Syncs data and metadata to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.write().sync()?;
        Ok(())
    }

    /// Truncates the writable data region, discarding a torn tail.
    pub fn truncate_data(&self, new_physical_size: u32) -> CoreResult<()> {
        let mut state = self.state.write();
        match &mut *state {
            ChunkState::Writable { physical_size } => {
                if new_physical_size > *physical_size {
                    return Err(CoreError::invalid_argument(
                        "cannot truncate a chunk forward",
                    ));
                }
                self.backend
                    .write()
                    .truncate(CHUNK_HEADER_SIZE as u64 + u64::from(new_physical_size))?;
                *physical_size = new_physical_size;
                Ok(())
            }
            ChunkState::Completed { .. } => Err(CoreError::invalid_operation(
                "cannot truncate a completed chunk",
            )),
        }
    }

    /// Seals the chunk: appends a footer with a checksum over the data
    /// region and syncs. Completing an already-completed chunk is a no-op
    /// returning the existing footer.
    pub fn complete(&self) -> CoreResult<ChunkFooter> {
        let mut state = self.state.write();
        let physical_size = match &*state {
            ChunkState::Writable { physical_size } => *physical_size,
            ChunkState::Completed { footer, .. } => return Ok(*footer),
        };

        let mut backend = self.backend.write();
        backend.flush()?;
        let data = backend.read_at(CHUNK_HEADER_SIZE as u64, physical_size as usize)?;
        let footer = ChunkFooter {
            physical_data_size: physical_size,
            logical_data_size: i64::from(physical_size),
            map_size: 0,
            checksum: compute_crc32(&data),
            completed: true,
        };
        backend.append(&footer.encode())?;
        backend.sync()?;
        drop(backend);

        *state = ChunkState::Completed {
            footer,
            posmap: None,
        };
        Ok(footer)
    }

    /// Loads (and untransforms) the data region into the read cache.
    pub fn cache(&self) -> CoreResult<Arc<Vec<u8>>> {
        if let Some(cached) = self.cache.read().as_ref() {
            return Ok(Arc::clone(cached));
        }
        let footer = self.footer().ok_or_else(|| {
            CoreError::invalid_operation("cannot cache a writable chunk")
        })?;
        let stored = self
            .backend
            .read()
            .read_at(CHUNK_HEADER_SIZE as u64, footer.physical_data_size as usize)?;
        let plain = Arc::new(self.transform.invert(self.header.chunk_id, &stored)?);
        let mut cache = self.cache.write();
        if cache.is_none() {
            *cache = Some(Arc::clone(&plain));
        }
        Ok(plain)
    }

    /// Returns true if the data region is cached in memory.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cache.read().is_some()
    }

    /// Drops the in-memory copy of the data region.
    pub fn evict_cache(&self) {
        *self.cache.write() = None;
    }

    /// Reads a record by its global log position.
    ///
    /// `could_be_scavenged` selects how a position-map miss is reported:
    /// as [`RecordReadResult::Scavenged`] when the caller knows the record
    /// may legitimately have been removed, or as corruption otherwise.
    pub fn try_read_at(
        &self,
        position: i64,
        could_be_scavenged: bool,
    ) -> CoreResult<RecordReadResult> {
        if !self.header.covers(position) {
            return Ok(RecordReadResult::OutOfRange);
        }
        let local = position - self.start_position();

        let physical = {
            let state = self.state.read();
            match &*state {
                ChunkState::Completed {
                    posmap: Some(map), ..
                } => match map.find(local) {
                    Some(entry) => i64::from(entry.physical_offset),
                    None => {
                        if could_be_scavenged {
                            return Ok(RecordReadResult::Scavenged);
                        }
                        return Err(CoreError::chunk_corruption(format!(
                            "no record at position {position} in scavenged chunk"
                        )));
                    }
                },
                _ => local,
            }
        };

        let data_len = self.readable_data_len()?;
        if physical >= data_len {
            return Ok(RecordReadResult::OutOfRange);
        }
        let (record, length) = self.read_record_at(physical as u64, data_len)?;
        if record.log_position().as_i64() != position {
            return Err(CoreError::chunk_corruption(format!(
                "record at position {position} is stamped {}",
                record.log_position().as_i64()
            )));
        }
        Ok(RecordReadResult::Success {
            record,
            length,
            next_position: position + length as i64,
        })
    }

    /// Reads the first record at or after the local logical offset.
    pub fn try_read_closest_forward(&self, local_position: i64) -> CoreResult<SeqReadResult> {
        let (logical, physical) = {
            let state = self.state.read();
            match &*state {
                ChunkState::Completed {
                    posmap: Some(map), ..
                } => match map.first_at_or_after(local_position) {
                    Some(entry) => (entry.logical_offset, i64::from(entry.physical_offset)),
                    None => return Ok(SeqReadResult::Eof),
                },
                _ => (local_position, local_position),
            }
        };

        let data_len = self.readable_data_len()?;
        if physical >= data_len {
            return Ok(SeqReadResult::Eof);
        }
        let (record, length) = self.read_record_at(physical as u64, data_len)?;
        Ok(SeqReadResult::Success {
            record,
            length,
            local_position: logical,
            next_position: logical + length as i64,
        })
    }

    /// Reads the last record that ends at or before the local logical
    /// offset.
    pub fn try_read_closest_backward(&self, local_position: i64) -> CoreResult<SeqReadResult> {
        if local_position <= 0 {
            return Ok(SeqReadResult::Eof);
        }

        let mapped = {
            let state = self.state.read();
            match &*state {
                ChunkState::Completed {
                    posmap: Some(map), ..
                } => match map.last_before(local_position) {
                    Some(entry) => Some((entry.logical_offset, i64::from(entry.physical_offset))),
                    None => return Ok(SeqReadResult::Eof),
                },
                _ => None,
            }
        };

        let data_len = self.readable_data_len()?;
        match mapped {
            Some((logical, physical)) => {
                let (record, length) = self.read_record_at(physical as u64, data_len)?;
                Ok(SeqReadResult::Success {
                    record,
                    length,
                    local_position: logical,
                    next_position: logical,
                })
            }
            None => {
                // Unscavenged: the suffix length marker locates the
                // record ending exactly at local_position.
                let end = local_position.min(data_len);
                if end < FRAME_OVERHEAD as i64 {
                    return Ok(SeqReadResult::Eof);
                }
                let suffix = self.read_data((end - 4) as u64, 4)?;
                let len =
                    u32::from_le_bytes([suffix[0], suffix[1], suffix[2], suffix[3]]) as i64;
                let start = end - FRAME_OVERHEAD as i64 - len;
                if len < 2 || len > MAX_RECORD_SIZE as i64 || start < 0 {
                    return Err(CoreError::chunk_corruption(format!(
                        "invalid suffix length {len} at offset {end}"
                    )));
                }
                let (record, length) = self.read_record_at(start as u64, data_len)?;
                Ok(SeqReadResult::Success {
                    record,
                    length,
                    local_position: start,
                    next_position: start,
                })
            }
        }
    }

    /// Length of the readable (untransformed) data region.
    fn readable_data_len(&self) -> CoreResult<i64> {
        if self.transform.id() == transform::TransformId::Identity {
            Ok(match &*self.state.read() {
                ChunkState::Writable { physical_size } => i64::from(*physical_size),
                ChunkState::Completed { footer, .. } => i64::from(footer.physical_data_size),
            })
        } else {
            Ok(self.cache()?.len() as i64)
        }
    }

    /// Reads raw bytes from the untransformed data region.
    fn read_data(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        if let Some(cached) = self.cache.read().as_ref() {
            let start = offset as usize;
            let end = start + len;
            if end > cached.len() {
                return Err(CoreError::chunk_corruption(
                    "read past end of cached chunk data",
                ));
            }
            return Ok(cached[start..end].to_vec());
        }
        if self.transform.id() != transform::TransformId::Identity {
            let cached = self.cache()?;
            let start = offset as usize;
            let end = start + len;
            if end > cached.len() {
                return Err(CoreError::chunk_corruption(
                    "read past end of cached chunk data",
                ));
            }
            return Ok(cached[start..end].to_vec());
        }
        let bytes = self
            .backend
            .read()
            .read_at(CHUNK_HEADER_SIZE as u64 + offset, len)?;
        Ok(bytes)
    }

    /// Reads and validates one framed record starting at a physical
    /// offset in the data region.
    fn read_record_at(&self, offset: u64, data_len: i64) -> CoreResult<(LogRecord, usize)> {
        if offset as i64 + FRAME_OVERHEAD as i64 > data_len {
            return Err(CoreError::chunk_corruption(format!(
                "record frame at offset {offset} exceeds data region"
            )));
        }
        let prefix = self.read_data(offset, 4)?;
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len < 2 || len > MAX_RECORD_SIZE {
            return Err(CoreError::chunk_corruption(format!(
                "invalid record length {len} at offset {offset}"
            )));
        }
        let frame = FRAME_OVERHEAD + len;
        if offset as i64 + frame as i64 > data_len {
            return Err(CoreError::chunk_corruption(format!(
                "record of {frame} bytes at offset {offset} exceeds data region"
            )));
        }
        let bytes = self.read_data(offset, frame)?;
        LogRecord::read_from(&bytes)
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("chunk_start_number", &self.header.chunk_start_number)
            .field("chunk_end_number", &self.header.chunk_end_number)
            .field("chunk_id", &self.header.chunk_id)
            .field("completed", &self.is_completed())
            .field("scavenged", &self.is_scavenged())
            .finish_non_exhaustive()
    }
}

/// Stamps a record at the chunk's next append position and appends it.
///
/// Convenience for writers and tests; returns `Ok(None)` when the chunk
/// is full.
pub fn stamp_and_append(chunk: &Chunk, record: &mut LogRecord) -> CoreResult<Option<i64>> {
    let position = chunk.next_append_position()?;
    record.set_log_position(LogPosition::new(position));
    match chunk.append(record)? {
        AppendOutcome::Appended { position, .. } => Ok(Some(position)),
        AppendOutcome::Full => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::prepare::{PrepareFlags, PrepareRecord};
    use crate::types::ExpectedVersion;
    use tidelog_storage::InMemoryBackend;

    const CHUNK_SIZE: u32 = 4096;

    fn new_chunk(number: i32) -> Chunk {
        Chunk::create(
            Box::new(InMemoryBackend::new()),
            ChunkNumber::new(number),
            CHUNK_SIZE,
            1_700_000_000_000,
        )
        .unwrap()
    }

    fn prepare(stream: &str, expected: i64, data: &[u8]) -> LogRecord {
        LogRecord::Prepare(PrepareRecord::single_write(
            LogPosition::new(0),
            stream,
            ExpectedVersion::from_i64(expected - 1),
            "test-event",
            data.to_vec(),
            Vec::new(),
            1_700_000_000_000,
        ))
    }

    #[test]
    fn append_and_read_back() {
        let chunk = new_chunk(0);
        let mut record = prepare("stream-a", 0, b"payload");
        let pos = stamp_and_append(&chunk, &mut record).unwrap().unwrap();
        assert_eq!(pos, 0);

        match chunk.try_read_at(pos, false).unwrap() {
            RecordReadResult::Success {
                record: read,
                length,
                next_position,
            } => {
                assert_eq!(read, record);
                assert_eq!(length, record.size_on_disk());
                assert_eq!(next_position, pos + length as i64);
            }
            other => panic!("unexpected read result: {other:?}"),
        }
    }

    #[test]
    fn appends_are_contiguous() {
        let chunk = new_chunk(0);
        let mut first = prepare("stream-a", 0, b"one");
        let mut second = prepare("stream-a", 1, b"two");
        let p1 = stamp_and_append(&chunk, &mut first).unwrap().unwrap();
        let p2 = stamp_and_append(&chunk, &mut second).unwrap().unwrap();
        assert_eq!(p2, p1 + first.size_on_disk() as i64);
    }

    #[test]
    fn misstamped_record_rejected() {
        let chunk = new_chunk(0);
        let record = prepare("stream-a", 0, b"data"); // stamped at 0 is fine
        chunk.append(&record).unwrap();
        // Same stamp again no longer matches the append position.
        assert!(chunk.append(&record).is_err());
    }

    #[test]
    fn chunk_reports_full() {
        let chunk = new_chunk(0);
        loop {
            let mut record = prepare("stream-a", 0, &[0u8; 512]);
            let pos = chunk.next_append_position().unwrap();
            record.set_log_position(LogPosition::new(pos));
            match chunk.append(&record).unwrap() {
                AppendOutcome::Appended { .. } => {}
                AppendOutcome::Full => break,
            }
        }
        assert!((chunk.physical_data_size() as usize) <= CHUNK_SIZE as usize);
        // Still writable: a small record may fit after a large one is refused.
        assert!(!chunk.is_completed());
    }

    #[test]
    fn oversized_record_rejected_outright() {
        let chunk = new_chunk(0);
        let mut record = prepare("stream-a", 0, &vec![0u8; CHUNK_SIZE as usize]);
        let pos = chunk.next_append_position().unwrap();
        record.set_log_position(LogPosition::new(pos));
        assert!(chunk.append(&record).is_err());
    }

    #[test]
    fn complete_is_idempotent() {
        let chunk = new_chunk(0);
        let mut record = prepare("stream-a", 0, b"data");
        stamp_and_append(&chunk, &mut record).unwrap().unwrap();

        let first = chunk.complete().unwrap();
        let second = chunk.complete().unwrap();
        assert_eq!(first, second);
        assert!(chunk.is_completed());
        assert!(chunk.append(&record).is_err());
    }

    #[test]
    fn completed_chunk_still_readable() {
        let chunk = new_chunk(0);
        let mut record = prepare("stream-a", 0, b"data");
        let pos = stamp_and_append(&chunk, &mut record).unwrap().unwrap();
        chunk.complete().unwrap();

        match chunk.try_read_at(pos, false).unwrap() {
            RecordReadResult::Success { record: read, .. } => assert_eq!(read, record),
            other => panic!("unexpected read result: {other:?}"),
        }
    }

    #[test]
    fn reopen_completed_chunk() {
        let backend = InMemoryBackend::new();
        let data_handle = backend.clone();
        let chunk = Chunk::create(
            Box::new(backend),
            ChunkNumber::new(0),
            CHUNK_SIZE,
            1_700_000_000_000,
        )
        .unwrap();
        let mut record = prepare("stream-a", 0, b"data");
        let pos = stamp_and_append(&chunk, &mut record).unwrap().unwrap();
        chunk.complete().unwrap();

        let reopened = Chunk::open(
            Box::new(InMemoryBackend::with_data(data_handle.data())),
            &TransformSet::identity(),
        )
        .unwrap();
        assert!(reopened.is_completed());
        assert!(!reopened.is_scavenged());
        assert_eq!(reopened.chunk_id(), chunk.chunk_id());
        match reopened.try_read_at(pos, false).unwrap() {
            RecordReadResult::Success { record: read, .. } => assert_eq!(read, record),
            other => panic!("unexpected read result: {other:?}"),
        }
    }

    #[test]
    fn reopen_writable_chunk() {
        let backend = InMemoryBackend::new();
        let data_handle = backend.clone();
        let chunk = Chunk::create(
            Box::new(backend),
            ChunkNumber::new(0),
            CHUNK_SIZE,
            1_700_000_000_000,
        )
        .unwrap();
        let mut record = prepare("stream-a", 0, b"data");
        stamp_and_append(&chunk, &mut record).unwrap().unwrap();
        chunk.flush().unwrap();

        let reopened = Chunk::open(
            Box::new(InMemoryBackend::with_data(data_handle.data())),
            &TransformSet::identity(),
        )
        .unwrap();
        assert!(!reopened.is_completed());
        assert_eq!(
            reopened.next_append_position().unwrap(),
            record.size_on_disk() as i64
        );
    }

    #[test]
    fn corrupted_completed_chunk_fails_checksum() {
        let backend = InMemoryBackend::new();
        let data_handle = backend.clone();
        let chunk = Chunk::create(
            Box::new(backend),
            ChunkNumber::new(0),
            CHUNK_SIZE,
            1_700_000_000_000,
        )
        .unwrap();
        let mut record = prepare("stream-a", 0, b"data to corrupt");
        stamp_and_append(&chunk, &mut record).unwrap().unwrap();
        chunk.complete().unwrap();

        let mut data = data_handle.data();
        data[CHUNK_HEADER_SIZE + 20] ^= 0xFF;
        let result = Chunk::open(
            Box::new(InMemoryBackend::with_data(data)),
            &TransformSet::identity(),
        );
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn scavenged_chunk_posmap_reads() {
        // Build a full chunk with three records, then rewrite it keeping
        // only the first and third.
        let source = new_chunk(0);
        let mut records = Vec::new();
        for n in 0..3 {
            let mut record = prepare("stream-a", n, format!("payload-{n}").as_bytes());
            stamp_and_append(&source, &mut record).unwrap().unwrap();
            records.push(record);
        }
        source.complete().unwrap();

        let kept = vec![records[0].clone(), records[2].clone()];
        let scavenged = Chunk::write_completed(
            Box::new(InMemoryBackend::new()),
            source.header().clone(),
            &kept,
            Arc::new(IdentityTransform),
            source.logical_data_size(),
        )
        .unwrap();
        assert!(scavenged.is_scavenged());

        let p0 = records[0].log_position().as_i64();
        let p1 = records[1].log_position().as_i64();
        let p2 = records[2].log_position().as_i64();

        match scavenged.try_read_at(p0, true).unwrap() {
            RecordReadResult::Success { record, .. } => assert_eq!(record, records[0]),
            other => panic!("unexpected read result: {other:?}"),
        }
        match scavenged.try_read_at(p2, true).unwrap() {
            RecordReadResult::Success { record, .. } => assert_eq!(record, records[2]),
            other => panic!("unexpected read result: {other:?}"),
        }
        assert!(matches!(
            scavenged.try_read_at(p1, true).unwrap(),
            RecordReadResult::Scavenged
        ));
        assert!(scavenged.try_read_at(p1, false).is_err());

        // Forward scan from the scavenged hole lands on the next survivor.
        match scavenged.try_read_closest_forward(p1).unwrap() {
            SeqReadResult::Success { record, .. } => assert_eq!(record, records[2]),
            other => panic!("unexpected read result: {other:?}"),
        }
    }

    #[test]
    fn backward_read_walks_suffix_markers() {
        let chunk = new_chunk(0);
        let mut records = Vec::new();
        for n in 0..3 {
            let mut record = prepare("stream-a", n, format!("payload-{n}").as_bytes());
            stamp_and_append(&chunk, &mut record).unwrap().unwrap();
            records.push(record);
        }

        let mut at = i64::from(chunk.physical_data_size());
        for expected in records.iter().rev() {
            match chunk.try_read_closest_backward(at).unwrap() {
                SeqReadResult::Success {
                    record,
                    next_position,
                    ..
                } => {
                    assert_eq!(&record, expected);
                    at = next_position;
                }
                other => panic!("unexpected read result: {other:?}"),
            }
        }
        assert!(matches!(
            chunk.try_read_closest_backward(at).unwrap(),
            SeqReadResult::Eof
        ));
    }

    #[test]
    fn truncate_discards_torn_tail() {
        let chunk = new_chunk(0);
        let mut record = prepare("stream-a", 0, b"good");
        stamp_and_append(&chunk, &mut record).unwrap().unwrap();
        let good_size = chunk.physical_data_size();

        let mut torn = prepare("stream-a", 1, b"torn");
        stamp_and_append(&chunk, &mut torn).unwrap().unwrap();

        chunk.truncate_data(good_size).unwrap();
        assert_eq!(chunk.physical_data_size(), good_size);
        assert_eq!(chunk.next_append_position().unwrap(), i64::from(good_size));
        assert!(chunk.truncate_data(good_size + 1).is_err());
    }

    #[test]
    fn cache_eviction_keeps_reads_working() {
        let chunk = new_chunk(0);
        let mut record = prepare("stream-a", 0, b"data");
        let pos = stamp_and_append(&chunk, &mut record).unwrap().unwrap();
        chunk.complete().unwrap();

        chunk.cache().unwrap();
        assert!(chunk.is_cached());
        chunk.evict_cache();
        assert!(!chunk.is_cached());
        assert!(matches!(
            chunk.try_read_at(pos, false).unwrap(),
            RecordReadResult::Success { .. }
        ));
    }

    #[test]
    fn transaction_flags_cover_single_write() {
        let record = prepare("stream-a", 0, b"data");
        if let LogRecord::Prepare(p) = &record {
            assert!(p.flags.contains(PrepareFlags::TRANSACTION_BEGIN));
            assert!(p.flags.contains(PrepareFlags::TRANSACTION_END));
            assert!(p.flags.contains(PrepareFlags::IS_COMMITTED));
        } else {
            panic!("expected prepare");
        }
    }
}
