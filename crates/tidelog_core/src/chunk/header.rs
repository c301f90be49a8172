//! Chunk header, footer, and position-map codecs.
//!
//! A chunk file is laid out as:
//!
//! ```text
//! [header: 128 bytes][framed records][posmap: 12 * n bytes][footer: 128 bytes]
//! ```
//!
//! The header is written at creation and never changes; the posmap and
//! footer are appended by `complete()`. The layout is self-describing:
//! a reader opening an unfamiliar chunk learns the format version, the
//! transform, and the covered chunk-number range from the header, and the
//! data/map extents from the footer.

use crate::chunk::transform::TransformId;
use crate::error::{CoreError, CoreResult};
use crate::types::ChunkNumber;
use uuid::Uuid;

/// Magic bytes identifying a chunk header.
pub const CHUNK_HEADER_MAGIC: [u8; 4] = *b"TLCH";

/// Magic bytes identifying a chunk footer.
pub const CHUNK_FOOTER_MAGIC: [u8; 4] = *b"TLCF";

/// Fixed on-disk size of the chunk header.
pub const CHUNK_HEADER_SIZE: usize = 128;

/// Fixed on-disk size of the chunk footer.
pub const CHUNK_FOOTER_SIZE: usize = 128;

/// Size of one position-map entry.
pub const POSMAP_ENTRY_SIZE: usize = 12;

/// Current chunk format version.
pub const CHUNK_FORMAT_VERSION: u8 = 1;

/// Footer flag bit: the chunk is completed (sealed read-only).
const FLAG_COMPLETED: u8 = 1;

/// Footer flag bit: a position map precedes the footer.
const FLAG_MAP_PRESENT: u8 = 2;

/// Immutable metadata written at chunk creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk format version.
    pub version: u8,
    /// Transform applied to the data region.
    pub transform: TransformId,
    /// First chunk number this file covers.
    pub chunk_start_number: ChunkNumber,
    /// Last chunk number this file covers (equal to start unless merged).
    pub chunk_end_number: ChunkNumber,
    /// Data capacity per covered chunk number, in bytes.
    pub chunk_size: u32,
    /// Unique id of this chunk file.
    pub chunk_id: Uuid,
    /// Unix-millis creation timestamp.
    pub created_at: i64,
}

impl ChunkHeader {
    /// Creates a header for a fresh single-number chunk.
    #[must_use]
    pub fn new(
        chunk_number: ChunkNumber,
        chunk_size: u32,
        transform: TransformId,
        created_at: i64,
    ) -> Self {
        Self {
            version: CHUNK_FORMAT_VERSION,
            transform,
            chunk_start_number: chunk_number,
            chunk_end_number: chunk_number,
            chunk_size,
            chunk_id: Uuid::new_v4(),
            created_at,
        }
    }

    /// Global log position where this chunk's logical space begins.
    #[must_use]
    pub fn start_position(&self) -> i64 {
        i64::from(self.chunk_start_number.as_i32()) * i64::from(self.chunk_size)
    }

    /// Global log position just past this chunk's logical space.
    #[must_use]
    pub fn end_position(&self) -> i64 {
        (i64::from(self.chunk_end_number.as_i32()) + 1) * i64::from(self.chunk_size)
    }

    /// Returns true if `position` falls inside this chunk's logical space.
    #[must_use]
    pub fn covers(&self, position: i64) -> bool {
        position >= self.start_position() && position < self.end_position()
    }

    /// Encodes the header into its fixed-size on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&CHUNK_HEADER_MAGIC);
        buf[4] = self.version;
        buf[5] = self.transform.as_byte();
        // bytes 6..8 reserved
        buf[8..12].copy_from_slice(&self.chunk_start_number.as_i32().to_le_bytes());
        buf[12..16].copy_from_slice(&self.chunk_end_number.as_i32().to_le_bytes());
        buf[16..20].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf[20..36].copy_from_slice(self.chunk_id.as_bytes());
        buf[36..44].copy_from_slice(&self.created_at.to_le_bytes());
        buf
    }

    /// Decodes a header from its fixed-size on-disk form.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(CoreError::chunk_corruption("chunk header truncated"));
        }
        if data[0..4] != CHUNK_HEADER_MAGIC {
            return Err(CoreError::chunk_corruption("invalid chunk header magic"));
        }
        let version = data[4];
        if version == 0 || version > CHUNK_FORMAT_VERSION {
            return Err(CoreError::chunk_corruption(format!(
                "unsupported chunk format version {version}"
            )));
        }
        let transform = TransformId::from_byte(data[5]).ok_or_else(|| {
            CoreError::chunk_corruption(format!("unknown chunk transform {}", data[5]))
        })?;

        let chunk_start_number =
            ChunkNumber::new(i32::from_le_bytes([data[8], data[9], data[10], data[11]]));
        let chunk_end_number =
            ChunkNumber::new(i32::from_le_bytes([data[12], data[13], data[14], data[15]]));
        if chunk_end_number < chunk_start_number {
            return Err(CoreError::chunk_corruption(
                "chunk end number precedes start number",
            ));
        }
        let chunk_size = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        if chunk_size == 0 {
            return Err(CoreError::chunk_corruption("chunk size of zero"));
        }

        let mut id_bytes = [0u8; 16];
        id_bytes.copy_from_slice(&data[20..36]);
        let mut created = [0u8; 8];
        created.copy_from_slice(&data[36..44]);

        Ok(Self {
            version,
            transform,
            chunk_start_number,
            chunk_end_number,
            chunk_size,
            chunk_id: Uuid::from_bytes(id_bytes),
            created_at: i64::from_le_bytes(created),
        })
    }
}

/// Metadata appended when a chunk is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFooter {
    /// Bytes of (possibly transformed) record data stored in the file.
    pub physical_data_size: u32,
    /// Logical extent of the data the chunk represents. Equal to
    /// `physical_data_size` until a scavenge leaves gaps.
    pub logical_data_size: i64,
    /// Bytes of position map preceding the footer (0 if unscavenged).
    pub map_size: u32,
    /// CRC32 over the data region and the position map.
    pub checksum: u32,
    /// Whether the chunk is completed.
    pub completed: bool,
}

impl ChunkFooter {
    /// Returns true if a position map precedes the footer.
    #[must_use]
    pub fn has_map(&self) -> bool {
        self.map_size > 0
    }

    /// Encodes the footer into its fixed-size on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; CHUNK_FOOTER_SIZE] {
        let mut buf = [0u8; CHUNK_FOOTER_SIZE];
        buf[0..4].copy_from_slice(&CHUNK_FOOTER_MAGIC);
        let mut flags = 0u8;
        if self.completed {
            flags |= FLAG_COMPLETED;
        }
        if self.has_map() {
            flags |= FLAG_MAP_PRESENT;
        }
        buf[4] = flags;
        // bytes 5..8 reserved
        buf[8..12].copy_from_slice(&self.physical_data_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.map_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.logical_data_size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decodes a footer from its fixed-size on-disk form.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < CHUNK_FOOTER_SIZE {
            return Err(CoreError::chunk_corruption("chunk footer truncated"));
        }
        if data[0..4] != CHUNK_FOOTER_MAGIC {
            return Err(CoreError::chunk_corruption("invalid chunk footer magic"));
        }
        let flags = data[4];
        let physical_data_size = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let map_size = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        let mut logical = [0u8; 8];
        logical.copy_from_slice(&data[16..24]);
        let checksum = u32::from_le_bytes([data[24], data[25], data[26], data[27]]);

        let has_map_flag = flags & FLAG_MAP_PRESENT != 0;
        if has_map_flag != (map_size > 0) {
            return Err(CoreError::chunk_corruption(
                "footer map flag disagrees with map size",
            ));
        }
        if map_size as usize % POSMAP_ENTRY_SIZE != 0 {
            return Err(CoreError::chunk_corruption(format!(
                "position map size {map_size} is not a multiple of {POSMAP_ENTRY_SIZE}"
            )));
        }

        Ok(Self {
            physical_data_size,
            logical_data_size: i64::from_le_bytes(logical),
            map_size,
            checksum,
            completed: flags & FLAG_COMPLETED != 0,
        })
    }
}

/// One position-map entry: where a surviving record's logical offset
/// lives physically after a scavenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosMapEntry {
    /// Record offset in the chunk's logical space.
    pub logical_offset: i64,
    /// Record offset in the file's data region.
    pub physical_offset: u32,
}

/// Position map of a scavenged chunk, sorted by logical offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PosMap {
    entries: Vec<PosMapEntry>,
}

impl PosMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Entries must be pushed in logical order.
    pub fn push(&mut self, logical_offset: i64, physical_offset: u32) {
        debug_assert!(self
            .entries
            .last()
            .is_none_or(|last| last.logical_offset < logical_offset));
        self.entries.push(PosMapEntry {
            logical_offset,
            physical_offset,
        });
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.entries.len() * POSMAP_ENTRY_SIZE
    }

    /// All entries in logical order.
    #[must_use]
    pub fn entries(&self) -> &[PosMapEntry] {
        &self.entries
    }

    /// Exact lookup of a logical offset.
    #[must_use]
    pub fn find(&self, logical_offset: i64) -> Option<PosMapEntry> {
        self.entries
            .binary_search_by_key(&logical_offset, |e| e.logical_offset)
            .ok()
            .map(|i| self.entries[i])
    }

    /// First entry at or after `logical_offset`.
    #[must_use]
    pub fn first_at_or_after(&self, logical_offset: i64) -> Option<PosMapEntry> {
        let idx = self
            .entries
            .partition_point(|e| e.logical_offset < logical_offset);
        self.entries.get(idx).copied()
    }

    /// Last entry strictly before `logical_offset`.
    #[must_use]
    pub fn last_before(&self, logical_offset: i64) -> Option<PosMapEntry> {
        let idx = self
            .entries
            .partition_point(|e| e.logical_offset < logical_offset);
        idx.checked_sub(1).map(|i| self.entries[i])
    }

    /// Encodes the map.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.logical_offset.to_le_bytes());
            buf.extend_from_slice(&entry.physical_offset.to_le_bytes());
        }
        buf
    }

    /// Decodes a map, validating sort order.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() % POSMAP_ENTRY_SIZE != 0 {
            return Err(CoreError::chunk_corruption(
                "position map length is not a multiple of the entry size",
            ));
        }
        let mut entries = Vec::with_capacity(data.len() / POSMAP_ENTRY_SIZE);
        let mut prev = i64::MIN;
        for block in data.chunks_exact(POSMAP_ENTRY_SIZE) {
            let mut logical = [0u8; 8];
            logical.copy_from_slice(&block[0..8]);
            let logical_offset = i64::from_le_bytes(logical);
            let physical_offset = u32::from_le_bytes([block[8], block[9], block[10], block[11]]);
            if logical_offset <= prev {
                return Err(CoreError::chunk_corruption(
                    "position map entries out of order",
                ));
            }
            prev = logical_offset;
            entries.push(PosMapEntry {
                logical_offset,
                physical_offset,
            });
        }
        Ok(Self { entries })
    }
}
