//! Log record types and binary codec.
//!
//! Every record is stored framed as `[length: u32][payload][length: u32]`
//! where both length fields count the payload bytes. The duplicated length
//! makes backward scans possible (read the suffix, step back) and doubles
//! as a torn-write detector: a mismatch is corruption, never silently
//! truncated. The payload itself begins with a type byte and a version
//! byte; all field layouts are little-endian.

pub(crate) mod commit;
pub(crate) mod prepare;
pub(crate) mod system;
pub mod wire;

pub use commit::{CommitRecord, COMMIT_VERSION};
pub use prepare::{PrepareFlags, PrepareRecord, PREPARE_VERSION_V1, PREPARE_VERSION_V2};
pub use system::{SystemRecord, SystemRecordKind, SYSTEM_VERSION};

use crate::error::{CoreError, CoreResult};
use crate::types::LogPosition;

/// Size of the two length fields around a record payload.
pub const FRAME_OVERHEAD: usize = 8;

/// Upper bound on a single record's payload, shared by encode and decode.
/// A declared length above this is treated as corruption before any
/// allocation happens.
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Proposed event write.
    Prepare = 0,
    /// Transaction confirmation.
    Commit = 1,
    /// Engine-written record (epoch, scavenge point).
    System = 2,
}

impl RecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Prepare),
            1 => Some(Self::Commit),
            2 => Some(Self::System),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A log record in one of its concrete variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Proposed event write.
    Prepare(PrepareRecord),
    /// Transaction confirmation.
    Commit(CommitRecord),
    /// Engine-written record.
    System(SystemRecord),
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Prepare(_) => RecordType::Prepare,
            Self::Commit(_) => RecordType::Commit,
            Self::System(_) => RecordType::System,
        }
    }

    /// Returns the record's position in the logical log.
    #[must_use]
    pub fn log_position(&self) -> LogPosition {
        match self {
            Self::Prepare(r) => r.log_position,
            Self::Commit(r) => r.log_position,
            Self::System(r) => r.log_position,
        }
    }

    /// Re-stamps the record's log position.
    ///
    /// Used by the writer when an append rolls over into a fresh chunk and
    /// by the scavenger when rewriting records is not needed but their
    /// mapping is (positions are otherwise immutable).
    pub fn set_log_position(&mut self, position: LogPosition) {
        match self {
            Self::Prepare(r) => {
                // A single-write transaction begins at its own position.
                if r.transaction_position == r.log_position.as_i64() {
                    r.transaction_position = position.as_i64();
                }
                r.log_position = position;
            }
            Self::Commit(r) => r.log_position = position,
            Self::System(r) => r.log_position = position,
        }
    }

    /// Payload size in bytes (type byte + version byte + body).
    #[must_use]
    pub fn payload_size(&self) -> usize {
        2 + match self {
            Self::Prepare(r) => r.payload_size(),
            Self::Commit(r) => r.payload_size(),
            Self::System(r) => r.payload_size(),
        }
    }

    /// Total bytes this record occupies on disk, framing included.
    #[must_use]
    pub fn size_on_disk(&self) -> usize {
        FRAME_OVERHEAD + self.payload_size()
    }

    /// Appends the framed record to `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exceeds [`MAX_RECORD_SIZE`] or fails
    /// version validation.
    pub fn write_to(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        let payload_len = self.payload_size();
        if payload_len > MAX_RECORD_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "record payload of {payload_len} bytes exceeds maximum of {MAX_RECORD_SIZE}"
            )));
        }

        let len = payload_len as u32;
        buf.extend_from_slice(&len.to_le_bytes());

        let payload_start = buf.len();
        buf.push(self.record_type().as_byte());
        match self {
            Self::Prepare(r) => {
                buf.push(r.version);
                r.encode_payload(buf)?;
            }
            Self::Commit(r) => {
                buf.push(r.version);
                r.encode_payload(buf);
            }
            Self::System(r) => {
                buf.push(r.version);
                r.encode_payload(buf);
            }
        }
        debug_assert_eq!(buf.len() - payload_start, payload_len);

        buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Encodes the framed record into a fresh buffer.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size_on_disk());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Decodes one framed record from the start of `data`.
    ///
    /// Returns the record and the number of bytes consumed. Validates the
    /// length prefix against the suffix and every declared field length
    /// against the buffer; any mismatch is a corruption error.
    pub fn read_from(data: &[u8]) -> CoreResult<(Self, usize)> {
        if data.len() < FRAME_OVERHEAD {
            return Err(CoreError::chunk_corruption(
                "buffer too short for record framing",
            ));
        }

        let prefix = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if prefix < 2 || prefix > MAX_RECORD_SIZE {
            return Err(CoreError::chunk_corruption(format!(
                "implausible record length {prefix}"
            )));
        }
        let total = FRAME_OVERHEAD + prefix;
        if data.len() < total {
            return Err(CoreError::chunk_corruption(format!(
                "record of {prefix} bytes extends beyond buffer of {}",
                data.len()
            )));
        }

        let suffix_offset = 4 + prefix;
        let suffix = u32::from_le_bytes([
            data[suffix_offset],
            data[suffix_offset + 1],
            data[suffix_offset + 2],
            data[suffix_offset + 3],
        ]) as usize;
        if suffix != prefix {
            return Err(CoreError::chunk_corruption(format!(
                "record length prefix {prefix} does not match suffix {suffix}"
            )));
        }

        let payload = &data[4..4 + prefix];
        let record = Self::decode_payload(payload)?;
        Ok((record, total))
    }

    /// Decodes an unframed payload (type byte + version byte + body).
    pub fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        if payload.len() < 2 {
            return Err(CoreError::chunk_corruption("record payload too short"));
        }
        let record_type = RecordType::from_byte(payload[0]).ok_or_else(|| {
            CoreError::chunk_corruption(format!("unknown record type {}", payload[0]))
        })?;
        let version = payload[1];
        let body = &payload[2..];

        Ok(match record_type {
            RecordType::Prepare => Self::Prepare(PrepareRecord::decode_payload(version, body)?),
            RecordType::Commit => Self::Commit(CommitRecord::decode_payload(version, body)?),
            RecordType::System => Self::System(SystemRecord::decode_payload(version, body)?),
        })
    }
}

/// Computes CRC32 checksum for data (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExpectedVersion;
    use uuid::Uuid;

    fn sample_prepare() -> LogRecord {
        LogRecord::Prepare(PrepareRecord::single_write(
            LogPosition::new(0),
            "accounts-1",
            ExpectedVersion::NoStream,
            "AccountOpened",
            vec![1, 2, 3],
            Vec::new(),
            1_700_000_000_000,
        ))
    }

    fn sample_commit() -> LogRecord {
        LogRecord::Commit(CommitRecord::new(
            LogPosition::new(77),
            0,
            5,
            Uuid::new_v4(),
            1,
        ))
    }

    fn sample_system() -> LogRecord {
        LogRecord::System(SystemRecord::new(
            LogPosition::new(300),
            2,
            SystemRecordKind::Epoch {
                epoch_number: 1,
                prev_epoch_position: -1,
                epoch_id: Uuid::new_v4(),
                leader_instance_id: Uuid::new_v4(),
            },
        ))
    }

    #[test]
    fn record_type_roundtrip() {
        for t in [RecordType::Prepare, RecordType::Commit, RecordType::System] {
            assert_eq!(RecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(RecordType::from_byte(99), None);
    }

    #[test]
    fn framed_roundtrip_all_variants() {
        for record in [sample_prepare(), sample_commit(), sample_system()] {
            let bytes = record.to_bytes().unwrap();
            assert_eq!(bytes.len(), record.size_on_disk());
            let (decoded, consumed) = LogRecord::read_from(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn framed_roundtrip_v1_prepare() {
        let mut prepare = PrepareRecord::single_write(
            LogPosition::new(8),
            "s",
            ExpectedVersion::Any,
            "E",
            Vec::new(),
            Vec::new(),
            0,
        );
        prepare.version = PREPARE_VERSION_V1;
        let record = LogRecord::Prepare(prepare);
        let bytes = record.to_bytes().unwrap();
        let (decoded, _) = LogRecord::read_from(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn prefix_equals_suffix_on_disk() {
        let bytes = sample_prepare().to_bytes().unwrap();
        let prefix = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let n = bytes.len();
        let suffix = u32::from_le_bytes([bytes[n - 4], bytes[n - 3], bytes[n - 2], bytes[n - 1]]);
        assert_eq!(prefix, suffix);
        assert_eq!(prefix as usize, bytes.len() - FRAME_OVERHEAD);
    }

    #[test]
    fn corrupted_prefix_detected() {
        let mut bytes = sample_prepare().to_bytes().unwrap();
        bytes[0] ^= 0x01;
        assert!(LogRecord::read_from(&bytes).is_err());
    }

    #[test]
    fn corrupted_suffix_detected() {
        let mut bytes = sample_commit().to_bytes().unwrap();
        let n = bytes.len();
        bytes[n - 1] ^= 0x80;
        assert!(LogRecord::read_from(&bytes).is_err());
    }

    #[test]
    fn implausible_length_detected_before_allocation() {
        let mut bytes = sample_commit().to_bytes().unwrap();
        bytes[..4].copy_from_slice(&(u32::MAX).to_le_bytes());
        let err = LogRecord::read_from(&bytes).unwrap_err();
        assert!(err.to_string().contains("implausible"));
    }

    #[test]
    fn set_log_position_restamps_transaction_position() {
        let mut record = sample_prepare();
        record.set_log_position(LogPosition::new(999));
        assert_eq!(record.log_position(), LogPosition::new(999));
        if let LogRecord::Prepare(p) = &record {
            assert_eq!(p.transaction_position, 999);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn size_on_disk_matches_bytes_between_markers() {
        // Writes two dummy length markers around each record and verifies
        // the declared size_on_disk equals the distance between them.
        for properties_len in 0..=200usize {
            let mut prepare = PrepareRecord::single_write(
                LogPosition::new(0),
                "props-stream",
                ExpectedVersion::Any,
                "Evt",
                vec![1],
                Vec::new(),
                0,
            );
            prepare.properties = vec![0x55; properties_len];
            let record = LogRecord::Prepare(prepare);
            let expected = record.size_on_disk();

            let mut buf = Vec::new();
            buf.extend_from_slice(&0xDEAD_BEEF_u32.to_le_bytes()); // marker
            record.write_to(&mut buf).unwrap();
            buf.extend_from_slice(&0xDEAD_BEEF_u32.to_le_bytes()); // marker
            assert_eq!(buf.len() - 8, expected, "properties len {properties_len}");
        }
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty() {
        assert_eq!(compute_crc32(b""), 0x0000_0000);
    }
}
