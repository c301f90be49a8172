//! Prepare records: the proposed half of a two-phase write.

use crate::error::{CoreError, CoreResult};
use crate::record::wire::{self, ByteReader};
use crate::types::{ExpectedVersion, LogPosition};
use std::ops::BitOr;
use uuid::Uuid;

/// On-disk version without the `properties` field.
pub const PREPARE_VERSION_V1: u8 = 1;

/// Current on-disk version; adds the schema-agnostic `properties` blob.
pub const PREPARE_VERSION_V2: u8 = 2;

/// Bit flags carried by a prepare record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrepareFlags(pub u16);

impl PrepareFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The record carries event data.
    pub const DATA: Self = Self(1);
    /// First prepare of a transaction.
    pub const TRANSACTION_BEGIN: Self = Self(2);
    /// Last prepare of a transaction.
    pub const TRANSACTION_END: Self = Self(4);
    /// Hard-delete tombstone for the stream.
    pub const STREAM_DELETE: Self = Self(8);
    /// The prepare is committed without a separate commit record.
    pub const IS_COMMITTED: Self = Self(16);
    /// The event data is JSON.
    pub const IS_JSON: Self = Self(32);

    /// The common single-record committed write.
    pub const SINGLE_WRITE: Self = Self(1 | 2 | 4 | 16);

    /// Returns true if all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Reconstructs flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }
}

impl BitOr for PrepareFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A prepare record: one proposed event write within a stream.
///
/// Immutable once written; a scavenge may physically remove it or rewrite
/// a logically equivalent copy into a replacement chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRecord {
    /// On-disk version this record encodes as.
    pub version: u8,
    /// Byte offset in the logical log.
    pub log_position: LogPosition,
    /// Flag bits.
    pub flags: PrepareFlags,
    /// Position of the transaction's first prepare (own position when
    /// the record begins the transaction).
    pub transaction_position: i64,
    /// Ordinal of this prepare within its transaction.
    pub transaction_offset: i32,
    /// Expected stream revision at append time.
    pub expected_version: ExpectedVersion,
    /// Unix-millis creation timestamp.
    pub timestamp: i64,
    /// Idempotency id of this event.
    pub event_id: Uuid,
    /// Correlation id shared by the records of one logical operation.
    pub correlation_id: Uuid,
    /// Target stream id.
    pub stream_id: String,
    /// Event type name.
    pub event_type: String,
    /// Event payload.
    pub data: Vec<u8>,
    /// Caller-supplied event metadata.
    pub metadata: Vec<u8>,
    /// Schema-agnostic key/value payload (v2 only; empty on v1 records).
    pub properties: Vec<u8>,
}

impl PrepareRecord {
    /// Creates a committed single-write prepare at the current version.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn single_write(
        log_position: LogPosition,
        stream_id: impl Into<String>,
        expected_version: ExpectedVersion,
        event_type: impl Into<String>,
        data: Vec<u8>,
        metadata: Vec<u8>,
        timestamp: i64,
    ) -> Self {
        let position = log_position.as_i64();
        Self {
            version: PREPARE_VERSION_V2,
            log_position,
            flags: PrepareFlags::SINGLE_WRITE,
            transaction_position: position,
            transaction_offset: 0,
            expected_version,
            timestamp,
            event_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            stream_id: stream_id.into(),
            event_type: event_type.into(),
            data,
            metadata,
            properties: Vec::new(),
        }
    }

    /// Creates a hard-delete tombstone prepare for a stream.
    #[must_use]
    pub fn tombstone(log_position: LogPosition, stream_id: impl Into<String>, timestamp: i64) -> Self {
        let mut record = Self::single_write(
            log_position,
            stream_id,
            ExpectedVersion::Any,
            "$streamDeleted",
            Vec::new(),
            Vec::new(),
            timestamp,
        );
        record.flags = record.flags | PrepareFlags::STREAM_DELETE;
        record
    }

    /// Returns true if this prepare is a hard-delete tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flags.contains(PrepareFlags::STREAM_DELETE)
    }

    /// Returns true if the prepare is committed without a commit record.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.flags.contains(PrepareFlags::IS_COMMITTED)
    }

    /// Payload size in bytes, excluding the type and version bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        let fixed = 8 + 2 + 8 + 4 + 8 + 8 + 16 + 16;
        let mut size = fixed
            + wire::string_len(&self.stream_id)
            + wire::string_len(&self.event_type)
            + wire::bytes_len(&self.data)
            + wire::bytes_len(&self.metadata);
        if self.version >= PREPARE_VERSION_V2 {
            size += wire::bytes_len(&self.properties);
        }
        size
    }

    /// Encodes the payload after validating version constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if a v1 record carries `properties` (v1 cannot
    /// represent them) or the version byte is unknown.
    pub fn encode_payload(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        match self.version {
            PREPARE_VERSION_V1 => {
                if !self.properties.is_empty() {
                    return Err(CoreError::invalid_argument(
                        "prepare v1 cannot carry properties",
                    ));
                }
            }
            PREPARE_VERSION_V2 => {}
            other => {
                return Err(CoreError::invalid_argument(format!(
                    "unknown prepare version {other}"
                )))
            }
        }

        buf.extend_from_slice(&self.log_position.as_i64().to_le_bytes());
        buf.extend_from_slice(&self.flags.bits().to_le_bytes());
        buf.extend_from_slice(&self.transaction_position.to_le_bytes());
        buf.extend_from_slice(&self.transaction_offset.to_le_bytes());
        buf.extend_from_slice(&self.expected_version.as_i64().to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(self.event_id.as_bytes());
        buf.extend_from_slice(self.correlation_id.as_bytes());
        wire::write_string(buf, &self.stream_id);
        wire::write_string(buf, &self.event_type);
        wire::write_bytes(buf, &self.data);
        wire::write_bytes(buf, &self.metadata);
        if self.version >= PREPARE_VERSION_V2 {
            wire::write_bytes(buf, &self.properties);
        }
        Ok(())
    }

    /// Decodes a payload of the given on-disk version.
    pub fn decode_payload(version: u8, payload: &[u8]) -> CoreResult<Self> {
        if version == 0 || version > PREPARE_VERSION_V2 {
            return Err(CoreError::chunk_corruption(format!(
                "unsupported prepare version {version}"
            )));
        }

        let mut reader = ByteReader::new(payload);
        let log_position = LogPosition::new(reader.read_i64()?);
        let flags = PrepareFlags::from_bits(reader.read_u16()?);
        let transaction_position = reader.read_i64()?;
        let transaction_offset = reader.read_i32()?;
        let expected_version = ExpectedVersion::from_i64(reader.read_i64()?);
        let timestamp = reader.read_i64()?;
        let event_id = reader.read_uuid()?;
        let correlation_id = reader.read_uuid()?;
        let stream_id = reader.read_string()?;
        let event_type = reader.read_string()?;
        let data = reader.read_bytes()?;
        let metadata = reader.read_bytes()?;
        let properties = if version >= PREPARE_VERSION_V2 {
            reader.read_bytes()?
        } else {
            Vec::new()
        };
        reader.expect_end("prepare record")?;

        Ok(Self {
            version,
            log_position,
            flags,
            transaction_position,
            transaction_offset,
            expected_version,
            timestamp,
            event_id,
            correlation_id,
            stream_id,
            event_type,
            data,
            metadata,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PrepareRecord {
        PrepareRecord::single_write(
            LogPosition::new(4096),
            "orders-7",
            ExpectedVersion::Exact(2),
            "OrderPlaced",
            vec![1, 2, 3, 4],
            vec![9, 9],
            1_700_000_000_000,
        )
    }

    #[test]
    fn v2_roundtrip() {
        let mut record = sample();
        record.properties = vec![0xAB; 17];
        let mut buf = Vec::new();
        record.encode_payload(&mut buf).unwrap();
        assert_eq!(buf.len(), record.payload_size());
        let decoded = PrepareRecord::decode_payload(PREPARE_VERSION_V2, &buf).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn v1_roundtrip_without_properties() {
        let mut record = sample();
        record.version = PREPARE_VERSION_V1;
        let mut buf = Vec::new();
        record.encode_payload(&mut buf).unwrap();
        assert_eq!(buf.len(), record.payload_size());
        let decoded = PrepareRecord::decode_payload(PREPARE_VERSION_V1, &buf).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.properties.is_empty());
    }

    #[test]
    fn v1_rejects_properties() {
        let mut record = sample();
        record.version = PREPARE_VERSION_V1;
        record.properties = vec![1];
        let mut buf = Vec::new();
        assert!(record.encode_payload(&mut buf).is_err());
    }

    #[test]
    fn unknown_version_rejected_on_decode() {
        let record = sample();
        let mut buf = Vec::new();
        record.encode_payload(&mut buf).unwrap();
        assert!(PrepareRecord::decode_payload(9, &buf).is_err());
    }

    #[test]
    fn truncated_payload_rejected() {
        let record = sample();
        let mut buf = Vec::new();
        record.encode_payload(&mut buf).unwrap();
        assert!(PrepareRecord::decode_payload(PREPARE_VERSION_V2, &buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn tombstone_flags() {
        let record = PrepareRecord::tombstone(LogPosition::new(0), "dead-stream", 0);
        assert!(record.is_tombstone());
        assert!(record.is_committed());
        assert_eq!(record.event_type, "$streamDeleted");
    }

    #[test]
    fn flags_contains() {
        let flags = PrepareFlags::DATA | PrepareFlags::IS_JSON;
        assert!(flags.contains(PrepareFlags::DATA));
        assert!(flags.contains(PrepareFlags::IS_JSON));
        assert!(!flags.contains(PrepareFlags::STREAM_DELETE));
        assert!(PrepareFlags::SINGLE_WRITE.contains(PrepareFlags::IS_COMMITTED));
    }

    #[test]
    fn payload_size_tracks_properties_length() {
        for len in [0usize, 1, 50, 200] {
            let mut record = sample();
            record.properties = vec![7; len];
            let mut buf = Vec::new();
            record.encode_payload(&mut buf).unwrap();
            assert_eq!(buf.len(), record.payload_size(), "len {len}");
        }
    }
}
