//! Commit records: the confirmed half of a two-phase write.

use crate::error::{CoreError, CoreResult};
use crate::record::wire::ByteReader;
use crate::types::LogPosition;
use uuid::Uuid;

/// Current commit record on-disk version.
pub const COMMIT_VERSION: u8 = 1;

/// A commit record confirming a previously prepared transaction.
///
/// Assigns the first event number of the transaction's prepares within
/// their stream; the chaser indexes the transaction when it chases this
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// On-disk version.
    pub version: u8,
    /// Byte offset in the logical log.
    pub log_position: LogPosition,
    /// Position of the transaction's first prepare.
    pub transaction_position: i64,
    /// Event number assigned to the transaction's first data prepare.
    pub first_event_number: i64,
    /// Unix-millis creation timestamp.
    pub timestamp: i64,
    /// Correlation id shared with the transaction's prepares.
    pub correlation_id: Uuid,
}

impl CommitRecord {
    /// Creates a commit record at the current version.
    #[must_use]
    pub fn new(
        log_position: LogPosition,
        transaction_position: i64,
        first_event_number: i64,
        correlation_id: Uuid,
        timestamp: i64,
    ) -> Self {
        Self {
            version: COMMIT_VERSION,
            log_position,
            transaction_position,
            first_event_number,
            timestamp,
            correlation_id,
        }
    }

    /// Payload size in bytes, excluding the type and version bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        8 + 8 + 8 + 8 + 16
    }

    /// Encodes the payload.
    pub fn encode_payload(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.log_position.as_i64().to_le_bytes());
        buf.extend_from_slice(&self.transaction_position.to_le_bytes());
        buf.extend_from_slice(&self.first_event_number.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(self.correlation_id.as_bytes());
    }

    /// Decodes a payload of the given on-disk version.
    pub fn decode_payload(version: u8, payload: &[u8]) -> CoreResult<Self> {
        if version != COMMIT_VERSION {
            return Err(CoreError::chunk_corruption(format!(
                "unsupported commit version {version}"
            )));
        }

        let mut reader = ByteReader::new(payload);
        let log_position = LogPosition::new(reader.read_i64()?);
        let transaction_position = reader.read_i64()?;
        let first_event_number = reader.read_i64()?;
        let timestamp = reader.read_i64()?;
        let correlation_id = reader.read_uuid()?;
        reader.expect_end("commit record")?;

        Ok(Self {
            version,
            log_position,
            transaction_position,
            first_event_number,
            timestamp,
            correlation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let record = CommitRecord::new(LogPosition::new(512), 128, 42, Uuid::new_v4(), 1_700_000_000_000);
        let mut buf = Vec::new();
        record.encode_payload(&mut buf);
        assert_eq!(buf.len(), record.payload_size());
        let decoded = CommitRecord::decode_payload(COMMIT_VERSION, &buf).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn unknown_version_rejected() {
        let record = CommitRecord::new(LogPosition::new(0), 0, 0, Uuid::nil(), 0);
        let mut buf = Vec::new();
        record.encode_payload(&mut buf);
        assert!(CommitRecord::decode_payload(3, &buf).is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let record = CommitRecord::new(LogPosition::new(0), 0, 0, Uuid::nil(), 0);
        let mut buf = Vec::new();
        record.encode_payload(&mut buf);
        buf.push(0);
        assert!(CommitRecord::decode_payload(COMMIT_VERSION, &buf).is_err());
    }
}
