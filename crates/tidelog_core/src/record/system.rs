//! System records: epochs and scavenge points.

use crate::error::{CoreError, CoreResult};
use crate::record::wire::ByteReader;
use crate::types::LogPosition;
use uuid::Uuid;

/// Current system record on-disk version.
pub const SYSTEM_VERSION: u8 = 1;

/// What a system record announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemRecordKind {
    /// A leadership epoch boundary.
    Epoch {
        /// Monotonic epoch number.
        epoch_number: i64,
        /// Position of the previous epoch record, -1 if none.
        prev_epoch_position: i64,
        /// Unique id of this epoch.
        epoch_id: Uuid,
        /// Instance id of the leader that opened the epoch.
        leader_instance_id: Uuid,
    },
    /// A scavenge point: obsolete data up to `threshold` may be removed.
    ScavengePoint {
        /// Unique id of the scavenge run.
        scavenge_id: Uuid,
        /// Log position up to which obsolete data is considered.
        threshold: i64,
    },
}

impl SystemRecordKind {
    const EPOCH: u8 = 0;
    const SCAVENGE_POINT: u8 = 1;

    fn discriminator(&self) -> u8 {
        match self {
            Self::Epoch { .. } => Self::EPOCH,
            Self::ScavengePoint { .. } => Self::SCAVENGE_POINT,
        }
    }
}

/// A system record written by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemRecord {
    /// On-disk version.
    pub version: u8,
    /// Byte offset in the logical log.
    pub log_position: LogPosition,
    /// Unix-millis creation timestamp.
    pub timestamp: i64,
    /// The announcement this record carries.
    pub kind: SystemRecordKind,
}

impl SystemRecord {
    /// Creates a system record at the current version.
    #[must_use]
    pub fn new(log_position: LogPosition, timestamp: i64, kind: SystemRecordKind) -> Self {
        Self {
            version: SYSTEM_VERSION,
            log_position,
            timestamp,
            kind,
        }
    }

    /// Payload size in bytes, excluding the type and version bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        let kind_size = match self.kind {
            SystemRecordKind::Epoch { .. } => 8 + 8 + 16 + 16,
            SystemRecordKind::ScavengePoint { .. } => 16 + 8,
        };
        8 + 8 + 1 + kind_size
    }

    /// Encodes the payload.
    pub fn encode_payload(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.log_position.as_i64().to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(self.kind.discriminator());
        match &self.kind {
            SystemRecordKind::Epoch {
                epoch_number,
                prev_epoch_position,
                epoch_id,
                leader_instance_id,
            } => {
                buf.extend_from_slice(&epoch_number.to_le_bytes());
                buf.extend_from_slice(&prev_epoch_position.to_le_bytes());
                buf.extend_from_slice(epoch_id.as_bytes());
                buf.extend_from_slice(leader_instance_id.as_bytes());
            }
            SystemRecordKind::ScavengePoint {
                scavenge_id,
                threshold,
            } => {
                buf.extend_from_slice(scavenge_id.as_bytes());
                buf.extend_from_slice(&threshold.to_le_bytes());
            }
        }
    }

    /// Decodes a payload of the given on-disk version.
    pub fn decode_payload(version: u8, payload: &[u8]) -> CoreResult<Self> {
        if version != SYSTEM_VERSION {
            return Err(CoreError::chunk_corruption(format!(
                "unsupported system record version {version}"
            )));
        }

        let mut reader = ByteReader::new(payload);
        let log_position = LogPosition::new(reader.read_i64()?);
        let timestamp = reader.read_i64()?;
        let discriminator = reader.read_u8()?;
        let kind = match discriminator {
            SystemRecordKind::EPOCH => SystemRecordKind::Epoch {
                epoch_number: reader.read_i64()?,
                prev_epoch_position: reader.read_i64()?,
                epoch_id: reader.read_uuid()?,
                leader_instance_id: reader.read_uuid()?,
            },
            SystemRecordKind::SCAVENGE_POINT => SystemRecordKind::ScavengePoint {
                scavenge_id: reader.read_uuid()?,
                threshold: reader.read_i64()?,
            },
            other => {
                return Err(CoreError::chunk_corruption(format!(
                    "unknown system record kind {other}"
                )))
            }
        };
        reader.expect_end("system record")?;

        Ok(Self {
            version,
            log_position,
            timestamp,
            kind,
        })
    }
}
