//! Little-endian wire helpers shared by the record codecs.
//!
//! Strings carry a 7-bit varint length prefix (short stream ids and event
//! types cost one byte); binary blobs carry a fixed 4-byte length. Every
//! read validates the declared length against the remaining buffer and
//! fails with a corruption error instead of reading out of bounds.

use crate::error::{CoreError, CoreResult};
use uuid::Uuid;

/// Writes a u64 as a 7-bit varint.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Returns the encoded size of a 7-bit varint.
#[must_use]
pub fn varint_len(value: u64) -> usize {
    match value {
        0 => 1,
        v => (64 - v.leading_zeros() as usize).div_ceil(7),
    }
}

/// Writes a varint-length-prefixed UTF-8 string.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Writes a u32-length-prefixed binary blob.
pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Encoded size of a varint-prefixed string.
#[must_use]
pub fn string_len(s: &str) -> usize {
    varint_len(s.len() as u64) + s.len()
}

/// Encoded size of a u32-prefixed blob.
#[must_use]
pub fn bytes_len(bytes: &[u8]) -> usize {
    4 + bytes.len()
}

/// A bounds-checked reader over a byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader over `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes remaining.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CoreError::chunk_corruption(format!(
                "unexpected end of record payload: need {len} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a little-endian u16.
    pub fn read_u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a little-endian u32.
    pub fn read_u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian i32.
    pub fn read_i32(&mut self) -> CoreResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a little-endian i64.
    pub fn read_i64(&mut self) -> CoreResult<i64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    /// Reads a 16-byte UUID.
    pub fn read_uuid(&mut self) -> CoreResult<Uuid> {
        let b = self.take(16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(b);
        Ok(Uuid::from_bytes(arr))
    }

    /// Reads a 7-bit varint.
    pub fn read_varint(&mut self) -> CoreResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 63 && byte > 1 {
                return Err(CoreError::chunk_corruption("varint overflows u64"));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Reads a varint-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> CoreResult<String> {
        let len = self.read_varint()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::chunk_corruption("invalid UTF-8 in record string"))
    }

    /// Reads a u32-length-prefixed binary blob.
    pub fn read_bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Fails unless every byte of the payload has been consumed.
    pub fn expect_end(&self, what: &str) -> CoreResult<()> {
        if self.remaining() != 0 {
            return Err(CoreError::chunk_corruption(format!(
                "trailing bytes in {what}: {} unread",
                self.remaining()
            )));
        }
        Ok(())
    }
}
