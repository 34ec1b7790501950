//! Log record framing for the file table.
//!
//! Every mutation of a [`crate::FileTable`] is appended as one framed record:
//!
//! ```text
//! | magic (4) | version (2) | type (1) | key_len (4) | value_len (4) | key | value | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers header and body.

use crate::error::{StorageError, StorageResult};

/// Magic bytes identifying a table log record.
pub const LOG_MAGIC: [u8; 4] = *b"HTBL";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Size of the fixed record header.
pub(crate) const HEADER_SIZE: usize = 4 + 2 + 1 + 4 + 4;

/// Size of the trailing checksum.
pub(crate) const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Insert or replace a value.
    Put = 1,
    /// Remove a key.
    Delete = 2,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A single table mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Insert or replace `key`.
    Put {
        /// Key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// Remove `key`.
    Delete {
        /// Key.
        key: String,
    },
}

/// Outcome of decoding one record from a buffer.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A complete, valid record and its encoded length.
    Record(LogRecord, usize),
    /// The buffer ends in the middle of a record.
    Incomplete,
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Put { .. } => LogRecordType::Put,
            Self::Delete { .. } => LogRecordType::Delete,
        }
    }

    /// Returns the key this record applies to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    /// Encodes the record with its envelope and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or value exceeds the 4-byte length field.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let (key, value): (&str, &[u8]) = match self {
            Self::Put { key, value } => (key, value),
            Self::Delete { key } => (key, &[]),
        };
        let key_len = u32::try_from(key.len())
            .map_err(|_| StorageError::corrupted(format!("key too large: {} bytes", key.len())))?;
        let value_len = u32::try_from(value.len()).map_err(|_| {
            StorageError::corrupted(format!("value too large: {} bytes", value.len()))
        })?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len() + CRC_SIZE);
        buf.extend_from_slice(&LOG_MAGIC);
        buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
        buf.push(self.record_type() as u8);
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&value_len.to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(value);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes one record from the start of `buf`.
    pub(crate) fn decode(buf: &[u8], offset: u64) -> StorageResult<Decoded> {
        if buf.len() < HEADER_SIZE {
            return Ok(Decoded::Incomplete);
        }
        if buf[0..4] != LOG_MAGIC {
            return Err(StorageError::corrupted(format!(
                "invalid magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > LOG_VERSION {
            return Err(StorageError::corrupted(format!(
                "unsupported version {version} at offset {offset}"
            )));
        }
        let record_type = LogRecordType::from_byte(buf[6]).ok_or_else(|| {
            StorageError::corrupted(format!("unknown record type {} at offset {offset}", buf[6]))
        })?;
        let key_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;
        let value_len = u32::from_le_bytes([buf[11], buf[12], buf[13], buf[14]]) as usize;

        let body_end = HEADER_SIZE + key_len + value_len;
        let total_len = body_end + CRC_SIZE;
        if buf.len() < total_len {
            return Ok(Decoded::Incomplete);
        }

        let stored_crc = u32::from_le_bytes([
            buf[body_end],
            buf[body_end + 1],
            buf[body_end + 2],
            buf[body_end + 3],
        ]);
        let computed_crc = compute_crc32(&buf[..body_end]);
        if stored_crc != computed_crc {
            return Err(StorageError::corrupted(format!(
                "checksum mismatch at offset {offset}: expected {stored_crc:#010x}, got {computed_crc:#010x}"
            )));
        }

        let key = std::str::from_utf8(&buf[HEADER_SIZE..HEADER_SIZE + key_len])
            .map_err(|_| StorageError::corrupted(format!("non UTF-8 key at offset {offset}")))?
            .to_string();
        let record = match record_type {
            LogRecordType::Put => Self::Put {
                key,
                value: buf[HEADER_SIZE + key_len..body_end].to_vec(),
            },
            LogRecordType::Delete => Self::Delete { key },
        };
        Ok(Decoded::Record(record, total_len))
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
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
