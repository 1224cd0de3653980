//! Cache Record Format
//!
//! One persisted snapshot per record, length-prefixed JSON with a CRC32
//! checksum so torn or corrupted files are detected on read.
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32          | CacheRecord                              |
//! +----------------+----------------+------------------------------------------+
//! ```

use serde::{Deserialize, Serialize};

use super::CacheKey;
use crate::chunk::now_ms;
use crate::error::CacheError;
use crate::snapshot::StreamSnapshot;

/// Largest record accepted (audio buffers included)
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

const HEADER_SIZE: usize = 8;

/// A persisted snapshot and the key it was stored under
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    /// Conversation id of the key
    pub conversation_id: String,
    /// Message id of the key
    pub message_id: String,
    /// When the record was written (Unix timestamp ms)
    pub stored_at: u64,
    /// The final snapshot
    pub snapshot: StreamSnapshot,
}

impl CacheRecord {
    /// Wrap a snapshot for storage under `key`
    #[must_use]
    pub fn new(key: &CacheKey, snapshot: StreamSnapshot) -> Self {
        Self {
            conversation_id: key.conversation_id.clone(),
            message_id: key.message_id.clone(),
            stored_at: now_ms(),
            snapshot,
        }
    }

    /// Whether this record belongs to `key`
    #[must_use]
    pub fn matches(&self, key: &CacheKey) -> bool {
        self.conversation_id == key.conversation_id && self.message_id == key.message_id
    }
}

/// Encode a record with its length and checksum header
///
/// # Errors
///
/// Fails if serialization fails or the record exceeds [`MAX_RECORD_SIZE`].
pub fn encode_record(record: &CacheRecord) -> Result<Vec<u8>, CacheError> {
    let json = serde_json::to_vec(record)?;
    if json.len() > MAX_RECORD_SIZE {
        return Err(CacheError::TooLarge {
            size: json.len(),
            max: MAX_RECORD_SIZE,
        });
    }

    // MAX_RECORD_SIZE fits in u32
    #[allow(clippy::cast_possible_truncation)]
    let len = json.len() as u32;
    let checksum = crc32fast::hash(&json);

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Decode and verify a record
///
/// # Errors
///
/// Fails on a short or oversized record, a checksum mismatch, or a payload
/// that is not a valid record.
pub fn decode_record(bytes: &[u8]) -> Result<CacheRecord, CacheError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CacheError::Truncated {
            expected: HEADER_SIZE,
            found: bytes.len(),
        });
    }

    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_RECORD_SIZE {
        return Err(CacheError::TooLarge {
            size: len,
            max: MAX_RECORD_SIZE,
        });
    }
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != len {
        return Err(CacheError::Truncated {
            expected: len,
            found: payload.len(),
        });
    }

    let expected = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(CacheError::ChecksumMismatch { expected, actual });
    }

    Ok(serde_json::from_slice(payload)?)
}
