//! Checksummed framing shared by every segment-level file.
//!
//! ```text
//! ┌───────┬──────────┬──────────┬─────────────┬────────┐
//! │ magic │ format   │ length   │ payload     │ crc32  │
//! │ 4     │ u32 LE   │ u32 LE   │ length      │ u32 LE │
//! └───────┴──────────┴──────────┴─────────────┴────────┘
//! ```
//!
//! The CRC-32 covers everything before it.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Format version written into every frame.
pub const FRAME_FORMAT: u32 = 1;

const HEADER_LEN: usize = 12;
const FOOTER_LEN: usize = 4;

/// Wraps raw bytes in a frame.
#[must_use]
pub fn wrap(magic: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + FOOTER_LEN);
    buf.extend_from_slice(&magic);
    buf.extend_from_slice(&FRAME_FORMAT.to_le_bytes());
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Validates a frame and returns its payload.
///
/// # Errors
///
/// Fails on wrong magic, truncation, unknown format or checksum mismatch.
pub fn unwrap(magic: [u8; 4], data: &[u8]) -> CodecResult<&[u8]> {
    if data.len() < HEADER_LEN + FOOTER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN + FOOTER_LEN,
            available: data.len(),
        });
    }

    let found = [data[0], data[1], data[2], data[3]];
    if found != magic {
        return Err(CodecError::BadMagic {
            expected: magic,
            found,
        });
    }

    let format = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if format != FRAME_FORMAT {
        return Err(CodecError::UnsupportedFormat(format));
    }

    let len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let needed = HEADER_LEN + len + FOOTER_LEN;
    if data.len() != needed {
        return Err(CodecError::Truncated {
            needed,
            available: data.len(),
        });
    }

    let body_end = HEADER_LEN + len;
    let expected = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    let actual = crc32fast::hash(&data[..body_end]);
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    Ok(&data[HEADER_LEN..body_end])
}

/// Serializes `value` as CBOR and frames it.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn encode_cbor<T: Serialize>(magic: [u8; 4], value: &T) -> CodecResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(wrap(magic, &payload))
}

/// Unframes CBOR bytes and deserializes them.
///
/// # Errors
///
/// Fails on any framing error, or [`CodecError::DecodingFailed`] if the
/// payload does not deserialize into `T`.
pub fn decode_cbor<T: DeserializeOwned>(magic: [u8; 4], data: &[u8]) -> CodecResult<T> {
    let payload = unwrap(magic, data)?;
    ciborium::from_reader(payload).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
