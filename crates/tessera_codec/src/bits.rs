//! Deleted-document bitsets and their file layout.
//!
//! A bitset is a plain byte slice with bit `i` stored in byte `i / 8` at
//! position `i % 8`. The slice is owned elsewhere (usually a shared,
//! reference-counted buffer); these helpers only read and flip bits.

use crate::error::{CodecError, CodecResult};
use crate::frame;

/// Magic bytes of a deletions file.
pub const DELETIONS_MAGIC: [u8; 4] = *b"TSDL";

/// Returns the number of bytes needed for `doc_count` bits.
#[must_use]
pub fn byte_len(doc_count: u32) -> usize {
    (doc_count as usize).div_ceil(8)
}

/// Returns whether bit `index` is set.
#[must_use]
pub fn get(bits: &[u8], index: u32) -> bool {
    let byte = (index / 8) as usize;
    bits.get(byte).is_some_and(|b| b & (1 << (index % 8)) != 0)
}

/// Sets bit `index`, returning true if it was previously clear.
pub fn set(bits: &mut [u8], index: u32) -> bool {
    let byte = (index / 8) as usize;
    let mask = 1 << (index % 8);
    match bits.get_mut(byte) {
        Some(b) if *b & mask == 0 => {
            *b |= mask;
            true
        }
        _ => false,
    }
}

/// Returns the number of set bits.
#[must_use]
pub fn count(bits: &[u8]) -> u32 {
    bits.iter().map(|b| b.count_ones()).sum()
}

/// Encodes a deletions file for a segment of `doc_count` documents.
#[must_use]
pub fn encode_deletions(bits: &[u8], doc_count: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + bits.len());
    payload.extend_from_slice(&doc_count.to_le_bytes());
    payload.extend_from_slice(bits);
    frame::wrap(DELETIONS_MAGIC, &payload)
}

/// Decodes a deletions file, checking it matches `doc_count`.
///
/// # Errors
///
/// Fails on framing errors or if the bitset size disagrees with the
/// segment.
pub fn decode_deletions(data: &[u8], doc_count: u32) -> CodecResult<Vec<u8>> {
    let payload = frame::unwrap(DELETIONS_MAGIC, data)?;
    if payload.len() < 4 {
        return Err(CodecError::Truncated {
            needed: 4,
            available: payload.len(),
        });
    }
    let stored = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    if stored != doc_count || payload.len() - 4 != byte_len(doc_count) {
        return Err(CodecError::invalid_structure(format!(
            "deletions sized for {stored} docs, segment has {doc_count}"
        )));
    }
    Ok(payload[4..].to_vec())
}
