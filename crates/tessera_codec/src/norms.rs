//! One-byte norm encoding and the separate-norms file layout.
//!
//! Norms use an 8-bit float with a 3-bit mantissa and a 5-bit exponent
//! whose zero point is 15. The encoding is lossy: `decode(encode(x)) <= x`
//! for every positive `x` in range.

use crate::error::CodecResult;
use crate::frame;

/// Magic bytes of a separate-norms file.
pub const SEPARATE_NORMS_MAGIC: [u8; 4] = *b"TSSN";

const MANTISSA_BITS: i32 = 3;
const ZERO_EXP: i32 = 15;
const FLOAT_SHIFT: i32 = 24 - MANTISSA_BITS;
const MIN_SMALL: i32 = (63 - ZERO_EXP) << MANTISSA_BITS;

/// Encodes a float into a norm byte.
///
/// Values too small to represent round to the smallest positive byte (or
/// zero for non-positive input); values too large saturate at 255.
#[must_use]
pub fn encode_norm(value: f32) -> u8 {
    let bits = value.to_bits() as i32;
    let small = bits >> FLOAT_SHIFT;
    if small <= MIN_SMALL {
        return if bits <= 0 { 0 } else { 1 };
    }
    if small >= MIN_SMALL + 0x100 {
        return 255;
    }
    (small - MIN_SMALL) as u8
}

/// Decodes a norm byte.
#[must_use]
pub fn decode_norm(byte: u8) -> f32 {
    if byte == 0 {
        return 0.0;
    }
    let bits = (i32::from(byte) << FLOAT_SHIFT) + ((63 - ZERO_EXP) << 24);
    f32::from_bits(bits as u32)
}

/// Default length normalization: `1 / sqrt(num_terms)`.
#[must_use]
pub fn length_norm(num_terms: u32) -> f32 {
    1.0 / (num_terms as f32).sqrt()
}

/// Encodes a separate-norms file holding one byte per document.
#[must_use]
pub fn encode_separate_norms(norms: &[u8]) -> Vec<u8> {
    frame::wrap(SEPARATE_NORMS_MAGIC, norms)
}

/// Decodes a separate-norms file.
///
/// # Errors
///
/// Fails on any framing error.
pub fn decode_separate_norms(data: &[u8]) -> CodecResult<Vec<u8>> {
    frame::unwrap(SEPARATE_NORMS_MAGIC, data).map(<[u8]>::to_vec)
}
