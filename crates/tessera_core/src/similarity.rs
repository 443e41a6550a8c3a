//! Norm computation at indexing time.

use tessera_codec::{decode_norm, encode_norm, length_norm};

/// Computes the norm stored for a field of a document.
///
/// The stored norm is `doc boost * field boost * length_norm(field,
/// num_terms)`, encoded into one byte.
pub trait Similarity: Send + Sync + std::fmt::Debug {
    /// Normalization factor for a field with `num_terms` tokens.
    fn length_norm(&self, field: &str, num_terms: u32) -> f32;

    /// Encodes a norm into a byte.
    fn encode_norm(&self, value: f32) -> u8 {
        encode_norm(value)
    }

    /// Decodes a norm byte.
    fn decode_norm(&self, byte: u8) -> f32 {
        decode_norm(byte)
    }
}

/// `1 / sqrt(num_terms)` length normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSimilarity;

impl Similarity for DefaultSimilarity {
    fn length_norm(&self, _field: &str, num_terms: u32) -> f32 {
        length_norm(num_terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Flat;

    impl Similarity for Flat {
        fn length_norm(&self, _field: &str, _num_terms: u32) -> f32 {
            1.0
        }
    }

    #[test]
    fn default_length_norm() {
        let sim = DefaultSimilarity;
        assert_eq!(sim.length_norm("content", 4), 0.5);
        assert_eq!(sim.decode_norm(sim.encode_norm(1.0)), 1.0);
    }

    #[test]
    fn custom_length_norm() {
        assert_eq!(Flat.length_norm("content", 100), 1.0);
    }
}
