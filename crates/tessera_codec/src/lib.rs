//! # Tessera Codec
//!
//! Segment-level file formats for the Tessera index engine.
//!
//! This crate is pure bytes-in, bytes-out: it knows nothing about
//! directories, commits or generations. It provides:
//! - Documents, fields and terms
//! - Whitespace analysis
//! - Per-segment field numbering
//! - Segment data in compound and split layouts
//! - Deleted-document bitsets and their files
//! - One-byte norm encoding and separate-norm files
//!
//! Every file is wrapped in a checksummed frame (magic, format, length,
//! CRC-32). Structured content is CBOR.
//!
//! ## Usage
//!
//! ```
//! use tessera_codec::{encode_norm, decode_norm, Document, Field, Index, Store};
//!
//! let mut doc = Document::new();
//! doc.add(Field::new("content", "aaa bbb", Store::No, Index::Analyzed));
//!
//! let byte = encode_norm(0.5);
//! assert!(decode_norm(byte) <= 0.5);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod analysis;
pub mod bits;
mod document;
mod error;
mod field_infos;
pub mod frame;
mod norms;
mod segment;

pub use document::{Document, Field, Index, Store, Term};
pub use error::{CodecError, CodecResult};
pub use field_infos::{FieldInfo, FieldInfos};
pub use norms::{
    decode_norm, decode_separate_norms, encode_norm, encode_separate_norms, length_norm,
    SEPARATE_NORMS_MAGIC,
};
pub use segment::{SegmentData, SegmentParts};
