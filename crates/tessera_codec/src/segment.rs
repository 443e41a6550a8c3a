//! Segment data: field infos, documents and base norms.
//!
//! A segment is written either as one compound file (`.cfs`) or as three
//! files: field infos (`.fnm`), documents (`.fdt`) and norms (`.nrm`).
//! Both layouts hold the same content.

use crate::document::Document;
use crate::error::{CodecError, CodecResult};
use crate::field_infos::FieldInfos;
use crate::frame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Magic bytes of a compound segment file.
pub const COMPOUND_MAGIC: [u8; 4] = *b"TSCF";
/// Magic bytes of a field infos file.
pub const FIELD_INFOS_MAGIC: [u8; 4] = *b"TSFN";
/// Magic bytes of a documents file.
pub const FIELDS_MAGIC: [u8; 4] = *b"TSFD";
/// Magic bytes of a norms file.
pub const NORMS_MAGIC: [u8; 4] = *b"TSNR";

/// The immutable content of one segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentData {
    /// Field numbering for this segment.
    pub field_infos: FieldInfos,
    /// Documents in doc-id order.
    pub docs: Vec<Document>,
    /// Norm bytes per field number, one byte per document.
    pub norms: BTreeMap<u32, Vec<u8>>,
}

/// The three files of a non-compound segment.
#[derive(Debug, Clone)]
pub struct SegmentParts {
    /// Encoded `.fnm` file.
    pub field_infos: Vec<u8>,
    /// Encoded `.fdt` file.
    pub fields: Vec<u8>,
    /// Encoded `.nrm` file.
    pub norms: Vec<u8>,
}

impl SegmentData {
    /// Returns the number of documents.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        u32::try_from(self.docs.len()).unwrap_or(u32::MAX)
    }

    /// Returns the base norms of a field.
    #[must_use]
    pub fn norms_for(&self, field: &str) -> Option<&[u8]> {
        let info = self.field_infos.by_name(field)?;
        self.norms.get(&info.number).map(Vec::as_slice)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidStructure`] if a norm vector has the
    /// wrong length or belongs to an unknown field.
    pub fn validate(&self) -> CodecResult<()> {
        let docs = self.docs.len();
        for (number, norms) in &self.norms {
            let Some(info) = self.field_infos.by_number(*number) else {
                return Err(CodecError::invalid_structure(format!(
                    "norms for unknown field {number}"
                )));
            };
            if norms.len() != docs {
                return Err(CodecError::invalid_structure(format!(
                    "field {} has {} norms for {docs} docs",
                    info.name,
                    norms.len()
                )));
            }
        }
        Ok(())
    }

    /// Encodes the compound layout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_compound(&self) -> CodecResult<Vec<u8>> {
        frame::encode_cbor(COMPOUND_MAGIC, self)
    }

    /// Decodes the compound layout.
    ///
    /// # Errors
    ///
    /// Fails on framing, decoding or consistency errors.
    pub fn decode_compound(data: &[u8]) -> CodecResult<Self> {
        let segment: Self = frame::decode_cbor(COMPOUND_MAGIC, data)?;
        segment.validate()?;
        Ok(segment)
    }

    /// Encodes the non-compound layout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_parts(&self) -> CodecResult<SegmentParts> {
        Ok(SegmentParts {
            field_infos: frame::encode_cbor(FIELD_INFOS_MAGIC, &self.field_infos)?,
            fields: frame::encode_cbor(FIELDS_MAGIC, &self.docs)?,
            norms: frame::encode_cbor(NORMS_MAGIC, &self.norms)?,
        })
    }

    /// Decodes the non-compound layout.
    ///
    /// # Errors
    ///
    /// Fails on framing, decoding or consistency errors.
    pub fn decode_parts(field_infos: &[u8], fields: &[u8], norms: &[u8]) -> CodecResult<Self> {
        let segment = Self {
            field_infos: frame::decode_cbor(FIELD_INFOS_MAGIC, field_infos)?,
            docs: frame::decode_cbor(FIELDS_MAGIC, fields)?,
            norms: frame::decode_cbor(NORMS_MAGIC, norms)?,
        };
        segment.validate()?;
        Ok(segment)
    }
}
