//! Segment descriptors.

use crate::file_names::{
    file_name_from_generation, segment_file_name, separate_norms_extension, COMPOUND_EXTENSION,
    DELETES_EXTENSION, FIELDS_EXTENSION, FIELD_INFOS_EXTENSION, NORMS_EXTENSION,
};
use crate::types::Generation;
use std::collections::BTreeMap;

/// Describes one segment as referenced by a commit.
///
/// The segment data files never change once written. Deletions and norm
/// updates are layered on top as generation-stamped overlay files; bumping
/// a generation here is how a new commit points at a new overlay while
/// older commits keep theirs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment name, `_<radix36 counter>`.
    pub name: String,
    /// Number of documents, deleted ones included.
    pub doc_count: u32,
    /// Generation of the deletions file; 0 when nothing is deleted.
    pub del_gen: Generation,
    /// Number of deleted documents.
    pub del_count: u32,
    /// Data lives in a single `.cfs` file.
    pub compound: bool,
    /// Generation of the separate-norm file per field number.
    pub norm_gens: BTreeMap<u32, Generation>,
}

impl SegmentInfo {
    /// Creates a descriptor for freshly written segment data.
    pub fn new(name: impl Into<String>, doc_count: u32, compound: bool) -> Self {
        Self {
            name: name.into(),
            doc_count,
            del_gen: Generation::new(0),
            del_count: 0,
            compound,
            norm_gens: BTreeMap::new(),
        }
    }

    /// Returns true if some documents are deleted.
    #[must_use]
    pub fn has_deletions(&self) -> bool {
        self.del_gen.as_u64() > 0
    }

    /// Returns true if any field has a separate norm file.
    #[must_use]
    pub fn has_separate_norms(&self) -> bool {
        !self.norm_gens.is_empty()
    }

    /// Returns the number of live documents.
    #[must_use]
    pub fn live_docs(&self) -> u32 {
        self.doc_count.saturating_sub(self.del_count)
    }

    /// Returns the current deletions file, if any.
    #[must_use]
    pub fn del_file_name(&self) -> Option<String> {
        self.has_deletions()
            .then(|| file_name_from_generation(&self.name, DELETES_EXTENSION, self.del_gen))
    }

    /// Returns the current separate-norm file of a field, if any.
    #[must_use]
    pub fn norm_file_name(&self, field_number: u32) -> Option<String> {
        self.norm_gens.get(&field_number).map(|g| {
            file_name_from_generation(&self.name, &separate_norms_extension(field_number), *g)
        })
    }

    /// Moves to the next deletions generation and returns its file name.
    pub fn advance_del_gen(&mut self) -> String {
        self.del_gen = self.del_gen.next();
        file_name_from_generation(&self.name, DELETES_EXTENSION, self.del_gen)
    }

    /// Moves a field to its next norm generation and returns its file name.
    pub fn advance_norm_gen(&mut self, field_number: u32) -> String {
        let generation = self
            .norm_gens
            .get(&field_number)
            .map_or(Generation::new(1), |g| g.next());
        self.norm_gens.insert(field_number, generation);
        file_name_from_generation(&self.name, &separate_norms_extension(field_number), generation)
    }

    /// Returns the immutable data files.
    #[must_use]
    pub fn data_files(&self) -> Vec<String> {
        if self.compound {
            vec![segment_file_name(&self.name, COMPOUND_EXTENSION)]
        } else {
            vec![
                segment_file_name(&self.name, FIELD_INFOS_EXTENSION),
                segment_file_name(&self.name, FIELDS_EXTENSION),
                segment_file_name(&self.name, NORMS_EXTENSION),
            ]
        }
    }

    /// Returns every file this descriptor references.
    #[must_use]
    pub fn files(&self) -> Vec<String> {
        let mut files = self.data_files();
        files.extend(self.del_file_name());
        files.extend(self.norm_gens.keys().filter_map(|n| self.norm_file_name(*n)));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_segment_files() {
        let info = SegmentInfo::new("_0", 35, true);
        assert!(!info.has_deletions());
        assert_eq!(info.files(), vec!["_0.cfs"]);

        let split = SegmentInfo::new("_1", 3, false);
        assert_eq!(split.files(), vec!["_1.fnm", "_1.fdt", "_1.nrm"]);
    }

    #[test]
    fn overlays_add_generation_files() {
        let mut info = SegmentInfo::new("_0", 35, true);
        assert_eq!(info.advance_del_gen(), "_0_1.del");
        info.del_count = 1;
        assert_eq!(info.advance_norm_gen(0), "_0_1.s0");
        assert_eq!(info.advance_norm_gen(0), "_0_2.s0");
        assert_eq!(info.files(), vec!["_0.cfs", "_0_1.del", "_0_2.s0"]);
        assert_eq!(info.live_docs(), 34);
        assert!(info.has_separate_norms());
    }
}
