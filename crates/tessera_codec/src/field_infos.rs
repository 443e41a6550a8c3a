//! Per-segment field numbering.

use crate::document::Document;
use serde::{Deserialize, Serialize};

/// Metadata for one field of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Field number, dense from zero in order of first appearance.
    pub number: u32,
    /// Searchable in at least one document.
    pub indexed: bool,
    /// No document of the segment keeps a norm for this field.
    pub omit_norms: bool,
}

impl FieldInfo {
    /// Returns whether the segment keeps a norm byte per document for this
    /// field.
    #[must_use]
    pub fn has_norms(&self) -> bool {
        self.indexed && !self.omit_norms
    }
}

/// The fields of a segment, numbered in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfos {
    fields: Vec<FieldInfo>,
}

impl FieldInfos {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field, or widens the flags of an existing one.
    ///
    /// Norms are kept as soon as one occurrence wants them.
    pub fn add(&mut self, name: &str, indexed: bool, omit_norms: bool) -> u32 {
        if let Some(info) = self.fields.iter_mut().find(|f| f.name == name) {
            info.indexed |= indexed;
            info.omit_norms &= omit_norms;
            return info.number;
        }
        let number = u32::try_from(self.fields.len()).unwrap_or(u32::MAX);
        self.fields.push(FieldInfo {
            name: name.to_string(),
            number,
            indexed,
            omit_norms,
        });
        number
    }

    /// Registers every field of a document.
    pub fn add_document(&mut self, doc: &Document) {
        for field in &doc.fields {
            self.add(&field.name, field.indexed, field.omit_norms || !field.indexed);
        }
    }

    /// Looks a field up by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks a field up by number.
    #[must_use]
    pub fn by_number(&self, number: u32) -> Option<&FieldInfo> {
        self.fields.get(number as usize)
    }

    /// Returns the number of a field.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<u32> {
        self.by_name(name).map(|f| f.number)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no field is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in number order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Field, Index, Store};

    #[test]
    fn numbers_follow_first_appearance() {
        let mut infos = FieldInfos::new();
        assert_eq!(infos.add("content", true, false), 0);
        assert_eq!(infos.add("id", true, false), 1);
        assert_eq!(infos.add("content", true, false), 0);
        assert_eq!(infos.len(), 2);
        assert_eq!(infos.number("id"), Some(1));
        assert_eq!(infos.by_number(0).map(|f| f.name.as_str()), Some("content"));
        assert!(infos.number("missing").is_none());
    }

    #[test]
    fn norms_kept_if_any_occurrence_wants_them() {
        let mut infos = FieldInfos::new();
        infos.add("f", true, true);
        assert!(!infos.by_name("f").unwrap().has_norms());
        infos.add("f", true, false);
        assert!(infos.by_name("f").unwrap().has_norms());
        infos.add("f", true, true);
        assert!(infos.by_name("f").unwrap().has_norms());
    }

    #[test]
    fn unindexed_fields_have_no_norms() {
        let mut doc = Document::new();
        doc.add(Field::new("raw", "x", Store::Yes, Index::No))
            .add(Field::new("body", "a b", Store::No, Index::Analyzed));
        let mut infos = FieldInfos::new();
        infos.add_document(&doc);
        assert!(!infos.by_name("raw").unwrap().has_norms());
        assert!(infos.by_name("body").unwrap().has_norms());
    }
}
