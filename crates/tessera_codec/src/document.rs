//! Documents, fields and terms.

use serde::{Deserialize, Serialize};

/// Whether a field value is kept for retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// Value is returned by stored-document lookups.
    Yes,
    /// Value is only indexed.
    No,
}

/// How a field value is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// Not searchable.
    No,
    /// Split into whitespace-separated terms, with norms.
    Analyzed,
    /// Indexed as one term, with norms.
    NotAnalyzed,
    /// Indexed as one term, without norms.
    NotAnalyzedNoNorms,
    /// Split into terms, without norms.
    AnalyzedNoNorms,
}

/// A named field value with indexing flags and a boost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: String,
    /// Returned by stored-document lookups.
    pub stored: bool,
    /// Searchable.
    pub indexed: bool,
    /// Split on whitespace when indexed.
    pub tokenized: bool,
    /// No norm byte is kept for this field.
    pub omit_norms: bool,
    /// Multiplier folded into the norm.
    pub boost: f32,
}

impl Field {
    /// Creates a field.
    pub fn new(name: impl Into<String>, value: impl Into<String>, store: Store, index: Index) -> Self {
        let (indexed, tokenized, omit_norms) = match index {
            Index::No => (false, false, true),
            Index::Analyzed => (true, true, false),
            Index::NotAnalyzed => (true, false, false),
            Index::NotAnalyzedNoNorms => (true, false, true),
            Index::AnalyzedNoNorms => (true, true, true),
        };
        Self {
            name: name.into(),
            value: value.into(),
            stored: store == Store::Yes,
            indexed,
            tokenized,
            omit_norms,
            boost: 1.0,
        }
    }

    /// Sets the field boost.
    #[must_use]
    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    /// Returns whether a norm byte is kept for this field.
    #[must_use]
    pub fn has_norms(&self) -> bool {
        self.indexed && !self.omit_norms
    }
}

/// An ordered list of fields plus a document-level boost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Fields in insertion order.
    pub fields: Vec<Field>,
    /// Multiplier folded into every norm of this document.
    pub boost: f32,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            boost: 1.0,
        }
    }
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    pub fn add(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Sets the document boost.
    #[must_use]
    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    /// Returns the first stored value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.stored && f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Returns a copy holding only the stored fields.
    #[must_use]
    pub fn stored_only(&self) -> Self {
        Self {
            fields: self.fields.iter().filter(|f| f.stored).cloned().collect(),
            boost: self.boost,
        }
    }

    /// Returns whether the document indexes `term`.
    #[must_use]
    pub fn contains_term(&self, term: &Term) -> bool {
        self.fields
            .iter()
            .filter(|f| f.indexed && f.name == term.field)
            .any(|f| crate::analysis::tokens(f).any(|t| t == term.text))
    }
}

/// A field name and token pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term {
    /// Field name.
    pub field: String,
    /// Token text.
    pub text: String,
}

impl Term {
    /// Creates a term.
    pub fn new(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            text: text.into(),
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}
