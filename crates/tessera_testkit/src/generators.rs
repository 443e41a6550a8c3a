//! Property-based test generators using proptest.
//!
//! Provides strategies for documents, norm values and writer operation
//! sequences, plus a model that replays operations against an index and
//! tracks which documents should be live.

use crate::fixtures::id_doc;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_codec::{decode_norm, encode_norm, Document, Field, Index, Store, Term};
use tessera_core::{
    CoreResult, DeletionPolicy, IndexReader, IndexWriter, ReaderConfig, WriterConfig,
};
use tessera_store::Directory;

/// Strategy for whitespace-separated field text from a small vocabulary.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["aaa", "bbb", "ccc", "ddd"]), 1..6)
        .prop_map(|words| words.join(" "))
}

/// Strategy for documents with an analyzed `content` field, a stored `id`
/// and an optional boost.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (text_strategy(), 0u32..1000, prop::option::of(0.5f32..4.0)).prop_map(|(text, id, boost)| {
        let mut doc = Document::new();
        doc.add(Field::new("content", text, Store::No, Index::Analyzed))
            .add(Field::new("id", id.to_string(), Store::Yes, Index::NotAnalyzed));
        match boost {
            Some(boost) => doc.with_boost(boost),
            None => doc,
        }
    })
}

/// Strategy for norm values that survive encoding unchanged.
pub fn exact_norm_strategy() -> impl Strategy<Value = f32> {
    (1u8..=255).prop_map(decode_norm).prop_filter("zero norm", |n| *n > 0.0)
}

/// One step of a writer session.
#[derive(Debug, Clone)]
pub enum IndexOperation {
    /// Add this many documents with fresh ids.
    Add(usize),
    /// Delete the document with this id through the writer.
    DeleteId(u32),
    /// Publish a commit.
    Commit,
    /// Merge everything into one segment.
    Optimize,
    /// Close the writer and open a new one.
    Reopen,
    /// Close the writer, delete the id through a reader, reopen the writer.
    ReaderDeleteId(u32),
    /// Close the writer, set a norm through a reader, reopen the writer.
    ReaderSetNorm(u32),
}

/// Strategy for one operation.
pub fn index_operation_strategy() -> impl Strategy<Value = IndexOperation> {
    prop_oneof![
        4 => (1usize..8).prop_map(IndexOperation::Add),
        2 => (0u32..40).prop_map(IndexOperation::DeleteId),
        2 => Just(IndexOperation::Commit),
        1 => Just(IndexOperation::Optimize),
        1 => Just(IndexOperation::Reopen),
        1 => (0u32..40).prop_map(IndexOperation::ReaderDeleteId),
        1 => (0u32..40).prop_map(IndexOperation::ReaderSetNorm),
    ]
}

/// Strategy for a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<IndexOperation>> {
    prop::collection::vec(index_operation_strategy(), min_ops..max_ops)
}

/// Replays operations against an index and tracks the expected live ids.
pub struct OperationModel {
    dir: Arc<dyn Directory>,
    policy: Arc<dyn DeletionPolicy>,
    writer: Option<IndexWriter>,
    next_id: u32,
    live: BTreeSet<u32>,
}

impl OperationModel {
    /// Opens a writer on `dir` with `policy`.
    ///
    /// # Errors
    ///
    /// Propagates writer open failures.
    pub fn open(dir: Arc<dyn Directory>, policy: Arc<dyn DeletionPolicy>) -> CoreResult<Self> {
        let mut model = Self {
            dir,
            policy,
            writer: None,
            next_id: 0,
            live: BTreeSet::new(),
        };
        model.open_writer()?;
        Ok(model)
    }

    fn open_writer(&mut self) -> CoreResult<()> {
        let config = WriterConfig::new()
            .deletion_policy(Arc::clone(&self.policy))
            .max_buffered_docs(3)
            .merge_factor(3);
        self.writer = Some(IndexWriter::open(Arc::clone(&self.dir), config)?);
        Ok(())
    }

    fn close_writer(&mut self) -> CoreResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }

    fn with_reader(&mut self, f: impl FnOnce(&mut IndexReader) -> CoreResult<()>) -> CoreResult<()> {
        self.close_writer()?;
        let config = ReaderConfig::new().deletion_policy(Arc::clone(&self.policy));
        let mut reader = IndexReader::open(Arc::clone(&self.dir), config)?;
        f(&mut reader)?;
        reader.close()?;
        self.open_writer()
    }

    /// Applies one operation.
    ///
    /// # Errors
    ///
    /// Propagates any engine failure.
    pub fn apply(&mut self, op: &IndexOperation) -> CoreResult<()> {
        match op {
            IndexOperation::Add(count) => {
                for _ in 0..*count {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.writer_mut()?.add_document(id_doc(id))?;
                    self.live.insert(id);
                }
            }
            IndexOperation::DeleteId(id) => {
                self.writer_mut()?.delete_documents(Term::new("id", id.to_string()))?;
                self.live.remove(id);
            }
            IndexOperation::Commit => self.writer_mut()?.commit()?,
            IndexOperation::Optimize => self.writer_mut()?.optimize()?,
            IndexOperation::Reopen => {
                self.close_writer()?;
                self.open_writer()?;
            }
            IndexOperation::ReaderDeleteId(id) => {
                let term = Term::new("id", id.to_string());
                self.with_reader(|reader| reader.delete_documents(&term).map(|_| ()))?;
                self.live.remove(id);
            }
            IndexOperation::ReaderSetNorm(doc) => {
                let doc = *doc;
                self.with_reader(|reader| {
                    if doc < reader.max_doc() {
                        reader.set_norm(doc, "content", 2.0)?;
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    fn writer_mut(&mut self) -> CoreResult<&mut IndexWriter> {
        if self.writer.is_none() {
            self.open_writer()?;
        }
        self.writer
            .as_mut()
            .ok_or_else(|| tessera_core::CoreError::invalid_operation("writer not open"))
    }

    /// Closes the writer, publishing what is pending.
    ///
    /// # Errors
    ///
    /// Propagates close failures.
    pub fn finish(&mut self) -> CoreResult<()> {
        self.close_writer()
    }

    /// Ids that should be live once everything is committed.
    pub fn live_ids(&self) -> &BTreeSet<u32> {
        &self.live
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn documents_carry_content_and_id(doc in document_strategy()) {
            prop_assert!(doc.get("id").is_some());
            prop_assert!(doc.fields.iter().any(|f| f.name == "content"));
        }

        #[test]
        fn exact_norms_round_trip(norm in exact_norm_strategy()) {
            prop_assert_eq!(decode_norm(encode_norm(norm)), norm);
        }

        #[test]
        fn operation_sequences_have_requested_length(ops in operation_sequence_strategy(2, 10)) {
            prop_assert!(ops.len() >= 2 && ops.len() < 10);
        }
    }
}
