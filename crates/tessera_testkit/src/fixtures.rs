//! Test fixtures and index helpers.
//!
//! Provides directories with automatic cleanup, the documents the
//! scenarios index, and small helpers for inspecting an index.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tessera_codec::{Document, Field, Index, Store, Term};
use tessera_core::file_names::{is_segments_file, segments_file_name, SEGMENTS_GEN};
use tessera_core::{
    DeletionPolicy, Generation, IndexReader, IndexWriter, OpenMode, ReaderConfig, WriterConfig,
};
use tessera_store::{Directory, FsDirectory, RamDirectory, WRITE_LOCK_NAME};

/// A test directory with automatic cleanup.
pub struct TestIndex {
    /// The directory every scenario works on.
    pub dir: Arc<dyn Directory>,
    ram: Option<Arc<RamDirectory>>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestIndex {
    /// Creates an empty in-memory index directory.
    pub fn memory() -> Self {
        let ram = Arc::new(RamDirectory::new());
        Self {
            dir: Arc::clone(&ram) as Arc<dyn Directory>,
            ram: Some(ram),
            _temp_dir: None,
        }
    }

    /// Creates an empty index directory on disk.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = FsDirectory::open(temp_dir.path()).expect("Failed to open directory");
        Self {
            dir: Arc::new(dir),
            ram: None,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the in-memory directory, if this index lives in memory.
    pub fn ram(&self) -> Option<&RamDirectory> {
        self.ram.as_deref()
    }

    /// Returns a new handle on the directory.
    pub fn handle(&self) -> Arc<dyn Directory> {
        Arc::clone(&self.dir)
    }

    /// Sorted file listing.
    pub fn files(&self) -> Vec<String> {
        list_files(self.dir.as_ref())
    }

    /// Opens a writer with `config`.
    pub fn writer(&self, config: WriterConfig) -> IndexWriter {
        IndexWriter::open(self.handle(), config).expect("Failed to open writer")
    }

    /// Opens a reader on the latest commit.
    pub fn reader(&self) -> IndexReader {
        IndexReader::open(self.handle(), ReaderConfig::new()).expect("Failed to open reader")
    }

    /// Opens a read-only reader on the latest commit.
    pub fn read_only(&self) -> IndexReader {
        IndexReader::open(self.handle(), ReaderConfig::new().read_only(true))
            .expect("Failed to open reader")
    }
}

impl std::ops::Deref for TestIndex {
    type Target = dyn Directory;

    fn deref(&self) -> &Self::Target {
        self.dir.as_ref()
    }
}

/// The term every scenario document carries.
pub fn content_term() -> Term {
    Term::new("content", "aaa")
}

/// A document with only the analyzed, unstored `content: aaa` field.
pub fn content_doc() -> Document {
    let mut doc = Document::new();
    doc.add(Field::new("content", "aaa", Store::No, Index::Analyzed));
    doc
}

/// `content: aaa` plus a stored, untokenized `id`.
pub fn id_doc(id: u32) -> Document {
    let mut doc = content_doc();
    doc.add(Field::new("id", id.to_string(), Store::Yes, Index::NotAnalyzed));
    doc
}

/// Adds `count` content documents.
pub fn add_content_docs(writer: &mut IndexWriter, count: usize) {
    for _ in 0..count {
        writer.add_document(content_doc()).expect("Failed to add document");
    }
}

/// Writer configuration shared by the policy scenarios.
pub fn policy_config(policy: Arc<dyn DeletionPolicy>, compound: bool) -> WriterConfig {
    WriterConfig::new()
        .deletion_policy(policy)
        .use_compound_file(compound)
        .open_mode(OpenMode::CreateOrAppend)
}

/// Number of live documents matching `content: aaa`.
pub fn content_hits(reader: &IndexReader) -> usize {
    reader.term_docs(&content_term()).len()
}

/// Sorted file listing, without the write lock file.
pub fn list_files(dir: &dyn Directory) -> Vec<String> {
    let mut files = dir.list_all().expect("Failed to list directory");
    files.retain(|name| name != WRITE_LOCK_NAME);
    files.sort();
    files
}

/// Generations of every `segments_N` file, ascending.
pub fn commit_generations(dir: &dyn Directory) -> Vec<Generation> {
    let mut generations: Vec<Generation> = list_files(dir)
        .iter()
        .filter(|name| is_segments_file(name))
        .filter_map(|name| tessera_core::file_names::generation_from_segments_file_name(name).ok())
        .collect();
    generations.sort();
    generations
}

/// Deletes `segments.gen` if present.
pub fn remove_generation_file(dir: &dyn Directory) {
    if dir.file_exists(SEGMENTS_GEN).expect("Failed to stat segments.gen") {
        dir.delete_file(SEGMENTS_GEN).expect("Failed to delete segments.gen");
    }
}

/// Deletes the commit file of one generation.
pub fn remove_commit_file(dir: &dyn Directory, generation: Generation) {
    dir.delete_file(&segments_file_name(generation))
        .expect("Failed to delete commit file");
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Moves the modification time of every commit file `age` into the past.
pub fn age_commit_files(ram: &RamDirectory, age: Duration) {
    let then = now_millis().saturating_sub(age.as_millis() as u64);
    for name in list_files(ram) {
        if is_segments_file(&name) {
            ram.set_file_modified(&name, then).expect("Failed to set mtime");
        }
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates an index of `count` id documents in one compound segment.
    pub fn single_segment_index(count: u32) -> TestIndex {
        let index = TestIndex::memory();
        let mut writer = index.writer(WriterConfig::new().max_buffered_docs(count as usize + 1));
        for id in 0..count {
            writer.add_document(id_doc(id)).expect("Failed to add document");
        }
        writer.close().expect("Failed to close writer");
        index
    }

    /// Creates an index with four analyzed fields per document, merged into
    /// one segment.
    pub fn four_field_index(count: u32) -> TestIndex {
        let index = TestIndex::memory();
        let mut writer = index.writer(WriterConfig::new());
        for n in 0..count {
            let mut doc = Document::new();
            doc.add(Field::new("id", n.to_string(), Store::Yes, Index::NotAnalyzed));
            for field in 1..=4 {
                doc.add(Field::new(
                    format!("field{field}"),
                    format!("a{n}"),
                    Store::Yes,
                    Index::Analyzed,
                ));
            }
            writer.add_document(doc).expect("Failed to add document");
        }
        writer.optimize().expect("Failed to optimize");
        writer.close().expect("Failed to close writer");
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_index_starts_empty() {
        let index = TestIndex::memory();
        assert!(index.files().is_empty());
        assert!(index.ram().is_some());
    }

    #[test]
    fn test_file_index_starts_empty() {
        let index = TestIndex::file();
        assert!(index.files().is_empty());
        assert!(index.ram().is_none());
    }

    #[test]
    fn test_lock_file_left_out_of_listing() {
        let index = TestIndex::file();
        index.writer(WriterConfig::new()).close().unwrap();
        assert!(index.dir.file_exists(WRITE_LOCK_NAME).unwrap());
        assert_eq!(index.files(), vec!["segments.gen", "segments_1"]);
    }

    #[test]
    fn test_single_segment_index() {
        let index = scenarios::single_segment_index(12);
        let reader = index.read_only();
        assert_eq!(reader.num_docs(), 12);
        assert_eq!(reader.segment_count(), 1);
        assert_eq!(content_hits(&reader), 12);
        assert_eq!(commit_generations(&*index), vec![Generation::new(2)]);
    }

    #[test]
    fn test_aging_commit_files() {
        let index = scenarios::single_segment_index(1);
        let ram = index.ram().unwrap();
        age_commit_files(ram, Duration::from_secs(60));
        let modified = ram.file_modified("segments_2").unwrap();
        assert!(now_millis() - modified >= 60_000);
    }
}
