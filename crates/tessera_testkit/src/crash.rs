//! Fault injection scenarios for the commit protocol.
//!
//! Each scenario builds a small committed index on a [`FaultyDirectory`],
//! arms one failure, runs the operation that hits it and checks that:
//!
//! 1. **The operation reports the failure** (except for file deletion,
//!    which must never fail a commit)
//! 2. **The previous commit is still the latest and still readable**
//! 3. **The operation succeeds once the fault is cleared**
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::crash::{FaultHarness, FaultPoint};
//!
//! let mut harness = FaultHarness::new();
//! let result = harness.run(FaultPoint::CommitRename);
//! assert!(result.passed, "{:?}", result.error);
//! ```

use crate::fixtures::{id_doc, list_files};
use std::sync::Arc;
use tessera_codec::Term;
use tessera_core::{
    latest_generation, CoreError, CoreResult, Generation, IndexReader, IndexWriter, ReaderConfig,
    WriterConfig,
};
use tessera_store::{Directory, FaultOp, FaultyDirectory, RamDirectory};

/// Documents in the base index.
const BASE_DOCS: u32 = 5;

/// Points at which a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Writing the files of a flushed segment.
    SegmentWrite,
    /// Writing the files of a merged segment.
    MergeWrite,
    /// Writing the pending commit file.
    CommitWrite,
    /// Renaming the pending commit file into place.
    CommitRename,
    /// Writing a deletion file from a reader.
    DeletionsWrite,
    /// Writing a separate norm file from a reader.
    NormsWrite,
    /// Deleting a commit the policy no longer wants.
    FileDelete,
}

impl FaultPoint {
    /// Every fault point.
    pub const ALL: [FaultPoint; 7] = [
        FaultPoint::SegmentWrite,
        FaultPoint::MergeWrite,
        FaultPoint::CommitWrite,
        FaultPoint::CommitRename,
        FaultPoint::DeletionsWrite,
        FaultPoint::NormsWrite,
        FaultPoint::FileDelete,
    ];
}

/// Result of one fault scenario.
#[derive(Debug, Clone)]
pub struct FaultResult {
    /// The injected fault.
    pub point: FaultPoint,
    /// Whether every check held.
    pub passed: bool,
    /// Live documents after the fault was cleared and the operation redone.
    pub docs_after: u32,
    /// The first failed check, if any.
    pub error: Option<String>,
}

impl FaultResult {
    fn pass(point: FaultPoint, docs_after: u32) -> Self {
        Self {
            point,
            passed: true,
            docs_after,
            error: None,
        }
    }

    fn fail(point: FaultPoint, error: impl Into<String>) -> Self {
        Self {
            point,
            passed: false,
            docs_after: 0,
            error: Some(error.into()),
        }
    }
}

/// Runs fault scenarios, each on a fresh directory.
#[derive(Debug, Default)]
pub struct FaultHarness {
    results: Vec<FaultResult>,
}

impl FaultHarness {
    /// Creates a harness.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one scenario and records its result.
    pub fn run(&mut self, point: FaultPoint) -> FaultResult {
        let result = match Scenario::new().and_then(|s| s.run(point)) {
            Ok(docs) => FaultResult::pass(point, docs),
            Err(e) => FaultResult::fail(point, e.to_string()),
        };
        self.results.push(result.clone());
        result
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) -> Vec<FaultResult> {
        FaultPoint::ALL.iter().map(|p| self.run(*p)).collect()
    }

    /// Returns whether every recorded scenario passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Returns a one-line-per-scenario summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        for r in &self.results {
            let status = if r.passed { "PASS" } else { "FAIL" };
            summary.push_str(&format!("[{status}] {:?}", r.point));
            if let Some(error) = &r.error {
                summary.push_str(&format!(": {error}"));
            }
            summary.push('\n');
        }
        summary
    }
}

struct Scenario {
    faulty: FaultyDirectory,
    dir: Arc<dyn Directory>,
    base_generation: Generation,
}

fn check(condition: bool, message: impl FnOnce() -> String) -> CoreResult<()> {
    if condition {
        Ok(())
    } else {
        Err(CoreError::invalid_operation(message()))
    }
}

impl Scenario {
    /// Commits `BASE_DOCS` documents in one segment `_0`.
    fn new() -> CoreResult<Self> {
        let faulty = FaultyDirectory::new(Arc::new(RamDirectory::new()));
        let dir: Arc<dyn Directory> = Arc::new(faulty.clone());
        let mut writer = IndexWriter::open(Arc::clone(&dir), WriterConfig::new())?;
        for id in 0..BASE_DOCS {
            writer.add_document(id_doc(id))?;
        }
        writer.close()?;
        let base_generation = latest_generation(dir.as_ref())?.unwrap_or_default();
        Ok(Self {
            faulty,
            dir,
            base_generation,
        })
    }

    fn writer(&self) -> CoreResult<IndexWriter> {
        IndexWriter::open(Arc::clone(&self.dir), WriterConfig::new())
    }

    fn reader(&self) -> CoreResult<IndexReader> {
        IndexReader::open(Arc::clone(&self.dir), ReaderConfig::new())
    }

    /// The base commit must still be the latest, with its documents.
    fn check_untouched(&self) -> CoreResult<()> {
        let latest = latest_generation(self.dir.as_ref())?;
        check(latest == Some(self.base_generation), || {
            format!("latest commit moved to {latest:?} after a failed operation")
        })?;
        let mut reader = IndexReader::open(Arc::clone(&self.dir), ReaderConfig::new().read_only(true))?;
        let docs = reader.num_docs();
        reader.close()?;
        check(docs == BASE_DOCS, || format!("base commit shows {docs} docs"))
    }

    fn expect_failure<T>(&self, result: CoreResult<T>) -> CoreResult<()> {
        check(result.is_err(), || "operation succeeded despite the fault".to_string())?;
        check(self.faulty.injected_count() > 0, || "fault was never hit".to_string())
    }

    fn live_docs(&self) -> CoreResult<u32> {
        let mut reader = IndexReader::open(Arc::clone(&self.dir), ReaderConfig::new().read_only(true))?;
        let docs = reader.num_docs();
        reader.close()?;
        Ok(docs)
    }

    fn run(self, point: FaultPoint) -> CoreResult<u32> {
        match point {
            FaultPoint::SegmentWrite => self.writer_commit(FaultOp::CreateOutput, "_1."),
            FaultPoint::CommitWrite => self.writer_commit(FaultOp::Write, "pending_segments_"),
            FaultPoint::CommitRename => self.writer_commit(FaultOp::Rename, "pending_segments_"),
            FaultPoint::MergeWrite => self.merge(),
            FaultPoint::DeletionsWrite => self.reader_change(".del", |r| r.delete_document(0)),
            FaultPoint::NormsWrite => {
                self.reader_change(".s", |r| r.set_norm(0, "content", 2.0))
            }
            FaultPoint::FileDelete => self.file_delete(),
        }
    }

    fn writer_commit(self, op: FaultOp, pattern: &str) -> CoreResult<u32> {
        let mut writer = self.writer()?;
        for id in BASE_DOCS..BASE_DOCS + 3 {
            writer.add_document(id_doc(id))?;
        }
        self.faulty.fail(op, pattern);
        self.expect_failure(writer.commit())?;
        self.check_untouched()?;
        check(
            !list_files(self.dir.as_ref()).iter().any(|f| f.starts_with("pending_segments")),
            || "pending commit file left behind".to_string(),
        )?;

        self.faulty.clear();
        writer.close()?;
        self.live_docs()
    }

    fn merge(self) -> CoreResult<u32> {
        let mut writer = self.writer()?;
        for id in BASE_DOCS..BASE_DOCS + 3 {
            writer.add_document(id_doc(id))?;
        }
        writer.flush()?;
        self.faulty.fail(FaultOp::CreateOutput, "_2.");
        let result = writer.optimize();
        check(matches!(result, Err(CoreError::Merge { .. })), || {
            format!("optimize returned {result:?}")
        })?;
        check(writer.segment_count() == 2, || {
            format!("failed merge left {} segments", writer.segment_count())
        })?;
        self.check_untouched()?;

        self.faulty.clear();
        writer.optimize()?;
        writer.close()?;
        self.live_docs()
    }

    fn reader_change(
        self,
        pattern: &str,
        change: impl Fn(&mut IndexReader) -> CoreResult<()>,
    ) -> CoreResult<u32> {
        let mut reader = self.reader()?;
        change(&mut reader)?;
        self.faulty.fail(FaultOp::CreateOutput, pattern);
        self.expect_failure(reader.flush())?;
        check(reader.has_changes(), || "failed flush dropped the changes".to_string())?;
        self.check_untouched()?;

        self.faulty.clear();
        reader.close()?;
        check(self.writer()?.close().is_ok(), || "writer blocked after reader commit".to_string())?;
        self.live_docs()
    }

    fn file_delete(self) -> CoreResult<u32> {
        self.faulty.fail(FaultOp::Delete, "segments_");
        let mut writer = self.writer()?;
        writer.delete_documents(Term::new("id", "0"))?;
        writer.commit()?;
        let stale = tessera_core::file_names::segments_file_name(self.base_generation);
        check(self.dir.file_exists(&stale)?, || {
            "commit file removed despite the fault".to_string()
        })?;

        self.faulty.clear();
        writer.delete_documents(Term::new("id", "1"))?;
        writer.commit()?;
        check(!self.dir.file_exists(&stale)?, || {
            "failed deletion was not retried".to_string()
        })?;
        writer.close()?;
        self.live_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(point: FaultPoint) -> FaultResult {
        let result = FaultHarness::new().run(point);
        assert!(result.passed, "{point:?}: {:?}", result.error);
        result
    }

    #[test]
    fn test_segment_write_failure() {
        assert_eq!(run(FaultPoint::SegmentWrite).docs_after, 8);
    }

    #[test]
    fn test_merge_write_failure() {
        assert_eq!(run(FaultPoint::MergeWrite).docs_after, 8);
    }

    #[test]
    fn test_commit_write_failure() {
        assert_eq!(run(FaultPoint::CommitWrite).docs_after, 8);
    }

    #[test]
    fn test_commit_rename_failure() {
        assert_eq!(run(FaultPoint::CommitRename).docs_after, 8);
    }

    #[test]
    fn test_deletions_write_failure() {
        assert_eq!(run(FaultPoint::DeletionsWrite).docs_after, 4);
    }

    #[test]
    fn test_norms_write_failure() {
        assert_eq!(run(FaultPoint::NormsWrite).docs_after, 5);
    }

    #[test]
    fn test_file_delete_failure() {
        assert_eq!(run(FaultPoint::FileDelete).docs_after, 3);
    }

    #[test]
    fn test_all_fault_scenarios() {
        let mut harness = FaultHarness::new();
        harness.run_all();
        println!("{}", harness.summary());
        assert!(harness.all_passed(), "Some fault scenarios failed");
    }
}
