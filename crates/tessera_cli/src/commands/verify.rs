//! Verify command implementation.

use super::open_directory;
use std::path::Path;
use std::sync::Arc;
use tessera_core::file_names::{generation_from_segments_file_name, is_segments_file};
use tessera_core::{list_commits, IndexReader, ReaderConfig, SegmentInfos};
use tessera_store::Directory;
use tracing::{debug, warn};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of commits checked.
    pub commits_checked: usize,
    /// Number of segments checked across all commits.
    pub segments_checked: usize,
    /// Number of documents read back.
    pub docs_read: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if nothing was found wrong.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks every commit in `dir`.
///
/// Each commit file must decode and every file it references must exist.
/// Commits that pass are then opened read-only and every live document and
/// norm is read back.
pub fn check(dir: &Arc<dyn Directory>) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();

    let mut generations = Vec::new();
    for name in dir.list_all()? {
        if is_segments_file(&name) {
            generations.push(generation_from_segments_file_name(&name)?);
        }
    }
    generations.sort_unstable();
    if generations.is_empty() {
        result.errors.push("no commit found".to_string());
        return Ok(result);
    }

    for generation in &generations {
        debug!(target: "tessera::cli", generation = generation.as_u64(), "checking commit file");
        result.commits_checked += 1;
        let infos = match SegmentInfos::read_generation(dir.as_ref(), *generation) {
            Ok(infos) => infos,
            Err(e) => {
                result.errors.push(e.to_string());
                continue;
            }
        };
        for file in infos.files(false) {
            if !dir.file_exists(&file)? {
                result.errors.push(format!(
                    "{} references missing file {file}",
                    infos.segments_file_name()
                ));
            }
        }
    }
    if !result.is_ok() {
        return Ok(result);
    }

    for commit in list_commits(dir.as_ref())? {
        let name = commit.segments_file_name().to_string();
        let config = ReaderConfig::new()
            .read_only(true)
            .index_commit(Arc::clone(&commit));
        match IndexReader::open(Arc::clone(dir), config).and_then(|mut reader| {
            let docs = read_back(&reader);
            reader.close()?;
            docs
        }) {
            Ok(docs) => {
                result.segments_checked += commit.segment_count();
                result.docs_read += docs;
            }
            Err(e) => {
                warn!(target: "tessera::cli", commit = %name, error = %e, "commit failed to read back");
                result.errors.push(format!("{name}: {e}"));
            }
        }
    }
    Ok(result)
}

fn read_back(reader: &IndexReader) -> tessera_core::CoreResult<u64> {
    let mut docs = 0;
    for doc in 0..reader.max_doc() {
        if !reader.is_deleted(doc) {
            reader.document(doc)?;
            docs += 1;
        }
    }
    for index in 0..reader.segment_count() {
        if let Some(segment) = reader.segment_reader(index) {
            for field in segment.field_infos().iter() {
                segment.norms(&field.name)?;
            }
        }
    }
    Ok(docs)
}

fn print_result(result: &VerifyResult) {
    println!("Commits checked:  {}", result.commits_checked);
    println!("Segments checked: {}", result.segments_checked);
    println!("Documents read:   {}", result.docs_read);
    if !result.errors.is_empty() {
        println!("Errors:");
        for error in &result.errors {
            println!("  - {error}");
        }
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying index at {}", path.display());
    println!();

    let dir = open_directory(path)?;
    let result = check(&dir)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Index verification passed");
        Ok(())
    } else {
        println!("✗ Index verification failed");
        Err("Verification failed".into())
    }
}
