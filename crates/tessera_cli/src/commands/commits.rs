//! Commits command implementation.

use super::{open_directory, Format};
use serde::Serialize;
use std::path::Path;
use tessera_core::{latest_generation, list_commits};
use tessera_store::Directory;

/// One published commit.
#[derive(Debug, Serialize)]
pub struct CommitRow {
    /// Commit generation.
    pub generation: u64,
    /// Commit file name.
    pub file: String,
    /// Index version after this commit.
    pub version: u64,
    /// Commit timestamp in milliseconds.
    pub timestamp: u64,
    /// Number of segments.
    pub segments: usize,
    /// Live documents.
    pub docs: u32,
    /// One segment and no deletions.
    pub optimized: bool,
    /// The commit readers open by default.
    pub latest: bool,
}

/// Lists every commit in `dir`, oldest first.
pub fn collect(dir: &dyn Directory) -> Result<Vec<CommitRow>, Box<dyn std::error::Error>> {
    let latest = latest_generation(dir)?;
    let rows = list_commits(dir)?
        .iter()
        .map(|commit| CommitRow {
            generation: commit.generation().as_u64(),
            file: commit.segments_file_name().to_string(),
            version: commit.version(),
            timestamp: commit.timestamp(),
            segments: commit.segment_count(),
            docs: commit.num_docs(),
            optimized: commit.is_optimized(),
            latest: Some(commit.generation()) == latest,
        })
        .collect();
    Ok(rows)
}

/// Runs the commits command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_directory(path)?;
    let rows = collect(dir.as_ref())?;
    if rows.is_empty() {
        return Err(format!("No index found at {}", path.display()).into());
    }

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Text => {
            println!(
                "{:<16} {:>6} {:>14} {:>16} {:>8} {:>10}  flags",
                "file", "gen", "version", "timestamp", "segments", "docs"
            );
            for row in &rows {
                let mut flags = Vec::new();
                if row.optimized {
                    flags.push("optimized");
                }
                if row.latest {
                    flags.push("latest");
                }
                println!(
                    "{:<16} {:>6} {:>14} {:>16} {:>8} {:>10}  {}",
                    row.file,
                    row.generation,
                    row.version,
                    row.timestamp,
                    row.segments,
                    row.docs,
                    flags.join(",")
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_codec::{Document, Field, Index, Store};
    use tessera_core::{IndexWriter, KeepAllDeletionPolicy, WriterConfig};
    use tessera_store::RamDirectory;

    #[test]
    fn lists_commits_oldest_first() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let config = WriterConfig::new().deletion_policy(Arc::new(KeepAllDeletionPolicy));
        let mut writer = IndexWriter::open(Arc::clone(&dir), config).unwrap();
        for _ in 0..2 {
            let mut doc = Document::new();
            doc.add(Field::new("content", "aaa", Store::No, Index::Analyzed));
            writer.add_document(doc).unwrap();
            writer.commit().unwrap();
        }
        writer.close().unwrap();

        let rows = collect(dir.as_ref()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.iter().map(|r| r.generation).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(rows[2].docs, 2);
        assert!(rows[2].latest);
        assert!(!rows[1].latest);
        assert!(rows[1].optimized);
        assert!(!rows[2].optimized);
    }

    #[test]
    fn empty_directory_has_no_commits() {
        let dir = RamDirectory::new();
        assert!(collect(&dir).unwrap().is_empty());
    }
}
