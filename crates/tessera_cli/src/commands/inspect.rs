//! Inspect command implementation.

use super::{open_directory, Format};
use serde::Serialize;
use std::path::Path;
use tessera_core::{latest_generation, Generation, SegmentInfos};
use tessera_store::Directory;

/// Inspection result for one commit.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Commit file name.
    pub file: String,
    /// Commit generation.
    pub generation: u64,
    /// Index version.
    pub version: u64,
    /// Commit timestamp in milliseconds.
    pub timestamp: u64,
    /// Documents including deleted ones.
    pub max_doc: u32,
    /// Live documents.
    pub num_docs: u32,
    /// Total size of the files the commit references.
    pub total_size: u64,
    /// Segments in commit order.
    pub segments: Vec<SegmentSummary>,
}

/// Details of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    /// Segment name.
    pub name: String,
    /// Documents including deleted ones.
    pub doc_count: u32,
    /// Deleted documents.
    pub del_count: u32,
    /// Stored as a single compound file.
    pub compound: bool,
    /// Generation of the deletions file, 0 if none.
    pub del_gen: u64,
    /// Field numbers with a separate norm file, and its generation.
    pub norm_gens: Vec<(u32, u64)>,
    /// Files the segment uses in this commit.
    pub files: Vec<String>,
    /// Their total size in bytes.
    pub size: u64,
}

/// Inspects the commit of `generation`, or the latest one.
pub fn collect(
    dir: &dyn Directory,
    generation: Option<u64>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let generation = match generation {
        Some(generation) => Generation::new(generation),
        None => latest_generation(dir)?.ok_or("No index found")?,
    };
    let infos = SegmentInfos::read_generation(dir, generation)?;

    let mut segments = Vec::with_capacity(infos.segments.len());
    for info in &infos.segments {
        let files = info.files();
        let mut size = 0;
        for file in &files {
            size += dir.file_length(file)?;
        }
        segments.push(SegmentSummary {
            name: info.name.clone(),
            doc_count: info.doc_count,
            del_count: info.del_count,
            compound: info.compound,
            del_gen: info.del_gen.as_u64(),
            norm_gens: info
                .norm_gens
                .iter()
                .map(|(field, generation)| (*field, generation.as_u64()))
                .collect(),
            files,
            size,
        });
    }

    let file = infos.segments_file_name();
    let total_size = dir.file_length(&file)? + segments.iter().map(|s| s.size).sum::<u64>();
    Ok(InspectResult {
        file,
        generation: infos.generation.as_u64(),
        version: infos.version,
        timestamp: infos.timestamp,
        max_doc: infos.max_doc(),
        num_docs: infos.num_docs(),
        total_size,
        segments,
    })
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    generation: Option<u64>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_directory(path)?;
    let result = collect(dir.as_ref(), generation)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Tessera Commit Inspection");
    println!("=========================");
    println!();
    println!("Commit:     {} (generation {})", result.file, result.generation);
    println!("Version:    {}", result.version);
    println!("Timestamp:  {}", result.timestamp);
    println!("Documents:  {} live of {}", result.num_docs, result.max_doc);
    println!("Size:       {}", format_size(result.total_size));
    println!();
    println!("Segments ({}):", result.segments.len());
    for segment in &result.segments {
        println!(
            "  {} {} docs, {} deleted, {}, {}",
            segment.name,
            segment.doc_count,
            segment.del_count,
            if segment.compound { "compound" } else { "split" },
            format_size(segment.size)
        );
        if segment.del_gen > 0 {
            println!("    deletions gen {}", segment.del_gen);
        }
        for (field, generation) in &segment.norm_gens {
            println!("    norms of field {field} at gen {generation}");
        }
        println!("    files: {}", segment.files.join(" "));
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_codec::{Document, Field, Index, Store};
    use tessera_core::{IndexReader, IndexWriter, ReaderConfig, WriterConfig};
    use tessera_store::RamDirectory;

    fn index() -> Arc<dyn Directory> {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let mut writer = IndexWriter::open(Arc::clone(&dir), WriterConfig::new()).unwrap();
        for id in 0..4 {
            let mut doc = Document::new();
            doc.add(Field::new("content", "aaa", Store::No, Index::Analyzed));
            doc.add(Field::new("id", id.to_string(), Store::Yes, Index::NotAnalyzed));
            writer.add_document(doc).unwrap();
        }
        writer.close().unwrap();
        dir
    }

    #[test]
    fn inspects_latest_commit() {
        let dir = index();
        let result = collect(dir.as_ref(), None).unwrap();
        assert_eq!(result.file, "segments_2");
        assert_eq!(result.num_docs, 4);
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].files, vec!["_0.cfs"]);
        assert!(result.total_size > result.segments[0].size);
    }

    #[test]
    fn shows_overlay_generations() {
        let dir = index();
        let mut reader = IndexReader::open(Arc::clone(&dir), ReaderConfig::new()).unwrap();
        reader.delete_document(1).unwrap();
        reader.set_norm(2, "content", 3.0).unwrap();
        reader.close().unwrap();

        let result = collect(dir.as_ref(), None).unwrap();
        let segment = &result.segments[0];
        assert_eq!(segment.del_count, 1);
        assert_eq!(segment.del_gen, 1);
        assert_eq!(segment.norm_gens, vec![(0, 1)]);
        assert_eq!(result.num_docs, 3);
        assert_eq!(result.max_doc, 4);
    }

    #[test]
    fn missing_generation_fails() {
        let dir = index();
        assert!(collect(dir.as_ref(), Some(9)).is_err());
    }
}
