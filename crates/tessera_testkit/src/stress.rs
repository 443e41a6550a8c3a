//! Stress tests for Tessera.
//!
//! A writer keeps committing batches while reader threads open the latest
//! commit, check it and hold it open for a while. Under
//! [`KeepOnlyLastCommitDeletionPolicy`] every superseded commit is marked
//! deleted at once, so readers only survive if holds work.

use crate::fixtures::{content_term, id_doc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tessera_core::{
    CoreError, IndexReader, IndexWriter, KeepOnlyLastCommitDeletionPolicy, ReaderConfig,
    WriterConfig,
};
use tessera_store::Directory;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Commits published by the writer.
    pub commits: usize,
    /// Readers that opened, verified and closed cleanly.
    pub reads: usize,
    /// Readers that saw an inconsistent commit or lost files.
    pub failures: usize,
    /// Total duration.
    pub duration: Duration,
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of commits the writer publishes.
    pub commits: usize,
    /// Documents added per commit.
    pub batch: u32,
    /// Number of reader threads.
    pub threads: usize,
    /// How long each reader keeps its commit open.
    pub hold_for: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            commits: 20,
            batch: 7,
            threads: 4,
            hold_for: Duration::from_millis(2),
        }
    }
}

/// Checks one commit through `reader`: a whole number of batches, every
/// live document matching the content term, every stored id readable.
fn verify(reader: &IndexReader, batch: u32) -> Result<(), CoreError> {
    let docs = reader.num_docs();
    if docs % batch != 0 {
        return Err(CoreError::invalid_operation(format!(
            "commit {} holds a partial batch ({docs} docs)",
            reader.generation()
        )));
    }
    let hits = reader.term_docs(&content_term());
    if hits.len() != docs as usize {
        return Err(CoreError::invalid_operation(format!(
            "{} hits for {docs} docs",
            hits.len()
        )));
    }
    for doc in hits {
        reader.document(doc)?;
    }
    Ok(())
}

/// Commits batches on one thread while readers open and verify commits on
/// others.
pub fn stress_readers_during_commits(dir: Arc<dyn Directory>, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));

    let mut writer = IndexWriter::open(
        Arc::clone(&dir),
        WriterConfig::new().deletion_policy(Arc::new(KeepOnlyLastCommitDeletionPolicy)),
    )
    .expect("Failed to open writer");
    writer.commit().expect("Failed to commit");

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let dir = Arc::clone(&dir);
            let done = Arc::clone(&done);
            let reads = Arc::clone(&reads);
            let failures = Arc::clone(&failures);
            let batch = config.batch;
            let hold_for = config.hold_for;
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let opened = IndexReader::open(Arc::clone(&dir), ReaderConfig::new().read_only(true));
                    let mut reader = match opened {
                        Ok(reader) => reader,
                        // The newest commit file can vanish between listing
                        // and reading only if holds are broken.
                        Err(_) => {
                            failures.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                    };
                    thread::sleep(hold_for);
                    match verify(&reader, batch).and_then(|()| reader.close()) {
                        Ok(()) => reads.fetch_add(1, Ordering::SeqCst),
                        Err(_) => failures.fetch_add(1, Ordering::SeqCst),
                    };
                }
            })
        })
        .collect();

    let mut next_id = 0;
    for _ in 0..config.commits {
        for _ in 0..config.batch {
            writer.add_document(id_doc(next_id)).expect("Failed to add document");
            next_id += 1;
        }
        writer.commit().expect("Failed to commit");
    }
    writer.close().expect("Failed to close writer");
    done.store(true, Ordering::SeqCst);
    for handle in handles {
        handle.join().expect("Reader thread panicked");
    }

    StressTestResult {
        commits: config.commits,
        reads: reads.load(Ordering::SeqCst),
        failures: failures.load(Ordering::SeqCst),
        duration: start.elapsed(),
    }
}
