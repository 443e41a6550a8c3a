//! The index reader.
//!
//! A reader sees one commit and holds it: the file deleter never removes a
//! commit an open reader still reads, whatever the policy says.
//!
//! Readers may also delete documents and change norms. The first such
//! change takes the write lock, and is refused if a newer commit exists.
//! Changes are published as a new commit on [`IndexReader::flush`] or
//! [`IndexReader::close`].

use crate::commit::{latest_generation, read_current_version, SegmentInfos};
use crate::config::ReaderConfig;
use crate::deleter::IndexFileDeleter;
use crate::error::{CoreError, CoreResult};
use crate::holds::CommitHold;
use crate::segment_reader::{PendingState, SegmentReader};
use crate::types::{DocId, Generation};
use std::sync::Arc;
use tessera_codec::{encode_norm, Document, Term};
use tessera_store::{obtain_with_timeout, Directory, Lock, WRITE_LOCK_NAME};
use tracing::{debug, info, warn};

/// How often opening the latest commit is retried when a concurrent writer
/// deletes it first.
const OPEN_RETRIES: u32 = 10;

/// Reads, and optionally modifies, one commit of an index.
pub struct IndexReader {
    dir: Arc<dyn Directory>,
    config: ReaderConfig,
    infos: SegmentInfos,
    segments: Vec<SegmentReader>,
    starts: Vec<DocId>,
    hold: Option<CommitHold>,
    write_lock: Option<Box<dyn Lock>>,
    has_changes: bool,
    closed: bool,
}

impl IndexReader {
    /// Opens the latest commit, or `config.index_commit` if set.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IndexNotFound`] if there is no commit.
    /// - [`CoreError::InvalidOperation`] if `index_commit` belongs to
    ///   another directory.
    /// - [`CoreError::CorruptIndex`] if the commit or a segment is damaged.
    pub fn open(dir: Arc<dyn Directory>, config: ReaderConfig) -> CoreResult<Self> {
        if let Some(commit) = &config.index_commit {
            if commit.directory_id() != dir.lock_id() {
                return Err(CoreError::invalid_operation(format!(
                    "commit {} belongs to {}",
                    commit.segments_file_name(),
                    commit.directory_id()
                )));
            }
            let generation = commit.generation();
            let (hold, infos, segments) = Self::load(&dir, generation)?;
            return Ok(Self::assemble(dir, config, hold, infos, segments));
        }

        // A writer may publish a newer commit and delete this one between
        // listing and taking the hold. Files then vanish under us; retry on
        // the newer commit.
        let mut attempt = 0;
        loop {
            let generation = latest_generation(dir.as_ref())?.ok_or_else(|| {
                CoreError::index_not_found(format!("no segments file in {}", dir.lock_id()))
            })?;
            match Self::load(&dir, generation) {
                Ok((hold, infos, segments)) => {
                    return Ok(Self::assemble(dir, config, hold, infos, segments));
                }
                Err(e) if e.is_not_found() && attempt < OPEN_RETRIES => {
                    let latest = latest_generation(dir.as_ref())?;
                    if latest == Some(generation) {
                        return Err(e);
                    }
                    debug!(
                        target: "tessera::reader",
                        generation = generation.as_u64(),
                        error = %e,
                        "commit vanished while opening; retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn load(
        dir: &Arc<dyn Directory>,
        generation: Generation,
    ) -> CoreResult<(CommitHold, SegmentInfos, Vec<SegmentReader>)> {
        let hold = CommitHold::new(dir.lock_id(), generation);
        let infos = SegmentInfos::read_generation(dir.as_ref(), generation)?;
        let segments = infos
            .segments
            .iter()
            .map(|s| SegmentReader::open(Arc::clone(dir), s.clone()))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((hold, infos, segments))
    }

    fn assemble(
        dir: Arc<dyn Directory>,
        config: ReaderConfig,
        hold: CommitHold,
        infos: SegmentInfos,
        segments: Vec<SegmentReader>,
    ) -> Self {
        let generation = infos.generation;
        debug!(
            target: "tessera::reader",
            generation = generation.as_u64(),
            segments = segments.len(),
            read_only = config.read_only,
            "reader opened"
        );
        Self {
            starts: doc_starts(&segments),
            dir,
            config,
            infos,
            segments,
            hold: Some(hold),
            write_lock: None,
            has_changes: false,
            closed: false,
        }
    }

    /// Opens the latest commit with the default configuration.
    ///
    /// # Errors
    ///
    /// Same as [`IndexReader::open`].
    pub fn open_latest(dir: Arc<dyn Directory>) -> CoreResult<Self> {
        Self::open(dir, ReaderConfig::default())
    }

    /// Returns a reader sharing this one's segment data and buffers.
    ///
    /// If this reader holds the write lock, the lock and the pending changes
    /// move to the clone; this reader must then reacquire the lock, which
    /// fails while the clone holds it.
    ///
    /// # Errors
    ///
    /// Fails after close.
    pub fn try_clone(&mut self) -> CoreResult<Self> {
        self.ensure_open()?;
        let take_changes = self.write_lock.is_some();
        let segments = self
            .segments
            .iter_mut()
            .map(|s| s.try_clone(take_changes))
            .collect::<CoreResult<Vec<_>>>()?;
        debug!(
            target: "tessera::reader",
            generation = self.infos.generation.as_u64(),
            with_lock = take_changes,
            "reader cloned"
        );
        Ok(Self {
            dir: Arc::clone(&self.dir),
            config: self.config.clone(),
            infos: self.infos.clone(),
            starts: self.starts.clone(),
            segments,
            hold: self.hold.clone(),
            write_lock: self.write_lock.take(),
            has_changes: std::mem::take(&mut self.has_changes),
            closed: false,
        })
    }

    /// Marks a document deleted.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ReadOnly`] for a read-only reader.
    /// - [`CoreError::LockObtainFailed`] if the write lock is held elsewhere.
    /// - [`CoreError::StaleReader`] if a newer commit exists.
    pub fn delete_document(&mut self, doc: DocId) -> CoreResult<()> {
        self.acquire_write_lock("delete_document")?;
        let (index, local) = self.locate(doc)?;
        if self.segments[index].delete_document(local)? {
            self.has_changes = true;
        }
        Ok(())
    }

    /// Deletes every live document containing `term` and returns how many
    /// were deleted.
    ///
    /// # Errors
    ///
    /// Same as [`IndexReader::delete_document`].
    pub fn delete_documents(&mut self, term: &Term) -> CoreResult<u32> {
        self.acquire_write_lock("delete_documents")?;
        let mut deleted = 0;
        for segment in &mut self.segments {
            for doc in segment.term_docs(term) {
                if segment.delete_document(doc)? {
                    deleted += 1;
                }
            }
        }
        if deleted > 0 {
            self.has_changes = true;
        }
        debug!(target: "tessera::reader", term = %term, deleted, "documents deleted");
        Ok(deleted)
    }

    /// Clears every deletion.
    ///
    /// # Errors
    ///
    /// Same as [`IndexReader::delete_document`].
    pub fn undelete_all(&mut self) -> CoreResult<()> {
        self.acquire_write_lock("undelete_all")?;
        for segment in &mut self.segments {
            if segment.has_deletions() {
                segment.undelete_all()?;
                self.has_changes = true;
            }
        }
        Ok(())
    }

    /// Overwrites the norm of one field of one document.
    ///
    /// Fields without norms are silently left alone.
    ///
    /// # Errors
    ///
    /// Same as [`IndexReader::delete_document`].
    pub fn set_norm(&mut self, doc: DocId, field: &str, value: f32) -> CoreResult<()> {
        self.acquire_write_lock("set_norm")?;
        let (index, local) = self.locate(doc)?;
        if self.segments[index].set_norm(local, field, encode_norm(value))? {
            self.has_changes = true;
        }
        Ok(())
    }

    fn acquire_write_lock(&mut self, operation: &'static str) -> CoreResult<()> {
        self.ensure_open()?;
        if self.config.read_only {
            return Err(CoreError::ReadOnly { operation });
        }
        if self.write_lock.is_some() {
            return Ok(());
        }

        let mut lock = self.dir.make_lock(WRITE_LOCK_NAME);
        if !obtain_with_timeout(lock.as_mut(), self.config.write_lock_timeout)? {
            return Err(CoreError::lock_obtain_failed(format!(
                "{}/{WRITE_LOCK_NAME}",
                self.dir.lock_id()
            )));
        }
        let current = match read_current_version(self.dir.as_ref()) {
            Ok(version) => version,
            Err(e) => {
                lock.release()?;
                return Err(e);
            }
        };
        if current > self.infos.version {
            lock.release()?;
            return Err(CoreError::stale_reader(format!(
                "reader is at version {}, index at {current}",
                self.infos.version
            )));
        }
        debug!(target: "tessera::reader", operation, "write lock acquired");
        self.write_lock = Some(lock);
        Ok(())
    }

    /// Publishes pending changes as a new commit and releases the write
    /// lock.
    ///
    /// # Errors
    ///
    /// On failure nothing is published, the changes stay pending and the
    /// lock stays held.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        self.commit_changes()
    }

    fn commit_changes(&mut self) -> CoreResult<()> {
        if !self.has_changes {
            return Ok(());
        }

        let mut deleter = IndexFileDeleter::new(
            Arc::clone(&self.dir),
            Arc::clone(&self.config.deletion_policy),
            &self.infos,
        )?;
        let saved_infos = self.infos.clone();
        let saved: Vec<PendingState> = self.segments.iter().map(SegmentReader::pending_state).collect();

        if let Err(e) = self.publish() {
            warn!(target: "tessera::reader", error = %e, "reader commit failed");
            self.infos = saved_infos;
            for (segment, pending) in self.segments.iter_mut().zip(saved) {
                segment.restore(pending);
            }
            if let Err(cleanup) = deleter.refresh() {
                warn!(target: "tessera::reader", error = %cleanup, "cleanup after failed commit failed");
            }
            return Err(e);
        }

        // The reader now sees the new commit; hold that one instead.
        self.hold = Some(CommitHold::new(self.dir.lock_id(), self.infos.generation));
        self.has_changes = false;
        let checkpoint = deleter.checkpoint(&self.infos, true);
        deleter.close();
        if let Some(mut lock) = self.write_lock.take() {
            lock.release()?;
        }
        info!(
            target: "tessera::reader",
            generation = self.infos.generation.as_u64(),
            "reader changes committed"
        );
        checkpoint
    }

    fn publish(&mut self) -> CoreResult<()> {
        for (index, segment) in self.segments.iter_mut().enumerate() {
            segment.commit_changes()?;
            self.infos.segments[index] = segment.info().clone();
        }
        self.infos.commit(self.dir.as_ref())
    }

    /// Commits pending changes and releases everything. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Propagates commit failures; the reader stays open in that case.
    pub fn close(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.commit_changes()?;
        self.closed = true;
        let mut first_error = None;
        for segment in &mut self.segments {
            if let Err(e) = segment.close() {
                first_error.get_or_insert(e);
            }
        }
        if let Some(mut lock) = self.write_lock.take() {
            if let Err(e) = lock.release() {
                first_error.get_or_insert(e.into());
            }
        }
        self.hold = None;
        debug!(target: "tessera::reader", generation = self.infos.generation.as_u64(), "reader closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Returns the number of live documents.
    #[must_use]
    pub fn num_docs(&self) -> u32 {
        self.segments.iter().map(SegmentReader::num_docs).sum()
    }

    /// Returns the number of documents, deleted ones included.
    #[must_use]
    pub fn max_doc(&self) -> u32 {
        self.segments.iter().map(SegmentReader::max_doc).sum()
    }

    /// Returns true if any document is deleted.
    #[must_use]
    pub fn has_deletions(&self) -> bool {
        self.segments.iter().any(SegmentReader::has_deletions)
    }

    /// Returns true if `doc` is deleted. Out-of-range documents are not.
    #[must_use]
    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.locate(doc)
            .is_ok_and(|(index, local)| self.segments[index].is_deleted(local))
    }

    /// Returns the stored fields of a live document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a deleted or
    /// out-of-range document.
    pub fn document(&self, doc: DocId) -> CoreResult<Document> {
        self.ensure_open()?;
        let (index, local) = self.locate(doc)?;
        self.segments[index].document(local)
    }

    /// Returns the live documents containing `term`, ascending.
    #[must_use]
    pub fn term_docs(&self, term: &Term) -> Vec<DocId> {
        self.segments
            .iter()
            .zip(&self.starts)
            .flat_map(|(segment, start)| segment.term_docs(term).into_iter().map(move |d| start + d))
            .collect()
    }

    /// Returns the number of documents containing `term`, deleted ones
    /// included until merged away.
    #[must_use]
    pub fn doc_freq(&self, term: &Term) -> u32 {
        self.segments.iter().map(|s| s.doc_freq(term)).sum()
    }

    /// Returns the norm bytes of a field across all segments.
    ///
    /// Segments without norms for the field contribute the encoded norm of
    /// 1.0. Returns `None` if no segment keeps norms for it.
    ///
    /// # Errors
    ///
    /// Fails if a norm file cannot be read, or after close.
    pub fn norms(&self, field: &str) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut found = false;
        let mut all = Vec::with_capacity(self.max_doc() as usize);
        for segment in &self.segments {
            match segment.norms(field)? {
                Some(norms) => {
                    found = true;
                    all.extend(norms);
                }
                None => all.extend(std::iter::repeat(encode_norm(1.0)).take(segment.max_doc() as usize)),
            }
        }
        Ok(found.then_some(all))
    }

    /// Returns true for one segment without deletions.
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.segments.len() == 1 && !self.has_deletions()
    }

    /// Returns the version of the commit this reader sees.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.infos.version
    }

    /// Returns the generation of the commit this reader sees.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.infos.generation
    }

    /// Returns true if no newer commit was published since this reader
    /// opened.
    ///
    /// # Errors
    ///
    /// Propagates errors reading the latest commit.
    pub fn is_current(&self) -> CoreResult<bool> {
        Ok(read_current_version(self.dir.as_ref())? == self.infos.version)
    }

    /// Returns true if there are uncommitted changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns one segment reader.
    #[must_use]
    pub fn segment_reader(&self, index: usize) -> Option<&SegmentReader> {
        self.segments.get(index)
    }

    /// Returns the segment list this reader sees.
    #[must_use]
    pub fn segment_infos(&self) -> &SegmentInfos {
        &self.infos
    }

    /// Returns the directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.dir
    }

    fn locate(&self, doc: DocId) -> CoreResult<(usize, DocId)> {
        let index = self.starts.partition_point(|start| *start <= doc);
        if index == 0 || doc >= self.max_doc() {
            return Err(CoreError::invalid_operation(format!(
                "document {doc} out of range ({} docs)",
                self.max_doc()
            )));
        }
        let index = index - 1;
        Ok((index, doc - self.starts[index]))
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::AlreadyClosed { what: "index reader" });
        }
        Ok(())
    }
}

fn doc_starts(segments: &[SegmentReader]) -> Vec<DocId> {
    let mut start = 0;
    segments
        .iter()
        .map(|s| {
            let this = start;
            start += s.max_doc();
            this
        })
        .collect()
}

impl Drop for IndexReader {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.has_changes {
            warn!(target: "tessera::reader", "reader dropped with uncommitted changes");
        }
        for segment in &mut self.segments {
            let _ = segment.close();
        }
        if let Some(mut lock) = self.write_lock.take() {
            let _ = lock.release();
        }
    }
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("directory", &self.dir.lock_id())
            .field("generation", &self.infos.generation)
            .field("segments", &self.segments.len())
            .field("has_changes", &self.has_changes)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterConfig;
    use crate::writer::IndexWriter;
    use std::time::Duration;
    use tessera_codec::{Field, Index, Store};
    use tessera_store::RamDirectory;

    fn build(docs: u32, per_segment: usize) -> (RamDirectory, Arc<dyn Directory>) {
        let dir = RamDirectory::new();
        let shared: Arc<dyn Directory> = Arc::new(dir.clone());
        let config = WriterConfig::new().max_buffered_docs(per_segment);
        let mut writer = IndexWriter::open(Arc::clone(&shared), config).unwrap();
        for i in 0..docs {
            let mut doc = Document::new();
            doc.add(Field::new("content", "aaa", Store::No, Index::Analyzed))
                .add(Field::new("id", i.to_string(), Store::Yes, Index::NotAnalyzed));
            writer.add_document(doc).unwrap();
        }
        writer.close().unwrap();
        (dir, shared)
    }

    fn quick() -> ReaderConfig {
        ReaderConfig::new().write_lock_timeout(Duration::from_millis(10))
    }

    #[test]
    fn closed_reader_refuses_changes() {
        let (dir, shared) = build(4, 10);
        let mut reader = IndexReader::open(shared, quick()).unwrap();
        reader.close().unwrap();
        let closed = |r: CoreResult<()>| matches!(r, Err(CoreError::AlreadyClosed { .. }));
        assert!(closed(reader.delete_document(1)));
        assert!(closed(reader.set_norm(2, "content", 2.0)));
        assert!(matches!(
            reader.delete_documents(&Term::new("id", "3")),
            Err(CoreError::AlreadyClosed { .. })
        ));
        assert!(!dir.file_exists("segments_3").unwrap());
    }

    #[test]
    fn reads_across_segments() {
        let (_dir, shared) = build(7, 3);
        let reader = IndexReader::open_latest(shared).unwrap();
        assert_eq!(reader.segment_count(), 3);
        assert_eq!(reader.num_docs(), 7);
        assert_eq!(reader.document(4).unwrap().get("id"), Some("4"));
        assert_eq!(reader.term_docs(&Term::new("id", "6")), vec![6]);
        assert_eq!(reader.norms("content").unwrap().unwrap().len(), 7);
        assert!(reader.norms("nothing").unwrap().is_none());
        assert!(reader.document(7).is_err());
        assert!(reader.is_current().unwrap());
    }

    #[test]
    fn deletes_commit_on_close() {
        let (dir, shared) = build(5, 10);
        let mut reader = IndexReader::open(Arc::clone(&shared), quick()).unwrap();
        assert_eq!(reader.delete_documents(&Term::new("id", "3")).unwrap(), 1);
        reader.delete_document(0).unwrap();
        assert_eq!(reader.num_docs(), 3);
        assert!(reader.has_changes());
        reader.close().unwrap();
        reader.close().unwrap();

        assert!(dir.file_exists("_0_1.del").unwrap());
        let reopened = IndexReader::open_latest(shared).unwrap();
        assert_eq!(reopened.num_docs(), 3);
        assert!(reopened.is_deleted(3));
        assert!(!reopened.is_optimized());
    }

    #[test]
    fn read_only_rejects_changes() {
        let (_dir, shared) = build(2, 10);
        let mut reader = IndexReader::open(shared, quick().read_only(true)).unwrap();
        assert!(matches!(
            reader.delete_document(0),
            Err(CoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn stale_reader_cannot_modify() {
        let (_dir, shared) = build(2, 10);
        let mut stale = IndexReader::open(Arc::clone(&shared), quick()).unwrap();
        let mut fresh = IndexReader::open(Arc::clone(&shared), quick()).unwrap();
        fresh.delete_document(0).unwrap();
        fresh.close().unwrap();

        assert!(!stale.is_current().unwrap());
        assert!(matches!(
            stale.delete_document(1),
            Err(CoreError::StaleReader { .. })
        ));
    }

    #[test]
    fn writer_lock_blocks_reader_changes() {
        let (_dir, shared) = build(2, 10);
        let mut reader = IndexReader::open(Arc::clone(&shared), quick()).unwrap();
        let _writer = IndexWriter::open(Arc::clone(&shared), WriterConfig::new()).unwrap();
        assert!(matches!(
            reader.set_norm(0, "content", 2.0),
            Err(CoreError::LockObtainFailed { .. })
        ));
    }

    #[test]
    fn held_commit_survives_newer_commits() {
        let (dir, shared) = build(3, 10);
        let old = IndexReader::open_latest(Arc::clone(&shared)).unwrap();
        let old_segments = old.segment_infos().segments_file_name();

        let mut writer = IndexWriter::open(Arc::clone(&shared), WriterConfig::new()).unwrap();
        writer.add_document(Document::new()).unwrap();
        writer.optimize().unwrap();
        writer.close().unwrap();
        assert!(dir.file_exists(&old_segments).unwrap());
        assert_eq!(old.num_docs(), 3);
        assert_eq!(old.document(2).unwrap().get("id"), Some("2"));

        drop(old);
        IndexWriter::open(shared, WriterConfig::new()).unwrap().close().unwrap();
        assert!(!dir.file_exists(&old_segments).unwrap());
    }

    #[test]
    fn clone_takes_over_lock() {
        let (_dir, shared) = build(4, 10);
        let mut reader = IndexReader::open(Arc::clone(&shared), quick()).unwrap();
        reader.delete_document(0).unwrap();
        let mut clone = reader.try_clone().unwrap();
        assert!(clone.has_changes());
        assert!(!reader.has_changes());
        assert!(matches!(
            reader.delete_document(1),
            Err(CoreError::LockObtainFailed { .. })
        ));
        clone.close().unwrap();
        reader.close().unwrap();
        assert_eq!(IndexReader::open_latest(shared).unwrap().num_docs(), 3);
    }
}
