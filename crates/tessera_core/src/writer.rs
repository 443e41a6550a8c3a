//! The index writer.
//!
//! A writer owns the directory's write lock for its whole life. Added
//! documents are buffered and flushed into new segments; buffered deletes
//! are applied at flush. Nothing becomes visible to new readers until
//! [`IndexWriter::commit`] (or [`IndexWriter::close`]) publishes a commit.

use crate::commit::{latest_generation, IndexCommit, SegmentInfos};
use crate::config::{OpenMode, WriterConfig};
use crate::deleter::IndexFileDeleter;
use crate::error::{CoreError, CoreResult};
use crate::segment_info::SegmentInfo;
use crate::segment_reader::SegmentReader;
use crate::segment_writer::{build_segment, merge_segments, write_segment};
use crate::types::DocId;
use std::sync::Arc;
use tessera_codec::{Document, SegmentData, Term};
use tessera_store::{obtain_with_timeout, Directory, Lock, WRITE_LOCK_NAME};
use tracing::{debug, info, warn};

/// Adds, deletes and merges documents and publishes commits.
pub struct IndexWriter {
    dir: Arc<dyn Directory>,
    config: WriterConfig,
    write_lock: Option<Box<dyn Lock>>,
    infos: SegmentInfos,
    rollback_infos: SegmentInfos,
    deleter: IndexFileDeleter,
    buffered: Vec<Document>,
    /// Deletes waiting for the next flush, with the number of buffered
    /// documents they apply to.
    buffered_deletes: Vec<(Term, usize)>,
    change_count: u64,
    last_commit_change_count: u64,
    closed: bool,
}

impl IndexWriter {
    /// Opens a writer.
    ///
    /// # Errors
    ///
    /// - [`CoreError::LockObtainFailed`] if another writer or a mutating
    ///   reader holds the write lock past the timeout.
    /// - [`CoreError::IndexNotFound`] in [`OpenMode::Append`] without an
    ///   index.
    /// - [`CoreError::InvalidOperation`] if `index_commit` belongs to
    ///   another directory.
    /// - [`CoreError::CorruptIndex`] if the commit to open is damaged.
    pub fn open(dir: Arc<dyn Directory>, config: WriterConfig) -> CoreResult<Self> {
        let mut lock = dir.make_lock(WRITE_LOCK_NAME);
        if !obtain_with_timeout(lock.as_mut(), config.write_lock_timeout)? {
            return Err(CoreError::lock_obtain_failed(format!(
                "{}/{WRITE_LOCK_NAME}",
                dir.lock_id()
            )));
        }

        match Self::open_locked(Arc::clone(&dir), config, lock) {
            Ok(writer) => Ok(writer),
            Err((e, mut lock)) => {
                if let Err(release) = lock.release() {
                    warn!(target: "tessera::writer", error = %release, "failed to release write lock");
                }
                Err(e)
            }
        }
    }

    fn open_locked(
        dir: Arc<dyn Directory>,
        config: WriterConfig,
        lock: Box<dyn Lock>,
    ) -> Result<Self, (CoreError, Box<dyn Lock>)> {
        let (infos, change_count) = match Self::initial_infos(dir.as_ref(), &config) {
            Ok(initial) => initial,
            Err(e) => return Err((e, lock)),
        };
        let deleter = match IndexFileDeleter::new(
            Arc::clone(&dir),
            Arc::clone(&config.deletion_policy),
            &infos,
        ) {
            Ok(deleter) => deleter,
            Err(e) => return Err((e, lock)),
        };

        info!(
            target: "tessera::writer",
            generation = infos.generation.as_u64(),
            segments = infos.segments.len(),
            mode = ?config.open_mode,
            "writer opened"
        );
        Ok(Self {
            dir,
            rollback_infos: infos.clone(),
            infos,
            config,
            write_lock: Some(lock),
            deleter,
            buffered: Vec::new(),
            buffered_deletes: Vec::new(),
            change_count,
            last_commit_change_count: 0,
            closed: false,
        })
    }

    /// Works out the starting segment list and whether it differs from the
    /// latest commit.
    fn initial_infos(dir: &dyn Directory, config: &WriterConfig) -> CoreResult<(SegmentInfos, u64)> {
        let exists = latest_generation(dir)?.is_some();
        let create = match config.open_mode {
            OpenMode::Create => true,
            OpenMode::Append => false,
            OpenMode::CreateOrAppend => !exists,
        };

        if create {
            if !exists {
                let mut infos = SegmentInfos::new();
                infos.commit(dir)?;
                return Ok((infos, 0));
            }
            let mut infos = SegmentInfos::read(dir)?;
            infos.segments.clear();
            return Ok((infos, 1));
        }

        let mut infos = SegmentInfos::read(dir)?;
        let Some(commit) = &config.index_commit else {
            return Ok((infos, 0));
        };
        Self::check_commit(dir, commit)?;
        if commit.generation() == infos.generation {
            return Ok((infos, 0));
        }
        debug!(
            target: "tessera::writer",
            commit = commit.generation().as_u64(),
            latest = infos.generation.as_u64(),
            "opening on prior commit"
        );
        infos.segments = commit.segment_infos().segments.clone();
        Ok((infos, 1))
    }

    fn check_commit(dir: &dyn Directory, commit: &IndexCommit) -> CoreResult<()> {
        if commit.directory_id() != dir.lock_id() {
            return Err(CoreError::invalid_operation(format!(
                "commit {} belongs to {}, not {}",
                commit.segments_file_name(),
                commit.directory_id(),
                dir.lock_id()
            )));
        }
        Ok(())
    }

    /// Buffers a document; flushes once `max_buffered_docs` are buffered.
    ///
    /// # Errors
    ///
    /// Fails after close or if an automatic flush fails.
    pub fn add_document(&mut self, doc: Document) -> CoreResult<()> {
        self.ensure_open()?;
        self.buffered.push(doc);
        if self.buffered.len() >= self.config.max_buffered_docs {
            self.flush()?;
        }
        Ok(())
    }

    /// Deletes every document containing `term` that was added before this
    /// call. Applied at the next flush.
    ///
    /// # Errors
    ///
    /// Fails after close.
    pub fn delete_documents(&mut self, term: Term) -> CoreResult<()> {
        self.ensure_open()?;
        debug!(target: "tessera::writer", term = %term, "delete buffered");
        self.buffered_deletes.push((term, self.buffered.len()));
        Ok(())
    }

    /// Overwrites the norm of one field of one document.
    ///
    /// Buffered documents are flushed first so `doc` counts them.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for an out-of-range `doc`.
    pub fn set_norm(&mut self, doc: DocId, field: &str, value: f32) -> CoreResult<()> {
        self.ensure_open()?;
        self.flush()?;
        let (index, local) = self.locate(doc)?;
        let byte = self.config.similarity.encode_norm(value);

        let mut reader = SegmentReader::open(Arc::clone(&self.dir), self.infos.segments[index].clone())?;
        let result = reader
            .set_norm(local, field, byte)
            .and_then(|_| reader.commit_changes());
        let info = reader.info().clone();
        reader.close()?;
        if let Err(e) = result {
            self.deleter.refresh()?;
            return Err(e);
        }
        self.infos.segments[index] = info;
        self.changed()
    }

    /// Adds the live documents of other indexes, one new segment per
    /// source directory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] if a source holds no index.
    pub fn add_indexes(&mut self, sources: &[Arc<dyn Directory>]) -> CoreResult<()> {
        self.ensure_open()?;
        self.flush()?;
        for source in sources {
            let infos = SegmentInfos::read(source.as_ref())?;
            let data = {
                let mut readers = infos
                    .segments
                    .iter()
                    .map(|s| SegmentReader::open(Arc::clone(source), s.clone()))
                    .collect::<CoreResult<Vec<_>>>()?;
                let refs: Vec<&SegmentReader> = readers.iter().collect();
                let merged = merge_segments(&refs);
                for reader in &mut readers {
                    reader.close()?;
                }
                merged?
            };
            if data.docs.is_empty() {
                continue;
            }
            let name = self.infos.next_segment_name();
            let info = self.write_new_segment(&name, &data)?;
            info!(
                target: "tessera::writer",
                source = %source.lock_id(),
                segment = %name,
                docs = info.doc_count,
                "index added"
            );
            self.infos.segments.push(info);
            self.changed()?;
        }
        Ok(())
    }

    /// Flushes buffered documents and deletes.
    ///
    /// # Errors
    ///
    /// Propagates write failures. Partially written files are removed and
    /// the documents stay buffered, so a later flush retries them.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.buffered.is_empty() && self.buffered_deletes.is_empty() {
            return Ok(());
        }

        let docs = std::mem::take(&mut self.buffered);
        let deletes = std::mem::take(&mut self.buffered_deletes);
        let before = self.infos.segments.clone();
        let data = (!docs.is_empty()).then(|| build_segment(docs, self.config.similarity.as_ref()));

        if let Err(e) = self.write_flush(data.as_ref(), &deletes, before.len()) {
            warn!(target: "tessera::writer", error = %e, "flush failed");
            self.infos.segments = before;
            self.buffered = data.map(|data| data.docs).unwrap_or_default();
            self.buffered_deletes = deletes;
            if let Err(cleanup) = self.deleter.refresh() {
                warn!(target: "tessera::writer", error = %cleanup, "cleanup after flush failed");
            }
            return Err(e);
        }

        self.changed()?;
        self.maybe_merge()
    }

    /// Writes the flushed segment and applies buffered deletes to the
    /// segment list. On error the caller restores the list.
    fn write_flush(
        &mut self,
        data: Option<&SegmentData>,
        deletes: &[(Term, usize)],
        existing: usize,
    ) -> CoreResult<()> {
        if let Some(data) = data {
            let name = self.infos.next_segment_name();
            let info = self.write_new_segment(&name, data)?;
            debug!(target: "tessera::writer", segment = %name, docs = info.doc_count, "flushed");
            self.infos.segments.push(info);
        }
        if !deletes.is_empty() {
            self.apply_deletes(deletes, existing)?;
        }
        Ok(())
    }

    fn apply_deletes(&mut self, deletes: &[(Term, usize)], existing: usize) -> CoreResult<()> {
        for index in 0..self.infos.segments.len() {
            let info = self.infos.segments[index].clone();
            let mut reader = SegmentReader::open(Arc::clone(&self.dir), info)?;
            let mut deleted = 0u32;
            for (term, limit) in deletes {
                for doc in reader.term_docs(term) {
                    if index >= existing && doc as usize >= *limit {
                        continue;
                    }
                    if reader.delete_document(doc)? {
                        deleted += 1;
                    }
                }
            }
            let result = reader.commit_changes();
            let info = reader.info().clone();
            reader.close()?;
            result?;
            if deleted > 0 {
                debug!(target: "tessera::writer", segment = %info.name, deleted, "deletes applied");
            }
            self.infos.segments[index] = info;
        }
        Ok(())
    }

    /// Merges the trailing segments once there are `merge_factor` of them.
    fn maybe_merge(&mut self) -> CoreResult<()> {
        while self.infos.segments.len() >= self.config.merge_factor {
            let start = self.infos.segments.len() - self.config.merge_factor;
            self.merge_range(start)?;
        }
        Ok(())
    }

    /// Merges all segments into one, dropping deleted documents and
    /// folding in separate norms.
    ///
    /// Does nothing if the index is already a single segment without
    /// deletions or separate norms.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Merge`] if the merge fails; the segment list is
    /// left as it was.
    pub fn optimize(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        self.flush()?;
        let needed = match self.infos.segments.as_slice() {
            [] => false,
            [only] => only.has_deletions() || only.has_separate_norms(),
            _ => true,
        };
        if needed {
            self.merge_range(0)?;
        }
        Ok(())
    }

    /// Replaces `segments[start..]` with one merged segment.
    fn merge_range(&mut self, start: usize) -> CoreResult<()> {
        let sources: Vec<SegmentInfo> = self.infos.segments[start..].to_vec();
        let name = self.infos.next_segment_name();
        info!(
            target: "tessera::writer",
            segments = sources.len(),
            into = %name,
            "merging"
        );

        match self.merge_into(&sources, &name) {
            Ok(Some(info)) => {
                self.infos.segments.truncate(start);
                self.infos.segments.push(info);
            }
            Ok(None) => self.infos.segments.truncate(start),
            Err(e) => {
                warn!(target: "tessera::writer", error = %e, "merge failed");
                if let Err(cleanup) = self.deleter.refresh() {
                    warn!(target: "tessera::writer", error = %cleanup, "cleanup after merge failed");
                }
                return Err(match e {
                    CoreError::Merge { .. } => e,
                    other => CoreError::merge(other.to_string()),
                });
            }
        }
        self.changed()
    }

    fn merge_into(&self, sources: &[SegmentInfo], name: &str) -> CoreResult<Option<SegmentInfo>> {
        let mut readers = sources
            .iter()
            .map(|s| SegmentReader::open(Arc::clone(&self.dir), s.clone()))
            .collect::<CoreResult<Vec<_>>>()?;
        let refs: Vec<&SegmentReader> = readers.iter().collect();
        let merged = merge_segments(&refs);
        for reader in &mut readers {
            reader.close()?;
        }
        let data = merged?;
        if data.docs.is_empty() {
            return Ok(None);
        }
        self.write_new_segment(name, &data).map(Some)
    }

    fn write_new_segment(&self, name: &str, data: &SegmentData) -> CoreResult<SegmentInfo> {
        write_segment(self.dir.as_ref(), name, data, self.config.use_compound_file)
    }

    /// Publishes the current state as a new commit.
    ///
    /// Does nothing if nothing changed since the last commit.
    ///
    /// # Errors
    ///
    /// Propagates flush and commit failures; the previous commit remains
    /// the latest.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        self.flush()?;
        if self.change_count == self.last_commit_change_count {
            debug!(target: "tessera::writer", "nothing to commit");
            return Ok(());
        }
        self.infos.commit(self.dir.as_ref())?;
        self.last_commit_change_count = self.change_count;
        self.rollback_infos = self.infos.clone();
        self.deleter.checkpoint(&self.infos, true)
    }

    /// Commits pending changes and releases the write lock. Closing twice
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates commit failures; the writer stays open in that case.
    pub fn close(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.commit()?;
        self.deleter.close();
        self.closed = true;
        self.release_lock()?;
        info!(target: "tessera::writer", generation = self.infos.generation.as_u64(), "writer closed");
        Ok(())
    }

    /// Discards everything since the last commit and closes the writer.
    ///
    /// Files written since then are deleted. A later [`close`] is a no-op.
    ///
    /// [`close`]: IndexWriter::close
    ///
    /// # Errors
    ///
    /// Fails if the writer is closed or cleanup fails.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        self.buffered.clear();
        self.buffered_deletes.clear();
        self.infos = self.rollback_infos.clone();
        self.change_count = self.last_commit_change_count;

        self.deleter.checkpoint(&self.infos, false)?;
        self.deleter.refresh()?;
        self.deleter.close();
        self.closed = true;
        self.release_lock()?;
        info!(
            target: "tessera::writer",
            generation = self.infos.generation.as_u64(),
            "writer rolled back"
        );
        Ok(())
    }

    /// Returns the number of live documents, buffered ones included.
    #[must_use]
    pub fn num_docs(&self) -> u32 {
        self.infos.num_docs() + self.buffered_count()
    }

    /// Returns the number of documents, deleted and buffered ones included.
    #[must_use]
    pub fn max_doc(&self) -> u32 {
        self.infos.max_doc() + self.buffered_count()
    }

    fn buffered_count(&self) -> u32 {
        u32::try_from(self.buffered.len()).unwrap_or(u32::MAX)
    }

    /// Returns the number of flushed segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.infos.segments.len()
    }

    /// Returns the current, possibly uncommitted, segment list.
    #[must_use]
    pub fn segment_infos(&self) -> &SegmentInfos {
        &self.infos
    }

    /// Returns the commits the deleter currently tracks, oldest first.
    #[must_use]
    pub fn commits(&self) -> &[Arc<IndexCommit>] {
        self.deleter.commits()
    }

    /// Returns the directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.dir
    }

    /// Returns true once closed or rolled back.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn changed(&mut self) -> CoreResult<()> {
        self.change_count += 1;
        self.deleter.checkpoint(&self.infos, false)
    }

    fn locate(&self, doc: DocId) -> CoreResult<(usize, DocId)> {
        let mut start = 0u32;
        for (index, segment) in self.infos.segments.iter().enumerate() {
            if doc < start + segment.doc_count {
                return Ok((index, doc - start));
            }
            start += segment.doc_count;
        }
        Err(CoreError::invalid_operation(format!(
            "document {doc} out of range ({start} docs)"
        )))
    }

    fn release_lock(&mut self) -> CoreResult<()> {
        if let Some(mut lock) = self.write_lock.take() {
            lock.release()?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::AlreadyClosed { what: "index writer" });
        }
        Ok(())
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if !self.closed {
            debug!(target: "tessera::writer", "writer dropped without close; uncommitted changes discarded");
            self.deleter.close();
        }
        if let Err(e) = self.release_lock() {
            warn!(target: "tessera::writer", error = %e, "failed to release write lock");
        }
    }
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("directory", &self.dir.lock_id())
            .field("generation", &self.infos.generation)
            .field("segments", &self.infos.segments.len())
            .field("buffered", &self.buffered.len())
            .field("closed", &self.closed)
            .finish()
    }
}
