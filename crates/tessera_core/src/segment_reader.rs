//! Read access to one segment, with deletions and norm updates.
//!
//! Segment data is immutable and shared between a reader and its clones
//! through an `Arc`. Deletion bitsets and norm bytes are per-reader views
//! onto [`BytesRef`] buffers: clones share them until one side writes,
//! at which point the writer copies.
//!
//! Norms load lazily. A clone taken before its parent loaded a field
//! records the parent's slot as its origin; the first load then goes
//! through the origin so both end up on one buffer. If the origin was
//! closed in the meantime, the clone loads its own copy.

use crate::bytes_ref::BytesRef;
use crate::error::{CoreError, CoreResult};
use crate::file_names::{
    segment_file_name, COMPOUND_EXTENSION, FIELDS_EXTENSION, FIELD_INFOS_EXTENSION,
    NORMS_EXTENSION,
};
use crate::segment_info::SegmentInfo;
use crate::segment_writer::write_file;
use crate::types::DocId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tessera_codec::{
    bits, decode_separate_norms, encode_separate_norms, Document, FieldInfos, SegmentData, Term,
};
use tessera_store::Directory;
use tracing::debug;

#[derive(Debug, Default)]
struct NormState {
    bytes: Option<BytesRef>,
    origin: Option<Arc<NormSlot>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct NormSlot {
    state: Mutex<NormState>,
}

impl NormSlot {
    fn loaded(bytes: BytesRef) -> Self {
        Self {
            state: Mutex::new(NormState {
                bytes: Some(bytes),
                ..NormState::default()
            }),
        }
    }

    fn with_origin(origin: Arc<NormSlot>) -> Self {
        Self {
            state: Mutex::new(NormState {
                origin: Some(origin),
                ..NormState::default()
            }),
        }
    }

    /// Loads the bytes if needed. `load` reads them from disk.
    fn ensure_loaded(&self, load: &dyn Fn() -> CoreResult<Vec<u8>>) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CoreError::AlreadyClosed { what: "segment reader" });
        }
        if state.bytes.is_some() {
            return Ok(());
        }
        if let Some(origin) = state.origin.take() {
            if let Some(shared) = origin.share(load)? {
                state.bytes = Some(shared);
                return Ok(());
            }
        }
        state.bytes = Some(BytesRef::new(load()?));
        Ok(())
    }

    /// Loads through this slot and returns a new handle, or `None` if the
    /// slot was closed.
    fn share(&self, load: &dyn Fn() -> CoreResult<Vec<u8>>) -> CoreResult<Option<BytesRef>> {
        if self.state.lock().closed {
            return Ok(None);
        }
        self.ensure_loaded(load)?;
        let state = self.state.lock();
        state.bytes.as_ref().map(BytesRef::acquire).transpose()
    }

    /// Returns a slot for a clone: an acquired handle if loaded, otherwise
    /// a pending slot pointing back here.
    fn fork(self: &Arc<Self>) -> CoreResult<Arc<Self>> {
        let state = self.state.lock();
        match &state.bytes {
            Some(bytes) => Ok(Arc::new(Self::loaded(bytes.acquire()?))),
            None => Ok(Arc::new(Self::with_origin(Arc::clone(self)))),
        }
    }

    fn close(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.origin = None;
        match state.bytes.take() {
            Some(bytes) => bytes.release(),
            None => Ok(()),
        }
    }
}

/// Uncommitted per-segment changes, captured so a failed commit can be
/// undone.
#[derive(Debug, Clone)]
pub(crate) struct PendingState {
    info: SegmentInfo,
    deletions_dirty: bool,
    dirty_norms: BTreeSet<u32>,
}

/// Reads one segment.
#[derive(Debug)]
pub struct SegmentReader {
    dir: Arc<dyn Directory>,
    info: SegmentInfo,
    core: Arc<SegmentData>,
    deleted: Option<BytesRef>,
    deletions_dirty: bool,
    norms: BTreeMap<u32, Arc<NormSlot>>,
    dirty_norms: BTreeSet<u32>,
    closed: bool,
}

impl SegmentReader {
    /// Opens the segment `info` describes.
    pub(crate) fn open(dir: Arc<dyn Directory>, info: SegmentInfo) -> CoreResult<Self> {
        let core = Arc::new(load_core(dir.as_ref(), &info)?);
        if core.doc_count() != info.doc_count {
            return Err(CoreError::corrupt(format!(
                "segment {} holds {} docs, commit says {}",
                info.name,
                core.doc_count(),
                info.doc_count
            )));
        }

        let deleted = match info.del_file_name() {
            Some(name) => {
                let data = dir.read_file(&name)?;
                let bitset = bits::decode_deletions(&data, info.doc_count)?;
                let count = bits::count(&bitset);
                if count != info.del_count {
                    return Err(CoreError::corrupt(format!(
                        "{name} marks {count} docs deleted, commit says {}",
                        info.del_count
                    )));
                }
                Some(BytesRef::new(bitset))
            }
            None => None,
        };

        let norms = core
            .field_infos
            .iter()
            .filter(|f| f.has_norms())
            .map(|f| (f.number, Arc::new(NormSlot::default())))
            .collect();

        debug!(
            target: "tessera::segment",
            segment = %info.name,
            docs = info.doc_count,
            deleted = info.del_count,
            "segment opened"
        );
        Ok(Self {
            dir,
            info,
            core,
            deleted,
            deletions_dirty: false,
            norms,
            dirty_norms: BTreeSet::new(),
            closed: false,
        })
    }

    /// Returns the segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Returns the segment descriptor, including uncommitted generations.
    #[must_use]
    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    /// Returns the field numbering.
    #[must_use]
    pub fn field_infos(&self) -> &FieldInfos {
        &self.core.field_infos
    }

    /// Returns the number of documents, deleted ones included.
    #[must_use]
    pub fn max_doc(&self) -> u32 {
        self.info.doc_count
    }

    /// Returns the number of live documents.
    #[must_use]
    pub fn num_docs(&self) -> u32 {
        self.max_doc() - self.deleted_count()
    }

    /// Returns true if any document is deleted.
    #[must_use]
    pub fn has_deletions(&self) -> bool {
        self.deleted_count() > 0
    }

    fn deleted_count(&self) -> u32 {
        self.deleted
            .as_ref()
            .map_or(0, |d| d.with_bytes(bits::count))
    }

    /// Returns true if `doc` is deleted.
    #[must_use]
    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deleted
            .as_ref()
            .is_some_and(|d| d.with_bytes(|b| bits::get(b, doc)))
    }

    /// Returns the stored fields of a live document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a deleted or
    /// out-of-range document.
    pub fn document(&self, doc: DocId) -> CoreResult<Document> {
        self.ensure_open()?;
        if self.is_deleted(doc) {
            return Err(CoreError::invalid_operation(format!(
                "document {doc} is deleted"
            )));
        }
        self.raw_document(doc).map(Document::stored_only)
    }

    pub(crate) fn raw_document(&self, doc: DocId) -> CoreResult<&Document> {
        self.core.docs.get(doc as usize).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "document {doc} out of range for segment {} ({} docs)",
                self.info.name, self.info.doc_count
            ))
        })
    }

    /// Returns the live documents containing `term`, ascending.
    #[must_use]
    pub fn term_docs(&self, term: &Term) -> Vec<DocId> {
        (0..self.max_doc())
            .filter(|d| !self.is_deleted(*d) && self.core.docs[*d as usize].contains_term(term))
            .collect()
    }

    /// Returns the number of documents containing `term`, deleted ones
    /// included until they are merged away.
    #[must_use]
    pub fn doc_freq(&self, term: &Term) -> u32 {
        let count = self.core.docs.iter().filter(|d| d.contains_term(term)).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Returns the effective norm bytes of a field, or `None` if the field
    /// keeps no norms in this segment.
    ///
    /// # Errors
    ///
    /// Fails if a separate norm file cannot be read, or after close.
    pub fn norms(&self, field: &str) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let Some(number) = self.core.field_infos.number(field) else {
            return Ok(None);
        };
        let Some(slot) = self.norms.get(&number) else {
            return Ok(None);
        };
        slot.ensure_loaded(&|| self.load_norms(number))?;
        let state = slot.state.lock();
        Ok(state.bytes.as_ref().map(BytesRef::to_vec))
    }

    /// Returns how many readers share the loaded norm buffer of a field, or
    /// `None` if it is not loaded.
    #[must_use]
    pub fn norm_ref_count(&self, field: &str) -> Option<usize> {
        let number = self.core.field_infos.number(field)?;
        let slot = self.norms.get(&number)?;
        let state = slot.state.lock();
        state.bytes.as_ref().map(BytesRef::ref_count)
    }

    /// Returns how many readers share the deletion bitset.
    #[must_use]
    pub fn deletions_ref_count(&self) -> Option<usize> {
        self.deleted.as_ref().map(BytesRef::ref_count)
    }

    fn load_norms(&self, number: u32) -> CoreResult<Vec<u8>> {
        if let Some(name) = self.info.norm_file_name(number) {
            let data = self.dir.read_file(&name)?;
            let norms = decode_separate_norms(&data)?;
            if norms.len() != self.info.doc_count as usize {
                return Err(CoreError::corrupt(format!(
                    "{name} holds {} norms for {} docs",
                    norms.len(),
                    self.info.doc_count
                )));
            }
            debug!(target: "tessera::segment", file = %name, "separate norms loaded");
            return Ok(norms);
        }
        self.core
            .norms
            .get(&number)
            .cloned()
            .ok_or_else(|| CoreError::corrupt(format!("segment {} lacks norms", self.info.name)))
    }

    /// Marks a document deleted. Returns false if it already was.
    pub(crate) fn delete_document(&mut self, doc: DocId) -> CoreResult<bool> {
        self.ensure_open()?;
        self.check_doc(doc)?;
        let bitset = match self.deleted.take() {
            Some(existing) => existing.ensure_writable()?,
            None => BytesRef::new(vec![0; bits::byte_len(self.info.doc_count)]),
        };
        let bitset = self.deleted.insert(bitset);
        let newly = bitset.with_bytes_mut(|b| bits::set(b, doc))?;
        if newly {
            self.deletions_dirty = true;
        }
        Ok(newly)
    }

    /// Clears all deletions.
    pub(crate) fn undelete_all(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        if let Some(bitset) = self.deleted.take() {
            bitset.release()?;
            self.deletions_dirty = true;
        }
        Ok(())
    }

    /// Overwrites one norm byte. Returns false if the field keeps no norms
    /// in this segment.
    pub(crate) fn set_norm(&mut self, doc: DocId, field: &str, value: u8) -> CoreResult<bool> {
        self.ensure_open()?;
        self.check_doc(doc)?;
        let Some(number) = self.core.field_infos.number(field) else {
            return Ok(false);
        };
        let Some(slot) = self.norms.get(&number).cloned() else {
            return Ok(false);
        };
        slot.ensure_loaded(&|| self.load_norms(number))?;

        // A pending clone still loads through this slot; leave it untouched.
        let slot = if Arc::strong_count(&slot) > 2 {
            let private = {
                let state = slot.state.lock();
                state.bytes.as_ref().map(BytesRef::acquire).transpose()?
            };
            let fresh = Arc::new(private.map(NormSlot::loaded).unwrap_or_default());
            self.norms.insert(number, Arc::clone(&fresh));
            fresh
        } else {
            slot
        };

        let mut state = slot.state.lock();
        let Some(bytes) = state.bytes.take() else {
            return Err(CoreError::AlreadyClosed { what: "segment reader" });
        };
        let bytes = state.bytes.insert(bytes.ensure_writable()?);
        bytes.with_bytes_mut(|b| b[doc as usize] = value)?;
        self.dirty_norms.insert(number);
        Ok(true)
    }

    /// Returns true if deletions or norms changed since the last commit.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.deletions_dirty || !self.dirty_norms.is_empty()
    }

    pub(crate) fn pending_state(&self) -> PendingState {
        PendingState {
            info: self.info.clone(),
            deletions_dirty: self.deletions_dirty,
            dirty_norms: self.dirty_norms.clone(),
        }
    }

    pub(crate) fn restore(&mut self, pending: PendingState) {
        self.info = pending.info;
        self.deletions_dirty = pending.deletions_dirty;
        self.dirty_norms = pending.dirty_norms;
    }

    /// Writes dirty deletions and norms as new generation files and points
    /// the descriptor at them.
    pub(crate) fn commit_changes(&mut self) -> CoreResult<()> {
        if !self.has_changes() {
            return Ok(());
        }
        let pending = self.pending_state();
        if let Err(e) = self.write_changes() {
            self.restore(pending);
            return Err(e);
        }
        self.deletions_dirty = false;
        self.dirty_norms.clear();
        Ok(())
    }

    fn write_changes(&mut self) -> CoreResult<()> {
        if self.deletions_dirty {
            let count = self.deleted_count();
            if count == 0 {
                self.info.del_gen = Default::default();
                self.info.del_count = 0;
            } else {
                let name = self.info.advance_del_gen();
                let encoded = self
                    .deleted
                    .as_ref()
                    .map(|d| d.with_bytes(|b| bits::encode_deletions(b, self.info.doc_count)))
                    .unwrap_or_default();
                write_file(self.dir.as_ref(), &name, &encoded)?;
                self.info.del_count = count;
                debug!(target: "tessera::segment", file = %name, deleted = count, "deletions written");
            }
        }
        for number in self.dirty_norms.clone() {
            let Some(slot) = self.norms.get(&number) else {
                continue;
            };
            let encoded = {
                let state = slot.state.lock();
                state
                    .bytes
                    .as_ref()
                    .map(|b| b.with_bytes(encode_separate_norms))
                    .ok_or(CoreError::AlreadyClosed { what: "segment reader" })?
            };
            let name = self.info.advance_norm_gen(number);
            write_file(self.dir.as_ref(), &name, &encoded)?;
            debug!(target: "tessera::segment", file = %name, "separate norms written");
        }
        Ok(())
    }

    /// Returns a reader sharing this one's data and buffers.
    ///
    /// With `take_changes`, uncommitted changes move to the clone.
    pub(crate) fn try_clone(&mut self, take_changes: bool) -> CoreResult<Self> {
        self.ensure_open()?;
        let deleted = self.deleted.as_ref().map(BytesRef::acquire).transpose()?;
        let norms = self
            .norms
            .iter()
            .map(|(number, slot)| -> CoreResult<(u32, Arc<NormSlot>)> {
                Ok((*number, slot.fork()?))
            })
            .collect::<CoreResult<BTreeMap<_, _>>>()?;
        let mut clone = Self {
            dir: Arc::clone(&self.dir),
            info: self.info.clone(),
            core: Arc::clone(&self.core),
            deleted,
            deletions_dirty: false,
            norms,
            dirty_norms: BTreeSet::new(),
            closed: false,
        };
        if take_changes {
            clone.deletions_dirty = std::mem::take(&mut self.deletions_dirty);
            clone.dirty_norms = std::mem::take(&mut self.dirty_norms);
        }
        Ok(clone)
    }

    /// Releases every shared buffer. Closing twice is a no-op.
    pub(crate) fn close(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first_error = None;
        for slot in self.norms.values() {
            if let Err(e) = slot.close() {
                first_error.get_or_insert(e);
            }
        }
        if let Some(bitset) = self.deleted.take() {
            if let Err(e) = bitset.release() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::AlreadyClosed { what: "segment reader" });
        }
        Ok(())
    }

    fn check_doc(&self, doc: DocId) -> CoreResult<()> {
        if doc >= self.info.doc_count {
            return Err(CoreError::invalid_operation(format!(
                "document {doc} out of range for segment {} ({} docs)",
                self.info.name, self.info.doc_count
            )));
        }
        Ok(())
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn load_core(dir: &dyn Directory, info: &SegmentInfo) -> CoreResult<SegmentData> {
    let data = if info.compound {
        let bytes = dir.read_file(&segment_file_name(&info.name, COMPOUND_EXTENSION))?;
        SegmentData::decode_compound(&bytes)?
    } else {
        let field_infos = dir.read_file(&segment_file_name(&info.name, FIELD_INFOS_EXTENSION))?;
        let fields = dir.read_file(&segment_file_name(&info.name, FIELDS_EXTENSION))?;
        let norms = dir.read_file(&segment_file_name(&info.name, NORMS_EXTENSION))?;
        SegmentData::decode_parts(&field_infos, &fields, &norms)?
    };
    Ok(data)
}
