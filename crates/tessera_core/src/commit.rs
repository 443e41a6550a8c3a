//! Commits: the segment list of one index generation.
//!
//! A commit file `segments_<gen>` uses a hand-written little-endian layout:
//!
//! ```text
//! magic "TSEG" | format u32 | version u64 | counter u64 | timestamp u64
//! | segment count u32 | segments... | crc32 u32
//!
//! segment: name_len u16 | name | doc_count u32 | del_gen u64 | del_count u32
//!          | compound u8 | norm count u32 | (field u32, gen u64)...
//! ```
//!
//! Commits are written under `pending_segments_<gen>`, synced, then renamed
//! into place, so a crash never leaves a partially written `segments_<gen>`.

use crate::error::{CoreError, CoreResult};
use crate::file_names::{
    generation_from_segments_file_name, is_segments_file, pending_segments_file_name,
    segments_file_name, SEGMENTS_GEN,
};
use crate::segment_info::SegmentInfo;
use crate::types::Generation;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tessera_store::Directory;
use tracing::{debug, info, warn};

/// Magic bytes of a commit file.
pub const SEGMENTS_MAGIC: [u8; 4] = *b"TSEG";
/// Current commit file format.
pub const SEGMENTS_FORMAT: u32 = 1;
/// Format marker of `segments.gen`.
pub const SEGMENTS_GEN_FORMAT: u32 = 0x5447_454e;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The ordered segment list of one index generation plus its counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SegmentInfos {
    /// Generation this state was read from or last written as.
    pub generation: Generation,
    /// Bumped by every commit.
    pub version: u64,
    /// Next segment counter; segment names are never reused.
    pub counter: u64,
    /// Wall-clock time of the commit, in milliseconds.
    pub timestamp: u64,
    /// Segments in document order.
    pub segments: Vec<SegmentInfo>,
}

impl SegmentInfos {
    /// Creates an empty, never-committed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the commit file name for the current generation.
    #[must_use]
    pub fn segments_file_name(&self) -> String {
        segments_file_name(self.generation)
    }

    /// Allocates the next segment name.
    pub fn next_segment_name(&mut self) -> String {
        let name = crate::file_names::segment_name(self.counter);
        self.counter += 1;
        name
    }

    /// Returns the total number of documents, deleted ones included.
    #[must_use]
    pub fn max_doc(&self) -> u32 {
        self.segments.iter().map(|s| s.doc_count).sum()
    }

    /// Returns the number of live documents.
    #[must_use]
    pub fn num_docs(&self) -> u32 {
        self.segments.iter().map(SegmentInfo::live_docs).sum()
    }

    /// Returns true if any segment has deletions.
    #[must_use]
    pub fn has_deletions(&self) -> bool {
        self.segments.iter().any(SegmentInfo::has_deletions)
    }

    /// Returns true for exactly one segment without deletions.
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.segments.len() == 1 && !self.has_deletions()
    }

    /// Returns every file this state references, without duplicates.
    #[must_use]
    pub fn files(&self, include_segments_file: bool) -> Vec<String> {
        let mut files = Vec::new();
        if include_segments_file {
            files.push(self.segments_file_name());
        }
        for segment in &self.segments {
            for file in segment.files() {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        files
    }

    /// Encodes the commit file content.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SEGMENTS_MAGIC);
        buf.extend_from_slice(&SEGMENTS_FORMAT.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.counter.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());

        let count = u32::try_from(self.segments.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for segment in &self.segments {
            let name = segment.name.as_bytes();
            let name_len = u16::try_from(name.len()).unwrap_or(u16::MAX);
            buf.extend_from_slice(&name_len.to_le_bytes());
            buf.extend_from_slice(name);
            buf.extend_from_slice(&segment.doc_count.to_le_bytes());
            buf.extend_from_slice(&segment.del_gen.as_u64().to_le_bytes());
            buf.extend_from_slice(&segment.del_count.to_le_bytes());
            buf.push(u8::from(segment.compound));
            let norms = u32::try_from(segment.norm_gens.len()).unwrap_or(u32::MAX);
            buf.extend_from_slice(&norms.to_le_bytes());
            for (field, generation) in &segment.norm_gens {
                buf.extend_from_slice(&field.to_le_bytes());
                buf.extend_from_slice(&generation.as_u64().to_le_bytes());
            }
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes commit file content read from `generation`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptIndex`] on any format or checksum error.
    pub fn decode(data: &[u8], generation: Generation) -> CoreResult<Self> {
        if data.len() < 4 + 4 {
            return Err(CoreError::corrupt("commit file too short"));
        }
        let (body, footer) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(CoreError::corrupt(format!(
                "commit checksum mismatch: expected {expected:08x}, got {actual:08x}"
            )));
        }

        let mut cursor = Cursor::new(body);
        if cursor.take(4)? != SEGMENTS_MAGIC {
            return Err(CoreError::corrupt("invalid commit magic"));
        }
        let format = cursor.u32()?;
        if format != SEGMENTS_FORMAT {
            return Err(CoreError::corrupt(format!(
                "unsupported commit format: {format}"
            )));
        }
        let version = cursor.u64()?;
        let counter = cursor.u64()?;
        let timestamp = cursor.u64()?;

        let count = cursor.u32()?;
        let mut segments = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let name_len = cursor.u16()? as usize;
            let name = std::str::from_utf8(cursor.take(name_len)?)
                .map_err(|_| CoreError::corrupt("invalid segment name"))?
                .to_string();
            let doc_count = cursor.u32()?;
            let del_gen = Generation::new(cursor.u64()?);
            let del_count = cursor.u32()?;
            let compound = cursor.u8()? != 0;
            let norm_count = cursor.u32()?;
            let mut norm_gens = BTreeMap::new();
            for _ in 0..norm_count {
                let field = cursor.u32()?;
                norm_gens.insert(field, Generation::new(cursor.u64()?));
            }
            if del_count > doc_count {
                return Err(CoreError::corrupt(format!(
                    "segment {name} deletes {del_count} of {doc_count} docs"
                )));
            }
            segments.push(SegmentInfo {
                name,
                doc_count,
                del_gen,
                del_count,
                compound,
                norm_gens,
            });
        }
        if !cursor.is_at_end() {
            return Err(CoreError::corrupt("trailing bytes in commit file"));
        }

        Ok(Self {
            generation,
            version,
            counter,
            timestamp,
            segments,
        })
    }

    /// Reads the latest commit of a directory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] if the directory holds no commit
    /// and [`CoreError::CorruptIndex`] if the latest one is damaged.
    pub fn read(dir: &dyn Directory) -> CoreResult<Self> {
        let generation = latest_generation(dir)?.ok_or_else(|| {
            CoreError::index_not_found(format!("no segments file in {}", dir.lock_id()))
        })?;
        Self::read_generation(dir, generation)
    }

    /// Reads the commit of a specific generation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] if the commit file is missing
    /// and [`CoreError::CorruptIndex`] if it is damaged.
    pub fn read_generation(dir: &dyn Directory, generation: Generation) -> CoreResult<Self> {
        let name = segments_file_name(generation);
        let data = dir.read_file(&name).map_err(|e| {
            if e.is_not_found() {
                CoreError::index_not_found(format!("{name} does not exist"))
            } else {
                e.into()
            }
        })?;
        Self::decode(&data, generation).map_err(|e| match e {
            CoreError::CorruptIndex { message } => CoreError::corrupt(format!("{name}: {message}")),
            other => other,
        })
    }

    /// Publishes this state as the next generation.
    ///
    /// Bumps the version and moves the timestamp forward, writes the commit
    /// under a temporary name, syncs it and renames it into place. On
    /// failure the counters are restored and the previously published
    /// commit stays the latest.
    ///
    /// # Errors
    ///
    /// Propagates any directory error; nothing is published in that case.
    pub fn commit(&mut self, dir: &dyn Directory) -> CoreResult<()> {
        let previous = (self.generation, self.version, self.timestamp);
        let on_disk = latest_generation(dir)?.unwrap_or_default();
        self.generation = self.generation.max(on_disk).next();
        self.version += 1;
        self.timestamp = self.timestamp.max(now_millis());

        if let Err(e) = self.publish(dir) {
            warn!(
                target: "tessera::commit",
                generation = self.generation.as_u64(),
                error = %e,
                "commit failed; previous commit remains current"
            );
            let pending = pending_segments_file_name(self.generation);
            if dir.file_exists(&pending).unwrap_or(false) {
                let _ = dir.delete_file(&pending);
            }
            (self.generation, self.version, self.timestamp) = previous;
            return Err(e);
        }

        if let Err(e) = write_generation_file(dir, self.generation) {
            debug!(target: "tessera::commit", error = %e, "could not update segments.gen");
        }

        info!(
            target: "tessera::commit",
            generation = self.generation.as_u64(),
            version = self.version,
            segments = self.segments.len(),
            "commit published"
        );
        Ok(())
    }

    fn publish(&self, dir: &dyn Directory) -> CoreResult<()> {
        dir.sync(&self.files(false))?;

        let pending = pending_segments_file_name(self.generation);
        let mut out = dir.create_output(&pending)?;
        out.write_all(&self.encode())?;
        out.close()?;
        dir.sync(&[pending.clone()])?;
        dir.rename(&pending, &self.segments_file_name())?;
        Ok(())
    }
}

/// Returns the highest commit generation present in a directory.
///
/// `segments.gen` is consulted only as a hint: it is used when it names a
/// commit file that exists and is newer than anything the listing shows.
///
/// # Errors
///
/// Propagates directory listing errors.
pub fn latest_generation(dir: &dyn Directory) -> CoreResult<Option<Generation>> {
    let mut latest = None;
    for name in dir.list_all()? {
        if is_segments_file(&name) {
            let generation = generation_from_segments_file_name(&name)?;
            latest = latest.max(Some(generation));
        }
    }
    if let Some(hint) = read_generation_file(dir) {
        if Some(hint) > latest && dir.file_exists(&segments_file_name(hint)).unwrap_or(false) {
            latest = Some(hint);
        }
    }
    Ok(latest)
}

/// Returns the version of the latest commit.
///
/// # Errors
///
/// Same as [`SegmentInfos::read`].
pub fn read_current_version(dir: &dyn Directory) -> CoreResult<u64> {
    SegmentInfos::read(dir).map(|infos| infos.version)
}

fn write_generation_file(dir: &dyn Directory, generation: Generation) -> CoreResult<()> {
    let mut buf = Vec::with_capacity(20);
    buf.extend_from_slice(&SEGMENTS_GEN_FORMAT.to_le_bytes());
    buf.extend_from_slice(&generation.as_u64().to_le_bytes());
    buf.extend_from_slice(&generation.as_u64().to_le_bytes());
    let mut out = dir.create_output(SEGMENTS_GEN)?;
    out.write_all(&buf)?;
    out.close()?;
    Ok(())
}

fn read_generation_file(dir: &dyn Directory) -> Option<Generation> {
    let data = dir.read_file(SEGMENTS_GEN).ok()?;
    let mut cursor = Cursor::new(&data);
    if cursor.u32().ok()? != SEGMENTS_GEN_FORMAT {
        return None;
    }
    let first = cursor.u64().ok()?;
    let second = cursor.u64().ok()?;
    (first == second).then_some(Generation::new(first))
}

/// A handle on one published commit.
///
/// Deletion policies receive the full list of commits and call
/// [`IndexCommit::delete`] on the ones they want gone. Readers and writers
/// can also be opened on a specific commit.
#[derive(Debug)]
pub struct IndexCommit {
    infos: SegmentInfos,
    segments_file_name: String,
    files: Vec<String>,
    modified: u64,
    directory_id: String,
    deleted: AtomicBool,
}

impl IndexCommit {
    pub(crate) fn new(infos: SegmentInfos, dir: &dyn Directory) -> CoreResult<Self> {
        let segments_file_name = infos.segments_file_name();
        let modified = dir.file_modified(&segments_file_name)?;
        Ok(Self {
            files: infos.files(true),
            segments_file_name,
            modified,
            directory_id: dir.lock_id(),
            infos,
            deleted: AtomicBool::new(false),
        })
    }

    /// Returns the commit generation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.infos.generation
    }

    /// Returns the commit version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.infos.version
    }

    /// Returns the commit timestamp in milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.infos.timestamp
    }

    /// Returns the modification time of the commit file in milliseconds.
    #[must_use]
    pub fn modified_millis(&self) -> u64 {
        self.modified
    }

    /// Returns the commit file name.
    #[must_use]
    pub fn segments_file_name(&self) -> &str {
        &self.segments_file_name
    }

    /// Returns every file the commit references, commit file included.
    #[must_use]
    pub fn file_names(&self) -> &[String] {
        &self.files
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.infos.segments.len()
    }

    /// Returns the number of live documents.
    #[must_use]
    pub fn num_docs(&self) -> u32 {
        self.infos.num_docs()
    }

    /// Returns true for one segment without deletions.
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.infos.is_optimized()
    }

    /// Returns the segment list.
    #[must_use]
    pub fn segment_infos(&self) -> &SegmentInfos {
        &self.infos
    }

    /// Returns the lock id of the directory the commit lives in.
    #[must_use]
    pub fn directory_id(&self) -> &str {
        &self.directory_id
    }

    /// Marks the commit for deletion.
    ///
    /// Files are removed once no other commit references them and no open
    /// reader holds this commit.
    pub fn delete(&self) {
        if !self.deleted.swap(true, Ordering::AcqRel) {
            debug!(
                target: "tessera::policy",
                generation = self.infos.generation.as_u64(),
                "commit marked for deletion"
            );
        }
    }

    /// Returns true if the commit was marked for deletion.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn undelete(&self) {
        self.deleted.store(false, Ordering::Release);
    }
}

/// Lists every readable commit in a directory, oldest first.
///
/// # Errors
///
/// Returns [`CoreError::CorruptIndex`] if any commit file is damaged.
pub fn list_commits(dir: &dyn Directory) -> CoreResult<Vec<Arc<IndexCommit>>> {
    let mut generations = Vec::new();
    for name in dir.list_all()? {
        if is_segments_file(&name) {
            generations.push(generation_from_segments_file_name(&name)?);
        }
    }
    generations.sort_unstable();

    let mut commits = Vec::with_capacity(generations.len());
    for generation in generations {
        let infos = SegmentInfos::read_generation(dir, generation)?;
        commits.push(Arc::new(IndexCommit::new(infos, dir)?));
    }
    Ok(commits)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CoreError::corrupt("commit file too short"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::{FaultOp, FaultyDirectory, RamDirectory};

    fn write_file(dir: &dyn Directory, name: &str) {
        let mut out = dir.create_output(name).unwrap();
        out.write_all(b"data").unwrap();
        out.close().unwrap();
    }

    fn sample() -> SegmentInfos {
        let mut infos = SegmentInfos::new();
        let name = infos.next_segment_name();
        let mut seg = SegmentInfo::new(name, 35, true);
        seg.advance_del_gen();
        seg.del_count = 1;
        seg.advance_norm_gen(0);
        infos.segments.push(seg);
        let name = infos.next_segment_name();
        infos.segments.push(SegmentInfo::new(name, 4, false));
        infos
    }

    fn with_files(dir: &dyn Directory, infos: &SegmentInfos) {
        for file in infos.files(false) {
            write_file(dir, &file);
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut infos = sample();
        infos.version = 7;
        infos.timestamp = 12345;
        let decoded = SegmentInfos::decode(&infos.encode(), Generation::new(0)).unwrap();
        assert_eq!(decoded, infos);
        assert_eq!(decoded.num_docs(), 38);
        assert_eq!(decoded.max_doc(), 39);
    }

    #[test]
    fn corruption_detected() {
        let mut data = sample().encode();
        data[10] ^= 0x40;
        assert!(matches!(
            SegmentInfos::decode(&data, Generation::new(1)),
            Err(CoreError::CorruptIndex { .. })
        ));
        assert!(matches!(
            SegmentInfos::decode(b"TSEG", Generation::new(1)),
            Err(CoreError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn empty_directory_has_no_index() {
        let dir = RamDirectory::new();
        assert!(matches!(
            SegmentInfos::read(&dir),
            Err(CoreError::IndexNotFound { .. })
        ));
        assert!(latest_generation(&dir).unwrap().is_none());
    }

    #[test]
    fn commits_advance_generation_and_version() {
        let dir = RamDirectory::new();
        let mut infos = sample();
        with_files(&dir, &infos);

        infos.commit(&dir).unwrap();
        assert_eq!(infos.generation, Generation::new(1));
        assert_eq!(infos.version, 1);
        let first_ts = infos.timestamp;

        infos.commit(&dir).unwrap();
        assert_eq!(infos.generation, Generation::new(2));
        assert_eq!(infos.version, 2);
        assert!(infos.timestamp >= first_ts);

        let read = SegmentInfos::read(&dir).unwrap();
        assert_eq!(read, infos);
        assert!(dir.file_exists("segments_1").unwrap());
        assert!(dir.file_exists(SEGMENTS_GEN).unwrap());
        assert!(!dir.file_exists("pending_segments_2").unwrap());
    }

    #[test]
    fn generation_file_is_advisory() {
        let dir = RamDirectory::new();
        let mut infos = SegmentInfos::new();
        infos.commit(&dir).unwrap();
        infos.commit(&dir).unwrap();

        dir.delete_file("segments_2").unwrap();
        assert_eq!(latest_generation(&dir).unwrap(), Some(Generation::new(1)));

        dir.delete_file(SEGMENTS_GEN).unwrap();
        assert_eq!(SegmentInfos::read(&dir).unwrap().generation, Generation::new(1));
    }

    #[test]
    fn commit_skips_generations_already_on_disk() {
        let dir = RamDirectory::new();
        let mut a = SegmentInfos::new();
        a.commit(&dir).unwrap();
        a.commit(&dir).unwrap();

        let mut stale = SegmentInfos::new();
        stale.commit(&dir).unwrap();
        assert_eq!(stale.generation, Generation::new(3));
    }

    #[test]
    fn failed_rename_leaves_previous_commit() {
        let ram = RamDirectory::new();
        let dir = FaultyDirectory::new(Arc::new(ram.clone()));
        let mut infos = SegmentInfos::new();
        infos.commit(&dir).unwrap();

        dir.fail(FaultOp::Rename, "pending_segments");
        let before = infos.clone();
        assert!(infos.commit(&dir).is_err());
        assert_eq!(infos, before);
        assert_eq!(ram.list_all().unwrap(), vec!["segments.gen", "segments_1"]);
        assert_eq!(SegmentInfos::read(&ram).unwrap().generation, Generation::new(1));
    }

    #[test]
    fn failed_write_leaves_no_pending_file() {
        let ram = RamDirectory::new();
        let dir = FaultyDirectory::new(Arc::new(ram.clone()));
        let mut infos = SegmentInfos::new();
        dir.fail(FaultOp::Write, "pending_segments");
        assert!(infos.commit(&dir).is_err());
        assert!(ram.list_all().unwrap().is_empty());
    }

    #[test]
    fn list_commits_oldest_first() {
        let dir = RamDirectory::new();
        let mut infos = SegmentInfos::new();
        for _ in 0..3 {
            infos.commit(&dir).unwrap();
        }
        let commits = list_commits(&dir).unwrap();
        let gens: Vec<u64> = commits.iter().map(|c| c.generation().as_u64()).collect();
        assert_eq!(gens, vec![1, 2, 3]);
        assert_eq!(commits[2].segments_file_name(), "segments_3");
        assert!(commits.windows(2).all(|w| w[0].version() < w[1].version()));
        assert!(!commits[0].is_deleted());
        commits[0].delete();
        assert!(commits[0].is_deleted());
    }

    #[test]
    fn list_commits_surfaces_corruption() {
        let dir = RamDirectory::new();
        let mut infos = SegmentInfos::new();
        infos.commit(&dir).unwrap();
        write_file(&dir, "segments_2");
        assert!(matches!(
            list_commits(&dir),
            Err(CoreError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn optimized_flag() {
        let mut infos = SegmentInfos::new();
        assert!(!infos.is_optimized());
        infos.segments.push(SegmentInfo::new("_0", 3, true));
        assert!(infos.is_optimized());
        infos.segments[0].advance_del_gen();
        assert!(!infos.is_optimized());
    }

    #[test]
    fn commits_survive_reopening_on_disk() {
        let temp = tempfile::tempdir().unwrap();
        {
            let dir = tessera_store::FsDirectory::open(temp.path()).unwrap();
            let mut infos = sample();
            with_files(&dir, &infos);
            infos.commit(&dir).unwrap();
            infos.commit(&dir).unwrap();
        }
        let dir = tessera_store::FsDirectory::open(temp.path()).unwrap();
        assert_eq!(latest_generation(&dir).unwrap(), Some(Generation::new(2)));
        let read = SegmentInfos::read(&dir).unwrap();
        assert_eq!(read.segments, sample().segments);
        assert!(!dir.file_exists("pending_segments_2").unwrap());
    }
}
