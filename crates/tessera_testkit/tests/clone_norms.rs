//! Norm changes through cloned readers: shared buffers, copy on write and
//! norms surviving merges and added indexes.

use std::sync::Arc;
use std::time::Duration;
use tessera_codec::{decode_norm, encode_norm, Document, Field, Index, Store};
use tessera_core::{
    CoreError, IndexReader, IndexWriter, OpenMode, ReaderConfig, Similarity, WriterConfig,
};
use tessera_store::{Directory, RamDirectory};
use tessera_testkit::scenarios::four_field_index;

const NUM_FIELDS: usize = 10;

/// Stores boosts as norms unchanged.
#[derive(Debug)]
struct SimilarityOne;

impl Similarity for SimilarityOne {
    fn length_norm(&self, _field: &str, _num_terms: u32) -> f32 {
        1.0
    }
}

fn writable(dir: Arc<dyn Directory>) -> IndexReader {
    IndexReader::open(
        dir,
        ReaderConfig::new().write_lock_timeout(Duration::from_millis(50)),
    )
    .unwrap()
}

fn field1_ref_count(reader: &IndexReader) -> Option<usize> {
    reader.segment_reader(0).unwrap().norm_ref_count("field1")
}

#[test]
fn norm_buffers_are_shared_until_written() {
    let index = four_field_index(10);

    let mut reader1 = writable(index.handle());
    let mut reader2 = reader1.try_clone().unwrap();
    reader2.norms("field1").unwrap();
    assert_eq!(field1_ref_count(&reader2), Some(2));

    let mut reader3 = reader2.try_clone().unwrap();
    assert_eq!(field1_ref_count(&reader3), Some(3));
    let mut reader4 = reader3.try_clone().unwrap();
    assert_eq!(field1_ref_count(&reader4), Some(4));

    reader4.set_norm(5, "field1", 0.33).unwrap();

    // reader4 holds the write lock now.
    let result = reader3.set_norm(1, "field1", 0.99);
    assert!(matches!(result, Err(CoreError::LockObtainFailed { .. })), "{result:?}");

    let norms3 = reader3.norms("field1").unwrap().unwrap();
    let norms4 = reader4.norms("field1").unwrap().unwrap();
    assert_ne!(decode_norm(norms3[5]), decode_norm(norms4[5]));
    assert_eq!(field1_ref_count(&reader3), Some(3));
    assert_eq!(field1_ref_count(&reader4), Some(1));

    // The clone takes over the lock and the private buffer.
    let mut reader5 = reader4.try_clone().unwrap();
    reader5.set_norm(5, "field1", 0.7).unwrap();
    assert_eq!(field1_ref_count(&reader5), Some(1));

    for reader in [&mut reader5, &mut reader4, &mut reader3, &mut reader2, &mut reader1] {
        reader.close().unwrap();
    }

    let reader = index.read_only();
    let norms = reader.norms("field1").unwrap().unwrap();
    assert_eq!(norms[5], encode_norm(0.7));
}

#[test]
fn closing_parent_releases_its_reference() {
    let index = four_field_index(10);

    let mut reader1 = writable(index.handle());
    reader1.norms("field1").unwrap();
    let mut reader2 = reader1.try_clone().unwrap();
    assert_eq!(field1_ref_count(&reader1), Some(2));

    reader1.close().unwrap();
    assert_eq!(field1_ref_count(&reader2), Some(1));
    assert!(reader2.norms("field1").unwrap().is_some());
    reader2.close().unwrap();
}

/// Tracks the norm every document should carry.
#[derive(Debug, Default)]
struct NormTracker {
    last_norm: f32,
    norms: Vec<f32>,
    modified: Vec<f32>,
}

impl NormTracker {
    /// Next norm that survives byte encoding unchanged and is larger than
    /// the last one; wraps once past 10.
    fn next_norm(&mut self) -> f32 {
        const DELTA: f32 = 0.001;
        let mut norm = self.last_norm + DELTA;
        loop {
            let exact = decode_norm(encode_norm(norm));
            if exact > self.last_norm {
                norm = exact;
                break;
            }
            norm += DELTA;
        }
        self.norms.push(norm);
        self.modified.push(norm);
        self.last_norm = if norm > 10.0 { 0.0 } else { norm };
        norm
    }

    fn new_doc(&mut self) -> Document {
        let boost = self.next_norm();
        let mut doc = Document::new();
        for i in 0..NUM_FIELDS {
            doc.add(
                Field::new(format!("f{i}"), format!("v{i}"), Store::No, Index::NotAnalyzed)
                    .with_boost(boost),
            );
        }
        doc
    }

    /// Swaps field `f1` norms pairwise on every third document.
    fn modify_f1(&mut self, reader: &mut IndexReader) {
        let n = reader.max_doc() as usize;
        for i in (0..n).step_by(3) {
            let k = (i * 3) % self.modified.len();
            let original = self.modified[i];
            let swapped = self.modified[k];
            self.modified[i] = swapped;
            self.modified[k] = original;
            reader.set_norm(i as u32, "f1", swapped).unwrap();
            reader.set_norm(k as u32, "f1", original).unwrap();
        }
    }

    fn verify(&self, reader: &IndexReader) {
        for i in 0..NUM_FIELDS {
            let field = format!("f{i}");
            let bytes = reader.norms(&field).unwrap().unwrap();
            assert_eq!(bytes.len(), self.norms.len(), "number of norms for {field}");
            let expected = if i == 1 { &self.modified } else { &self.norms };
            for (doc, (byte, want)) in bytes.iter().zip(expected).enumerate() {
                let norm = decode_norm(*byte);
                assert!(
                    (norm - want).abs() < 0.000_001,
                    "norm of {field} for doc {doc} is {norm}, expected {want}"
                );
            }
        }
    }

    fn verify_dir(&self, dir: &Arc<dyn Directory>) {
        let mut reader = IndexReader::open(Arc::clone(dir), ReaderConfig::new().read_only(true)).unwrap();
        self.verify(&reader);
        reader.close().unwrap();
    }
}

fn config(mode: OpenMode) -> WriterConfig {
    WriterConfig::new()
        .open_mode(mode)
        .max_buffered_docs(5)
        .merge_factor(3)
        .similarity(Arc::new(SimilarityOne))
        .use_compound_file(true)
}

fn create_index() -> Arc<dyn Directory> {
    let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
    IndexWriter::open(Arc::clone(&dir), config(OpenMode::Create))
        .unwrap()
        .close()
        .unwrap();
    dir
}

fn add_docs(tracker: &mut NormTracker, dir: &Arc<dyn Directory>, count: usize) {
    let mut writer = IndexWriter::open(Arc::clone(dir), config(OpenMode::Append)).unwrap();
    for _ in 0..count {
        writer.add_document(tracker.new_doc()).unwrap();
    }
    writer.close().unwrap();
}

/// Changes `f1` norms through a reader and two generations of clones, then
/// commits from the last clone.
fn change_norms_through_clones(tracker: &mut NormTracker, dir: &Arc<dyn Directory>) {
    add_docs(tracker, dir, 12);

    let mut reader = IndexReader::open(Arc::clone(dir), ReaderConfig::new()).unwrap();
    tracker.verify(&reader);
    tracker.modify_f1(&mut reader);

    let mut clone = reader.try_clone().unwrap();
    tracker.verify(&clone);
    tracker.modify_f1(&mut clone);

    let mut clone3 = clone.try_clone().unwrap();
    tracker.verify(&clone3);
    tracker.modify_f1(&mut clone3);
    tracker.verify(&clone3);
    clone3.flush().unwrap();
    clone3.close().unwrap();

    clone.close().unwrap();
    reader.close().unwrap();
    tracker.verify_dir(dir);
}

#[test]
fn cloned_norm_changes_survive_add_indexes_and_optimize() {
    let mut tracker = NormTracker::default();

    let dir1 = create_index();
    change_norms_through_clones(&mut tracker, &dir1);
    let norms1 = std::mem::take(&mut tracker.norms);
    let modified1 = std::mem::take(&mut tracker.modified);

    let dir2 = create_index();
    change_norms_through_clones(&mut tracker, &dir2);

    let dir3 = create_index();
    let mut writer = IndexWriter::open(Arc::clone(&dir3), config(OpenMode::Append)).unwrap();
    writer
        .add_indexes(&[Arc::clone(&dir1), Arc::clone(&dir2)])
        .unwrap();
    writer.optimize().unwrap();
    writer.close().unwrap();

    tracker.norms = norms1.into_iter().chain(tracker.norms).collect();
    tracker.modified = modified1.into_iter().chain(tracker.modified).collect();
    tracker.verify_dir(&dir3);

    change_norms_through_clones(&mut tracker, &dir3);

    let mut writer = IndexWriter::open(Arc::clone(&dir3), config(OpenMode::Append)).unwrap();
    writer.optimize().unwrap();
    writer.close().unwrap();
    tracker.verify_dir(&dir3);
}

#[test]
fn clone_without_changes_commits_nothing() {
    let index = four_field_index(4);
    let before = tessera_testkit::commit_generations(index.dir.as_ref());

    let mut reader = writable(index.handle());
    let mut clone = reader.try_clone().unwrap();
    assert!(clone.norms("field2").unwrap().is_some());
    clone.close().unwrap();
    reader.close().unwrap();

    assert_eq!(tessera_testkit::commit_generations(index.dir.as_ref()), before);
}
