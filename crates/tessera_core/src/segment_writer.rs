//! Building, writing and merging segment data.

use crate::error::{CoreError, CoreResult};
use crate::file_names::{
    segment_file_name, COMPOUND_EXTENSION, FIELDS_EXTENSION, FIELD_INFOS_EXTENSION,
    NORMS_EXTENSION,
};
use crate::segment_info::SegmentInfo;
use crate::segment_reader::SegmentReader;
use crate::similarity::Similarity;
use std::io::Write;
use tessera_codec::{analysis, encode_norm, Document, FieldInfos, SegmentData};
use tessera_store::Directory;
use tracing::debug;

/// Writes `bytes` to a new file.
pub(crate) fn write_file(dir: &dyn Directory, name: &str, bytes: &[u8]) -> CoreResult<()> {
    let mut out = dir.create_output(name)?;
    out.write_all(bytes)?;
    out.close()?;
    Ok(())
}

/// Builds segment content from buffered documents.
///
/// Each indexed field with norms gets one byte per document:
/// `doc boost * field boosts * length_norm(field, tokens)`. Documents
/// without the field get the encoded norm of 1.0.
pub(crate) fn build_segment(docs: Vec<Document>, similarity: &dyn Similarity) -> SegmentData {
    let mut field_infos = FieldInfos::new();
    for doc in &docs {
        field_infos.add_document(doc);
    }

    let default_norm = similarity.encode_norm(1.0);
    let mut data = SegmentData {
        field_infos,
        docs: Vec::new(),
        norms: Default::default(),
    };
    for info in data.field_infos.iter().filter(|i| i.has_norms()) {
        let norms = docs
            .iter()
            .map(|doc| {
                let mut fields = doc.fields.iter().filter(|f| f.name == info.name).peekable();
                if fields.peek().is_none() {
                    return default_norm;
                }
                let (boost, tokens) = fields.fold((doc.boost, 0u32), |(boost, tokens), f| {
                    (boost * f.boost, tokens.saturating_add(analysis::token_count(f)))
                });
                similarity.encode_norm(boost * similarity.length_norm(&info.name, tokens))
            })
            .collect();
        data.norms.insert(info.number, norms);
    }
    data.docs = docs;
    data
}

/// Writes segment content under `name` and returns its descriptor.
///
/// Files are not synced here; the next commit syncs everything it
/// references. On failure, already written files are left for the
/// deleter to clean up.
pub(crate) fn write_segment(
    dir: &dyn Directory,
    name: &str,
    data: &SegmentData,
    compound: bool,
) -> CoreResult<SegmentInfo> {
    if compound {
        let encoded = data.encode_compound()?;
        write_file(dir, &segment_file_name(name, COMPOUND_EXTENSION), &encoded)?;
    } else {
        let parts = data.encode_parts()?;
        write_file(dir, &segment_file_name(name, FIELD_INFOS_EXTENSION), &parts.field_infos)?;
        write_file(dir, &segment_file_name(name, FIELDS_EXTENSION), &parts.fields)?;
        write_file(dir, &segment_file_name(name, NORMS_EXTENSION), &parts.norms)?;
    }
    debug!(
        target: "tessera::segment",
        segment = %name,
        docs = data.doc_count(),
        compound,
        "segment written"
    );
    Ok(SegmentInfo::new(name, data.doc_count(), compound))
}

/// Merges the live documents of `readers` into new segment content.
///
/// Norms are the readers' effective norms, separate norm files included.
/// A source segment without norms for a field contributes the encoded norm
/// of 1.0.
pub(crate) fn merge_segments(readers: &[&SegmentReader]) -> CoreResult<SegmentData> {
    let mut field_infos = FieldInfos::new();
    for reader in readers {
        for info in reader.field_infos().iter() {
            field_infos.add(&info.name, info.indexed, info.omit_norms);
        }
    }

    let mut data = SegmentData {
        field_infos,
        docs: Vec::new(),
        norms: Default::default(),
    };
    let default_norm = encode_norm(1.0);
    let norm_fields: Vec<(u32, String)> = data
        .field_infos
        .iter()
        .filter(|i| i.has_norms())
        .map(|i| (i.number, i.name.clone()))
        .collect();

    for reader in readers {
        let live: Vec<u32> = (0..reader.max_doc()).filter(|d| !reader.is_deleted(*d)).collect();
        for (number, name) in &norm_fields {
            let source = reader.norms(name)?;
            let target = data.norms.entry(*number).or_default();
            match source {
                Some(bytes) => target.extend(live.iter().map(|d| bytes[*d as usize])),
                None => target.extend(live.iter().map(|_| default_norm)),
            }
        }
        for doc in &live {
            data.docs.push(reader.raw_document(*doc)?.clone());
        }
    }

    data.validate().map_err(|e| CoreError::merge(e.to_string()))?;
    debug!(
        target: "tessera::segment",
        sources = readers.len(),
        docs = data.doc_count(),
        "segments merged"
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::DefaultSimilarity;
    use std::sync::Arc;
    use tessera_codec::{decode_norm, Field, Index, Store};
    use tessera_store::RamDirectory;

    fn doc(content: &str, id: u32) -> Document {
        let mut doc = Document::new();
        doc.add(Field::new("content", content, Store::No, Index::Analyzed))
            .add(Field::new("id", id.to_string(), Store::Yes, Index::NotAnalyzed));
        doc
    }

    #[test]
    fn norms_fold_boosts_and_length() {
        let mut boosted = doc("aaa bbb ccc ddd", 1).with_boost(2.0);
        boosted.add(Field::new("extra", "x", Store::No, Index::NotAnalyzedNoNorms));
        let data = build_segment(vec![doc("aaa", 0), boosted], &DefaultSimilarity);

        let content = data.norms_for("content").unwrap();
        assert_eq!(decode_norm(content[0]), 1.0);
        assert_eq!(decode_norm(content[1]), 1.0);
        assert!(data.norms_for("extra").is_none());
        let id = data.norms_for("id").unwrap();
        assert_eq!(decode_norm(id[1]), 2.0);
    }

    #[test]
    fn missing_field_gets_default_norm() {
        let mut other = Document::new();
        other.add(Field::new("title", "t", Store::Yes, Index::Analyzed));
        let data = build_segment(vec![doc("aaa", 0), other], &DefaultSimilarity);
        assert_eq!(data.norms_for("content").unwrap()[1], encode_norm(1.0));
        assert_eq!(data.norms_for("title").unwrap()[0], encode_norm(1.0));
    }

    #[test]
    fn write_both_layouts() {
        let dir = RamDirectory::new();
        let data = build_segment(vec![doc("aaa", 0)], &DefaultSimilarity);
        let info = write_segment(&dir, "_0", &data, true).unwrap();
        assert_eq!(info.files(), vec!["_0.cfs"]);
        let info = write_segment(&dir, "_1", &data, false).unwrap();
        assert_eq!(info.doc_count, 1);
        assert_eq!(
            dir.list_all().unwrap(),
            vec!["_0.cfs", "_1.fdt", "_1.fnm", "_1.nrm"]
        );
    }

    #[test]
    fn merge_drops_deleted_docs() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let a = build_segment(vec![doc("aaa", 0), doc("aaa", 1)], &DefaultSimilarity);
        let b = build_segment(vec![doc("aaa", 2)], &DefaultSimilarity);
        let info_a = write_segment(dir.as_ref(), "_0", &a, true).unwrap();
        let info_b = write_segment(dir.as_ref(), "_1", &b, false).unwrap();

        let mut ra = SegmentReader::open(Arc::clone(&dir), info_a).unwrap();
        let rb = SegmentReader::open(Arc::clone(&dir), info_b).unwrap();
        ra.delete_document(0).unwrap();

        let merged = merge_segments(&[&ra, &rb]).unwrap();
        assert_eq!(merged.doc_count(), 2);
        let ids: Vec<_> = merged.docs.iter().map(|d| d.get("id").unwrap()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(merged.norms_for("content").unwrap().len(), 2);
    }
}
