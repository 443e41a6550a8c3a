//! Property tests: random writer and reader sessions keep commits ordered
//! and the final commit holds exactly the surviving documents.

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_core::{
    list_commits, IndexReader, KeepAllDeletionPolicy, KeepLastNDeletionPolicy,
    KeepOnlyLastCommitDeletionPolicy, ReaderConfig,
};
use tessera_testkit::prelude::*;

fn stored_ids(reader: &IndexReader) -> BTreeSet<u32> {
    (0..reader.max_doc())
        .filter(|doc| !reader.is_deleted(*doc))
        .map(|doc| {
            let stored = reader.document(doc).unwrap();
            stored.get("id").unwrap().parse().unwrap()
        })
        .collect()
}

fn run_session(policy: Arc<CountingPolicy>, ops: &[IndexOperation]) -> Result<(), TestCaseError> {
    let index = TestIndex::memory();
    let mut model = OperationModel::open(index.handle(), policy.clone())
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    for op in ops {
        model
            .apply(op)
            .map_err(|e| TestCaseError::fail(format!("{op:?}: {e}")))?;
    }
    model.finish().map_err(|e| TestCaseError::fail(e.to_string()))?;

    let commits = list_commits(index.dir.as_ref()).map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert!(!commits.is_empty());
    verify_commit_order(&commits).map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert!(policy.on_init_count() >= 1);

    let mut reader = IndexReader::open(index.handle(), ReaderConfig::new().read_only(true))
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert_eq!(&stored_ids(&reader), model.live_ids());
    prop_assert_eq!(reader.num_docs() as usize, model.live_ids().len());
    prop_assert_eq!(content_hits(&reader), model.live_ids().len());
    reader.close().map_err(|e| TestCaseError::fail(e.to_string()))?;
    Ok(())
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn keep_all_sessions(ops in operation_sequence_strategy(1, 30)) {
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepAllDeletionPolicy)));
        run_session(policy, &ops)?;
    }

    #[test]
    fn keep_only_last_sessions(ops in operation_sequence_strategy(1, 30)) {
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepOnlyLastCommitDeletionPolicy)));
        run_session(policy, &ops)?;
    }

    #[test]
    fn keep_last_three_sessions(ops in operation_sequence_strategy(1, 30)) {
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepLastNDeletionPolicy::new(3))));
        run_session(policy, &ops)?;
    }
}

#[test]
fn keep_only_last_leaves_one_commit() {
    let index = TestIndex::memory();
    let policy = Arc::new(CountingPolicy::new(Arc::new(KeepOnlyLastCommitDeletionPolicy)));
    let mut model = OperationModel::open(index.handle(), policy.clone()).unwrap();
    let ops = [
        IndexOperation::Add(5),
        IndexOperation::Commit,
        IndexOperation::DeleteId(2),
        IndexOperation::Reopen,
        IndexOperation::ReaderDeleteId(4),
        IndexOperation::Add(4),
        IndexOperation::Optimize,
        IndexOperation::ReaderSetNorm(1),
    ];
    for op in &ops {
        model.apply(op).unwrap();
    }
    model.finish().unwrap();

    assert_eq!(list_commits(index.dir.as_ref()).unwrap().len(), 1);
    let reader = index.read_only();
    assert_eq!(&stored_ids(&reader), model.live_ids());
    assert_eq!(reader.num_docs(), 7);
    assert!(policy.deleted_count() > 0);
}
