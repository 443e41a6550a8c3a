//! Deletion policy scenarios: which commits survive, and how often the
//! engine consults the policy.

use std::sync::Arc;
use std::time::Duration;
use tessera_core::{
    latest_generation, list_commits, ExpirationTimeDeletionPolicy, Generation, IndexReader,
    KeepAllDeletionPolicy, KeepLastNDeletionPolicy, KeepOnlyLastCommitDeletionPolicy, OpenMode,
    ReaderConfig, SnapshotDeletionPolicy, WriterConfig,
};
use tessera_store::Directory;
use tessera_testkit::prelude::*;

fn latest(index: &TestIndex) -> Generation {
    latest_generation(index.dir.as_ref()).unwrap().unwrap()
}

fn previous(generation: Generation) -> Generation {
    Generation::new(generation.as_u64() - 1)
}

/// Opens the latest commit read-only, removes its commit file and moves on
/// to the one before, `count` times. Calls `check` with each reader, or
/// with the error once nothing is left to open.
fn walk_back(
    index: &TestIndex,
    count: usize,
    mut check: impl FnMut(usize, Result<&IndexReader, &tessera_core::CoreError>),
) {
    remove_generation_file(index.dir.as_ref());
    let mut generation = latest(index);
    for i in 0..count {
        match IndexReader::open(index.handle(), ReaderConfig::new().read_only(true)) {
            Ok(mut reader) => {
                check(i, Ok(&reader));
                reader.close().unwrap();
            }
            Err(e) => check(i, Err(&e)),
        }
        if i + 1 < count {
            remove_commit_file(index.dir.as_ref(), generation);
        }
        generation = previous(generation);
    }
}

#[test]
fn keep_all_keeps_every_commit() {
    for compound in [false, true] {
        let index = TestIndex::memory();
        let policy = Arc::new(
            CountingPolicy::new(Arc::new(KeepAllDeletionPolicy)).with_directory(index.handle()),
        );

        let mut writer = index.writer(
            policy_config(policy.clone(), compound)
                .open_mode(OpenMode::Create)
                .max_buffered_docs(10),
        );
        add_content_docs(&mut writer, 107);
        writer.close().unwrap();

        let mut writer = index.writer(policy_config(policy.clone(), compound).open_mode(OpenMode::Append));
        writer.optimize().unwrap();
        writer.close().unwrap();

        assert_eq!(policy.on_init_count(), 2);
        // One commit per close; opening for create publishes without
        // consulting the policy.
        assert_eq!(policy.on_commit_count(), 2);

        let commits = list_commits(index.dir.as_ref()).unwrap();
        assert_eq!(commits.len(), 3);
        for commit in &commits {
            let mut reader = IndexReader::open(
                index.handle(),
                ReaderConfig::new().index_commit(Arc::clone(commit)),
            )
            .unwrap();
            assert_eq!(reader.generation(), commit.generation());
            reader.close().unwrap();
        }

        // Removing a commit file orphans that commit's files; the next
        // writer must clean them up.
        remove_generation_file(index.dir.as_ref());
        let mut generation = latest(&index);
        while generation.as_u64() > 0 {
            index.read_only().close().unwrap();
            remove_commit_file(index.dir.as_ref(), generation);
            generation = previous(generation);
            if generation.as_u64() > 0 {
                let before = index.files().len();
                index.writer(policy_config(policy.clone(), compound)).close().unwrap();
                let after = index.files().len();
                assert!(after < before, "{after} files after cleanup, {before} before");
            }
        }
    }
}

#[test]
fn keep_none_on_init_leaves_only_new_commits() {
    for compound in [false, true] {
        let index = TestIndex::memory();
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepNoneOnInitDeletionPolicy)));

        let mut writer = index.writer(
            policy_config(policy.clone(), compound)
                .open_mode(OpenMode::Create)
                .max_buffered_docs(10),
        );
        add_content_docs(&mut writer, 107);
        writer.close().unwrap();

        let mut writer = index.writer(policy_config(policy.clone(), compound).open_mode(OpenMode::Append));
        writer.optimize().unwrap();
        writer.close().unwrap();

        assert_eq!(policy.on_init_count(), 2);
        assert_eq!(policy.on_commit_count(), 2);

        let reader = index.read_only();
        assert_eq!(reader.num_docs(), 107);
        assert!(reader.is_optimized());
        assert_eq!(list_commits(index.dir.as_ref()).unwrap().len(), 1);
    }
}

#[test]
fn keep_last_n_drops_older_commits() {
    const N: usize = 5;
    for compound in [false, true] {
        let index = TestIndex::memory();
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepLastNDeletionPolicy::new(N))));

        for _ in 0..=N {
            let mut writer = index.writer(
                policy_config(policy.clone(), compound)
                    .open_mode(OpenMode::Create)
                    .max_buffered_docs(10),
            );
            add_content_docs(&mut writer, 17);
            writer.optimize().unwrap();
            writer.close().unwrap();
        }

        assert!(policy.deleted_count() > 0);
        assert_eq!(policy.on_init_count(), N + 1);
        assert_eq!(policy.on_commit_count(), N + 1);

        walk_back(&index, N + 1, |i, opened| match opened {
            Ok(reader) => {
                assert!(i < N, "commit older than the last {N} survived");
                assert_eq!(reader.num_docs(), 17);
            }
            Err(e) => {
                assert_eq!(i, N, "commit {i} missing: {e}");
                assert!(e.is_not_found());
            }
        });
    }
}

#[test]
fn keep_last_n_with_reader_changes() {
    const N: usize = 10;
    for compound in [false, true] {
        let index = TestIndex::memory();
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepLastNDeletionPolicy::new(N))));
        let writer_config = |mode| policy_config(policy.clone(), compound).open_mode(mode);

        index.writer(writer_config(OpenMode::Create)).close().unwrap();
        for i in 0..=N as u32 {
            let mut writer = index.writer(writer_config(OpenMode::Append));
            add_content_docs(&mut writer, 17);
            writer.close().unwrap();

            let mut reader = IndexReader::open(
                index.handle(),
                ReaderConfig::new().deletion_policy(policy.clone()),
            )
            .unwrap();
            reader.delete_document(3 * i + 1).unwrap();
            reader.set_norm(4 * i + 1, "content", 2.0).unwrap();
            assert_eq!(content_hits(&reader), 16 * (1 + i as usize));
            reader.close().unwrap();
        }
        let mut writer = index.writer(writer_config(OpenMode::Append));
        writer.optimize().unwrap();
        writer.close().unwrap();

        assert_eq!(policy.on_init_count(), 2 * (N + 2));
        assert_eq!(policy.on_commit_count(), 2 * (N + 2) - 1);
        assert_eq!(content_hits(&index.read_only()), 176);

        // Newest first: optimize, then alternating reader commits (one
        // deletion fewer going back) and writer commits (17 docs fewer).
        let mut expected = 176;
        walk_back(&index, N + 1, |i, opened| match opened {
            Ok(reader) => {
                assert!(i < N, "commit older than the last {N} survived");
                if i > 1 {
                    if i % 2 == 0 {
                        expected += 1;
                    } else {
                        expected -= 17;
                    }
                }
                assert_eq!(content_hits(reader), expected, "commit {i} back");
            }
            Err(e) => assert_eq!(i, N, "commit {i} missing: {e}"),
        });
    }
}

#[test]
fn keep_last_n_through_creates() {
    const N: usize = 10;
    for compound in [false, true] {
        let index = TestIndex::memory();
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepLastNDeletionPolicy::new(N))));
        let writer_config = |mode| {
            policy_config(policy.clone(), compound)
                .open_mode(mode)
                .max_buffered_docs(10)
        };

        index.writer(writer_config(OpenMode::Create)).close().unwrap();
        for _ in 0..=N {
            let mut writer = index.writer(writer_config(OpenMode::Append));
            add_content_docs(&mut writer, 17);
            writer.close().unwrap();

            let mut reader = IndexReader::open(
                index.handle(),
                ReaderConfig::new().deletion_policy(policy.clone()),
            )
            .unwrap();
            reader.delete_document(3).unwrap();
            reader.set_norm(5, "content", 2.0).unwrap();
            assert_eq!(content_hits(&reader), 16);
            reader.close().unwrap();

            // Opening for create over an index drops every segment; close
            // publishes that.
            index.writer(writer_config(OpenMode::Create)).close().unwrap();
        }

        assert_eq!(policy.on_init_count(), 1 + 3 * (N + 1));
        assert_eq!(policy.on_commit_count(), 3 * (N + 1));
        assert_eq!(content_hits(&index.read_only()), 0);

        let mut expected = 0;
        walk_back(&index, N + 1, |i, opened| match opened {
            Ok(reader) => {
                assert!(i < N, "commit older than the last {N} survived");
                assert_eq!(content_hits(reader), expected, "commit {i} back");
                expected = match expected {
                    0 => 16,
                    16 => 17,
                    _ => 0,
                };
            }
            Err(e) => assert_eq!(i, N, "commit {i} missing: {e}"),
        });
    }
}

#[test]
fn expiration_time_deletes_old_commits_but_never_the_newest() {
    let index = TestIndex::memory();
    let ram = index.ram().unwrap();
    let policy = Arc::new(CountingPolicy::new(Arc::new(ExpirationTimeDeletionPolicy::new(
        Duration::from_secs(60),
    ))));

    index.writer(policy_config(policy.clone(), true).open_mode(OpenMode::Create)).close().unwrap();
    for _ in 0..3 {
        let mut writer = index.writer(policy_config(policy.clone(), true));
        add_content_docs(&mut writer, 17);
        writer.close().unwrap();
    }
    assert_eq!(policy.deleted_count(), 0);
    assert_eq!(list_commits(index.dir.as_ref()).unwrap().len(), 4);

    // Everything older than the threshold goes except the newest commit.
    age_commit_files(ram, Duration::from_secs(120));
    index.writer(policy_config(policy.clone(), true)).close().unwrap();
    assert_eq!(policy.deleted_count(), 3);
    let commits = list_commits(index.dir.as_ref()).unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].num_docs(), 51);

    // The aged newest commit goes once a fresh commit supersedes it.
    age_commit_files(ram, Duration::from_secs(120));
    let mut writer = index.writer(policy_config(policy.clone(), true));
    add_content_docs(&mut writer, 17);
    writer.close().unwrap();
    assert_eq!(policy.deleted_count(), 4);
    let commits = list_commits(index.dir.as_ref()).unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(content_hits(&index.read_only()), 68);
}

#[test]
fn open_prior_commit_then_rollback_or_close() {
    let index = TestIndex::memory();
    let policy = Arc::new(
        CountingPolicy::new(Arc::new(KeepAllDeletionPolicy)).with_directory(index.handle()),
    );
    let config = || WriterConfig::new().deletion_policy(policy.clone());

    let mut writer = index.writer(config().max_buffered_docs(2));
    for i in 0..10 {
        writer.add_document(content_doc()).unwrap();
        if (1 + i) % 2 == 0 {
            writer.commit().unwrap();
        }
    }
    writer.close().unwrap();

    let commits = list_commits(index.dir.as_ref()).unwrap();
    assert_eq!(commits.len(), 6);
    let last = commits.iter().max_by_key(|c| c.generation()).cloned().unwrap();

    // Add one document and optimize.
    let mut writer = index.writer(config());
    writer.add_document(content_doc()).unwrap();
    assert_eq!(writer.num_docs(), 11);
    writer.optimize().unwrap();
    writer.close().unwrap();
    assert_eq!(list_commits(index.dir.as_ref()).unwrap().len(), 7);

    // Open on the commit before the optimize, then roll back.
    let mut writer = index.writer(config().index_commit(Arc::clone(&last)));
    assert_eq!(writer.num_docs(), 10);
    writer.rollback().unwrap();

    let reader = index.read_only();
    assert!(reader.is_optimized());
    assert_eq!(reader.num_docs(), 11);
    drop(reader);

    // Open on it again; closing publishes it as a new commit.
    let mut writer = index.writer(config().index_commit(Arc::clone(&last)));
    assert_eq!(writer.num_docs(), 10);
    writer.close().unwrap();
    assert_eq!(list_commits(index.dir.as_ref()).unwrap().len(), 8);

    let reader = index.read_only();
    assert!(!reader.is_optimized());
    assert_eq!(reader.num_docs(), 10);
    drop(reader);

    let mut writer = index.writer(config());
    writer.optimize().unwrap();
    writer.close().unwrap();
    let reader = index.read_only();
    assert!(reader.is_optimized());
    assert_eq!(reader.num_docs(), 10);
    drop(reader);

    // Same again keeping only the last commit: readers see the optimized
    // index until the writer closes.
    let mut writer = index.writer(
        WriterConfig::new()
            .deletion_policy(Arc::new(KeepOnlyLastCommitDeletionPolicy))
            .index_commit(last),
    );
    assert_eq!(writer.num_docs(), 10);
    let reader = index.read_only();
    assert!(reader.is_optimized());
    assert_eq!(reader.num_docs(), 10);
    drop(reader);

    writer.close().unwrap();
    let reader = index.read_only();
    assert!(!reader.is_optimized());
    assert_eq!(reader.num_docs(), 10);
}

#[test]
fn snapshot_protects_commit_until_released() {
    let index = TestIndex::memory();
    let snapshots = Arc::new(SnapshotDeletionPolicy::new(Arc::new(
        KeepOnlyLastCommitDeletionPolicy,
    )));
    let mut writer = index.writer(WriterConfig::new().deletion_policy(snapshots.clone()));
    add_content_docs(&mut writer, 5);
    writer.commit().unwrap();

    let snapshot = snapshots.snapshot().unwrap();
    assert_eq!(snapshots.snapshot_generation(), Some(snapshot.generation()));
    assert!(snapshots.snapshot().is_err());

    for _ in 0..2 {
        add_content_docs(&mut writer, 5);
        writer.commit().unwrap();
    }
    for file in snapshot.file_names() {
        assert!(index.dir.file_exists(file).unwrap(), "{file} deleted under snapshot");
    }
    let mut reader = IndexReader::open(
        index.handle(),
        ReaderConfig::new().read_only(true).index_commit(Arc::clone(&snapshot)),
    )
    .unwrap();
    assert_eq!(reader.num_docs(), 5);
    reader.close().unwrap();

    snapshots.release();
    add_content_docs(&mut writer, 1);
    writer.commit().unwrap();
    assert!(!index.dir.file_exists(snapshot.segments_file_name()).unwrap());
    assert_eq!(list_commits(index.dir.as_ref()).unwrap().len(), 1);
    writer.close().unwrap();
}

#[test]
fn reader_hold_defers_commit_deletion() {
    let index = TestIndex::memory();
    let mut writer = index.writer(WriterConfig::new());
    add_content_docs(&mut writer, 3);
    writer.commit().unwrap();

    let old = index.read_only();
    let held = old.generation();
    add_content_docs(&mut writer, 3);
    writer.commit().unwrap();
    assert!(index.dir.file_exists(&tessera_core::file_names::segments_file_name(held)).unwrap());
    assert_eq!(content_hits(&old), 3);

    drop(old);
    add_content_docs(&mut writer, 3);
    writer.commit().unwrap();
    assert!(!index.dir.file_exists(&tessera_core::file_names::segments_file_name(held)).unwrap());
    writer.close().unwrap();
    assert_eq!(content_hits(&index.read_only()), 9);
}
