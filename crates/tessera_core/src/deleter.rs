//! File-level reference counting and policy-driven commit deletion.
//!
//! Every index file is counted once per commit that references it, plus
//! once if the owner's current working state references it. A file is
//! deleted when its count drops to zero. Commits leave the count only when
//! the deletion policy marks them deleted and no reader holds them.

use crate::commit::{IndexCommit, SegmentInfos};
use crate::error::CoreResult;
use crate::file_names::{generation_from_segments_file_name, is_index_file, is_segments_file};
use crate::holds;
use crate::policy::DeletionPolicy;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tessera_store::Directory;
use tracing::{debug, info, warn};

pub(crate) struct IndexFileDeleter {
    dir: Arc<dyn Directory>,
    policy: Arc<dyn DeletionPolicy>,
    directory_id: String,
    ref_counts: HashMap<String, usize>,
    commits: Vec<Arc<IndexCommit>>,
    /// Files of the last non-commit checkpoint.
    last_files: Vec<String>,
    /// Deletions that failed and are retried on the next checkpoint.
    pending: BTreeSet<String>,
}

impl IndexFileDeleter {
    /// Loads every commit in the directory, removes unreferenced index
    /// files, runs the policy's `on_init` and protects `current`.
    pub(crate) fn new(
        dir: Arc<dyn Directory>,
        policy: Arc<dyn DeletionPolicy>,
        current: &SegmentInfos,
    ) -> CoreResult<Self> {
        let mut deleter = Self {
            directory_id: dir.lock_id(),
            dir,
            policy,
            ref_counts: HashMap::new(),
            commits: Vec::new(),
            last_files: Vec::new(),
            pending: BTreeSet::new(),
        };

        let mut commits = Vec::new();
        for name in deleter.dir.list_all()? {
            if !is_index_file(&name) {
                continue;
            }
            deleter.ref_counts.entry(name.clone()).or_insert(0);
            if !is_segments_file(&name) {
                continue;
            }
            let generation = generation_from_segments_file_name(&name)?;
            match SegmentInfos::read_generation(deleter.dir.as_ref(), generation) {
                Ok(infos) => commits.push(Arc::new(IndexCommit::new(infos, deleter.dir.as_ref())?)),
                Err(e) if e.is_not_found() => {
                    debug!(target: "tessera::deleter", file = %name, "commit vanished while loading");
                }
                Err(e) => return Err(e),
            }
        }
        commits.sort_by_key(|c| c.generation());
        for commit in &commits {
            deleter.inc_ref(commit.file_names());
        }

        let orphans: Vec<String> = deleter
            .ref_counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| name.clone())
            .collect();
        for name in orphans {
            debug!(target: "tessera::deleter", file = %name, "removing unreferenced file");
            deleter.ref_counts.remove(&name);
            deleter.delete_file(&name);
        }

        debug!(
            target: "tessera::policy",
            commits = commits.len(),
            "invoking deletion policy on_init"
        );
        deleter.policy.on_init(&commits)?;
        deleter.commits = commits;

        deleter.checkpoint(current, false)?;
        deleter.delete_commits();
        Ok(deleter)
    }

    /// Records a new state of the owner.
    ///
    /// For a commit, the new commit joins the list, the policy's
    /// `on_commit` runs and marked commits are deleted. Otherwise `infos`
    /// replaces the previously protected working state.
    pub(crate) fn checkpoint(&mut self, infos: &SegmentInfos, is_commit: bool) -> CoreResult<()> {
        self.delete_pending();

        if !is_commit {
            let files = infos.files(false);
            self.inc_ref(&files);
            let previous = std::mem::replace(&mut self.last_files, files);
            self.dec_ref(&previous);
            return Ok(());
        }

        let commit = Arc::new(IndexCommit::new(infos.clone(), self.dir.as_ref())?);
        self.inc_ref(commit.file_names());
        self.commits.push(commit);

        debug!(
            target: "tessera::policy",
            commits = self.commits.len(),
            "invoking deletion policy on_commit"
        );
        let result = self.policy.on_commit(&self.commits);
        if let Some(newest) = self.commits.last() {
            if newest.is_deleted() {
                warn!(
                    target: "tessera::policy",
                    generation = newest.generation().as_u64(),
                    "policy tried to delete the newest commit; ignored"
                );
                newest.undelete();
            }
        }
        self.delete_commits();
        result
    }

    /// Deletes index files nothing references, such as leftovers of an
    /// aborted flush or merge.
    pub(crate) fn refresh(&mut self) -> CoreResult<()> {
        for name in self.dir.list_all()? {
            if is_index_file(&name) && self.ref_counts.get(&name).copied().unwrap_or(0) == 0 {
                debug!(target: "tessera::deleter", file = %name, "removing unreferenced file");
                self.ref_counts.remove(&name);
                self.delete_file(&name);
            }
        }
        Ok(())
    }

    /// Releases the working state.
    pub(crate) fn close(&mut self) {
        let last = std::mem::take(&mut self.last_files);
        self.dec_ref(&last);
        self.delete_pending();
    }

    /// Returns the known commits, oldest first.
    pub(crate) fn commits(&self) -> &[Arc<IndexCommit>] {
        &self.commits
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self, name: &str) -> usize {
        self.ref_counts.get(name).copied().unwrap_or(0)
    }

    fn delete_commits(&mut self) {
        let commits = std::mem::take(&mut self.commits);
        let mut kept = Vec::with_capacity(commits.len());
        for commit in commits {
            if !commit.is_deleted() {
                kept.push(commit);
            } else if holds::is_held(&self.directory_id, commit.generation()) {
                debug!(
                    target: "tessera::deleter",
                    generation = commit.generation().as_u64(),
                    "commit is held by a reader; deletion deferred"
                );
                commit.undelete();
                kept.push(commit);
            } else {
                info!(
                    target: "tessera::deleter",
                    generation = commit.generation().as_u64(),
                    "deleting commit"
                );
                self.dec_ref(commit.file_names());
            }
        }
        self.commits = kept;
    }

    fn inc_ref(&mut self, files: &[String]) {
        for file in files {
            *self.ref_counts.entry(file.clone()).or_insert(0) += 1;
        }
    }

    fn dec_ref(&mut self, files: &[String]) {
        for file in files {
            let Some(count) = self.ref_counts.get_mut(file) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.ref_counts.remove(file);
                self.delete_file(file);
            }
        }
    }

    fn delete_file(&mut self, name: &str) {
        match self.dir.delete_file(name) {
            Ok(()) => {
                self.pending.remove(name);
                debug!(target: "tessera::deleter", file = %name, "deleted");
            }
            Err(e) if e.is_not_found() => {
                self.pending.remove(name);
            }
            Err(e) => {
                warn!(
                    target: "tessera::deleter",
                    file = %name,
                    error = %e,
                    "delete failed; will retry"
                );
                self.pending.insert(name.to_string());
            }
        }
    }

    fn delete_pending(&mut self) {
        let pending: Vec<String> = self.pending.iter().cloned().collect();
        for name in pending {
            if self.ref_counts.get(&name).copied().unwrap_or(0) == 0 {
                self.delete_file(&name);
            } else {
                self.pending.remove(&name);
            }
        }
    }
}

impl std::fmt::Debug for IndexFileDeleter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFileDeleter")
            .field("directory_id", &self.directory_id)
            .field("commits", &self.commits.len())
            .field("files", &self.ref_counts.len())
            .field("pending", &self.pending)
            .finish()
    }
}
