//! Process-wide registry of commits held open by readers.
//!
//! Readers register the generation they read from; the file deleter keeps a
//! commit on disk while any hold on it exists, even if the deletion policy
//! marked it deleted. Holds are keyed by [`Directory::lock_id`] so separate
//! handles on the same storage see each other's holds.
//!
//! [`Directory::lock_id`]: tessera_store::Directory::lock_id

use crate::types::Generation;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static HOLDS: LazyLock<Mutex<HashMap<String, BTreeMap<Generation, usize>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Keeps one commit from being physically deleted while alive.
#[derive(Debug)]
pub struct CommitHold {
    directory_id: String,
    generation: Generation,
}

impl CommitHold {
    /// Registers a hold on `generation` in the directory `directory_id`.
    pub fn new(directory_id: impl Into<String>, generation: Generation) -> Self {
        let directory_id = directory_id.into();
        *HOLDS
            .lock()
            .entry(directory_id.clone())
            .or_default()
            .entry(generation)
            .or_insert(0) += 1;
        Self {
            directory_id,
            generation,
        }
    }

    /// Returns the held generation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl Clone for CommitHold {
    fn clone(&self) -> Self {
        Self::new(self.directory_id.clone(), self.generation)
    }
}

impl Drop for CommitHold {
    fn drop(&mut self) {
        let mut holds = HOLDS.lock();
        let Some(generations) = holds.get_mut(&self.directory_id) else {
            return;
        };
        if let Some(count) = generations.get_mut(&self.generation) {
            *count -= 1;
            if *count == 0 {
                generations.remove(&self.generation);
            }
        }
        if generations.is_empty() {
            holds.remove(&self.directory_id);
        }
    }
}

/// Returns true if any reader holds `generation`.
#[must_use]
pub fn is_held(directory_id: &str, generation: Generation) -> bool {
    HOLDS
        .lock()
        .get(directory_id)
        .is_some_and(|g| g.contains_key(&generation))
}

/// Returns every held generation of a directory, ascending.
#[must_use]
pub fn held_generations(directory_id: &str) -> Vec<Generation> {
    HOLDS
        .lock()
        .get(directory_id)
        .map(|g| g.keys().copied().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_lifecycle() {
        let id = "test@hold_lifecycle";
        let g = Generation::new(4);
        assert!(!is_held(id, g));
        let a = CommitHold::new(id, g);
        let b = a.clone();
        assert!(is_held(id, g));
        drop(a);
        assert!(is_held(id, g));
        drop(b);
        assert!(!is_held(id, g));
        assert!(held_generations(id).is_empty());
    }

    #[test]
    fn holds_are_per_directory() {
        let _a = CommitHold::new("test@dir_a", Generation::new(1));
        let _b = CommitHold::new("test@dir_a", Generation::new(3));
        assert!(!is_held("test@dir_b", Generation::new(1)));
        assert_eq!(
            held_generations("test@dir_a"),
            vec![Generation::new(1), Generation::new(3)]
        );
    }
}
