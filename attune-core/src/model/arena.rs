//! Per-unit-of-work entry arena.
//!
//! Entries for one (user, message) are fetched once at the start of a
//! chain run, mutated in place, and written back in a single commit.
//! No reference to an entry outlives the arena.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{AttuneError, Result};
use crate::model::{UserModel, UserModelEntry};
use crate::store::Store;
use crate::types::Term;

/// Counts of what a commit wrote back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Entries inserted or updated.
    pub written: usize,
    /// Entries removed.
    pub removed: usize,
}

/// Working copy of a user model's entries for one unit of work.
#[derive(Debug, Clone)]
pub struct EntryArena {
    model: UserModel,
    entries: BTreeMap<Term, UserModelEntry>,
    dirty: BTreeSet<Term>,
    removed: BTreeSet<Term>,
}

impl EntryArena {
    /// An arena over already-fetched entries.
    #[must_use]
    pub fn new(model: UserModel, entries: BTreeMap<Term, UserModelEntry>) -> Self {
        Self {
            model,
            entries,
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Fetch the entries of `model` for `terms`.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn load(store: &dyn Store, model: UserModel, terms: &[Term]) -> Result<Self> {
        let entries = store.get_user_model_entries_for_terms(&model, terms)?;
        Ok(Self::new(model, entries))
    }

    /// The model these entries belong to.
    #[must_use]
    pub fn model(&self) -> &UserModel {
        &self.model
    }

    /// Read-only view of the live entries.
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<Term, UserModelEntry> {
        &self.entries
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, term: &Term) -> Option<&UserModelEntry> {
        self.entries.get(term)
    }

    /// Mutable access; the entry will be written back on commit.
    pub fn get_mut(&mut self, term: &Term) -> Option<&mut UserModelEntry> {
        let entry = self.entries.get_mut(term)?;
        self.dirty.insert(term.clone());
        Some(entry)
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, entry: UserModelEntry) {
        let term = entry.term().clone();
        self.removed.remove(&term);
        self.dirty.insert(term.clone());
        self.entries.insert(term, entry);
    }

    /// Drop an entry; it will be deleted from the store on commit.
    pub fn remove(&mut self, term: &Term) -> Option<UserModelEntry> {
        self.dirty.remove(term);
        let entry = self.entries.remove(term)?;
        self.removed.insert(term.clone());
        Some(entry)
    }

    /// Whether any entry was changed or removed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }

    /// Write changed entries back and delete removed ones.
    ///
    /// # Errors
    /// Returns [`AttuneError::InvariantViolation`] if a changed entry was
    /// never consolidated; propagates store failures.
    pub fn commit(&mut self, store: &dyn Store) -> Result<CommitStats> {
        let mut changed = Vec::with_capacity(self.dirty.len());
        for term in &self.dirty {
            if let Some(entry) = self.entries.get(term) {
                if !entry.is_consolidated() {
                    return Err(AttuneError::InvariantViolation(format!(
                        "entry {term} of model {} committed without consolidation",
                        self.model.id
                    )));
                }
                changed.push(entry.clone());
            }
        }

        if !changed.is_empty() {
            store.store_or_update_entries(&self.model, &changed)?;
        }
        for term in &self.removed {
            store.remove_entry(&self.model, term)?;
        }

        let stats = CommitStats {
            written: changed.len(),
            removed: self.removed.len(),
        };
        self.dirty.clear();
        self.removed.clear();
        debug!(
            model = %self.model.id,
            written = stats.written,
            removed = stats.removed,
            "Committed entry arena"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelType;
    use crate::store::InMemoryStore;
    use crate::types::{ScoredTerm, UserId};

    fn setup() -> (InMemoryStore, UserModel) {
        let store = InMemoryStore::new();
        let model = store.get_or_create_user_model(UserId(1), &ModelType::default()).unwrap();
        let seed = UserModelEntry::new(ScoredTerm::new(Term::word("rust"), 0.5));
        store.store_or_update_entries(&model, &[seed]).unwrap();
        (store, model)
    }

    #[test]
    fn commit_writes_changes_and_removals() {
        let (store, model) = setup();
        let mut arena =
            EntryArena::load(&store, model.clone(), &[Term::word("rust"), Term::word("go")]).unwrap();
        assert_eq!(arena.entries().len(), 1);

        arena.insert(UserModelEntry::new(ScoredTerm::new(Term::word("go"), 0.3)));
        arena.remove(&Term::word("rust"));
        let stats = arena.commit(&store).unwrap();

        assert_eq!(stats, CommitStats { written: 1, removed: 1 });
        let all = store.get_all_entries(&model).unwrap();
        assert!(all.contains_key(&Term::word("go")));
        assert!(!all.contains_key(&Term::word("rust")));
        assert!(!arena.has_changes());
    }

    #[test]
    fn unconsolidated_entry_cannot_be_committed() {
        let (store, model) = setup();
        let mut arena = EntryArena::load(&store, model, &[Term::word("rust")]).unwrap();
        arena
            .get_mut(&Term::word("rust"))
            .unwrap()
            .accumulate(1.0, 1.0);
        assert!(matches!(
            arena.commit(&store),
            Err(AttuneError::InvariantViolation(_))
        ));
    }
}
