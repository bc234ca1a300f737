//! User models and their entries.
//!
//! A [`UserModel`] is the store handle for one (user, model type) pair.
//! Its entries are fetched per unit of work into an [`EntryArena`],
//! mutated there, and written back in one [`EntryArena::commit`].

pub mod arena;
pub mod entry;

pub use arena::{CommitStats, EntryArena};
pub use entry::{TimeBin, UserModelEntry};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AttuneError, Result};
use crate::types::{Term, UserId, UserModelId};

/// Names a family of user models (one per integration strategy, say).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelType(pub String);

impl ModelType {
    /// Model type used when none is configured.
    pub const DEFAULT: &'static str = "default";

    /// Create a model type from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Default for ModelType {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store handle of a user's model of a given type. Created lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserModel {
    /// Store identity.
    pub id: UserModelId,
    /// Owner.
    pub user_id: UserId,
    /// Model family.
    pub model_type: ModelType,
}

/// A serializable view of a model and all of its entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserModelSnapshot {
    /// The model handle.
    pub model: UserModel,
    /// All entries, ordered by term.
    pub entries: Vec<UserModelEntry>,
}

impl UserModelSnapshot {
    /// Build a snapshot from entries keyed by term.
    #[must_use]
    pub fn new(model: UserModel, entries: BTreeMap<Term, UserModelEntry>) -> Self {
        Self {
            model,
            entries: entries.into_values().collect(),
        }
    }

    /// Encode as pretty JSON.
    ///
    /// # Errors
    /// Returns [`AttuneError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AttuneError::Serialization(e.to_string()))
    }

    /// Decode from JSON.
    ///
    /// # Errors
    /// Returns [`AttuneError::Serialization`] if decoding fails.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AttuneError::Serialization(e.to_string()))
    }

    /// Entries whose weight came from directed adaptation.
    pub fn adapted_entries(&self) -> impl Iterator<Item = &UserModelEntry> {
        self.entries.iter().filter(|e| e.adapted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoredTerm;

    #[test]
    fn snapshot_json_keeps_entries() {
        let model = UserModel {
            id: UserModelId(1),
            user_id: UserId(7),
            model_type: ModelType::default(),
        };
        let mut entries = BTreeMap::new();
        let mut organic = UserModelEntry::new(ScoredTerm::new(Term::word("rust"), 0.5));
        organic.accumulate(1.0, 0.75);
        organic.consolidate().unwrap();
        entries.insert(organic.term().clone(), organic);
        let adapted = UserModelEntry::adapted(Term::word("cargo"), 0.6);
        entries.insert(adapted.term().clone(), adapted);

        let snapshot = UserModelSnapshot::new(model, entries);
        let json = snapshot.to_json().unwrap();
        let back = UserModelSnapshot::from_json(&json).unwrap();

        assert_eq!(back.entries.len(), 2);
        assert_eq!(back.adapted_entries().count(), 1);
        assert_eq!(back.entries[0].term(), &Term::word("cargo"));
    }
}
