//! Periodic model cleanup.
//!
//! Organically learned entries whose evidence has cancelled out
//! (`score_count <= 0`) carry no information and are removed. Adapted
//! entries have no evidence by construction and are kept. Terms no entry
//! references any more are dropped afterwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::error::Result;
use crate::metrics::{PipelineCounters, spans};
use crate::model::{ModelType, UserModelEntry};
use crate::store::Store;

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// User models inspected.
    pub models_scanned: usize,
    /// Entries removed.
    pub entries_removed: usize,
    /// Interned terms dropped.
    pub terms_removed: usize,
}

/// Whether cleanup should drop `entry`.
#[must_use]
pub fn is_stale(entry: &UserModelEntry) -> bool {
    !entry.adapted && entry.score_count <= 0.0
}

/// Remove stale entries from every model of `model_type`, then drop
/// unreferenced terms.
///
/// # Errors
/// Propagates store failures.
pub fn cleanup(
    store: &dyn Store,
    model_type: &ModelType,
    counters: &PipelineCounters,
) -> Result<CleanupReport> {
    let span = info_span!(spans::CLEANUP, model_type = %model_type);
    let _guard = span.enter();

    let mut report = CleanupReport::default();
    for model in store.list_user_models(model_type)? {
        report.models_scanned += 1;
        let entries = store.get_all_entries(&model)?;
        for (term, _) in entries.iter().filter(|(_, e)| is_stale(e)) {
            store.remove_entry(&model, term)?;
            report.entries_removed += 1;
            debug!(model = %model.id, term = %term, "Removed stale entry");
        }
    }
    report.terms_removed = store.remove_unreferenced_terms()?;

    PipelineCounters::add(&counters.entries_deleted, report.entries_removed as u64);
    info!(
        models = report.models_scanned,
        entries = report.entries_removed,
        terms = report.terms_removed,
        "Cleanup pass complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{ScoredTerm, Term, UserId};

    #[test]
    fn removes_only_stale_organic_entries() {
        let store = InMemoryStore::new();
        let model_type = ModelType::default();
        let model = store.get_or_create_user_model(UserId(1), &model_type).unwrap();

        let mut live = UserModelEntry::new(ScoredTerm::new(Term::word("rust"), 0.5));
        live.accumulate(1.0, 0.5);
        live.consolidate().unwrap();
        let mut cancelled = UserModelEntry::new(ScoredTerm::new(Term::word("java"), 0.5));
        cancelled.accumulate(-1.0, -0.5);
        cancelled.consolidate().unwrap();
        let borrowed = UserModelEntry::adapted(Term::word("zig"), 0.7);
        store
            .store_or_update_entries(&model, &[live, cancelled, borrowed])
            .unwrap();
        assert_eq!(store.term_count(), 3);

        let counters = PipelineCounters::new();
        let report = cleanup(&store, &model_type, &counters).unwrap();

        assert_eq!(
            report,
            CleanupReport {
                models_scanned: 1,
                entries_removed: 1,
                terms_removed: 1,
            }
        );
        let left = store.get_all_entries(&model).unwrap();
        assert!(left.contains_key(&Term::word("rust")));
        assert!(left.contains_key(&Term::word("zig")));
        assert_eq!(store.term_count(), 2);
        assert_eq!(counters.snapshot().entries_deleted, 1);
    }

    #[test]
    fn other_model_types_are_untouched() {
        let store = InMemoryStore::new();
        let model = store
            .get_or_create_user_model(UserId(1), &ModelType::new("alpha"))
            .unwrap();
        store
            .store_or_update_entries(&model, &[UserModelEntry::new(ScoredTerm::new(Term::word("go"), 0.2))])
            .unwrap();

        let report = cleanup(&store, &ModelType::default(), &PipelineCounters::new()).unwrap();
        assert_eq!(report.models_scanned, 0);
        assert_eq!(store.get_all_entries(&model).unwrap().len(), 1);
    }
}
