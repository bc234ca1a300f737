//! The directed adapter.
//!
//! Protocol, for one target user and the terms missing from their model:
//!
//! 1. Find other users whose models of the same type hold organic entries
//!    for those terms.
//! 2. Ask the [`UserToUserInterestSelector`] for directional similarities
//!    to them within the message's group.
//! 3. Per term, average the candidates' weights weighted by similarity.
//! 4. Adopt the average only when some candidate contributed with a
//!    positive weight, the value is positive and it exceeds the current
//!    weight, so adapted weights never decrease.
//! 5. Store the adopted entries as `adapted` and trigger a re-score of the
//!    originating message.
//!
//! No similar users is not an error; the adapter just adopts nothing. A
//! message that cannot be found for the re-score is an invariant
//! violation, since it triggered the adaptation in the first place. It is
//! looked up before anything is written, so a failed adaptation leaves the
//! model untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::adaptation::{RescoreTrigger, UserToUserInterestSelector, WeightedAverage};
use crate::error::{AttuneError, Result};
use crate::metrics::{PipelineCounters, spans};
use crate::model::{EntryArena, ModelType, UserModelEntry};
use crate::store::Store;
use crate::types::{MessageGroupId, MessageId, ScoredTerm, Term, UserId};

/// Input of one adaptation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationRequest {
    /// The sparse user.
    pub user_id: UserId,
    /// The message whose scoring found the gaps.
    pub message_id: MessageId,
    /// Scope of the similarity lookup.
    pub group_id: MessageGroupId,
    /// Terms the user's model has no entry for.
    pub missing_terms: Vec<Term>,
}

/// What one adaptation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptationReport {
    /// Users holding entries for any missing term.
    pub candidates: usize,
    /// Candidates the selector judged similar.
    pub similar_users: usize,
    /// Adopted terms with their new weights.
    pub adopted: Vec<ScoredTerm>,
    /// Whether a re-score was triggered.
    pub rescored: bool,
}

/// Propagates term weights from similar users into a sparse model.
pub struct DirectedUserModelAdapter {
    model_type: ModelType,
    selector: Arc<dyn UserToUserInterestSelector>,
    counters: Arc<PipelineCounters>,
}

impl std::fmt::Debug for DirectedUserModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectedUserModelAdapter")
            .field("model_type", &self.model_type)
            .finish_non_exhaustive()
    }
}

impl DirectedUserModelAdapter {
    /// Create an adapter for models of `model_type`.
    #[must_use]
    pub fn new(
        model_type: ModelType,
        selector: Arc<dyn UserToUserInterestSelector>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            model_type,
            selector,
            counters,
        }
    }

    /// Run the adaptation protocol for `request`.
    ///
    /// # Errors
    /// Returns [`AttuneError::InvariantViolation`] if entries were adopted
    /// but the originating message is not in the store; propagates store,
    /// selector and trigger failures.
    pub fn adapt(
        &self,
        store: &dyn Store,
        request: &AdaptationRequest,
        trigger: &dyn RescoreTrigger,
        now: DateTime<Utc>,
    ) -> Result<AdaptationReport> {
        let span = info_span!(spans::ADAPT, user = %request.user_id, message = %request.message_id);
        let _guard = span.enter();
        let mut report = AdaptationReport::default();

        let terms: Vec<Term> = request
            .missing_terms
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if terms.is_empty() {
            return Ok(report);
        }

        let candidates = self.candidate_weights(store, request.user_id, &terms)?;
        report.candidates = candidates.len();
        if candidates.is_empty() {
            debug!(terms = terms.len(), "No users hold the missing terms");
            return Ok(report);
        }

        let ids: Vec<UserId> = candidates.keys().copied().collect();
        let similar = self
            .selector
            .select(store, request.user_id, &ids, request.group_id, now)?;
        report.similar_users = similar.len();
        if similar.is_empty() {
            debug!(candidates = ids.len(), "No similar users, nothing adopted");
            return Ok(report);
        }

        let model = store.get_or_create_user_model(request.user_id, &self.model_type)?;
        let mut arena = EntryArena::load(store, model, &terms)?;
        for term in &terms {
            let mut average = WeightedAverage::new();
            for sim in &similar {
                if let Some(weight) = candidates.get(&sim.user_to).and_then(|w| w.get(term)) {
                    average.add(*weight, sim.similarity);
                }
            }
            let Some(value) = average.value().filter(|v| *v > 0.0) else {
                continue;
            };
            if arena.get(term).is_some_and(|e| value <= e.weight()) {
                continue;
            }
            match arena.get_mut(term) {
                Some(entry) => {
                    entry.set_weight(value);
                    entry.adapted = true;
                }
                None => arena.insert(UserModelEntry::adapted(term.clone(), value)),
            }
            report.adopted.push(ScoredTerm::new(term.clone(), value));
        }

        if report.adopted.is_empty() {
            return Ok(report);
        }
        let message = store.get_message(request.message_id)?.ok_or_else(|| {
            AttuneError::InvariantViolation(format!(
                "message {} triggered adaptation but is not in the store",
                request.message_id
            ))
        })?;
        arena.commit(store)?;
        PipelineCounters::add(&self.counters.entries_adapted, report.adopted.len() as u64);
        trigger.rescore(store, &message, request.user_id)?;
        report.rescored = true;

        info!(
            adopted = report.adopted.len(),
            similar = report.similar_users,
            "Adopted entries from similar users"
        );
        Ok(report)
    }

    /// Organic weights of other users for `terms`, by user.
    fn candidate_weights(
        &self,
        store: &dyn Store,
        user: UserId,
        terms: &[Term],
    ) -> Result<BTreeMap<UserId, BTreeMap<Term, f64>>> {
        let mut candidates: BTreeMap<UserId, BTreeMap<Term, f64>> = BTreeMap::new();
        for (owner, entry) in store.find_entries_for_terms(&self.model_type, terms)? {
            if owner != user && !entry.adapted {
                candidates
                    .entry(owner)
                    .or_default()
                    .insert(entry.term().clone(), entry.weight());
            }
        }
        Ok(candidates)
    }
}
