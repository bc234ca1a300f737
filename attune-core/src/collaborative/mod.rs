//! Collaborative score computers.
//!
//! Each computer predicts a user's interest in messages from other users'
//! observations, without looking at the user's own model. The common
//! protocol is:
//!
//! 1. [`CollaborativeScoreComputer::init`] builds a [`PreferenceMatrix`]
//!    from persisted observations, filtered by an [`ObservationPolicy`].
//! 2. [`CollaborativeScoreComputer::run`] predicts every reachable
//!    (user, message) pair.
//! 3. [`CollaborativeScoreComputer::message_scores`] returns the finite
//!    predictions; [`CollaborativeScoreComputer::nan_scores`] counts the
//!    pairs that could not be predicted.
//!
//! Variants differ in the unit of similarity:
//!
//! | Computer | Items compared |
//! |---|---|
//! | [`UserMessageComputer`] | messages |
//! | [`UserTermComputer`] | terms of the rated messages |
//! | [`UserTermPerGroupComputer`] | terms, one matrix per message group |
//! | [`CombiningComputer`] | per-group term predictions, merged |
//!
//! All accumulation walks ordered maps, so identical observations give
//! bit-identical scores.

pub mod combining;
pub mod group;
pub(crate) mod knn;
pub mod user_message;
pub mod user_term;

pub use combining::CombiningComputer;
pub use group::UserTermPerGroupComputer;
pub use user_message::UserMessageComputer;
pub use user_term::UserTermComputer;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::error::{AttuneError, Result};
use crate::metrics::{PipelineCounters, spans};
use crate::store::{MessageFilter, Store};
use crate::types::{Message, MessageId, Observation, ObservationType, UserId};

/// Which observations feed the preference matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationPolicy {
    /// Ratings and inferred interest.
    #[default]
    Both,
    /// Explicit ratings only.
    RatingsOnly,
    /// Inferred interest only.
    InferredOnly,
}

impl ObservationPolicy {
    /// Whether observations of `kind` are admitted.
    #[must_use]
    pub fn admits(self, kind: ObservationType) -> bool {
        match self {
            Self::Both => true,
            Self::RatingsOnly => kind == ObservationType::Rating,
            Self::InferredOnly => kind == ObservationType::Message,
        }
    }
}

/// How the combining computer merges per-group predictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// The largest prediction.
    Max,
    /// The unweighted mean.
    #[default]
    Average,
    /// The mean weighted by similarity of each group to the message's group.
    WeightedByGroupSimilarity,
}

// ---------------------------------------------------------------------------
// Preference matrix
// ---------------------------------------------------------------------------

/// Latest interest score per (user, message).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceMatrix {
    rows: BTreeMap<UserId, BTreeMap<MessageId, f64>>,
}

impl PreferenceMatrix {
    /// Build from observations ordered oldest first; later ones win.
    pub fn from_observations<'a>(
        observations: impl IntoIterator<Item = &'a Observation>,
        policy: ObservationPolicy,
    ) -> Self {
        let mut rows: BTreeMap<UserId, BTreeMap<MessageId, f64>> = BTreeMap::new();
        for obs in observations {
            if policy.admits(obs.observation_type) {
                rows.entry(obs.user_id)
                    .or_default()
                    .insert(obs.message_id, obs.interest.score());
            }
        }
        Self { rows }
    }

    /// Load every admitted observation from `store`.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn load(store: &dyn Store, policy: ObservationPolicy) -> Result<Self> {
        let observations = store.get_observations(None, None, None)?;
        Ok(Self::from_observations(&observations, policy))
    }

    /// The recorded score, if any.
    #[must_use]
    pub fn score(&self, user: UserId, message: MessageId) -> Option<f64> {
        self.rows.get(&user).and_then(|row| row.get(&message)).copied()
    }

    /// Users with at least one observation.
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.rows.keys().copied()
    }

    /// Every observed message.
    #[must_use]
    pub fn messages(&self) -> BTreeSet<MessageId> {
        self.rows.values().flat_map(|row| row.keys().copied()).collect()
    }

    /// Whether nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of recorded (user, message) scores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub(crate) fn rows(&self) -> &BTreeMap<UserId, BTreeMap<MessageId, f64>> {
        &self.rows
    }
}

/// Messages referenced by `matrix`, fetched from the store. Observations of
/// messages the store no longer has are skipped and counted.
pub(crate) fn load_messages(
    store: &dyn Store,
    matrix: &PreferenceMatrix,
) -> Result<(BTreeMap<MessageId, Message>, usize)> {
    let wanted = matrix.messages();
    let found: BTreeMap<MessageId, Message> = store
        .get_messages(&MessageFilter::with_ids(wanted.iter().copied()))?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();
    let missing = wanted.len() - found.len();
    if missing > 0 {
        warn!(missing, "Observed messages missing from store, skipped");
    }
    Ok((found, missing))
}

pub(crate) fn not_initialized(name: &str) -> AttuneError {
    AttuneError::InvariantViolation(format!("collaborative computer `{name}` run before init"))
}

// ---------------------------------------------------------------------------
// Score table
// ---------------------------------------------------------------------------

/// Predicted scores keyed by (user, message).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollaborativeScoreTable {
    scores: BTreeMap<(UserId, MessageId), f64>,
}

impl CollaborativeScoreTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a prediction. Returns `false` and records nothing for NaN.
    pub fn record(&mut self, user: UserId, message: MessageId, score: f64) -> bool {
        if score.is_nan() {
            return false;
        }
        self.scores.insert((user, message), score);
        true
    }

    /// The prediction for a pair.
    #[must_use]
    pub fn get(&self, user: UserId, message: MessageId) -> Option<f64> {
        self.scores.get(&(user, message)).copied()
    }

    /// Number of predictions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether there are no predictions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// All predictions in (user, message) order.
    pub fn iter(&self) -> impl Iterator<Item = (UserId, MessageId, f64)> + '_ {
        self.scores.iter().map(|((u, m), s)| (*u, *m, *s))
    }
}

// ---------------------------------------------------------------------------
// Computer contract
// ---------------------------------------------------------------------------

/// Common protocol of the collaborative computers.
pub trait CollaborativeScoreComputer: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Build internal state from persisted observations.
    ///
    /// # Errors
    /// Propagates store failures.
    fn init(&mut self, store: &dyn Store) -> Result<()>;

    /// Predict every reachable (user, message) pair.
    ///
    /// # Errors
    /// Returns [`AttuneError::InvariantViolation`] if called before `init`.
    fn run(&mut self) -> Result<()>;

    /// The finite predictions of the last run.
    fn message_scores(&self) -> &CollaborativeScoreTable;

    /// Pairs of the last run that had no prediction.
    fn nan_scores(&self) -> usize;
}

/// Shared accumulation of a run's results.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunOutput {
    pub(crate) scores: CollaborativeScoreTable,
    pub(crate) nan: usize,
}

impl RunOutput {
    pub(crate) fn push(&mut self, user: UserId, message: MessageId, prediction: Option<f64>) {
        let recorded = prediction.is_some_and(|p| self.scores.record(user, message, p));
        if !recorded {
            self.nan += 1;
        }
    }
}

/// Init and run `computer`, reporting NaN predictions to `counters`.
///
/// # Errors
/// Propagates the computer's errors.
pub fn run_computer<'a>(
    computer: &'a mut dyn CollaborativeScoreComputer,
    store: &dyn Store,
    counters: &PipelineCounters,
) -> Result<&'a CollaborativeScoreTable> {
    let span = info_span!(spans::COLLABORATIVE, computer = computer.name());
    let _guard = span.enter();

    computer.init(store)?;
    computer.run()?;
    let nan = computer.nan_scores();
    PipelineCounters::add(&counters.nan_predictions, nan as u64);
    if nan > 0 {
        warn!(computer = computer.name(), nan, "Collaborative pairs without prediction");
    }
    info!(
        computer = computer.name(),
        scores = computer.message_scores().len(),
        nan,
        "Collaborative run complete"
    );
    Ok(computer.message_scores())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interest;
    use chrono::{Duration, Utc};

    #[test]
    fn latest_admitted_observation_wins() {
        let now = Utc::now();
        let old = Observation::new(UserId(1), MessageId(1), ObservationType::Rating, Interest::None, now - Duration::hours(1));
        let new = Observation::new(UserId(1), MessageId(1), ObservationType::Rating, Interest::High, now);
        let inferred = Observation::new(UserId(2), MessageId(1), ObservationType::Message, Interest::Low, now);

        let both = PreferenceMatrix::from_observations([&old, &new, &inferred], ObservationPolicy::Both);
        assert_eq!(both.score(UserId(1), MessageId(1)), Some(0.75));
        assert_eq!(both.len(), 2);

        let ratings = PreferenceMatrix::from_observations([&old, &new, &inferred], ObservationPolicy::RatingsOnly);
        assert_eq!(ratings.score(UserId(2), MessageId(1)), None);

        let inferred_only =
            PreferenceMatrix::from_observations([&old, &new, &inferred], ObservationPolicy::InferredOnly);
        assert_eq!(inferred_only.users().collect::<Vec<_>>(), vec![UserId(2)]);
    }

    #[test]
    fn nan_predictions_are_counted_not_stored() {
        let mut out = RunOutput::default();
        out.push(UserId(1), MessageId(1), Some(0.5));
        out.push(UserId(1), MessageId(2), None);
        out.push(UserId(1), MessageId(3), Some(f64::NAN));
        assert_eq!(out.scores.len(), 1);
        assert_eq!(out.nan, 2);
    }
}
