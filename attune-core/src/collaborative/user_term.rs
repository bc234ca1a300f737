//! User → Term collaborative filtering.
//!
//! Each rated message is decomposed into its scored terms, giving every
//! user a term profile:
//!
//! ```text
//! pref(u, t) = Σ_m w(m, t) · score(u, m) / Σ_m w(m, t)
//! ```
//!
//! Users are compared over their term profiles. A message is predicted by
//! estimating each of its terms from the user's neighbours and taking the
//! term-weighted mean of those estimates.

use std::collections::BTreeMap;

use tracing::debug;

use crate::collaborative::knn::{self, Neighbourhoods, Rows};
use crate::collaborative::{
    CollaborativeScoreComputer, CollaborativeScoreTable, PreferenceMatrix, RunOutput,
    load_messages, not_initialized,
};
use crate::config::CollaborativeConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::{Message, MessageId, ScoredTerm, Term, UserId};

/// Term profiles and neighbourhoods over a set of messages.
#[derive(Debug, Clone, Default)]
pub(crate) struct TermModel {
    rows: Rows<Term>,
    neighbourhoods: Neighbourhoods,
}

impl TermModel {
    /// Build term profiles from the matrix scores of `messages`.
    pub(crate) fn build<'a>(
        matrix: &PreferenceMatrix,
        messages: impl IntoIterator<Item = (&'a MessageId, &'a Message)> + Clone,
        config: &CollaborativeConfig,
    ) -> Self {
        let mut accumulated: BTreeMap<UserId, BTreeMap<Term, (f64, f64)>> = BTreeMap::new();
        for (user, row) in matrix.rows() {
            for (id, message) in messages.clone() {
                let Some(score) = row.get(id) else {
                    continue;
                };
                let profile = accumulated.entry(*user).or_default();
                for scored in message.terms.iter().filter(|st| st.weight > 0.0) {
                    let slot = profile.entry(scored.term.clone()).or_insert((0.0, 0.0));
                    slot.0 += scored.weight * score;
                    slot.1 += scored.weight;
                }
            }
        }
        let rows: Rows<Term> = accumulated
            .into_iter()
            .map(|(user, profile)| {
                let prefs = profile
                    .into_iter()
                    .map(|(term, (sum, weight))| (term, sum / weight))
                    .collect();
                (user, prefs)
            })
            .collect();
        let neighbourhoods = knn::neighbourhoods(&rows, config.min_co_rated, config.max_neighbours);
        Self {
            rows,
            neighbourhoods,
        }
    }

    /// Users with a term profile.
    pub(crate) fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.rows.keys().copied()
    }

    /// Whether `user` has a term profile here.
    pub(crate) fn knows(&self, user: UserId) -> bool {
        self.rows.contains_key(&user)
    }

    /// Term-weighted mean of the neighbour estimates for `terms`.
    pub(crate) fn predict_message(&self, user: UserId, terms: &[ScoredTerm]) -> Option<f64> {
        let neighbours = self.neighbourhoods.get(&user).map_or(&[][..], Vec::as_slice);
        let mut weighted = 0.0;
        let mut total = 0.0;
        for scored in terms.iter().filter(|st| st.weight > 0.0) {
            if let Some(estimate) = knn::predict(&self.rows, neighbours, &scored.term) {
                weighted += scored.weight * estimate;
                total += scored.weight;
            }
        }
        (total > 0.0).then(|| weighted / total)
    }
}

/// Predicts from co-rated terms.
#[derive(Debug, Clone, Default)]
pub struct UserTermComputer {
    config: CollaborativeConfig,
    state: Option<(PreferenceMatrix, BTreeMap<MessageId, Message>)>,
    output: RunOutput,
}

impl UserTermComputer {
    /// Create an uninitialized computer.
    #[must_use]
    pub fn new(config: CollaborativeConfig) -> Self {
        Self {
            config,
            state: None,
            output: RunOutput::default(),
        }
    }
}

impl CollaborativeScoreComputer for UserTermComputer {
    fn name(&self) -> &'static str {
        "user_term"
    }

    fn init(&mut self, store: &dyn Store) -> Result<()> {
        let matrix = PreferenceMatrix::load(store, self.config.observation_policy)?;
        let (messages, missing) = load_messages(store, &matrix)?;
        debug!(messages = messages.len(), missing, "Loaded term preference inputs");
        self.state = Some((matrix, messages));
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let (matrix, messages) = self.state.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        let model = TermModel::build(matrix, messages, &self.config);

        let mut output = RunOutput::default();
        for user in model.users() {
            for (id, message) in messages {
                if matrix.score(user, *id).is_none() {
                    output.push(user, *id, model.predict_message(user, &message.terms));
                }
            }
        }
        self.output = output;
        Ok(())
    }

    fn message_scores(&self) -> &CollaborativeScoreTable {
        &self.output.scores
    }

    fn nan_scores(&self) -> usize {
        self.output.nan
    }
}
