//! Combining collaborative filtering.
//!
//! Builds the per-group term models of [`UserTermPerGroupComputer`] and
//! asks every group the user has a profile in to predict each message,
//! including groups other than the message's own. The per-group
//! predictions are merged with the configured [`MergeStrategy`].
//!
//! [`UserTermPerGroupComputer`]: crate::collaborative::UserTermPerGroupComputer

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::collaborative::group::{GroupedMessages, build_models, group_messages};
use crate::collaborative::{
    CollaborativeScoreComputer, CollaborativeScoreTable, MergeStrategy, PreferenceMatrix,
    RunOutput, load_messages, not_initialized,
};
use crate::config::CollaborativeConfig;
use crate::error::Result;
use crate::similarity::GroupSimilarityComputer;
use crate::store::Store;
use crate::types::MessageGroupId;

type GroupPairs = BTreeMap<(MessageGroupId, MessageGroupId), f64>;

#[derive(Debug)]
struct State {
    matrix: PreferenceMatrix,
    grouped: GroupedMessages,
    group_similarity: GroupPairs,
}

/// Merges predictions of every group a user is active in.
#[derive(Debug)]
pub struct CombiningComputer {
    config: CollaborativeConfig,
    groups: Arc<GroupSimilarityComputer>,
    reference_time: Option<DateTime<Utc>>,
    state: Option<State>,
    output: RunOutput,
}

impl CombiningComputer {
    /// Create an uninitialized computer.
    #[must_use]
    pub fn new(config: CollaborativeConfig, groups: Arc<GroupSimilarityComputer>) -> Self {
        Self {
            config,
            groups,
            reference_time: None,
            state: None,
            output: RunOutput::default(),
        }
    }

    /// Compute group similarities as of `time` instead of the latest
    /// observation date.
    #[must_use]
    pub fn as_of(mut self, time: DateTime<Utc>) -> Self {
        self.reference_time = Some(time);
        self
    }
}

fn pair_similarity(pairs: &GroupPairs, a: MessageGroupId, b: MessageGroupId) -> f64 {
    if a == b {
        return 1.0;
    }
    let key = if a < b { (a, b) } else { (b, a) };
    pairs.get(&key).copied().unwrap_or(0.0)
}

/// Merge per-group predictions for a message of `target` group.
pub(crate) fn merge(
    strategy: MergeStrategy,
    target: MessageGroupId,
    predictions: &[(MessageGroupId, f64)],
    pairs: &GroupPairs,
) -> Option<f64> {
    if predictions.is_empty() {
        return None;
    }
    match strategy {
        MergeStrategy::Max => predictions.iter().map(|(_, p)| *p).reduce(f64::max),
        MergeStrategy::Average => {
            #[allow(clippy::cast_precision_loss)]
            let n = predictions.len() as f64;
            Some(predictions.iter().map(|(_, p)| p).sum::<f64>() / n)
        }
        MergeStrategy::WeightedByGroupSimilarity => {
            let mut weighted = 0.0;
            let mut total = 0.0;
            for (group, prediction) in predictions {
                let sim = pair_similarity(pairs, target, *group);
                weighted += sim * prediction;
                total += sim;
            }
            (total > 0.0).then(|| weighted / total)
        }
    }
}

impl CollaborativeScoreComputer for CombiningComputer {
    fn name(&self) -> &'static str {
        "combining"
    }

    fn init(&mut self, store: &dyn Store) -> Result<()> {
        let observations = store.get_observations(None, None, None)?;
        let matrix = PreferenceMatrix::from_observations(&observations, self.config.observation_policy);
        let reference = self
            .reference_time
            .or_else(|| observations.iter().map(|o| o.date).max())
            .unwrap_or_default();
        let (messages, _) = load_messages(store, &matrix)?;
        let grouped = group_messages(messages);

        let mut group_similarity = GroupPairs::new();
        if self.config.merge == MergeStrategy::WeightedByGroupSimilarity {
            let ids: Vec<MessageGroupId> = grouped.keys().copied().collect();
            for (i, a) in ids.iter().enumerate() {
                for b in &ids[i + 1..] {
                    let sim = self.groups.similarity(store, *a, *b, reference)?;
                    group_similarity.insert((*a, *b), sim.similarity);
                }
            }
        }
        debug!(
            groups = grouped.len(),
            pairs = group_similarity.len(),
            reference = %reference,
            "Prepared combining computer"
        );
        self.state = Some(State {
            matrix,
            grouped,
            group_similarity,
        });
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let state = self.state.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        let models = build_models(&state.matrix, &state.grouped, &self.config);

        let mut output = RunOutput::default();
        for (group, messages) in &state.grouped {
            for user in state.matrix.users() {
                for (id, message) in messages {
                    if state.matrix.score(user, *id).is_some() {
                        continue;
                    }
                    let predictions: Vec<(MessageGroupId, f64)> = models
                        .iter()
                        .filter(|(_, model)| model.knows(user))
                        .filter_map(|(g, model)| {
                            model.predict_message(user, &message.terms).map(|p| (*g, p))
                        })
                        .collect();
                    let merged =
                        merge(self.config.merge, *group, &predictions, &state.group_similarity);
                    output.push(user, *id, merged);
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
