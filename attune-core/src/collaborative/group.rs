//! User → Term collaborative filtering scoped per message group.
//!
//! One term model is built per group from the messages of that group
//! only, so a user's taste in one topic does not leak into another. A
//! user is predicted within a group only when they rated something there.

use std::collections::BTreeMap;

use tracing::debug;

use crate::collaborative::user_term::TermModel;
use crate::collaborative::{
    CollaborativeScoreComputer, CollaborativeScoreTable, PreferenceMatrix, RunOutput,
    load_messages, not_initialized,
};
use crate::config::CollaborativeConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::{Message, MessageGroupId, MessageId};

/// Messages partitioned by group.
pub(crate) type GroupedMessages = BTreeMap<MessageGroupId, BTreeMap<MessageId, Message>>;

pub(crate) fn group_messages(messages: BTreeMap<MessageId, Message>) -> GroupedMessages {
    let mut grouped = GroupedMessages::new();
    for (id, message) in messages {
        grouped
            .entry(message.group_or_ungrouped())
            .or_default()
            .insert(id, message);
    }
    grouped
}

pub(crate) fn build_models(
    matrix: &PreferenceMatrix,
    grouped: &GroupedMessages,
    config: &CollaborativeConfig,
) -> BTreeMap<MessageGroupId, TermModel> {
    grouped
        .iter()
        .map(|(group, messages)| (*group, TermModel::build(matrix, messages, config)))
        .collect()
}

/// Predicts from co-rated terms within each message group.
#[derive(Debug, Clone, Default)]
pub struct UserTermPerGroupComputer {
    config: CollaborativeConfig,
    state: Option<(PreferenceMatrix, GroupedMessages)>,
    output: RunOutput,
}

impl UserTermPerGroupComputer {
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

impl CollaborativeScoreComputer for UserTermPerGroupComputer {
    fn name(&self) -> &'static str {
        "user_term_per_group"
    }

    fn init(&mut self, store: &dyn Store) -> Result<()> {
        let matrix = PreferenceMatrix::load(store, self.config.observation_policy)?;
        let (messages, _) = load_messages(store, &matrix)?;
        let grouped = group_messages(messages);
        debug!(groups = grouped.len(), "Partitioned rated messages by group");
        self.state = Some((matrix, grouped));
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let (matrix, grouped) = self.state.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        let models = build_models(matrix, grouped, &self.config);

        let mut output = RunOutput::default();
        for (group, model) in &models {
            let Some(messages) = grouped.get(group) else {
                continue;
            };
            for user in model.users() {
                for (id, message) in messages {
                    if matrix.score(user, *id).is_none() {
                        output.push(user, *id, model.predict_message(user, &message.terms));
                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborative::UserTermComputer;
    use crate::store::InMemoryStore;
    use crate::types::{Interest, Observation, ObservationType, ScoredTerm, Term, UserId};
    use chrono::Utc;

    fn message(id: u64, group: u64, words: &[&str]) -> Message {
        let terms = words
            .iter()
            .map(|w| ScoredTerm::new(Term::word(w), 1.0))
            .collect();
        Message::new(MessageId(id), Utc::now(), terms).in_group(MessageGroupId(group))
    }

    fn rate(store: &InMemoryStore, user: u64, message: u64, interest: Interest) {
        store
            .store_observation(Observation::new(
                UserId(user),
                MessageId(message),
                ObservationType::Rating,
                interest,
                Utc::now(),
            ))
            .unwrap();
    }

    /// "python" is loved in group 1 (programming) and hated in group 2 (pets).
    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_message(message(1, 1, &["python", "code"]));
        store.insert_message(message(2, 1, &["python"]));
        store.insert_message(message(3, 2, &["python", "snake"]));
        store.insert_message(message(4, 2, &["python"]));
        rate(&store, 1, 1, Interest::Extreme);
        rate(&store, 2, 1, Interest::Extreme);
        rate(&store, 2, 2, Interest::Extreme);
        rate(&store, 3, 3, Interest::None);
        rate(&store, 4, 3, Interest::None);
        rate(&store, 4, 4, Interest::None);
        store
    }

    #[test]
    fn groups_do_not_bleed() {
        let store = store();
        let mut scoped = UserTermPerGroupComputer::new(CollaborativeConfig::default());
        scoped.init(&store).unwrap();
        scoped.run().unwrap();

        let programming = scoped.message_scores().get(UserId(1), MessageId(2)).unwrap();
        let pets = scoped.message_scores().get(UserId(3), MessageId(4)).unwrap();
        assert!((programming - 1.0).abs() < 1e-12);
        assert!((pets + 1.0).abs() < 1e-12);
        assert!(scoped.message_scores().get(UserId(1), MessageId(4)).is_none());
    }

    #[test]
    fn unscoped_model_mixes_groups() {
        let store = store();
        let mut global = UserTermComputer::new(CollaborativeConfig::default());
        global.init(&store).unwrap();
        global.run().unwrap();
        assert!(global.message_scores().get(UserId(1), MessageId(4)).is_some());
    }
}
