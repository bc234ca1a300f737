//! Store contract and an in-memory implementation.
//!
//! The core never talks to a database directly. Everything it needs from
//! persistence goes through [`Store`], whose calls are synchronous and may
//! fail with [`AttuneError::NotFound`] or [`AttuneError::Store`]; the core
//! propagates both to its caller and never retries.
//!
//! [`InMemoryStore`] backs tests, benchmarks and embedders that keep their
//! state in process. Terms are interned in a registry that the periodic
//! cleanup prunes once no entry references them.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{AttuneError, Result};
use crate::model::{ModelType, UserModel, UserModelEntry};
use crate::types::{
    Message, MessageGroupId, MessageId, Observation, ObservationId, ObservationType, Term, UserId,
    UserModelId, UserSimilarity,
};

// ---------------------------------------------------------------------------
// Message filter
// ---------------------------------------------------------------------------

/// Selection criteria for [`Store::get_messages`]. Empty criteria match all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilter {
    /// Restrict to these message IDs.
    pub ids: Option<BTreeSet<MessageId>>,
    /// Restrict to one message group.
    pub group_id: Option<MessageGroupId>,
    /// Restrict to one discussion (root message and its replies).
    pub discussion_id: Option<MessageId>,
    /// Restrict to one author.
    pub author: Option<UserId>,
    /// Published at or after.
    pub published_after: Option<DateTime<Utc>>,
    /// Published strictly before.
    pub published_before: Option<DateTime<Utc>>,
}

impl MessageFilter {
    /// Match every message.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Match the given IDs.
    #[must_use]
    pub fn with_ids(ids: impl IntoIterator<Item = MessageId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Restrict to a message group.
    #[must_use]
    pub fn in_group(mut self, group: MessageGroupId) -> Self {
        self.group_id = Some(group);
        self
    }

    /// Restrict to a discussion.
    #[must_use]
    pub fn in_discussion(mut self, root: MessageId) -> Self {
        self.discussion_id = Some(root);
        self
    }

    /// Restrict to an author.
    #[must_use]
    pub fn by_author(mut self, author: UserId) -> Self {
        self.author = Some(author);
        self
    }

    /// Restrict to messages published in `[from, to)`.
    #[must_use]
    pub fn published_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.published_after = Some(from);
        self.published_before = Some(to);
        self
    }

    /// Whether `message` satisfies every criterion.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&message.id))
            && self.group_id.is_none_or(|g| message.group_or_ungrouped() == g)
            && self
                .discussion_id
                .is_none_or(|root| message.discussion_id() == root)
            && self.author.is_none_or(|a| message.author == Some(a))
            && self.published_after.is_none_or(|t| message.published >= t)
            && self.published_before.is_none_or(|t| message.published < t)
    }
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Everything the scoring and learning core needs from persistence.
pub trait Store: Send + Sync {
    /// Fetch the user's model of `model_type`, creating it on first use.
    fn get_or_create_user_model(&self, user_id: UserId, model_type: &ModelType) -> Result<UserModel>;

    /// Entries of `model` for the given terms; absent terms are omitted.
    fn get_user_model_entries_for_terms(
        &self,
        model: &UserModel,
        terms: &[Term],
    ) -> Result<BTreeMap<Term, UserModelEntry>>;

    /// All entries of `model`.
    fn get_all_entries(&self, model: &UserModel) -> Result<BTreeMap<Term, UserModelEntry>>;

    /// Insert or replace the given entries of `model`.
    fn store_or_update_entries(&self, model: &UserModel, entries: &[UserModelEntry]) -> Result<()>;

    /// Remove the entry of `model` for `term`. Removing an absent entry is a no-op.
    fn remove_entry(&self, model: &UserModel, term: &Term) -> Result<()>;

    /// Every user model of `model_type`, ordered by user.
    fn list_user_models(&self, model_type: &ModelType) -> Result<Vec<UserModel>>;

    /// Entries of any user's `model_type` model for the given terms.
    fn find_entries_for_terms(
        &self,
        model_type: &ModelType,
        terms: &[Term],
    ) -> Result<Vec<(UserId, UserModelEntry)>>;

    /// Drop interned terms that no entry references. Returns how many were dropped.
    fn remove_unreferenced_terms(&self) -> Result<usize>;

    /// Observations matching every given criterion, oldest first; ties keep
    /// insertion order.
    fn get_observations(
        &self,
        user_id: Option<UserId>,
        message_id: Option<MessageId>,
        observation_type: Option<ObservationType>,
    ) -> Result<Vec<Observation>>;

    /// A single observation by ID.
    fn get_observation(&self, id: ObservationId) -> Result<Option<Observation>>;

    /// Insert or replace an observation.
    fn store_observation(&self, observation: Observation) -> Result<()>;

    /// A single message by ID.
    fn get_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// Messages matching `filter`, ordered by ID.
    fn get_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>>;

    /// Stored similarities from `user_id` to each candidate within `group_id`
    /// that reach `min_similarity`.
    fn get_user_similarities(
        &self,
        user_id: UserId,
        candidates: &[UserId],
        group_id: MessageGroupId,
        min_similarity: f64,
    ) -> Result<Vec<UserSimilarity>>;

    /// Insert or replace a similarity.
    fn store_user_similarity(&self, similarity: UserSimilarity) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    next_model_id: u64,
    models: BTreeMap<(UserId, ModelType), UserModel>,
    entries: BTreeMap<UserModelId, BTreeMap<Term, UserModelEntry>>,
    terms: BTreeSet<Term>,
    observations: Vec<Observation>,
    messages: BTreeMap<MessageId, Message>,
    similarities: BTreeMap<(UserId, UserId, MessageGroupId), UserSimilarity>,
}

/// A [`Store`] held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a message, interning its terms.
    pub fn insert_message(&self, message: Message) {
        let mut inner = self.inner.write();
        for term in message.term_keys() {
            inner.terms.insert(term.clone());
        }
        inner.messages.insert(message.id, message);
    }

    /// Number of interned terms.
    #[must_use]
    pub fn term_count(&self) -> usize {
        self.inner.read().terms.len()
    }

    /// Number of stored observations.
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.inner.read().observations.len()
    }

    fn model_entries<'a>(inner: &'a Inner, model: &UserModel) -> Result<&'a BTreeMap<Term, UserModelEntry>> {
        inner
            .entries
            .get(&model.id)
            .ok_or_else(|| AttuneError::not_found("user model", model.id))
    }
}

impl Store for InMemoryStore {
    fn get_or_create_user_model(&self, user_id: UserId, model_type: &ModelType) -> Result<UserModel> {
        let key = (user_id, model_type.clone());
        if let Some(model) = self.inner.read().models.get(&key) {
            return Ok(model.clone());
        }

        let mut inner = self.inner.write();
        if let Some(model) = inner.models.get(&key) {
            return Ok(model.clone());
        }
        inner.next_model_id += 1;
        let model = UserModel {
            id: UserModelId(inner.next_model_id),
            user_id,
            model_type: model_type.clone(),
        };
        inner.entries.insert(model.id, BTreeMap::new());
        inner.models.insert(key, model.clone());
        debug!(user = %user_id, model_type = %model_type, model = %model.id, "Created user model");
        Ok(model)
    }

    fn get_user_model_entries_for_terms(
        &self,
        model: &UserModel,
        terms: &[Term],
    ) -> Result<BTreeMap<Term, UserModelEntry>> {
        let inner = self.inner.read();
        let entries = Self::model_entries(&inner, model)?;
        Ok(terms
            .iter()
            .filter_map(|t| entries.get(t).map(|e| (t.clone(), e.clone())))
            .collect())
    }

    fn get_all_entries(&self, model: &UserModel) -> Result<BTreeMap<Term, UserModelEntry>> {
        let inner = self.inner.read();
        Self::model_entries(&inner, model).cloned()
    }

    fn store_or_update_entries(&self, model: &UserModel, entries: &[UserModelEntry]) -> Result<()> {
        let start = Instant::now();
        let mut inner = self.inner.write();
        for entry in entries {
            inner.terms.insert(entry.term().clone());
        }
        let stored = inner
            .entries
            .get_mut(&model.id)
            .ok_or_else(|| AttuneError::not_found("user model", model.id))?;
        for entry in entries {
            stored.insert(entry.term().clone(), entry.clone());
        }
        debug!(
            model = %model.id,
            entries = entries.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Stored user model entries"
        );
        Ok(())
    }

    fn remove_entry(&self, model: &UserModel, term: &Term) -> Result<()> {
        let mut inner = self.inner.write();
        let stored = inner
            .entries
            .get_mut(&model.id)
            .ok_or_else(|| AttuneError::not_found("user model", model.id))?;
        stored.remove(term);
        Ok(())
    }

    fn list_user_models(&self, model_type: &ModelType) -> Result<Vec<UserModel>> {
        Ok(self
            .inner
            .read()
            .models
            .values()
            .filter(|m| &m.model_type == model_type)
            .cloned()
            .collect())
    }

    fn find_entries_for_terms(
        &self,
        model_type: &ModelType,
        terms: &[Term],
    ) -> Result<Vec<(UserId, UserModelEntry)>> {
        let inner = self.inner.read();
        let mut found = Vec::new();
        for model in inner.models.values().filter(|m| &m.model_type == model_type) {
            let Some(entries) = inner.entries.get(&model.id) else {
                continue;
            };
            for term in terms {
                if let Some(entry) = entries.get(term) {
                    found.push((model.user_id, entry.clone()));
                }
            }
        }
        Ok(found)
    }

    fn remove_unreferenced_terms(&self) -> Result<usize> {
        let mut inner = self.inner.write();
        let referenced: BTreeSet<Term> = inner
            .entries
            .values()
            .flat_map(|entries| entries.keys().cloned())
            .collect();
        let before = inner.terms.len();
        inner.terms.retain(|t| referenced.contains(t));
        Ok(before - inner.terms.len())
    }

    fn get_observations(
        &self,
        user_id: Option<UserId>,
        message_id: Option<MessageId>,
        observation_type: Option<ObservationType>,
    ) -> Result<Vec<Observation>> {
        let inner = self.inner.read();
        let mut found: Vec<Observation> = inner
            .observations
            .iter()
            .filter(|o| {
                user_id.is_none_or(|u| o.user_id == u)
                    && message_id.is_none_or(|m| o.message_id == m)
                    && observation_type.is_none_or(|t| o.observation_type == t)
            })
            .cloned()
            .collect();
        found.sort_by_key(|o| (o.date, o.priority));
        Ok(found)
    }

    fn get_observation(&self, id: ObservationId) -> Result<Option<Observation>> {
        Ok(self
            .inner
            .read()
            .observations
            .iter()
            .find(|o| o.id == id)
            .cloned())
    }

    fn store_observation(&self, observation: Observation) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.observations.iter().position(|o| o.id == observation.id) {
            inner.observations[pos] = observation;
        } else {
            inner.observations.push(observation);
        }
        Ok(())
    }

    fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.inner.read().messages.get(&id).cloned())
    }

    fn get_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        Ok(self
            .inner
            .read()
            .messages
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    fn get_user_similarities(
        &self,
        user_id: UserId,
        candidates: &[UserId],
        group_id: MessageGroupId,
        min_similarity: f64,
    ) -> Result<Vec<UserSimilarity>> {
        let inner = self.inner.read();
        Ok(candidates
            .iter()
            .filter_map(|c| inner.similarities.get(&(user_id, *c, group_id)))
            .filter(|s| s.similarity >= min_similarity)
            .cloned()
            .collect())
    }

    fn store_user_similarity(&self, similarity: UserSimilarity) -> Result<()> {
        let key = (similarity.user_from, similarity.user_to, similarity.group_id);
        self.inner.write().similarities.insert(key, similarity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Interest, ScoredTerm};
    use chrono::Duration;

    fn term_entry(word: &str, weight: f64) -> UserModelEntry {
        UserModelEntry::new(ScoredTerm::new(Term::word(word), weight))
    }

    #[test]
    fn user_model_is_created_once() {
        let store = InMemoryStore::new();
        let a = store.get_or_create_user_model(UserId(1), &ModelType::default()).unwrap();
        let b = store.get_or_create_user_model(UserId(1), &ModelType::default()).unwrap();
        let c = store.get_or_create_user_model(UserId(1), &ModelType::new("binned")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn entries_round_trip_and_remove() {
        let store = InMemoryStore::new();
        let model = store.get_or_create_user_model(UserId(1), &ModelType::default()).unwrap();
        store
            .store_or_update_entries(&model, &[term_entry("rust", 0.5), term_entry("go", 0.2)])
            .unwrap();

        let fetched = store
            .get_user_model_entries_for_terms(&model, &[Term::word("rust"), Term::word("zig")])
            .unwrap();
        assert_eq!(fetched.len(), 1);

        store.remove_entry(&model, &Term::word("rust")).unwrap();
        assert_eq!(store.get_all_entries(&model).unwrap().len(), 1);
        assert_eq!(store.remove_unreferenced_terms().unwrap(), 1);
        assert_eq!(store.term_count(), 1);
    }

    #[test]
    fn unknown_model_is_not_found() {
        let store = InMemoryStore::new();
        let ghost = UserModel {
            id: UserModelId(99),
            user_id: UserId(1),
            model_type: ModelType::default(),
        };
        let err = store.get_all_entries(&ghost).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn observations_are_filtered_and_ordered() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let later = Observation::new(UserId(1), MessageId(1), ObservationType::Rating, Interest::High, now);
        let earlier = Observation::new(
            UserId(1),
            MessageId(2),
            ObservationType::Message,
            Interest::Low,
            now - Duration::hours(1),
        );
        store.store_observation(later.clone()).unwrap();
        store.store_observation(earlier.clone()).unwrap();

        let all = store.get_observations(Some(UserId(1)), None, None).unwrap();
        assert_eq!(all, vec![earlier, later.clone()]);

        let ratings = store
            .get_observations(None, None, Some(ObservationType::Rating))
            .unwrap();
        assert_eq!(ratings, vec![later.clone()]);
        assert_eq!(store.get_observation(later.id).unwrap(), Some(later));
    }

    #[test]
    fn message_filter_matches_discussion_and_window() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_message(Message::new(MessageId(1), now, vec![]).in_group(MessageGroupId(3)));
        store.insert_message(
            Message::new(MessageId(2), now + Duration::minutes(5), vec![])
                .in_group(MessageGroupId(3))
                .reply_to(MessageId(1), MessageId(1)),
        );
        store.insert_message(Message::new(MessageId(3), now, vec![]).in_group(MessageGroupId(4)));

        let discussion = store
            .get_messages(&MessageFilter::all().in_discussion(MessageId(1)))
            .unwrap();
        assert_eq!(discussion.len(), 2);

        let window = store
            .get_messages(
                &MessageFilter::all()
                    .in_group(MessageGroupId(3))
                    .published_between(now, now + Duration::minutes(1)),
            )
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, MessageId(1));
    }

    #[test]
    fn similarities_respect_threshold() {
        let store = InMemoryStore::new();
        for (to, sim) in [(2, 0.9), (3, 0.1)] {
            store
                .store_user_similarity(UserSimilarity {
                    user_from: UserId(1),
                    user_to: UserId(to),
                    group_id: MessageGroupId(1),
                    similarity: sim,
                    computed_at: Utc::now(),
                })
                .unwrap();
        }
        let found = store
            .get_user_similarities(UserId(1), &[UserId(2), UserId(3)], MessageGroupId(1), 0.5)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_to, UserId(2));
    }
}
