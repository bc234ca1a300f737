//! Directional user-to-user similarity.
//!
//! Two computers are provided:
//!
//! - [`InteractionUserSimilarity`]: share of the source user's positively
//!   observed messages in a group that the target user also liked.
//! - [`TermUserSimilarity`]: share of the source user's positive model
//!   weight on terms the target user also has positive weight for.
//!
//! Both are asymmetric: `sim(a → b)` answers "how much of what `a` likes
//! does `b` like too". [`StoredInterestSelector`] serves them through a
//! [`TtlCache`] in front of the store, recomputing similarities that are
//! missing or older than the TTL.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::adaptation::UserToUserInterestSelector;
use crate::config::{AdaptationConfig, SimilarityConfig};
use crate::error::Result;
use crate::metrics::PipelineCounters;
use crate::model::ModelType;
use crate::similarity::cache::TtlCache;
use crate::store::{MessageFilter, Store};
use crate::types::{MessageGroupId, MessageId, UserId, UserSimilarity};

/// Computes a directional similarity from one user to another.
pub trait UserSimilarityComputer: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Similarity in [0, 1] from `from` to `to` within `group`.
    ///
    /// # Errors
    /// Propagates store failures.
    fn similarity(
        &self,
        store: &dyn Store,
        from: UserId,
        to: UserId,
        group: MessageGroupId,
    ) -> Result<f64>;
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

/// Overlap of positively observed messages within a group.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionUserSimilarity;

impl InteractionUserSimilarity {
    fn liked(
        store: &dyn Store,
        user: UserId,
        group_messages: &BTreeSet<MessageId>,
    ) -> Result<BTreeSet<MessageId>> {
        let mut latest: BTreeMap<MessageId, f64> = BTreeMap::new();
        for obs in store.get_observations(Some(user), None, None)? {
            if group_messages.contains(&obs.message_id) {
                latest.insert(obs.message_id, obs.interest.score());
            }
        }
        Ok(latest
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(id, _)| id)
            .collect())
    }
}

impl UserSimilarityComputer for InteractionUserSimilarity {
    fn name(&self) -> &'static str {
        "interaction"
    }

    fn similarity(
        &self,
        store: &dyn Store,
        from: UserId,
        to: UserId,
        group: MessageGroupId,
    ) -> Result<f64> {
        let group_messages: BTreeSet<MessageId> = store
            .get_messages(&MessageFilter::all().in_group(group))?
            .into_iter()
            .map(|m| m.id)
            .collect();
        let mine = Self::liked(store, from, &group_messages)?;
        if mine.is_empty() {
            return Ok(0.0);
        }
        let theirs = Self::liked(store, to, &group_messages)?;
        Ok(ratio(mine.intersection(&theirs).count(), mine.len()))
    }
}

/// Weighted overlap of user-model entries.
#[derive(Debug, Clone, Default)]
pub struct TermUserSimilarity {
    model_type: ModelType,
}

impl TermUserSimilarity {
    /// Compare models of `model_type`.
    #[must_use]
    pub fn new(model_type: ModelType) -> Self {
        Self { model_type }
    }
}

impl UserSimilarityComputer for TermUserSimilarity {
    fn name(&self) -> &'static str {
        "term"
    }

    fn similarity(
        &self,
        store: &dyn Store,
        from: UserId,
        to: UserId,
        _group: MessageGroupId,
    ) -> Result<f64> {
        let source = store.get_or_create_user_model(from, &self.model_type)?;
        let target = store.get_or_create_user_model(to, &self.model_type)?;
        let source_entries = store.get_all_entries(&source)?;
        let target_entries = store.get_all_entries(&target)?;

        let mut total = 0.0;
        let mut shared = 0.0;
        for (term, entry) in &source_entries {
            let weight = entry.weight().max(0.0);
            total += weight;
            if target_entries.get(term).is_some_and(|t| t.weight() > 0.0) {
                shared += weight;
            }
        }
        Ok(if total > 0.0 { shared / total } else { 0.0 })
    }
}

const DEFAULT_CACHE_CAPACITY: usize = 1024;

type SimilarityKey = (UserId, UserId, MessageGroupId);

/// Selects similar users through stored similarities, recomputing stale ones.
pub struct StoredInterestSelector {
    computer: Box<dyn UserSimilarityComputer>,
    cache: TtlCache<SimilarityKey, UserSimilarity>,
    ttl: Duration,
    min_similarity: f64,
    max_candidates: usize,
}

impl std::fmt::Debug for StoredInterestSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredInterestSelector")
            .field("computer", &self.computer.name())
            .field("ttl", &self.ttl)
            .field("cached", &self.cache.len())
            .field("min_similarity", &self.min_similarity)
            .field("max_candidates", &self.max_candidates)
            .finish()
    }
}

impl StoredInterestSelector {
    /// Create a selector around `computer`.
    #[must_use]
    pub fn new(
        computer: Box<dyn UserSimilarityComputer>,
        ttl: Duration,
        min_similarity: f64,
        max_candidates: usize,
    ) -> Self {
        Self {
            computer,
            cache: TtlCache::new(DEFAULT_CACHE_CAPACITY, ttl.to_std().unwrap_or(StdDuration::ZERO)),
            ttl,
            min_similarity,
            max_candidates,
        }
    }

    /// Bound the in-memory cache to `capacity` similarities.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = TtlCache::new(capacity, self.cache.ttl());
        self
    }

    /// Report cache hits and misses to `counters`.
    #[must_use]
    pub fn with_counters(mut self, counters: Arc<PipelineCounters>) -> Self {
        self.cache = self.cache.with_counters(counters);
        self
    }

    /// Create a selector from configuration.
    #[must_use]
    pub fn from_config(
        computer: Box<dyn UserSimilarityComputer>,
        similarity: &SimilarityConfig,
        adaptation: &AdaptationConfig,
    ) -> Self {
        let secs = i64::try_from(similarity.user_similarity_ttl_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        let ttl = Duration::seconds(secs);
        Self::new(
            computer,
            ttl,
            similarity.min_user_similarity.max(adaptation.min_user_similarity),
            adaptation.max_candidates,
        )
        .with_cache_capacity(similarity.cache_capacity)
    }

    fn is_fresh(&self, similarity: &UserSimilarity, now: DateTime<Utc>) -> bool {
        now - similarity.computed_at < self.ttl
    }
}

impl UserToUserInterestSelector for StoredInterestSelector {
    fn select(
        &self,
        store: &dyn Store,
        user: UserId,
        candidates: &[UserId],
        group: MessageGroupId,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserSimilarity>> {
        // Cached values that went stale by the caller's clock are dropped first.
        let mut misses = Vec::new();
        for &candidate in candidates.iter().filter(|c| **c != user) {
            let key = (user, candidate, group);
            match self.cache.get(&key) {
                Some(cached) if self.is_fresh(&cached, now) => {}
                Some(_) => {
                    self.cache.invalidate(&key);
                    misses.push(candidate);
                }
                None => misses.push(candidate),
            }
        }
        let stored: BTreeMap<UserId, UserSimilarity> = if misses.is_empty() {
            BTreeMap::new()
        } else {
            store
                .get_user_similarities(user, &misses, group, 0.0)?
                .into_iter()
                .map(|s| (s.user_to, s))
                .collect()
        };

        let mut selected = Vec::new();
        let mut recomputed = 0usize;
        for &candidate in candidates.iter().filter(|c| **c != user) {
            let key = (user, candidate, group);
            let similarity = self.cache.get_or_compute(&key, || -> Result<UserSimilarity> {
                if let Some(s) = stored.get(&candidate).filter(|s| self.is_fresh(s, now)) {
                    return Ok(s.clone());
                }
                let value = self.computer.similarity(store, user, candidate, group)?;
                let fresh = UserSimilarity {
                    user_from: user,
                    user_to: candidate,
                    group_id: group,
                    similarity: value,
                    computed_at: now,
                };
                store.store_user_similarity(fresh.clone())?;
                recomputed += 1;
                Ok(fresh)
            })?;
            if similarity.similarity >= self.min_similarity && similarity.similarity > 0.0 {
                selected.push(similarity);
            }
        }

        selected.sort_by_key(|s| (std::cmp::Reverse(OrderedFloat(s.similarity)), s.user_to));
        selected.truncate(self.max_candidates);
        debug!(
            user = %user,
            group = %group,
            computer = self.computer.name(),
            candidates = candidates.len(),
            recomputed,
            selected = selected.len(),
            "Selected similar users"
        );
        Ok(selected)
    }
}
