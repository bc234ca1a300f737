//! Message-group similarity by term overlap.
//!
//! Two groups are compared through the Jaccard index of the term sets of
//! their messages published within a trailing window. Overlap counts are
//! kept for diagnostics. Results are served through a [`TtlCache`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SimilarityConfig;
use crate::error::Result;
use crate::metrics::PipelineCounters;
use crate::similarity::cache::TtlCache;
use crate::store::{MessageFilter, Store};
use crate::types::{MessageGroupId, Term};

/// Similarity of two message groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageGroupSimilarity {
    /// Lower group id.
    pub group1: MessageGroupId,
    /// Higher group id.
    pub group2: MessageGroupId,
    /// Jaccard index in [0, 1].
    pub similarity: f64,
    /// Terms occurring in both groups.
    pub shared_terms: usize,
    /// Distinct terms of `group1`.
    pub group1_terms: usize,
    /// Distinct terms of `group2`.
    pub group2_terms: usize,
}

/// Computes and caches [`MessageGroupSimilarity`] values.
#[derive(Debug)]
pub struct GroupSimilarityComputer {
    window: Duration,
    cache: TtlCache<(MessageGroupId, MessageGroupId), MessageGroupSimilarity>,
}

impl GroupSimilarityComputer {
    /// Create a computer over a trailing `window`.
    #[must_use]
    pub fn new(window: Duration, ttl: StdDuration, capacity: usize) -> Self {
        Self {
            window,
            cache: TtlCache::new(capacity, ttl),
        }
    }

    /// Create a computer from configuration.
    #[must_use]
    pub fn from_config(config: &SimilarityConfig, counters: Arc<PipelineCounters>) -> Self {
        Self {
            window: Duration::days(i64::from(config.group_window_days)),
            cache: TtlCache::new(
                config.cache_capacity,
                StdDuration::from_secs(config.group_similarity_ttl_secs),
            )
            .with_counters(counters),
        }
    }

    /// Similarity of two groups as of `now`. Symmetric; a group is fully
    /// similar to itself.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn similarity(
        &self,
        store: &dyn Store,
        a: MessageGroupId,
        b: MessageGroupId,
        now: DateTime<Utc>,
    ) -> Result<MessageGroupSimilarity> {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.cache.get_or_compute(&key, || self.compute(store, key.0, key.1, now))
    }

    fn compute(
        &self,
        store: &dyn Store,
        group1: MessageGroupId,
        group2: MessageGroupId,
        now: DateTime<Utc>,
    ) -> Result<MessageGroupSimilarity> {
        let left = self.recent_terms(store, group1, now)?;
        if group1 == group2 {
            return Ok(MessageGroupSimilarity {
                group1,
                group2,
                similarity: 1.0,
                shared_terms: left.len(),
                group1_terms: left.len(),
                group2_terms: left.len(),
            });
        }
        let right = self.recent_terms(store, group2, now)?;
        let shared = left.intersection(&right).count();
        let union = left.len() + right.len() - shared;
        #[allow(clippy::cast_precision_loss)]
        let similarity = if union == 0 { 0.0 } else { shared as f64 / union as f64 };

        debug!(%group1, %group2, shared, union, similarity, "Computed message group similarity");
        Ok(MessageGroupSimilarity {
            group1,
            group2,
            similarity,
            shared_terms: shared,
            group1_terms: left.len(),
            group2_terms: right.len(),
        })
    }

    fn recent_terms(
        &self,
        store: &dyn Store,
        group: MessageGroupId,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<Term>> {
        let filter = MessageFilter::all()
            .in_group(group)
            .published_between(now - self.window, now);
        Ok(store
            .get_messages(&filter)?
            .into_iter()
            .flat_map(|m| m.terms.into_iter().map(|st| st.term))
            .collect())
    }
}
