//! Directed user-model adaptation.
//!
//! Bootstraps a sparse user model by borrowing term weights from similar
//! users. See [`DirectedUserModelAdapter`] for the protocol.

pub mod directed;

pub use directed::{AdaptationReport, AdaptationRequest, DirectedUserModelAdapter};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::store::Store;
use crate::types::{Message, MessageGroupId, MessageId, UserId, UserSimilarity};

/// Incremental weighted mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightedAverage {
    weighted_sum: f64,
    total_weight: f64,
    positive: usize,
}

impl WeightedAverage {
    /// An empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` with `weight`. Non-finite inputs are ignored.
    pub fn add(&mut self, value: f64, weight: f64) {
        if !value.is_finite() || !weight.is_finite() {
            return;
        }
        self.weighted_sum += value * weight;
        self.total_weight += weight;
        if weight > 0.0 {
            self.positive += 1;
        }
    }

    /// The mean, or `None` without a positive-weight contribution or with a
    /// zero total weight.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        (self.positive > 0 && self.total_weight != 0.0)
            .then(|| self.weighted_sum / self.total_weight)
    }

    /// Sum of all weights added.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Number of contributions with a positive weight.
    #[must_use]
    pub fn positive_contributions(&self) -> usize {
        self.positive
    }
}

/// Chooses which users are similar enough to borrow from.
pub trait UserToUserInterestSelector: Send + Sync {
    /// Directional similarities from `user` to those `candidates` that
    /// qualify, strongest first.
    ///
    /// # Errors
    /// Propagates store failures.
    fn select(
        &self,
        store: &dyn Store,
        user: UserId,
        candidates: &[UserId],
        group: MessageGroupId,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserSimilarity>>;
}

/// Receives requests to re-score a message for a user after adaptation.
pub trait RescoreTrigger: Send + Sync {
    /// Request a re-score of `message` for `user`.
    ///
    /// # Errors
    /// Implementation defined; propagated by the adapter.
    fn rescore(&self, store: &dyn Store, message: &Message, user: UserId) -> Result<()>;
}

impl<F> RescoreTrigger for F
where
    F: Fn(&dyn Store, &Message, UserId) -> Result<()> + Send + Sync,
{
    fn rescore(&self, store: &dyn Store, message: &Message, user: UserId) -> Result<()> {
        self(store, message, user)
    }
}

/// Collects re-score requests for the caller to drain.
#[derive(Debug, Default)]
pub struct RescoreQueue {
    pending: Mutex<Vec<(UserId, MessageId)>>,
}

impl RescoreQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued request, oldest first.
    pub fn drain(&self) -> Vec<(UserId, MessageId)> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Number of queued requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RescoreTrigger for RescoreQueue {
    fn rescore(&self, _store: &dyn Store, message: &Message, user: UserId) -> Result<()> {
        self.pending.lock().push((user, message.id));
        Ok(())
    }
}
