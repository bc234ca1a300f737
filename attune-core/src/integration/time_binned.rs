//! Time-binned integration: per-bucket evidence with recency weighting.
//!
//! Each observation lands in the bucket `floor(date_ms / bin_width_ms)`.
//! The entry's aggregate count and sum are rebuilt from the buckets,
//! optionally weighting each bucket by `decay(now − bucket_start)`, and the
//! weight is then the usual mean. Old evidence fades without being deleted.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::decay::DecayFunction;
use crate::error::{AttuneError, Result};
use crate::integration::{Direction, count_delta};
use crate::model::{TimeBin, UserModelEntry};

/// Residual sum below which a zero-count bucket is dropped.
const EMPTY_BIN_EPSILON: f64 = 1e-9;

/// Time-bucketed integration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBinnedStrategy {
    pub(crate) min_term_weight: f64,
    bin_width_ms: i64,
    decay: Option<DecayFunction>,
}

impl TimeBinnedStrategy {
    /// Create the strategy. Without a decay function all buckets weigh 1.
    ///
    /// # Errors
    /// Returns [`AttuneError::Config`] if `bin_width_ms <= 0`.
    pub fn new(
        min_term_weight: f64,
        bin_width_ms: i64,
        decay: Option<DecayFunction>,
    ) -> Result<Self> {
        if bin_width_ms <= 0 {
            return Err(AttuneError::Config(format!(
                "time bin width must be positive, got {bin_width_ms}ms"
            )));
        }
        Ok(Self {
            min_term_weight,
            bin_width_ms,
            decay,
        })
    }

    /// Bucket width in milliseconds.
    #[must_use]
    pub fn bin_width_ms(&self) -> i64 {
        self.bin_width_ms
    }

    /// Bucket index of a date.
    #[must_use]
    pub fn bin_index(&self, date: DateTime<Utc>) -> i64 {
        date.timestamp_millis().div_euclid(self.bin_width_ms)
    }

    fn bin_start_ms(&self, index: i64) -> i64 {
        index.saturating_mul(self.bin_width_ms)
    }

    pub(crate) fn update(
        &self,
        entry: &mut UserModelEntry,
        interest: f64,
        date: DateTime<Utc>,
        direction: Direction,
    ) -> Result<bool> {
        let index = self.bin_index(date);
        #[allow(clippy::cast_possible_truncation)]
        let count = count_delta(interest, direction) as i64;
        let bin = entry.time_bins.entry(index).or_default();
        bin.count += count;
        bin.sum += interest * direction.sign();
        // Counts are signed, so a zero count alone does not mean empty.
        if bin.count == 0 && bin.sum.abs() < EMPTY_BIN_EPSILON {
            entry.time_bins.remove(&index);
        }
        entry.mark_pending();

        self.consolidate_by_time_bins(entry, date)?;
        Ok(entry.score_count <= 0.0)
    }

    /// Rebuild `score_count` / `score_sum` from the buckets as seen at `now`
    /// and recompute the weight.
    ///
    /// Buckets that start after `now` weigh 1.
    ///
    /// # Errors
    /// Returns [`AttuneError::InvariantViolation`] if the rebuilt evidence
    /// is not finite.
    pub fn consolidate_by_time_bins(
        &self,
        entry: &mut UserModelEntry,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now_ms = now.timestamp_millis();
        let mut count = 0.0;
        let mut sum = 0.0;
        for (index, bin) in &entry.time_bins {
            let weight = match &self.decay {
                Some(decay) => decay.decay((now_ms - self.bin_start_ms(*index)).max(0))?,
                None => 1.0,
            };
            #[allow(clippy::cast_precision_loss)]
            let bin_count = bin.count as f64;
            count += weight * bin_count;
            sum += weight * bin.sum;
        }
        trace!(
            term = %entry.term(),
            bins = entry.time_bins.len(),
            count,
            sum,
            "Consolidated time bins"
        );
        entry.score_count = count;
        entry.score_sum = sum;
        entry.mark_pending();
        entry.consolidate()
    }
}
