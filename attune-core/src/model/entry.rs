//! User-model entries: one learned interest weight per (user model, term).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AttuneError, Result};
use crate::types::{ScoredTerm, Term};

/// Accumulated evidence of one time bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeBin {
    /// Signed observation count in this bucket.
    pub count: i64,
    /// Signed accumulated interest in this bucket.
    pub sum: f64,
}

/// A learned interest weight for one term of one user model.
///
/// `weight` must be recomputed through [`UserModelEntry::consolidate`]
/// after every mutation of `score_count` / `score_sum` before it is read
/// for scoring. Mutations go through [`UserModelEntry::accumulate`], which
/// marks the entry as pending consolidation.
///
/// Entries are not self-synchronizing: concurrent learning for the same
/// (user, term) must be serialized by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserModelEntry {
    /// The term and its current learned weight.
    pub scored_term: ScoredTerm,
    /// Signed accumulation count (fractional under decay weighting).
    pub score_count: f64,
    /// Signed accumulated interest.
    pub score_sum: f64,
    /// Time-bucketed evidence, keyed by bucket index (time-binned strategy only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub time_bins: BTreeMap<i64, TimeBin>,
    /// Whether the weight was injected by directed adaptation.
    pub adapted: bool,
    /// Date of the last integrated observation.
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip)]
    pending: bool,
}

impl UserModelEntry {
    /// A fresh entry without evidence; its weight starts at the term's weight.
    #[must_use]
    pub fn new(scored_term: ScoredTerm) -> Self {
        Self {
            scored_term,
            score_count: 0.0,
            score_sum: 0.0,
            time_bins: BTreeMap::new(),
            adapted: false,
            last_updated: None,
            pending: false,
        }
    }

    /// An entry carrying an adapted weight (no organic evidence).
    #[must_use]
    pub fn adapted(term: Term, weight: f64) -> Self {
        Self {
            adapted: true,
            ..Self::new(ScoredTerm::new(term, weight))
        }
    }

    /// The term this entry models.
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.scored_term.term
    }

    /// The current learned weight.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.scored_term.weight
    }

    /// Overwrite the weight directly (incremental strategies, adaptation).
    pub fn set_weight(&mut self, weight: f64) {
        self.scored_term.weight = weight;
    }

    /// Add evidence and mark the entry as needing consolidation.
    pub fn accumulate(&mut self, count_delta: f64, sum_delta: f64) {
        self.score_count += count_delta;
        self.score_sum += sum_delta;
        self.pending = true;
    }

    /// Mark the aggregate as changed without touching it (time-binned path).
    pub(crate) fn mark_pending(&mut self) {
        self.pending = true;
    }

    /// Whether `weight` reflects the latest evidence.
    #[must_use]
    pub fn is_consolidated(&self) -> bool {
        !self.pending
    }

    /// Whether the entry has net positive evidence.
    #[must_use]
    pub fn has_evidence(&self) -> bool {
        self.score_count > 0.0
    }

    /// Recompute `weight = score_sum / score_count`.
    ///
    /// Adapted entries keep their weight. A zero count leaves the weight
    /// unchanged.
    ///
    /// # Errors
    /// Returns [`AttuneError::InvariantViolation`] if the accumulated values
    /// are not finite.
    pub fn consolidate(&mut self) -> Result<()> {
        self.consolidate_with(|entry| entry.score_sum / entry.score_count)
    }

    /// Clear the pending flag after a strategy set the weight itself.
    ///
    /// # Errors
    /// Same as [`UserModelEntry::consolidate`].
    pub(crate) fn consolidate_with(&mut self, mean: impl FnOnce(&Self) -> f64) -> Result<()> {
        if !self.score_count.is_finite() || !self.score_sum.is_finite() {
            return Err(AttuneError::InvariantViolation(format!(
                "entry {} has non-finite evidence (count={}, sum={})",
                self.term(),
                self.score_count,
                self.score_sum
            )));
        }
        if !self.adapted && self.score_count != 0.0 {
            let weight = mean(self);
            self.scored_term.weight = weight;
        }
        self.pending = false;
        Ok(())
    }

    /// Total (undecayed) evidence across all time bins.
    #[must_use]
    pub fn bin_totals(&self) -> (i64, f64) {
        self.time_bins
            .values()
            .fold((0, 0.0), |(c, s), bin| (c + bin.count, s + bin.sum))
    }
}
