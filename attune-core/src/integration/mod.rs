//! User-model-entry integration strategies.
//!
//! A strategy defines how one observed interest event updates one entry:
//!
//! - [`PlainStrategy`]: arithmetic mean of signed interest scores.
//! - [`IncrementalAlphaStrategy`]: nudges the weight toward 1 or 0.
//! - [`TimeBinnedStrategy`]: per-time-bucket evidence, recency-weighted.
//!
//! The variant is resolved once from configuration. Every strategy keeps
//! the same count/sum bookkeeping (`±1` count per observation, signed
//! interest into the sum) and reports "delete" once `score_count <= 0`.
//! Scored terms whose weight is below the configured minimum never create
//! or mutate an entry.
//!
//! Entries are not self-synchronizing; callers serialize mutation of the
//! same (user, term), e.g. through [`crate::chain::UserLocks`].

pub mod incremental;
pub mod plain;
pub mod time_binned;

pub use incremental::{IncrementalAlphaStrategy, ThresholdMode};
pub use plain::PlainStrategy;
pub use time_binned::TimeBinnedStrategy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::IntegrationConfig;
use crate::decay::DecayFunction;
use crate::error::Result;
use crate::model::{UserModel, UserModelEntry};
use crate::types::ScoredTerm;

/// Configuration name of a strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// [`PlainStrategy`].
    #[default]
    Plain,
    /// [`IncrementalAlphaStrategy`].
    IncrementalAlpha,
    /// [`TimeBinnedStrategy`].
    TimeBinned,
}

/// Whether an observation is being learned or unlearned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Integrate,
    Disintegrate,
}

impl Direction {
    pub(crate) fn sign(self) -> f64 {
        match self {
            Self::Integrate => 1.0,
            Self::Disintegrate => -1.0,
        }
    }
}

/// Signed count contribution of one observation: zero or positive interest
/// counts as positive evidence.
pub(crate) fn count_delta(interest: f64, direction: Direction) -> f64 {
    let unit = if interest >= 0.0 { 1.0 } else { -1.0 };
    unit * direction.sign()
}

/// The configured integration strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrationStrategy {
    /// Mean of interest scores.
    Plain(PlainStrategy),
    /// Incremental nudging with a learning rate.
    IncrementalAlpha(IncrementalAlphaStrategy),
    /// Time-bucketed, optionally decay-weighted mean.
    TimeBinned(TimeBinnedStrategy),
}

impl IntegrationStrategy {
    /// Resolve the strategy from configuration.
    ///
    /// # Errors
    /// Returns `AttuneError::Config` for invalid parameters.
    pub fn from_config(config: &IntegrationConfig) -> Result<Self> {
        Ok(match config.strategy {
            StrategyKind::Plain => Self::Plain(PlainStrategy::new(config.min_term_weight)),
            StrategyKind::IncrementalAlpha => {
                let threshold = match config.threshold_mode {
                    ThresholdMode::CurrentWeight => None,
                    ThresholdMode::Fixed => Some(config.fixed_threshold),
                };
                Self::IncrementalAlpha(IncrementalAlphaStrategy::new(
                    config.min_term_weight,
                    config.alpha,
                    threshold,
                )?)
            }
            StrategyKind::TimeBinned => {
                let decay = if config.decay_bins {
                    Some(DecayFunction::new(config.decay_cutoff_ms)?)
                } else {
                    None
                };
                Self::TimeBinned(TimeBinnedStrategy::new(
                    config.min_term_weight,
                    config.bin_width_ms,
                    decay,
                )?)
            }
        })
    }

    /// Which variant this is.
    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Plain(_) => StrategyKind::Plain,
            Self::IncrementalAlpha(_) => StrategyKind::IncrementalAlpha,
            Self::TimeBinned(_) => StrategyKind::TimeBinned,
        }
    }

    /// Minimum scored-term weight below which terms are ignored.
    #[must_use]
    pub fn min_term_weight(&self) -> f64 {
        match self {
            Self::Plain(s) => s.min_term_weight,
            Self::IncrementalAlpha(s) => s.min_term_weight,
            Self::TimeBinned(s) => s.min_term_weight,
        }
    }

    /// Whether `scored_term` is strong enough to be learned.
    #[must_use]
    pub fn accepts(&self, scored_term: &ScoredTerm) -> bool {
        scored_term.weight >= self.min_term_weight()
    }

    /// A fresh, evidence-free entry for `scored_term`, or `None` when the
    /// term is below the minimum weight.
    #[must_use]
    pub fn create_new(
        &self,
        model: &UserModel,
        interest: f64,
        scored_term: &ScoredTerm,
        observation_date: DateTime<Utc>,
    ) -> Option<UserModelEntry> {
        if !self.accepts(scored_term) {
            debug!(
                model = %model.id,
                term = %scored_term.term,
                weight = scored_term.weight,
                "Scored term below minimum weight, no entry created"
            );
            return None;
        }
        let mut entry = UserModelEntry::new(scored_term.clone());
        entry.last_updated = Some(observation_date);
        debug!(model = %model.id, term = %scored_term.term, interest, "Created user model entry");
        Some(entry)
    }

    /// Integrate an observation into `entry`.
    ///
    /// Returns whether the entry should now be deleted. Below-minimum terms
    /// leave the entry untouched and return `false`. Integrating organic
    /// evidence into an adapted entry turns it into an organic one.
    ///
    /// # Errors
    /// Returns an error if consolidation finds non-finite evidence.
    pub fn integrate(
        &self,
        entry: &mut UserModelEntry,
        interest: f64,
        scored_term: &ScoredTerm,
        observation_date: DateTime<Utc>,
    ) -> Result<bool> {
        self.update(entry, interest, scored_term, observation_date, Direction::Integrate)
    }

    /// Undo a previously integrated observation.
    ///
    /// # Errors
    /// Same as [`IntegrationStrategy::integrate`].
    pub fn disintegrate(
        &self,
        entry: &mut UserModelEntry,
        interest: f64,
        scored_term: &ScoredTerm,
        observation_date: DateTime<Utc>,
    ) -> Result<bool> {
        self.update(entry, interest, scored_term, observation_date, Direction::Disintegrate)
    }

    fn update(
        &self,
        entry: &mut UserModelEntry,
        interest: f64,
        scored_term: &ScoredTerm,
        observation_date: DateTime<Utc>,
        direction: Direction,
    ) -> Result<bool> {
        if !self.accepts(scored_term) {
            return Ok(false);
        }
        entry.adapted = false;
        entry.last_updated = Some(observation_date);
        match self {
            Self::Plain(s) => s.update(entry, interest, direction),
            Self::IncrementalAlpha(s) => s.update(entry, interest, scored_term, direction),
            Self::TimeBinned(s) => s.update(entry, interest, observation_date, direction),
        }
    }
}
