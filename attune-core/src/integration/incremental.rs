//! Incremental-alpha integration: nudge the weight instead of averaging.
//!
//! The interest score is normalized to `v = (score + 1) / 2` and compared
//! with a neutrality threshold (the entry's current weight, or a fixed
//! constant):
//!
//! ```text
//! v > threshold:  weight += α · (1 − weight) · interest_weight
//! otherwise:      weight −= α · weight · interest_weight
//! ```
//!
//! `interest_weight` is the scored term's weight clamped to [0, 1].
//!
//! Disintegration does not replay the original comparison, since the
//! threshold may have moved since. A maximal interest (`v >= 1`) was
//! almost certainly an increment, so it is decremented; otherwise the
//! direction the current threshold implies is inverted. The inverse is
//! therefore asymmetric and only approximately undoes the integration.

use serde::{Deserialize, Serialize};

use crate::error::{AttuneError, Result};
use crate::integration::{Direction, count_delta};
use crate::model::UserModelEntry;
use crate::types::ScoredTerm;

/// Source of the neutrality threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Compare with the entry's current weight.
    #[default]
    CurrentWeight,
    /// Compare with a fixed constant.
    Fixed,
}

/// Learning-rate based integration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IncrementalAlphaStrategy {
    pub(crate) min_term_weight: f64,
    alpha: f64,
    fixed_threshold: Option<f64>,
}

impl IncrementalAlphaStrategy {
    /// Create the strategy. `fixed_threshold = None` compares against the
    /// entry's current weight.
    ///
    /// # Errors
    /// Returns [`AttuneError::Config`] if `alpha` is outside (0, 1] or the
    /// fixed threshold outside [0, 1].
    pub fn new(min_term_weight: f64, alpha: f64, fixed_threshold: Option<f64>) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(AttuneError::Config(format!("alpha must lie in (0, 1], got {alpha}")));
        }
        if let Some(t) = fixed_threshold.filter(|t| !(0.0..=1.0).contains(t)) {
            return Err(AttuneError::Config(format!(
                "fixed threshold must lie in [0, 1], got {t}"
            )));
        }
        Ok(Self {
            min_term_weight,
            alpha,
            fixed_threshold,
        })
    }

    /// Learning rate.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Which threshold source is in use.
    #[must_use]
    pub fn threshold_mode(&self) -> ThresholdMode {
        if self.fixed_threshold.is_some() {
            ThresholdMode::Fixed
        } else {
            ThresholdMode::CurrentWeight
        }
    }

    fn threshold(&self, entry: &UserModelEntry) -> f64 {
        self.fixed_threshold.unwrap_or_else(|| entry.weight())
    }

    pub(crate) fn update(
        &self,
        entry: &mut UserModelEntry,
        interest: f64,
        scored_term: &ScoredTerm,
        direction: Direction,
    ) -> Result<bool> {
        let value = ((interest + 1.0) / 2.0).clamp(0.0, 1.0);
        let interest_weight = scored_term.weight.clamp(0.0, 1.0);
        let threshold = self.threshold(entry);

        let increment = match direction {
            Direction::Integrate => value > threshold,
            Direction::Disintegrate => !(value >= 1.0 || value > threshold),
        };

        let weight = entry.weight();
        let next = if increment {
            weight + self.alpha * (1.0 - weight) * interest_weight
        } else {
            weight - self.alpha * weight * interest_weight
        };

        entry.accumulate(count_delta(interest, direction), interest * direction.sign());
        entry.set_weight(next);
        entry.consolidate_with(UserModelEntry::weight)?;
        Ok(entry.score_count <= 0.0)
    }
}
