//! Weighted linear aggregation and per-feature threshold validation.
//!
//! Score = Σ w_f · value_f over every configured feature. A feature that was
//! not computed contributes nothing.

use std::collections::BTreeMap;

use crate::aggregation::{Feature, FeatureAggregate};
use crate::error::{AttuneError, Result};

/// Combines feature values with a fixed weight per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFeatureAggregator {
    weights: BTreeMap<Feature, f64>,
}

impl LinearFeatureAggregator {
    /// Create an aggregator from a weight map.
    ///
    /// # Errors
    /// Returns [`AttuneError::Config`] if a weight is negative or not finite.
    pub fn new(weights: BTreeMap<Feature, f64>) -> Result<Self> {
        if let Some((feature, weight)) = weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(AttuneError::Config(format!(
                "feature weight for {feature} must be finite and >= 0, got {weight}"
            )));
        }
        Ok(Self { weights })
    }

    /// Configured weight of a feature (0 when not configured).
    #[must_use]
    pub fn weight(&self, feature: Feature) -> f64 {
        self.weights.get(&feature).copied().unwrap_or(0.0)
    }

    /// Σ weight · value over the configured features.
    #[must_use]
    pub fn aggregate(&self, features: &FeatureAggregate) -> f64 {
        self.contributions(features).map(|(_, c)| c).sum()
    }

    /// Per-feature contributions, in feature order.
    pub fn contributions<'a>(
        &'a self,
        features: &'a FeatureAggregate,
    ) -> impl Iterator<Item = (Feature, f64)> + 'a {
        self.weights
            .iter()
            .filter_map(|(f, w)| features.get(*f).map(|v| (*f, w * v)))
    }
}

/// Down-weight a score when the user does not participate in the discussion.
#[must_use]
pub fn apply_participation(score: f64, participates: bool, non_participation_factor: f64) -> f64 {
    if participates {
        score
    } else {
        score * non_participation_factor
    }
}

/// Requires every configured feature to meet its minimum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdValidator {
    minimums: BTreeMap<Feature, f64>,
}

impl ThresholdValidator {
    /// Create a validator from per-feature minimums.
    ///
    /// # Errors
    /// Returns [`AttuneError::Config`] if a minimum is not finite.
    pub fn new(minimums: BTreeMap<Feature, f64>) -> Result<Self> {
        if let Some((feature, _)) = minimums.iter().find(|(_, m)| !m.is_finite()) {
            return Err(AttuneError::Config(format!(
                "minimum for {feature} must be finite"
            )));
        }
        Ok(Self { minimums })
    }

    /// Whether the aggregate is positive enough to learn from.
    ///
    /// A configured feature that was not computed fails validation.
    #[must_use]
    pub fn is_learnable(&self, features: &FeatureAggregate) -> bool {
        self.minimums
            .iter()
            .all(|(f, min)| features.get(*f).is_some_and(|v| v >= *min))
    }

    /// Features that fall short of their minimum.
    #[must_use]
    pub fn failing(&self, features: &FeatureAggregate) -> Vec<Feature> {
        self.minimums
            .iter()
            .filter(|(f, min)| features.get(**f).is_none_or(|v| v < **min))
            .map(|(f, _)| *f)
            .collect()
    }
}
