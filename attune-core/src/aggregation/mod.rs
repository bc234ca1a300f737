//! Feature aggregation: named per-(message, user) signals combined into a score.
//!
//! The score is a weighted linear combination:
//!   Score = Σ w_f · value_f
//!
//! over the configured features (content match, collaborative match,
//! discussion participation, recency). A companion [`ThresholdValidator`]
//! decides whether a score is positive enough to learn from.

pub mod linear;

pub use linear::{LinearFeatureAggregator, ThresholdValidator, apply_participation};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named numeric signal computed for a (message, user) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Similarity between the message terms and the user's model.
    ContentMatch,
    /// Prediction from other users' observations.
    CollaborativeMatch,
    /// Whether the user takes part in the message's discussion.
    DiscussionParticipation,
    /// Decayed age of the message.
    Recency,
}

impl Feature {
    /// All features, in aggregation order.
    pub const ALL: [Self; 4] = [
        Self::ContentMatch,
        Self::CollaborativeMatch,
        Self::DiscussionParticipation,
        Self::Recency,
    ];

    /// Stable snake-case name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ContentMatch => "content_match",
            Self::CollaborativeMatch => "collaborative_match",
            Self::DiscussionParticipation => "discussion_participation",
            Self::Recency => "recency",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of feature values computed for one (message, user) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureAggregate {
    values: BTreeMap<Feature, f64>,
}

impl FeatureAggregate {
    /// An empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a feature value, replacing any earlier one.
    pub fn set(&mut self, feature: Feature, value: f64) {
        self.values.insert(feature, value);
    }

    /// Builder form of [`FeatureAggregate::set`].
    #[must_use]
    pub fn with(mut self, feature: Feature, value: f64) -> Self {
        self.set(feature, value);
        self
    }

    /// Value of a feature, if computed.
    #[must_use]
    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    /// Number of computed features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no feature was computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over computed features in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }
}
