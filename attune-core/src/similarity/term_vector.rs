//! Term-vector similarity between a message and a user model.
//!
//! Each message term contributes `importance(term) · term.weight` on the
//! message side and the user's entry weight on the user side. The pair
//! vectors are then reduced by one of three variants:
//!
//! | Variant | Result |
//! |---|---|
//! | `Average` | Σ w·s / Σ w |
//! | `Cosine` | Σ w·s / (‖w‖ · ‖s‖) |
//! | `Maximum` | max w·s |
//!
//! Degenerate inputs (no terms, zero weights, zero magnitudes) yield 0.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::SimilarityConfig;
use crate::model::UserModelEntry;
use crate::types::{Message, MessageGroupId, ScoredTerm, Term};

/// Reduction applied to the (message weight, user weight) pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermVectorKind {
    /// Importance-weighted mean of the user's weights.
    #[default]
    Average,
    /// Cosine of the two vectors.
    Cosine,
    /// The single strongest weighted product.
    Maximum,
}

/// How global term importance is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermImportanceKind {
    /// Every term weighs 1.
    #[default]
    Uniform,
    /// Smoothed inverse message frequency within the message group.
    InverseFrequency,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct DocumentFrequencies {
    messages: usize,
    frequency: BTreeMap<Term, usize>,
}

/// Global importance of terms, per message group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermImportance {
    kind: TermImportanceKind,
    groups: BTreeMap<MessageGroupId, DocumentFrequencies>,
}

impl TermImportance {
    /// Every term weighs 1.
    #[must_use]
    pub fn uniform() -> Self {
        Self::default()
    }

    /// Count, per group, how many messages contain each term.
    pub fn from_messages<'a>(
        kind: TermImportanceKind,
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> Self {
        let mut groups: BTreeMap<MessageGroupId, DocumentFrequencies> = BTreeMap::new();
        if kind == TermImportanceKind::InverseFrequency {
            for message in messages {
                let stats = groups.entry(message.group_or_ungrouped()).or_default();
                stats.messages += 1;
                let distinct: BTreeSet<&Term> = message.term_keys().collect();
                for term in distinct {
                    *stats.frequency.entry(term.clone()).or_default() += 1;
                }
            }
        }
        Self { kind, groups }
    }

    /// Which importance this is.
    #[must_use]
    pub fn kind(&self) -> TermImportanceKind {
        self.kind
    }

    /// Importance of `term` within `group`: `ln((1 + N) / (1 + df)) + 1`
    /// under inverse frequency, else 1.
    #[must_use]
    pub fn importance(&self, group: MessageGroupId, term: &Term) -> f64 {
        match self.kind {
            TermImportanceKind::Uniform => 1.0,
            TermImportanceKind::InverseFrequency => {
                let Some(stats) = self.groups.get(&group) else {
                    return 1.0;
                };
                let df = stats.frequency.get(term).copied().unwrap_or(0);
                #[allow(clippy::cast_precision_loss)]
                let ratio = (1 + stats.messages) as f64 / (1 + df) as f64;
                ratio.ln() + 1.0
            }
        }
    }
}

/// Content similarity between a message's terms and a user's entries.
#[derive(Debug, Default)]
pub struct TermVectorSimilarity {
    kind: TermVectorKind,
    include_missing_terms: bool,
    importance: RwLock<TermImportance>,
}

impl TermVectorSimilarity {
    /// Create a computer with uniform term importance.
    #[must_use]
    pub fn new(kind: TermVectorKind, include_missing_terms: bool) -> Self {
        Self {
            kind,
            include_missing_terms,
            importance: RwLock::new(TermImportance::uniform()),
        }
    }

    /// Create a computer from configuration.
    #[must_use]
    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self::new(config.term_vector, config.include_missing_terms)
    }

    /// The configured variant.
    #[must_use]
    pub fn kind(&self) -> TermVectorKind {
        self.kind
    }

    /// Replace the global term importance.
    pub fn set_importance(&self, importance: TermImportance) {
        *self.importance.write() = importance;
    }

    /// Similarity of `terms` (a message in `group`) to the user's
    /// `relevant_entries`.
    ///
    /// Terms without an entry count as zero-weight when missing terms are
    /// included and are skipped otherwise.
    #[must_use]
    pub fn get_similarity(
        &self,
        group: MessageGroupId,
        relevant_entries: &BTreeMap<Term, UserModelEntry>,
        terms: &[ScoredTerm],
    ) -> f64 {
        let pairs = self.weighted_pairs(group, relevant_entries, terms);
        match self.kind {
            TermVectorKind::Average => average(&pairs),
            TermVectorKind::Cosine => cosine(&pairs),
            TermVectorKind::Maximum => maximum(&pairs),
        }
    }

    fn weighted_pairs(
        &self,
        group: MessageGroupId,
        entries: &BTreeMap<Term, UserModelEntry>,
        terms: &[ScoredTerm],
    ) -> Vec<(f64, f64)> {
        let importance = self.importance.read();
        terms
            .iter()
            .filter_map(|scored| {
                let weight = importance.importance(group, &scored.term) * scored.weight;
                match entries.get(&scored.term) {
                    Some(entry) => Some((weight, entry.weight())),
                    None if self.include_missing_terms => Some((weight, 0.0)),
                    None => None,
                }
            })
            .collect()
    }
}

/// Σ w·s / Σ w, or 0 when the weights sum to 0.
#[must_use]
pub fn average(pairs: &[(f64, f64)]) -> f64 {
    let total: f64 = pairs.iter().map(|(w, _)| w).sum();
    if total == 0.0 {
        return 0.0;
    }
    pairs.iter().map(|(w, s)| w * s).sum::<f64>() / total
}

/// Cosine of the two component vectors, or 0 when either has no magnitude.
#[must_use]
pub fn cosine(pairs: &[(f64, f64)]) -> f64 {
    let (dot, left, right) = pairs.iter().fold((0.0, 0.0, 0.0), |(d, l, r), (a, b)| {
        (d + a * b, l + a * a, r + b * b)
    });
    if left == 0.0 || right == 0.0 {
        return 0.0;
    }
    dot / (left.sqrt() * right.sqrt())
}

/// Largest weighted product, or 0 without pairs.
#[must_use]
pub fn maximum(pairs: &[(f64, f64)]) -> f64 {
    pairs
        .iter()
        .map(|(w, s)| w * s)
        .reduce(f64::max)
        .unwrap_or(0.0)
}
