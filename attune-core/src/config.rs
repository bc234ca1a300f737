//! Configuration for the attune pipeline.
//!
//! Loadable from TOML; every field has a default. Individual options can
//! also be overridden through a flat map of dotted names such as
//! `integration.alpha`. Validation happens at load time so that invalid
//! knobs fail at construction, never mid-run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregation::Feature;
use crate::collaborative::{MergeStrategy, ObservationPolicy};
use crate::error::{AttuneError, Result};
use crate::integration::{StrategyKind, ThresholdMode};
use crate::similarity::{TermImportanceKind, TermVectorKind};

/// Options whose value is a map keyed by feature; overrides may add keys.
const OPEN_MAP_OPTIONS: &[&str] = &["scoring.feature_weights", "scoring.feature_minimums"];

/// Top-level attune configuration, loadable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttuneConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Feature weights and score post-processing.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// User-model-entry integration strategy.
    #[serde(default)]
    pub integration: IntegrationConfig,
    /// Term-vector, user and message-group similarity.
    #[serde(default)]
    pub similarity: SimilarityConfig,
    /// Collaborative score computers.
    #[serde(default)]
    pub collaborative: CollaborativeConfig,
    /// Directed user-model adaptation.
    #[serde(default)]
    pub adaptation: AdaptationConfig,
}

impl AttuneConfig {
    /// Load and validate configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `AttuneError::Config` if the TOML is invalid or a value is
    /// out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| AttuneError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Apply flat `section.option = value` overrides and re-validate.
    ///
    /// Values are parsed as JSON scalars when possible (`0.2`, `true`),
    /// otherwise taken as strings (`cosine`).
    ///
    /// # Errors
    /// Returns `AttuneError::Config` for unknown options, mistyped values or
    /// a configuration that no longer validates.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, String>) -> Result<()> {
        let mut tree = serde_json::to_value(&*self).map_err(|e| AttuneError::Config(e.to_string()))?;

        for (name, raw) in overrides {
            let unknown = || AttuneError::Config(format!("unknown option `{name}`"));
            let (parent, _) = name.rsplit_once('.').ok_or_else(unknown)?;
            let open = OPEN_MAP_OPTIONS.contains(&parent);

            let mut node = &mut tree;
            for segment in name.split('.') {
                node = match node {
                    Value::Object(map) => {
                        if !map.contains_key(segment) && !open {
                            return Err(unknown());
                        }
                        map.entry(segment.to_string()).or_insert(Value::Null)
                    }
                    _ => return Err(unknown()),
                };
            }
            *node = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
        }

        let updated: Self = serde_json::from_value(tree).map_err(|e| AttuneError::Config(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Check every knob against its valid range.
    ///
    /// # Errors
    /// Returns `AttuneError::Config` naming the first offending option.
    pub fn validate(&self) -> Result<()> {
        self.general.level()?;
        self.scoring.validate()?;
        self.integration.validate()?;
        self.similarity.validate()?;
        self.collaborative.validate()?;
        self.adaptation.validate()
    }
}

fn check(ok: bool, what: impl FnOnce() -> String) -> Result<()> {
    if ok { Ok(()) } else { Err(AttuneError::Config(what())) }
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    check((0.0..=1.0).contains(&value), || {
        format!("{name} must lie in [0, 1], got {value}")
    })
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Model type the pipeline learns into and scores from.
    #[serde(default = "default_model_type")]
    pub model_type: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            model_type: default_model_type(),
        }
    }
}

impl GeneralConfig {
    /// The configured log level.
    ///
    /// # Errors
    /// Returns `AttuneError::Config` for a name `tracing` does not know.
    pub fn level(&self) -> Result<tracing::Level> {
        self.log_level.parse().map_err(|_| {
            AttuneError::Config(format!(
                "general.log_level must be one of trace, debug, info, warn, error, got `{}`",
                self.log_level
            ))
        })
    }
}

/// Feature weights and score post-processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Linear weight per feature.
    #[serde(default = "default_feature_weights")]
    pub feature_weights: BTreeMap<Feature, f64>,
    /// Per-feature minimum for a score to count as learnable.
    #[serde(default)]
    pub feature_minimums: BTreeMap<Feature, f64>,
    /// Multiplier applied when the user does not participate in the discussion.
    #[serde(default = "default_0_5")]
    pub non_participation_factor: f64,
    /// Age at which the recency feature reaches 0.9.
    #[serde(default = "default_day_ms")]
    pub recency_cutoff_ms: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            feature_weights: default_feature_weights(),
            feature_minimums: BTreeMap::new(),
            non_participation_factor: 0.5,
            recency_cutoff_ms: default_day_ms(),
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        for (feature, weight) in &self.feature_weights {
            check(weight.is_finite() && *weight >= 0.0, || {
                format!("scoring.feature_weights.{feature} must be finite and >= 0, got {weight}")
            })?;
        }
        for (feature, minimum) in &self.feature_minimums {
            check(minimum.is_finite(), || {
                format!("scoring.feature_minimums.{feature} must be finite")
            })?;
        }
        unit_interval("scoring.non_participation_factor", self.non_participation_factor)?;
        check(self.recency_cutoff_ms > 0, || {
            format!("scoring.recency_cutoff_ms must be positive, got {}", self.recency_cutoff_ms)
        })
    }
}

/// User-model-entry integration strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Which strategy updates entries.
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Scored terms below this weight are treated as noise.
    #[serde(default)]
    pub min_term_weight: f64,
    /// Learning rate of the incremental-alpha strategy.
    #[serde(default = "default_0_1")]
    pub alpha: f64,
    /// Neutrality threshold source of the incremental-alpha strategy.
    #[serde(default)]
    pub threshold_mode: ThresholdMode,
    /// Threshold used when `threshold_mode = "fixed"`.
    #[serde(default = "default_0_5")]
    pub fixed_threshold: f64,
    /// Width of one time bin.
    #[serde(default = "default_day_ms")]
    pub bin_width_ms: i64,
    /// Whether bins are weighted by their age.
    #[serde(default = "default_true")]
    pub decay_bins: bool,
    /// Age at which a bin's weight reaches 0.9.
    #[serde(default = "default_week_ms")]
    pub decay_cutoff_ms: i64,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            min_term_weight: 0.0,
            alpha: 0.1,
            threshold_mode: ThresholdMode::default(),
            fixed_threshold: 0.5,
            bin_width_ms: default_day_ms(),
            decay_bins: true,
            decay_cutoff_ms: default_week_ms(),
        }
    }
}

impl IntegrationConfig {
    fn validate(&self) -> Result<()> {
        check(self.min_term_weight.is_finite(), || {
            "integration.min_term_weight must be finite".to_string()
        })?;
        check(self.alpha > 0.0 && self.alpha <= 1.0, || {
            format!("integration.alpha must lie in (0, 1], got {}", self.alpha)
        })?;
        unit_interval("integration.fixed_threshold", self.fixed_threshold)?;
        check(self.bin_width_ms > 0, || {
            format!("integration.bin_width_ms must be positive, got {}", self.bin_width_ms)
        })?;
        check(self.decay_cutoff_ms > 0, || {
            format!("integration.decay_cutoff_ms must be positive, got {}", self.decay_cutoff_ms)
        })
    }
}

/// Similarity computer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Term-vector similarity used for content matching.
    #[serde(default)]
    pub term_vector: TermVectorKind,
    /// Whether message terms without an entry count as zero-weight.
    #[serde(default = "default_true")]
    pub include_missing_terms: bool,
    /// Global term importance applied on the message side.
    #[serde(default)]
    pub term_importance: TermImportanceKind,
    /// Age after which a stored user similarity is recomputed.
    #[serde(default = "default_day_secs")]
    pub user_similarity_ttl_secs: u64,
    /// Stored user similarities below this are ignored.
    #[serde(default = "default_0_1")]
    pub min_user_similarity: f64,
    /// Age after which a cached message-group similarity is recomputed.
    #[serde(default = "default_hour_secs")]
    pub group_similarity_ttl_secs: u64,
    /// Trailing window of messages considered for group similarity.
    #[serde(default = "default_7")]
    pub group_window_days: u32,
    /// Capacity of each similarity cache.
    #[serde(default = "default_1024")]
    pub cache_capacity: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            term_vector: TermVectorKind::default(),
            include_missing_terms: true,
            term_importance: TermImportanceKind::default(),
            user_similarity_ttl_secs: default_day_secs(),
            min_user_similarity: 0.1,
            group_similarity_ttl_secs: default_hour_secs(),
            group_window_days: 7,
            cache_capacity: 1024,
        }
    }
}

impl SimilarityConfig {
    fn validate(&self) -> Result<()> {
        unit_interval("similarity.min_user_similarity", self.min_user_similarity)?;
        check(self.group_window_days > 0, || {
            "similarity.group_window_days must be positive".to_string()
        })?;
        check(self.cache_capacity > 0, || {
            "similarity.cache_capacity must be positive".to_string()
        })
    }
}

/// Collaborative score computer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborativeConfig {
    /// Which observations feed the preference matrix.
    #[serde(default)]
    pub observation_policy: ObservationPolicy,
    /// How per-group predictions are merged.
    #[serde(default)]
    pub merge: MergeStrategy,
    /// Minimum co-rated items for two users to be compared.
    #[serde(default = "default_1_usize")]
    pub min_co_rated: usize,
    /// Maximum neighbours consulted per prediction.
    #[serde(default = "default_20_usize")]
    pub max_neighbours: usize,
}

impl Default for CollaborativeConfig {
    fn default() -> Self {
        Self {
            observation_policy: ObservationPolicy::default(),
            merge: MergeStrategy::default(),
            min_co_rated: 1,
            max_neighbours: 20,
        }
    }
}

impl CollaborativeConfig {
    fn validate(&self) -> Result<()> {
        check(self.min_co_rated >= 1, || {
            "collaborative.min_co_rated must be at least 1".to_string()
        })?;
        check(self.max_neighbours >= 1, || {
            "collaborative.max_neighbours must be at least 1".to_string()
        })
    }
}

/// Directed user-model adaptation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationConfig {
    /// Whether the scorer requests adaptation for missing terms.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Candidates below this similarity are ignored.
    #[serde(default = "default_0_1")]
    pub min_user_similarity: f64,
    /// Most similar candidates consulted per adaptation.
    #[serde(default = "default_20_usize")]
    pub max_candidates: usize,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_user_similarity: 0.1,
            max_candidates: 20,
        }
    }
}

impl AdaptationConfig {
    fn validate(&self) -> Result<()> {
        unit_interval("adaptation.min_user_similarity", self.min_user_similarity)?;
        check(self.max_candidates >= 1, || {
            "adaptation.max_candidates must be at least 1".to_string()
        })
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_model_type() -> String { "default".to_string() }
fn default_0_1() -> f64 { 0.1 }
fn default_0_5() -> f64 { 0.5 }
fn default_1_usize() -> usize { 1 }
fn default_7() -> u32 { 7 }
fn default_20_usize() -> usize { 20 }
fn default_1024() -> usize { 1024 }
fn default_hour_secs() -> u64 { 3_600 }
fn default_day_secs() -> u64 { 86_400 }
fn default_day_ms() -> i64 { crate::decay::DAY_MS }
fn default_week_ms() -> i64 { 7 * crate::decay::DAY_MS }
fn default_feature_weights() -> BTreeMap<Feature, f64> {
    BTreeMap::from([
        (Feature::ContentMatch, 0.6),
        (Feature::CollaborativeMatch, 0.4),
        (Feature::DiscussionParticipation, 0.0),
        (Feature::Recency, 0.0),
    ])
}
