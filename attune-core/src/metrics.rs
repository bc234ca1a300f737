//! Runtime counters and span names.
//!
//! Every chain stage emits a `tracing` span; this module adds lock-free
//! counters that can be read at runtime or exported as Prometheus text.
//! NaN predictions and recovered missing data are counted here so that
//! systemic problems stay visible while batches keep running. With the
//! `subscriber` feature, `init_tracing` installs a log subscriber at
//! `general.log_level`.

use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Pipeline Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for pipeline events.
#[derive(Debug)]
pub struct PipelineCounters {
    /// Messages scored for a user.
    pub messages_scored: AtomicU64,
    /// Observations integrated by the learner.
    pub observations_learned: AtomicU64,
    /// Earlier observations unlearned before their replacement.
    pub observations_replaced: AtomicU64,
    /// Entries created by integration.
    pub entries_created: AtomicU64,
    /// Entries updated by integration.
    pub entries_updated: AtomicU64,
    /// Entries deleted (integration or cleanup).
    pub entries_deleted: AtomicU64,
    /// Entries adopted through directed adaptation.
    pub entries_adapted: AtomicU64,
    /// Collaborative predictions that came out NaN.
    pub nan_predictions: AtomicU64,
    /// Missing data resolved to a neutral value.
    pub missing_data_recovered: AtomicU64,
    /// Similarity cache hits.
    pub cache_hits: AtomicU64,
    /// Similarity cache misses (including expired entries).
    pub cache_misses: AtomicU64,
}

impl PipelineCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages_scored: AtomicU64::new(0),
            observations_learned: AtomicU64::new(0),
            observations_replaced: AtomicU64::new(0),
            entries_created: AtomicU64::new(0),
            entries_updated: AtomicU64::new(0),
            entries_deleted: AtomicU64::new(0),
            entries_adapted: AtomicU64::new(0),
            nan_predictions: AtomicU64::new(0),
            missing_data_recovered: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            messages_scored: self.messages_scored.load(Ordering::Relaxed),
            observations_learned: self.observations_learned.load(Ordering::Relaxed),
            observations_replaced: self.observations_replaced.load(Ordering::Relaxed),
            entries_created: self.entries_created.load(Ordering::Relaxed),
            entries_updated: self.entries_updated.load(Ordering::Relaxed),
            entries_deleted: self.entries_deleted.load(Ordering::Relaxed),
            entries_adapted: self.entries_adapted.load(Ordering::Relaxed),
            nan_predictions: self.nan_predictions.load(Ordering::Relaxed),
            missing_data_recovered: self.missing_data_recovered.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Messages scored.
    pub messages_scored: u64,
    /// Observations learned.
    pub observations_learned: u64,
    /// Observations replaced.
    pub observations_replaced: u64,
    /// Entries created.
    pub entries_created: u64,
    /// Entries updated.
    pub entries_updated: u64,
    /// Entries deleted.
    pub entries_deleted: u64,
    /// Entries adapted.
    pub entries_adapted: u64,
    /// NaN collaborative predictions.
    pub nan_predictions: u64,
    /// Recovered missing data.
    pub missing_data_recovered: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let series: [(&str, &str, u64); 11] = [
            ("messages_scored", "Messages scored for a user", self.messages_scored),
            ("observations_learned", "Observations integrated", self.observations_learned),
            ("observations_replaced", "Observations unlearned before replacement", self.observations_replaced),
            ("entries_created", "User model entries created", self.entries_created),
            ("entries_updated", "User model entries updated", self.entries_updated),
            ("entries_deleted", "User model entries deleted", self.entries_deleted),
            ("entries_adapted", "User model entries adopted from similar users", self.entries_adapted),
            ("nan_predictions", "Collaborative predictions without a value", self.nan_predictions),
            ("missing_data_recovered", "Missing data resolved to a neutral value", self.missing_data_recovered),
            ("cache_hits", "Similarity cache hits", self.cache_hits),
            ("cache_misses", "Similarity cache misses", self.cache_misses),
        ];
        let mut out = String::new();
        for (name, help, value) in series {
            out.push_str(&format!(
                "# HELP attune_{name}_total {help}\n\
                 # TYPE attune_{name}_total counter\n\
                 attune_{name}_total {value}\n"
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tracing Span Names
// ---------------------------------------------------------------------------

/// Span names used with `tracing` spans.
pub mod spans {
    /// One scorer chain run.
    pub const SCORE: &str = "attune::score";
    /// One learner chain run.
    pub const LEARN: &str = "attune::learn";
    /// One command chain stage.
    pub const STAGE: &str = "attune::chain::stage";
    /// Collaborative computer run.
    pub const COLLABORATIVE: &str = "attune::collaborative";
    /// Directed adaptation.
    pub const ADAPT: &str = "attune::adapt";
    /// Cleanup pass.
    pub const CLEANUP: &str = "attune::cleanup";
}

/// Install a global `fmt` subscriber at the configured log level.
/// `RUST_LOG` directives take precedence when set.
///
/// Returns `false` if a global subscriber was already installed.
///
/// # Errors
/// Returns `AttuneError::Config` for an unknown log level.
#[cfg(feature = "subscriber")]
pub fn init_tracing(config: &crate::config::GeneralConfig) -> crate::error::Result<bool> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::filter::LevelFilter;

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level()?).into())
        .from_env_lossy();
    Ok(tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok())
}
