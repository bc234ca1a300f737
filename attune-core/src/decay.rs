//! Exponential time decay.
//!
//! Converts an elapsed interval into a multiplicative recency weight:
//!
//! ```text
//! decay(t) = e^(-α·t),   α = -ln(0.9) / cutoff
//! ```
//!
//! so that `decay(0) = 1` and `decay(cutoff) = 0.9`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AttuneError, Result};
use crate::types::millis_between;

/// Retention reached exactly at the cutoff interval.
pub const RETENTION_AT_CUTOFF: f64 = 0.9;

/// One day in milliseconds.
pub const DAY_MS: i64 = 86_400_000;

/// Exponential decay calibrated by a cutoff interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayFunction {
    cutoff_ms: i64,
    alpha: f64,
}

impl DecayFunction {
    /// Build a decay function for `cutoff_ms`.
    ///
    /// # Errors
    /// Returns [`AttuneError::Config`] if `cutoff_ms <= 0`.
    pub fn new(cutoff_ms: i64) -> Result<Self> {
        if cutoff_ms <= 0 {
            return Err(AttuneError::Config(format!(
                "decay cutoff must be positive, got {cutoff_ms}ms"
            )));
        }
        #[allow(clippy::cast_precision_loss)]
        let alpha = -RETENTION_AT_CUTOFF.ln() / cutoff_ms as f64;
        Ok(Self { cutoff_ms, alpha })
    }

    /// The calibration interval.
    #[must_use]
    pub fn cutoff_ms(&self) -> i64 {
        self.cutoff_ms
    }

    /// The exponent coefficient α.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Weight in (0, 1] for an interval of `interval_ms`.
    ///
    /// # Errors
    /// Returns [`AttuneError::InvalidArgument`] for a negative interval.
    pub fn decay(&self, interval_ms: i64) -> Result<f64> {
        if interval_ms < 0 {
            return Err(AttuneError::InvalidArgument(format!(
                "decay interval must not be negative, got {interval_ms}ms"
            )));
        }
        #[allow(clippy::cast_precision_loss)]
        let t = interval_ms as f64;
        Ok((-self.alpha * t).exp())
    }

    /// Weight for the time elapsed from `past` to `now`.
    ///
    /// # Errors
    /// Returns [`AttuneError::InvalidArgument`] if `past` lies after `now`.
    pub fn decay_between(&self, past: DateTime<Utc>, now: DateTime<Utc>) -> Result<f64> {
        self.decay(millis_between(past, now))
    }
}
