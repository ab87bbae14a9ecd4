//! Retry policy for forwarding operations.
//!
//! Maps the number of failed cycles of a resource set to the time it has to
//! wait before the next attempt, using a fixed table whose last entry repeats
//! for every later retry.

use std::time::{Duration, SystemTime};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Longest wait a retry table may hold: 30 days
pub const MAX_RETRY_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Wait before each retry, in seconds, indexed by retry count.
    ///
    /// Retry counts past the end of the table reuse the last value.
    ///
    /// Default: `[60, 120, 300, 1800, 3600]`
    #[serde(default = "defaults::intervals_secs")]
    pub intervals_secs: Vec<u64>,

    /// Jitter factor for randomizing the scheduled retry time.
    ///
    /// The wait is randomized within ±`jitter_factor`. Spreads out retries of
    /// sets that failed together, e.g. when a destination went down.
    ///
    /// Default: 0.0 (no jitter)
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            intervals_secs: defaults::intervals_secs(),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_intervals(intervals_secs: Vec<u64>) -> Self {
        Self {
            intervals_secs,
            jitter_factor: 0.0,
        }
    }

    /// Check that the table is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is empty, not ascending or holds a wait
    /// longer than [`MAX_RETRY_INTERVAL_SECS`], or if the jitter factor is
    /// outside `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intervals_secs.is_empty() {
            return Err(ConfigError::EmptyRetryTable);
        }

        if self.intervals_secs.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::UnorderedRetryTable(self.intervals_secs.clone()));
        }

        if let Some(&longest) = self.intervals_secs.last()
            && longest > MAX_RETRY_INTERVAL_SECS
        {
            return Err(ConfigError::RetryIntervalTooLong(longest));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitter(self.jitter_factor));
        }

        Ok(())
    }

    /// How long to wait after the failed cycle numbered `retry_count` (0-indexed).
    ///
    /// Pure: no jitter is applied here.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let index = usize::try_from(retry_count)
            .unwrap_or(usize::MAX)
            .min(self.intervals_secs.len().saturating_sub(1));

        Duration::from_secs(self.intervals_secs.get(index).copied().unwrap_or_default())
    }

    /// The longest wait this policy ever schedules (before jitter)
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.intervals_secs.last().copied().unwrap_or_default())
    }

    /// When the next attempt may start, counted from `now`.
    ///
    /// The wait is capped at [`MAX_RETRY_INTERVAL_SECS`] (plus jitter) and
    /// never overflows the clock.
    #[must_use]
    pub fn next_retry_at(&self, retry_count: u32, now: SystemTime) -> SystemTime {
        let delay = self
            .delay_for(retry_count)
            .min(Duration::from_secs(MAX_RETRY_INTERVAL_SECS));

        now.checked_add(self.jittered(delay))
            .or_else(|| now.checked_add(delay))
            .unwrap_or(now)
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        let secs = delay.as_secs() as f64;
        let jitter_range = secs * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

        Duration::from_secs((secs + jitter).max(0.0) as u64)
    }
}

mod defaults {
    pub fn intervals_secs() -> Vec<u64> {
        vec![60, 120, 300, 1800, 3600]
    }
}
