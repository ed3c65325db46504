//! Callback retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do after a failed delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after this delay
    RetryAfter(Duration),
    /// Stop; the job is exhausted
    GiveUp,
}

/// Exponential backoff bounded by an attempt budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first. `0` means unlimited.
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay
    pub max_backoff_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Decide after `attempts` failed attempts (1-based).
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if self.max_attempts != 0 && attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.backoff(attempts))
    }

    /// Delay before the attempt following `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(63) as i32;
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let raw = self.initial_backoff_ms as f64 * multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Check the policy is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "initial backoff {}ms exceeds max backoff {}ms",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("backoff multiplier {} must be >= 1", self.multiplier));
        }
        Ok(())
    }
}
