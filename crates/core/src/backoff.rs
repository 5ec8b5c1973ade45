//! Retry backoff: capped exponential delay with multiplicative jitter.

use chrono::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry delay policy.
///
/// `delay(attempt) = min(cap, round(base * 2^(attempt-1)))`, then scaled by
/// `1 + U(-jitter, jitter)` and floored at one second. `attempt` is the
/// 1-indexed retry about to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Base delay in seconds
    pub base_secs: u64,
    /// Upper bound (before jitter) in seconds
    pub cap_secs: u64,
    /// Jitter fraction in `[0, 1)`
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_secs: 5,
            cap_secs: 300,
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Lower bound applied after jitter.
    pub const MIN_DELAY_SECS: f64 = 1.0;

    pub fn new(base_secs: u64, cap_secs: u64, jitter: f64) -> Self {
        Self {
            base_secs,
            cap_secs,
            jitter,
        }
    }

    /// Un-jittered delay in whole seconds.
    pub fn base_delay_secs(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(62) as i32;
        let raw = (self.base_secs as f64 * 2f64.powi(exp)).round();
        if raw >= self.cap_secs as f64 {
            self.cap_secs
        } else {
            raw as u64
        }
    }

    /// Jittered delay, millisecond precision.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay_secs(attempt) as f64;
        let factor = if self.jitter > 0.0 {
            1.0 + rng.gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        let secs = (base * factor).max(Self::MIN_DELAY_SECS);
        Duration::try_milliseconds((secs * 1000.0).round() as i64).unwrap_or(Duration::MAX)
    }
}
