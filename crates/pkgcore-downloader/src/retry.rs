//! Exponential backoff with jitter (spec §4.8), grounded on
//! `cascette-protocol/src/retry.rs::RetryPolicy`. Reused as-is by
//! `pkgcore-save`'s cloud client.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 1.5,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PKGCORE_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                self.max_attempts = parsed;
            }
        }
        if let Ok(v) = std::env::var("PKGCORE_RETRY_BACKOFF_MS") {
            if let Ok(parsed) = v.parse() {
                self.initial_backoff = Duration::from_millis(parsed);
            }
        }
        if let Ok(v) = std::env::var("PKGCORE_BACKOFF_MULTIPLIER") {
            if let Ok(parsed) = v.parse() {
                self.multiplier = parsed;
            }
        }
    }

    /// Backoff duration for the `attempt`-th consecutive failure (0-based),
    /// with jitter applied uniformly within ±50% of the computed interval
    /// (spec §4.8: "Jitter is applied uniformly within ±50% of the
    /// interval").
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let unjittered = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let unjittered = unjittered.min(self.max_backoff.as_secs_f64());

        let jittered = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            unjittered * factor
        } else {
            unjittered
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempt_and_caps_at_max() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        let first = policy.backoff_for_attempt(0);
        let second = policy.backoff_for_attempt(1);
        assert!(second > first);

        let huge = policy.backoff_for_attempt(100);
        assert!(huge <= policy.max_backoff);
    }

    #[test]
    fn jitter_stays_within_half_interval() {
        let policy = RetryPolicy::default();
        let base = policy.initial_backoff.as_secs_f64();
        for _ in 0..50 {
            let sample = policy.backoff_for_attempt(0).as_secs_f64();
            assert!(sample >= base * 0.5 - 1e-6);
            assert!(sample <= base * 1.5 + 1e-6);
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
