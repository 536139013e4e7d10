//! Per-domain request budget (spec §4.8): a token bucket keyed by HTTP
//! origin, refilling one unit per configured interval. Generalises the same
//! shape [`crate::retry::RetryPolicy`] uses for backoff, per
//! SPEC_FULL.md's note that this is new versus the teacher.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::DomainBudgetConfig;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: DomainBudgetConfig) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            capacity: f64::from(config.capacity),
            refill_per_sec: 1.0 / config.refill_interval.as_secs_f64().max(f64::EPSILON),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Tracks one token bucket per HTTP origin (`scheme://host:port`).
pub struct DomainBudgetTracker {
    config: DomainBudgetConfig,
    buckets: DashMap<String, Bucket>,
}

impl DomainBudgetTracker {
    pub fn new(config: DomainBudgetConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn origin_key(url: &Url) -> String {
        format!(
            "{}://{}:{}",
            url.scheme(),
            url.host_str().unwrap_or(""),
            url.port_or_known_default().unwrap_or(0)
        )
    }

    /// Attempt to consume one unit of budget for `url`'s origin. Returns
    /// `true` if the request may proceed now.
    pub fn try_acquire(&self, url: &Url) -> bool {
        let key = Self::origin_key(url);
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(self.config));
        bucket.try_take()
    }

    /// How long until at least one token will be available for `url`'s
    /// origin, used by the scheduler to set a request's "not before" time
    /// (spec §4.8: "Earliest-send time").
    pub fn time_until_available(&self, url: &Url) -> Duration {
        let key = Self::origin_key(url);
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(self.config));
        bucket.refill();
        if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let deficit = 1.0 - bucket.tokens;
            Duration::from_secs_f64(deficit / bucket.refill_per_sec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_refills() {
        let tracker = DomainBudgetTracker::new(DomainBudgetConfig {
            capacity: 2,
            refill_interval: Duration::from_millis(10),
        });
        let url = Url::parse("https://cdn.example.test/a").unwrap();

        assert!(tracker.try_acquire(&url));
        assert!(tracker.try_acquire(&url));
        assert!(!tracker.try_acquire(&url));

        std::thread::sleep(Duration::from_millis(25));
        assert!(tracker.try_acquire(&url));
    }

    #[test]
    fn distinct_origins_have_independent_budgets() {
        let tracker = DomainBudgetTracker::new(DomainBudgetConfig {
            capacity: 1,
            refill_interval: Duration::from_secs(60),
        });
        let a = Url::parse("https://a.example.test/x").unwrap();
        let b = Url::parse("https://b.example.test/x").unwrap();

        assert!(tracker.try_acquire(&a));
        assert!(!tracker.try_acquire(&a));
        assert!(tracker.try_acquire(&b));
    }
}
