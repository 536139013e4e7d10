//! `DownloaderConfig` (spec §4.5.1), with a conservative profile and
//! `from_env` reading `PKGCORE_*` variables, following the teacher's
//! `RetryPolicy::from_env` convention.

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchPriority {
    Low,
    Normal,
    Critical,
}

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub absolute_target_path: PathBuf,
    pub initial_url: Url,
    /// Ordered list of local archives that may donate bytes during init
    /// (spec §4.5.2 step f).
    pub populate_packages: Vec<PathBuf>,
    /// Hard ceiling on a single HTTP range request. Default 1 MiB.
    pub upper_bound_max_bytes_per_request: u64,
    /// Bytes of unrequested data between two entries that may still be
    /// folded into one coalesced run (spec §4.5.3 step 3).
    pub max_redownload_overflow_bytes: u64,
    pub default_fetch_priority: FetchPriority,
    /// If set, a cancelled in-flight HTTP range is still allowed to
    /// complete and commit its bytes (spec §4.5.4); this flag only affects
    /// whether a *not-yet-started* request is retried on transient failure.
    pub resend_on_failure: bool,
    pub retry_policy: RetryPolicy,
    /// Per-domain request budget (spec §4.8). `None` disables throttling.
    pub domain_request_budget: Option<DomainBudgetConfig>,
    pub ignore_domain_request_budget: bool,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct DomainBudgetConfig {
    pub capacity: u32,
    pub refill_interval: Duration,
}

impl DownloaderConfig {
    /// A conservative profile: 256 KiB requests, grounded on spec.md
    /// §4.5.1's "256 KiB in a conservative profile".
    pub fn conservative(absolute_target_path: PathBuf, initial_url: Url) -> Self {
        Self {
            upper_bound_max_bytes_per_request: 256 * 1024,
            ..Self::new(absolute_target_path, initial_url)
        }
    }

    pub fn new(absolute_target_path: PathBuf, initial_url: Url) -> Self {
        Self {
            absolute_target_path,
            initial_url,
            populate_packages: Vec::new(),
            upper_bound_max_bytes_per_request: 1024 * 1024,
            max_redownload_overflow_bytes: 64 * 1024,
            default_fetch_priority: FetchPriority::Normal,
            resend_on_failure: true,
            retry_policy: RetryPolicy::default(),
            domain_request_budget: None,
            ignore_domain_request_budget: false,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Override fields from `PKGCORE_*` environment variables where set,
    /// following `cascette-protocol/src/retry.rs::RetryPolicy::from_env`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PKGCORE_MAX_BYTES_PER_REQUEST") {
            if let Ok(parsed) = v.parse() {
                self.upper_bound_max_bytes_per_request = parsed;
            }
        }
        if let Ok(v) = std::env::var("PKGCORE_MAX_REDOWNLOAD_OVERFLOW_BYTES") {
            if let Ok(parsed) = v.parse() {
                self.max_redownload_overflow_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var("PKGCORE_IGNORE_DOMAIN_REQUEST_BUDGET") {
            self.ignore_domain_request_budget = v == "1" || v.eq_ignore_ascii_case("true");
        }
        self.retry_policy.apply_env_overrides();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservative_profile_uses_smaller_ceiling() {
        let url = Url::parse("https://cdn.example.test/archive.sar").unwrap();
        let config = DownloaderConfig::conservative(PathBuf::from("/tmp/target.sar"), url);
        assert_eq!(config.upper_bound_max_bytes_per_request, 256 * 1024);
    }
}
