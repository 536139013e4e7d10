//! `SaveLoadServiceConfig` (spec §4.7), following
//! `DownloaderConfig`/`RetryPolicy::from_env`'s `PKGCORE_*` environment
//! override convention.

use std::time::Duration;

use pkgcore_downloader::RetryPolicy;

/// Confirmed per DESIGN.md Open Question 2: the 30 s cloud-save rate limit
/// is per-slot, not process-global.
pub const DEFAULT_CLOUD_SAVE_RATE_LIMIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SaveLoadServiceConfig {
    /// Root directory `DiskSaveApi` stores slot blobs under.
    pub local_root: std::path::PathBuf,
    /// 32-byte AES-CTR key shared by every slot's [`crate::SaveContainer`]
    /// blob (spec §4.1: externally supplied, no ambient state).
    pub encryption_key: [u8; 32],
    /// Minimum interval between cloud saves for the same slot unless
    /// `force_immediate_cloud` is set (spec §4.7).
    pub cloud_save_rate_limit: Duration,
    pub retry_policy: RetryPolicy,
    pub request_timeout: Duration,
}

impl SaveLoadServiceConfig {
    pub fn new(local_root: impl Into<std::path::PathBuf>, encryption_key: [u8; 32]) -> Self {
        Self {
            local_root: local_root.into(),
            encryption_key,
            cloud_save_rate_limit: DEFAULT_CLOUD_SAVE_RATE_LIMIT,
            retry_policy: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Override fields from `PKGCORE_*` environment variables where set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PKGCORE_CLOUD_SAVE_RATE_LIMIT_MS") {
            if let Ok(parsed) = v.parse() {
                self.cloud_save_rate_limit = Duration::from_millis(parsed);
            }
        }
        self.retry_policy.apply_env_overrides();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_limit_is_thirty_seconds() {
        let config = SaveLoadServiceConfig::new("/tmp/saves", [0u8; 32]);
        assert_eq!(config.cloud_save_rate_limit, Duration::from_secs(30));
    }
}
