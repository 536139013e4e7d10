//! Progress/statistics counters (spec §4.5.3), modelled on
//! `cascette-protocol::cdn::streaming::metrics`'s named-counter table for a
//! streaming pool: a `DashMap<&'static str, u64>` rather than a bespoke
//! struct-of-counters, so new event names can be added without touching the
//! downloader's call sites.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const INIT_CDICT_DOWNLOAD_COUNT: &str = "init_cdict_download_count";
pub const INIT_CDICT_DOWNLOAD_BYTES: &str = "init_cdict_download_bytes";
pub const INIT_POPULATE_COUNT: &str = "init_populate_count";
pub const LOOP_DOWNLOAD_COUNT: &str = "loop_download_count";
pub const LOOP_DOWNLOAD_BYTES: &str = "loop_download_bytes";
pub const LOOP_FETCH_SET_COUNT: &str = "loop_fetch_set_count";
pub const LOOP_PROCESS_COUNT: &str = "loop_process_count";

/// Thread-safe named-counter table. Every counter defaults to 0 on first
/// read, so callers never need to pre-register event names.
#[derive(Default)]
pub struct DownloaderStats {
    counters: DashMap<&'static str, AtomicU64>,
}

impl DownloaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &'static str, amount: u64) {
        self.counters
            .entry(name)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_counter_reads_zero() {
        let stats = DownloaderStats::new();
        assert_eq!(stats.get(LOOP_DOWNLOAD_COUNT), 0);
    }

    #[test]
    fn increments_accumulate() {
        let stats = DownloaderStats::new();
        stats.increment(LOOP_DOWNLOAD_COUNT, 1);
        stats.increment(LOOP_DOWNLOAD_COUNT, 1);
        stats.increment(LOOP_DOWNLOAD_BYTES, 4096);
        assert_eq!(stats.get(LOOP_DOWNLOAD_COUNT), 2);
        assert_eq!(stats.get(LOOP_DOWNLOAD_BYTES), 4096);
        assert_eq!(stats.snapshot().len(), 2);
    }
}
