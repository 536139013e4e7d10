//! State shared between the `PackageDownloader` handle and its background
//! worker task, held behind an `Arc` (spec §4.5, §5: "a single writer owns
//! the target file; readers only ever see monotonically-increasing
//! presence").

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use pkgcore_archive::{FileTable, PackageFileHeader};

use crate::config::DownloaderConfig;
use crate::domain_budget::DomainBudgetTracker;
use crate::error::DownloaderResult;
use crate::http_client::RangeClient;
use crate::presence::PresenceMap;
use crate::state::StateMachine;
use crate::stats::DownloaderStats;
use crate::token::CancellationToken;

/// Parsed metadata for the archive currently being materialised on disk.
/// Populated once init completes (spec §4.5.2); absent before that.
pub struct ArchiveMeta {
    pub header: PackageFileHeader,
    pub file_table: FileTable,
    pub dictionary: Option<Vec<u8>>,
}

pub struct Shared {
    pub config: DownloaderConfig,
    pub range_client: RangeClient,
    pub presence: PresenceMap,
    pub stats: DownloaderStats,
    pub domain_budget: Option<DomainBudgetTracker>,
    pub state: Mutex<StateMachine>,
    pub archive: RwLock<Option<ArchiveMeta>>,
    /// Cancellation token of the fetch currently being executed by the
    /// worker, if any (spec §4.5.4: `BlockingCancelAll` cancels the
    /// in-flight request and waits for it to finish).
    pub current_cancel: Mutex<Option<CancellationToken>>,
}

impl Shared {
    pub fn new(config: DownloaderConfig) -> DownloaderResult<Arc<Self>> {
        let range_client = RangeClient::new(config.request_timeout)?;
        let domain_budget = if config.ignore_domain_request_budget {
            None
        } else {
            config.domain_request_budget.map(DomainBudgetTracker::new)
        };

        Ok(Arc::new(Self {
            config,
            range_client,
            presence: PresenceMap::new(),
            stats: DownloaderStats::new(),
            domain_budget,
            state: Mutex::new(StateMachine::new()),
            archive: RwLock::new(None),
            current_cancel: Mutex::new(None),
        }))
    }
}
