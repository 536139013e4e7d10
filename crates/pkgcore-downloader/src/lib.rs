//! `PackageDownloader` (spec §4.5): incrementally materialises a remote
//! `.sar` archive onto local disk, byte range by byte range, behind a
//! single background worker that owns all writes to the target file (spec
//! §5). Grounded on `cascette-protocol/src/cdn/streaming/pool.rs`'s
//! dedicated background task and `cascette-protocol/src/archive_client.rs`'s
//! retry-with-backoff request shape; the worker here is a `tokio` task
//! draining an `mpsc` request queue rather than a pool of connections,
//! since there is exactly one writer and one target file.

mod config;
mod domain_budget;
mod error;
mod http_client;
mod planner;
mod populate;
mod presence;
mod retry;
mod shared;
mod state;
mod stats;
mod token;
mod worker;

pub use config::{DomainBudgetConfig, DownloaderConfig, FetchPriority};
pub use error::{DownloaderError, DownloaderResult};
pub use retry::RetryPolicy;
pub use state::DownloaderState;
pub use token::CancellationToken;

use std::collections::HashMap;
use std::sync::Arc;

use pkgcore_archive::{EntryCheckResult, PackageArchive};
use pkgcore_types::FilePath;
use tokio::sync::{mpsc, oneshot};

use shared::Shared;

enum WorkerRequest {
    Init {
        reply: oneshot::Sender<DownloaderResult<()>>,
    },
    Fetch {
        files: Option<Vec<FilePath>>,
        cancel: CancellationToken,
        reply: oneshot::Sender<DownloaderResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A handle to a single in-flight fetch/prefetch request (spec §4.5.4): the
/// caller may cancel it without interrupting an HTTP range already
/// underway, or await its completion.
pub struct FetchHandle {
    cancel: CancellationToken,
    completion: oneshot::Receiver<DownloaderResult<()>>,
}

impl FetchHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block the calling (async) context until the fetch completes.
    pub async fn join(self) -> DownloaderResult<()> {
        self.completion.await.map_err(|_| DownloaderError::WorkerGone)?
    }
}

/// Incrementally materialises a remote archive on disk. Cheaply `Clone`:
/// every clone shares the same background worker and on-disk target.
#[derive(Clone)]
pub struct PackageDownloader {
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<WorkerRequest>,
}

impl PackageDownloader {
    /// Construct a downloader and spawn its background worker, but do not
    /// block on initialisation (spec §6.4: construction returns
    /// immediately; `is_initialization_complete` polls progress).
    pub fn new(mut config: DownloaderConfig) -> DownloaderResult<Self> {
        config.apply_env_overrides();
        let shared = Shared::new(config)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let worker_shared = shared.clone();
        tokio::spawn(run_worker(worker_shared, rx));

        let downloader = Self {
            shared,
            requests: tx,
        };
        downloader.begin_initialisation();
        Ok(downloader)
    }

    fn begin_initialisation(&self) {
        let (reply_tx, _reply_rx) = oneshot::channel();
        let _ = self.requests.send(WorkerRequest::Init { reply: reply_tx });
    }

    /// Spec §6.4: `true` once init has run to completion (successfully or
    /// not — check [`Self::is_ok`] to distinguish).
    pub fn is_initialization_complete(&self) -> bool {
        matches!(
            self.shared.state.lock().state(),
            DownloaderState::Ready | DownloaderState::Fetching | DownloaderState::Prefetching
        )
    }

    /// `true` if initialisation completed without a sticky write failure.
    pub fn is_ok(&self) -> bool {
        self.is_initialization_complete() && !self.has_experienced_write_failure()
    }

    pub fn has_experienced_write_failure(&self) -> bool {
        self.shared.state.lock().has_experienced_write_failure()
    }

    pub fn has_work(&self) -> bool {
        let archive = self.shared.archive.read();
        match archive.as_ref() {
            Some(meta) => meta
                .file_table
                .iter()
                .any(|(path, _)| !self.shared.presence.is_present(path)),
            None => false,
        }
    }

    /// Request `files` be materialised on disk (`None` = the whole
    /// archive), returning immediately with a handle to observe or cancel
    /// the fetch (spec §4.5.4, §6.4).
    pub fn fetch(&self, files: Option<Vec<FilePath>>) -> FetchHandle {
        self.submit_fetch(files)
    }

    /// Same as [`Self::fetch`] but semantically lower priority; priority
    /// itself is advisory bookkeeping only (spec §4.5.1: `default_fetch_priority`
    /// informs scheduling order, not correctness) — both paths share the
    /// same worker queue.
    pub fn prefetch(&self, files: Option<Vec<FilePath>>) -> FetchHandle {
        self.submit_fetch(files)
    }

    fn submit_fetch(&self, files: Option<Vec<FilePath>>) -> FetchHandle {
        let cancel = CancellationToken::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = WorkerRequest::Fetch {
            files,
            cancel: cancel.clone(),
            reply: reply_tx,
        };
        if self.requests.send(request).is_err() {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Err(DownloaderError::WorkerGone));
            return FetchHandle {
                cancel,
                completion: rx,
            };
        }
        FetchHandle {
            cancel,
            completion: reply_rx,
        }
    }

    /// Cancel the fetch currently executing, then wait for the worker to
    /// finish it (spec §4.5.4: "waits for any in-flight request to finish,
    /// then drains all callbacks as cancelled"). The in-flight HTTP range
    /// itself still completes; only requests not yet started are actually
    /// skipped.
    pub async fn blocking_cancel_all(&self) {
        if let Some(token) = self.shared.current_cancel.lock().clone() {
            token.cancel();
        }
        while matches!(
            self.shared.state.lock().state(),
            DownloaderState::Fetching | DownloaderState::Prefetching
        ) {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    pub async fn shutdown(self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.requests.send(WorkerRequest::Shutdown { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
    }

    pub fn exists(&self, path: &FilePath) -> bool {
        self.shared
            .archive
            .read()
            .as_ref()
            .is_some_and(|meta| meta.file_table.get(path).is_some())
    }

    pub fn file_size(&self, path: &FilePath) -> Option<u64> {
        self.shared
            .archive
            .read()
            .as_ref()
            .and_then(|meta| meta.file_table.get(path).map(|row| row.entry.uncompressed_size))
    }

    pub fn modified_time(&self, path: &FilePath) -> Option<u64> {
        self.shared
            .archive
            .read()
            .as_ref()
            .and_then(|meta| meta.file_table.get(path).map(|row| row.entry.modified_time))
    }

    /// `true` if the network could still serve `path` (i.e. it is a known
    /// entry, regardless of current presence).
    pub fn is_serviced_by_network(&self, path: &FilePath) -> bool {
        self.exists(path)
    }

    /// Read `path`'s logical contents, fetching it first (synchronously
    /// from this async method's perspective) if not yet present (spec
    /// §4.5.5: "behaves like a `PackageArchive` read once backed by the
    /// target file").
    pub async fn read_all(&self, path: &FilePath) -> DownloaderResult<Vec<u8>> {
        if !self.shared.presence.is_present(path) {
            self.fetch(Some(vec![path.clone()])).join().await?;
        }
        let archive = PackageArchive::open(&self.shared.config.absolute_target_path)?;
        Ok(archive.read_all(path)?)
    }

    /// Open and CRC-verify the entries named in `subset` (or the whole
    /// table if `None`), re-checked against the on-disk archive (spec §4.4,
    /// reused by the downloader per §4.5.6) but with downloader-specific
    /// subset semantics (spec §8 Open Questions, resolved in
    /// `SPEC_FULL.md`): an entry outside `subset` is reported `Ok` without
    /// re-reading only if it is already verified present; an outside-subset
    /// entry never verified present is `NotPresent` rather than `Ok`, since
    /// "ok without re-reading" cannot describe bytes never checked.
    pub fn perform_crc32_check(
        &self,
        subset: Option<&[FilePath]>,
    ) -> DownloaderResult<(bool, HashMap<FilePath, EntryCheckResult>)> {
        let archive = PackageArchive::open(&self.shared.config.absolute_target_path)?;
        let (archive_ok, archive_report) = archive.perform_crc32_check(subset)?;

        let Some(subset) = subset else {
            return Ok((archive_ok, archive_report));
        };

        let mut all_ok = true;
        let mut report = HashMap::with_capacity(archive_report.len());
        for (path, result) in archive_report {
            let requested = subset.contains(&path);
            let result = if requested {
                result
            } else if self.shared.presence.is_present(&path) {
                EntryCheckResult::Ok
            } else {
                EntryCheckResult::NotPresent
            };
            if !matches!(result, EntryCheckResult::Ok) {
                all_ok = false;
            }
            report.insert(path, result);
        }

        Ok((all_ok, report))
    }

    /// Snapshot the entries the remote archive declares, independent of
    /// local presence.
    pub fn get_file_table(&self) -> Vec<FilePath> {
        self.shared
            .archive
            .read()
            .as_ref()
            .map(|meta| meta.file_table.iter().map(|(path, _)| path.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get_stats(&self) -> HashMap<String, u64> {
        self.shared.stats.snapshot()
    }
}

impl pkgcore_types::FsCapabilities for PackageDownloader {
    fn kind(&self) -> pkgcore_types::FileSystemKind {
        pkgcore_types::FileSystemKind::PackageDownloader
    }

    fn exists(&self, path: &FilePath) -> bool {
        Self::exists(self, path)
    }

    fn file_size(&self, path: &FilePath) -> Option<u64> {
        Self::file_size(self, path)
    }

    fn modified_time(&self, path: &FilePath) -> Option<std::time::SystemTime> {
        Self::modified_time(self, path).map(|secs| std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }

    fn supports_directory_queries(&self) -> bool {
        self.shared
            .archive
            .read()
            .as_ref()
            .is_some_and(|meta| meta.header.flags.supports_directory_queries)
    }

    fn is_serviced_by_network(&self, path: &FilePath) -> bool {
        Self::is_serviced_by_network(self, path)
    }
}

async fn run_worker(shared: Arc<Shared>, mut requests: mpsc::UnboundedReceiver<WorkerRequest>) {
    while let Some(request) = requests.recv().await {
        match request {
            WorkerRequest::Init { reply } => {
                let _ = shared.state.lock().transition_to(state::DownloaderState::Initialising);
                let result = worker::init(&shared).await;
                match &result {
                    Ok(()) => {
                        let _ = shared.state.lock().transition_to(state::DownloaderState::Ready);
                    }
                    Err(e) if e.is_sticky() => {
                        shared.state.lock().mark_write_failure();
                    }
                    Err(_) => {
                        let _ = shared.state.lock().transition_to(state::DownloaderState::Unstarted);
                    }
                }
                let _ = reply.send(result);
            }
            WorkerRequest::Fetch { files, cancel, reply } => {
                *shared.current_cancel.lock() = Some(cancel.clone());
                let _ = shared.state.lock().transition_to(state::DownloaderState::Fetching);

                let result = worker::execute_fetch(&shared, files.as_deref(), &cancel).await;

                *shared.current_cancel.lock() = None;
                let _ = shared.state.lock().transition_to(state::DownloaderState::Ready);
                let _ = reply.send(result);
            }
            WorkerRequest::Shutdown { reply } => {
                let _ = reply.send(());
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateMachine;
    use std::time::Duration;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn fresh_state_machine_starts_unstarted() {
        assert_eq!(StateMachine::new().state(), DownloaderState::Unstarted);
    }

    #[tokio::test]
    async fn downloader_reaches_ready_after_construction() {
        let server = MockServer::start().await;
        let serving = std::sync::Arc::new(sample_empty_archive_bytes());
        Mock::given(method("GET"))
            .and(path_regex(".*"))
            .respond_with(move |req: &wiremock::Request| {
                let range = req.headers.get("Range").unwrap().to_str().unwrap();
                let range_values = range.strip_prefix("bytes=").unwrap();
                let (begin_str, end_str) = range_values.split_once('-').unwrap();
                let begin: usize = begin_str.parse().unwrap();
                let end_inclusive: usize = end_str.parse().unwrap();
                let slice = &serving[begin..=end_inclusive];
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {begin}-{end_inclusive}/{}", serving.len()),
                    )
                    .set_body_bytes(slice.to_vec())
            })
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = url::Url::parse(&format!("{}/archive.sar", server.uri())).unwrap();
        let config = DownloaderConfig::new(tmp.path().join("target.sar"), url);
        let downloader = PackageDownloader::new(config).unwrap();

        for _ in 0..50 {
            if downloader.is_initialization_complete() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(downloader.is_initialization_complete());
        assert!(downloader.is_ok());

        use pkgcore_types::FsCapabilities;
        assert_eq!(downloader.kind(), pkgcore_types::FileSystemKind::PackageDownloader);
        assert!(downloader.supports_directory_queries());
    }

    #[tokio::test]
    async fn crc32_check_reports_not_present_outside_subset_when_unverified() {
        use pkgcore_archive::{ArchiveVersion, HeaderFlags, PackageFileEntry, PackageFileHeader, HEADER_SIZE};
        use pkgcore_codec::crc32;
        use pkgcore_obfuscate::ObfuscationKey;
        use pkgcore_types::GameDirectory;

        let entry_of = |relative_path: &str, offset: u64, content: &[u8]| {
            let key = ObfuscationKey::for_path(relative_path);
            let mut obfuscated = content.to_vec();
            key.apply_xor(&mut obfuscated, 0);
            let entry = PackageFileEntry {
                offset,
                compressed_size: obfuscated.len() as u64,
                uncompressed_size: content.len() as u64,
                modified_time: 1_700_000_000,
                crc32_pre: crc32(&obfuscated),
                crc32_post: crc32(content),
            };
            (obfuscated, entry)
        };

        let (a_bytes, a_entry) = entry_of("a.json", HEADER_SIZE as u64, b"{\"a\":1}");
        let b_offset = HEADER_SIZE as u64 + a_bytes.len() as u64;
        let (b_bytes, b_entry) = entry_of("b.json", b_offset, b"{\"b\":2}");

        let plain_table = pkgcore_archive::FileTable::build_entries_bytes(&[
            ("a.json".to_string(), a_entry),
            ("b.json".to_string(), b_entry),
        ]);
        let table_region = pkgcore_archive::FileTable::obfuscate_region(&plain_table, 19, 42, false, true);
        let offset_to_file_table = b_offset + b_bytes.len() as u64;

        let header = PackageFileHeader {
            version: ArchiveVersion(20),
            platform_tag: 0,
            obfuscated: true,
            flags: HeaderFlags {
                compressed_file_table: false,
                has_compression_dict: false,
                supports_directory_queries: true,
                has_post_crc32: true,
            },
            game_directory_tag: 0,
            build_version_major: 19,
            build_changelist: 42,
            total_package_size: offset_to_file_table + table_region.len() as u64,
            offset_to_file_table,
            size_of_file_table: (table_region.len() - 4) as u32,
            total_entries_in_file_table: 2,
        };

        let mut archive_bytes = header.serialize();
        archive_bytes.extend_from_slice(&a_bytes);
        archive_bytes.extend_from_slice(&b_bytes);
        archive_bytes.extend_from_slice(&table_region);

        let server = MockServer::start().await;
        let serving = std::sync::Arc::new(archive_bytes);
        let server_copy = serving.clone();
        Mock::given(method("GET"))
            .and(path_regex(".*"))
            .respond_with(move |req: &wiremock::Request| {
                let range = req.headers.get("Range").unwrap().to_str().unwrap();
                let range_values = range.strip_prefix("bytes=").unwrap();
                let (begin_str, end_str) = range_values.split_once('-').unwrap();
                let begin: usize = begin_str.parse().unwrap();
                let end_inclusive: usize = end_str.parse().unwrap();
                let slice = &server_copy[begin..=end_inclusive];
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {begin}-{end_inclusive}/{}", server_copy.len()),
                    )
                    .set_body_bytes(slice.to_vec())
            })
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = url::Url::parse(&format!("{}/archive.sar", server.uri())).unwrap();
        let config = DownloaderConfig::new(tmp.path().join("target.sar"), url);
        let downloader = PackageDownloader::new(config).unwrap();

        for _ in 0..50 {
            if downloader.is_initialization_complete() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(downloader.is_ok());

        let a_path = FilePath::from_relative_path(GameDirectory::Content, "a.json");
        let b_path = FilePath::from_relative_path(GameDirectory::Content, "b.json");

        // Neither entry has been fetched/verified yet: the init sweep only
        // marks entries present whose on-disk bytes already match, and the
        // target file was created fresh (zero-filled) by this cold init.
        let (ok, report) = downloader.perform_crc32_check(Some(&[a_path.clone()])).unwrap();
        assert!(!ok);
        assert_eq!(report.get(&a_path), Some(&pkgcore_archive::EntryCheckResult::Mismatch));
        assert_eq!(report.get(&b_path), Some(&pkgcore_archive::EntryCheckResult::NotPresent));

        downloader.fetch(Some(vec![b_path.clone()])).join().await.unwrap();
        let (_, report) = downloader.perform_crc32_check(Some(&[a_path.clone()])).unwrap();
        assert_eq!(report.get(&b_path), Some(&pkgcore_archive::EntryCheckResult::Ok));
    }

    /// A minimal, self-consistent archive with an empty file table (just a
    /// header plus a trailing table CRC32), used only to exercise the
    /// init→Ready transition.
    fn sample_empty_archive_bytes() -> Vec<u8> {
        use pkgcore_archive::{ArchiveVersion, HeaderFlags, PackageFileHeader, HEADER_SIZE};
        use pkgcore_codec::crc32;

        let table_crc = crc32(&[]);

        let header = PackageFileHeader {
            version: ArchiveVersion(20),
            platform_tag: 0,
            obfuscated: true,
            flags: HeaderFlags {
                compressed_file_table: false,
                has_compression_dict: false,
                supports_directory_queries: true,
                has_post_crc32: true,
            },
            game_directory_tag: 0,
            build_version_major: 1,
            build_changelist: 1,
            total_package_size: HEADER_SIZE as u64 + 4,
            offset_to_file_table: HEADER_SIZE as u64,
            size_of_file_table: 0,
            total_entries_in_file_table: 0,
        };

        let mut bytes = header.serialize();
        bytes.extend_from_slice(&table_crc.to_le_bytes());
        bytes
    }
}
