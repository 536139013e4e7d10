//! `SaveLoadService` (spec §4.7): a single background worker servicing a
//! FIFO of save/load operations per slot, grounded on
//! `SaveLoadManager::WorkerThreadMain`'s dequeue loop and mirroring
//! `pkgcore-downloader`'s worker shape (a dedicated `tokio` task reading an
//! internal queue, spec §5). Unlike the downloader, the queue here is a
//! plain `Mutex<VecDeque<_>>` rather than an `mpsc` channel, because
//! enqueueing a `Save` must be able to scan and drop an earlier, now
//! redundant entry for the same slot (spec §4.7: "redundancy elimination").

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use pkgcore_types::FilePath;
use tokio::sync::{mpsc, oneshot, Notify};
use url::Url;

use crate::cloud::{CloudClient, CloudOutcome};
use crate::config::SaveLoadServiceConfig;
use crate::container::{SaveContainer, SaveFileMetadata};
use crate::error::{SaveError, SaveResult};
use crate::migration::MigrationChain;
use crate::save_api::SaveApi;
use crate::tree::{apply_delta, diff, DataNode};

/// Per-slot runtime state, mutated only by the worker task (spec §5).
#[derive(Clone, Default)]
struct SaveFileState {
    checkpoint: DataNode,
    pending_delta: DataNode,
    metadata: SaveFileMetadata,
    last_cloud_save_at: Option<Instant>,
}

/// Outcome of a `Load` operation (spec §4.7: "deliver `(local_result,
/// cloud_result, final_result, object)`").
#[derive(Debug)]
pub struct LoadOutcome {
    pub local_result: SaveResult<()>,
    pub cloud_result: Option<SaveResult<()>>,
    pub final_result: SaveResult<()>,
    pub data: DataNode,
}

impl LoadOutcome {
    /// The single terminal code for this request (spec §7), derived from
    /// `final_result` rather than duplicated as a separate field.
    pub fn terminal_code(&self) -> pkgcore_types::TerminalCode {
        match &self.final_result {
            Ok(()) => pkgcore_types::TerminalCode::Ok,
            Err(e) => e.terminal_code(),
        }
    }
}

/// Outcome of a `Save` operation.
#[derive(Debug)]
pub struct SaveOutcome {
    pub local_result: SaveResult<()>,
    pub cloud_result: Option<SaveResult<()>>,
    pub final_result: SaveResult<()>,
}

impl SaveOutcome {
    pub fn terminal_code(&self) -> pkgcore_types::TerminalCode {
        match &self.final_result {
            Ok(()) => pkgcore_types::TerminalCode::Ok,
            Err(e) => e.terminal_code(),
        }
    }
}

/// Events posted to a caller-supplied callback channel for main-thread
/// delivery (spec §5: "callers ... receiving callbacks on a designated
/// thread"). There is no engine job system to integrate with here, so this
/// channel is the closest faithful substitute: the caller drains it on
/// whatever task it chooses.
pub enum ServiceEvent {
    Load { slot: FilePath, outcome: LoadOutcome },
    Save { slot: FilePath, outcome: SaveOutcome },
}

/// How a finished operation's outcome reaches its caller: a direct
/// one-shot reply (the default, blocking API) or a shared callback channel
/// (spec §5's main-thread delivery substitute).
enum Delivery<T> {
    Reply(oneshot::Sender<T>),
    Callback(mpsc::UnboundedSender<ServiceEvent>),
}

fn deliver<T>(delivery: Delivery<T>, slot: &FilePath, wrap: impl FnOnce(FilePath, T) -> ServiceEvent, outcome: T) {
    match delivery {
        Delivery::Reply(reply) => {
            let _ = reply.send(outcome);
        }
        Delivery::Callback(tx) => {
            let _ = tx.send(wrap(slot.clone(), outcome));
        }
    }
}

struct LoadRequest {
    slot: FilePath,
    url: Option<Url>,
    expected_version: i32,
    migrations: Arc<MigrationChain>,
    reset_session: bool,
}

struct SaveRequest {
    slot: FilePath,
    url: Option<Url>,
    object: DataNode,
    data_version: i32,
    force_immediate_cloud: bool,
}

/// Identifies a `Save` request for redundancy elimination (spec §4.7):
/// `(kind, path, version, force_cloud_flag)`. Callbacks are not comparable
/// (they are channels), so they are intentionally left out of the key;
/// this is conservative — it never *over*-deduplicates beyond what the
/// observable request shape already implies.
#[derive(Clone, PartialEq, Eq)]
struct SaveDedupKey {
    slot: String,
    url: Option<String>,
    data_version: i32,
    force_immediate_cloud: bool,
}

impl SaveDedupKey {
    fn for_request(req: &SaveRequest) -> Self {
        Self {
            slot: req.slot.to_archive_relative_string(),
            url: req.url.as_ref().map(Url::to_string),
            data_version: req.data_version,
            force_immediate_cloud: req.force_immediate_cloud,
        }
    }
}

enum Operation {
    Load {
        req: LoadRequest,
        delivery: Delivery<LoadOutcome>,
    },
    Save {
        req: SaveRequest,
        dedup_key: SaveDedupKey,
        delivery: Delivery<SaveOutcome>,
    },
    Reset {
        slot: FilePath,
        reset_session: bool,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct Queue {
    items: Mutex<VecDeque<Operation>>,
    notify: Notify,
}

impl Queue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, op: Operation) {
        let mut items = self.items.lock();

        // Redundancy elimination (spec §4.7): an earlier queued `Save` with
        // the same dedup key is dropped in favour of this one.
        if let Operation::Save { dedup_key, .. } = &op {
            let existing_pos = items.iter().position(|existing| {
                matches!(existing, Operation::Save { dedup_key: existing_key, .. } if existing_key == dedup_key)
            });
            if let Some(pos) = existing_pos {
                if let Some(Operation::Save { req, delivery, .. }) = items.remove(pos) {
                    let outcome = SaveOutcome {
                        local_result: Err(SaveError::Superseded),
                        cloud_result: None,
                        final_result: Err(SaveError::Superseded),
                    };
                    deliver(delivery, &req.slot, |slot, outcome| ServiceEvent::Save { slot, outcome }, outcome);
                }
            }
        }

        items.push_back(op);
        drop(items);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Operation {
        loop {
            if let Some(op) = self.items.lock().pop_front() {
                return op;
            }
            self.notify.notified().await;
        }
    }
}

/// A single background worker processing save/load requests for every slot
/// (spec §4.7). Cheaply `Clone`: every clone shares the same queue and
/// worker task.
#[derive(Clone)]
pub struct SaveLoadService {
    queue: Arc<Queue>,
}

/// Reserved slot name for [`SaveLoadService::self_test`]'s throwaway blob;
/// never collides with a real slot since real slots are looked up by the
/// caller's own `FilePath`, and this one lives in a directory tag no content
/// archive uses (spec's `GameDirectory` has no "diagnostics" tag, so this
/// reuses `Other` with a reserved id).
const SELF_TEST_SLOT_TAG: u8 = 0xFE;

impl SaveLoadService {
    pub fn new(config: SaveLoadServiceConfig, save_api: Arc<dyn SaveApi>) -> SaveResult<Self> {
        let mut config = config;
        config.apply_env_overrides();
        Self::self_test(save_api.as_ref(), &config.encryption_key)?;

        let cloud_client = CloudClient::new(config.request_timeout)?;
        let queue = Arc::new(Queue::new());

        let worker_queue = queue.clone();
        tokio::spawn(run_worker(worker_queue, config, save_api, cloud_client));

        Ok(Self { queue })
    }

    /// Round-trips a throwaway blob through `save_api` and
    /// [`SaveContainer::encode`]/[`SaveContainer::decode`] before the
    /// service trusts its local storage (spec.md's supplemented
    /// `RunFirstTimeLoadTests`/`RunFirstTimeSaveTests`, §4.7 in
    /// `SPEC_FULL.md`). Exposed publicly so a caller can re-run it as an
    /// explicit diagnostic; also invoked once by [`Self::new`].
    pub fn self_test(save_api: &dyn SaveApi, encryption_key: &[u8; 32]) -> SaveResult<()> {
        let probe_slot = FilePath::new(
            pkgcore_types::GameDirectory::Other(SELF_TEST_SLOT_TAG),
            "__pkgcore_self_test__",
            pkgcore_types::FileType::Unknown("tmp".to_string()),
        );
        let probe_data = DataNode::Str("pkgcore-self-test".to_string());
        let metadata = SaveFileMetadata::default();

        let encoded = SaveContainer::encode(encryption_key, &probe_data, &DataNode::Null, &metadata)?;
        save_api.write(&probe_slot, &encoded)?;

        let read_back = save_api
            .read(&probe_slot)?
            .ok_or_else(|| SaveError::FileNotFound(probe_slot.to_archive_relative_string()))?;
        let (decoded_data, _, _) = SaveContainer::decode(encryption_key, &read_back)?;

        save_api.delete(&probe_slot)?;

        if decoded_data == probe_data {
            Ok(())
        } else {
            Err(SaveError::ChecksumCheck)
        }
    }

    /// Enqueue a load for `slot` (spec §4.7, §6.4: `queue_load`), blocking
    /// the caller on the returned receiver rather than delivering via
    /// callback.
    pub fn queue_load(
        &self,
        slot: FilePath,
        url: Option<Url>,
        expected_version: i32,
        migrations: Arc<MigrationChain>,
        reset_session: bool,
    ) -> oneshot::Receiver<LoadOutcome> {
        let (tx, rx) = oneshot::channel();
        self.queue.push(Operation::Load {
            req: LoadRequest {
                slot,
                url,
                expected_version,
                migrations,
                reset_session,
            },
            delivery: Delivery::Reply(tx),
        });
        rx
    }

    /// Same as [`Self::queue_load`] but delivers its outcome on `callback`
    /// instead of a one-shot reply (spec §5: main-thread callback delivery).
    pub fn queue_load_with_callback(
        &self,
        slot: FilePath,
        url: Option<Url>,
        expected_version: i32,
        migrations: Arc<MigrationChain>,
        reset_session: bool,
        callback: mpsc::UnboundedSender<ServiceEvent>,
    ) {
        self.queue.push(Operation::Load {
            req: LoadRequest {
                slot,
                url,
                expected_version,
                migrations,
                reset_session,
            },
            delivery: Delivery::Callback(callback),
        });
    }

    /// Enqueue a save (spec §4.7, §6.4: `queue_save`). `object` is the
    /// caller's snapshot, taken before enqueue (spec: "the caller's object
    /// is snapshotted before enqueue").
    pub fn queue_save(
        &self,
        slot: FilePath,
        url: Option<Url>,
        object: DataNode,
        data_version: i32,
        force_immediate_cloud: bool,
    ) -> oneshot::Receiver<SaveOutcome> {
        let (tx, rx) = oneshot::channel();
        let req = SaveRequest {
            slot,
            url,
            object,
            data_version,
            force_immediate_cloud,
        };
        let dedup_key = SaveDedupKey::for_request(&req);
        self.queue.push(Operation::Save {
            req,
            dedup_key,
            delivery: Delivery::Reply(tx),
        });
        rx
    }

    pub fn queue_save_with_callback(
        &self,
        slot: FilePath,
        url: Option<Url>,
        object: DataNode,
        data_version: i32,
        force_immediate_cloud: bool,
        callback: mpsc::UnboundedSender<ServiceEvent>,
    ) {
        let req = SaveRequest {
            slot,
            url,
            object,
            data_version,
            force_immediate_cloud,
        };
        let dedup_key = SaveDedupKey::for_request(&req);
        self.queue.push(Operation::Save {
            req,
            dedup_key,
            delivery: Delivery::Callback(callback),
        });
    }

    /// Developer-only: clears the local file and in-memory state for
    /// `slot`, optionally regenerating the session GUID (spec §4.7:
    /// `QueueSaveReset`).
    pub async fn queue_save_reset(&self, slot: FilePath, reset_session: bool) {
        let (tx, rx) = oneshot::channel();
        self.queue.push(Operation::Reset {
            slot,
            reset_session,
            reply: tx,
        });
        let _ = rx.await;
    }

    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        self.queue.push(Operation::Shutdown { reply: tx });
        let _ = rx.await;
    }
}

async fn run_worker(
    queue: Arc<Queue>,
    config: SaveLoadServiceConfig,
    save_api: Arc<dyn SaveApi>,
    cloud_client: CloudClient,
) {
    let mut slots: HashMap<String, SaveFileState> = HashMap::new();

    loop {
        match queue.pop().await {
            Operation::Load { req, delivery } => {
                let slot_key = req.slot.to_archive_relative_string();
                let outcome = process_load(&config, &save_api, &cloud_client, &req, &mut slots).await;
                tracing::debug!(slot = %slot_key, final_ok = outcome.final_result.is_ok(), "load processed");
                deliver(delivery, &req.slot, |slot, outcome| ServiceEvent::Load { slot, outcome }, outcome);
            }
            Operation::Save { req, delivery, .. } => {
                let slot_key = req.slot.to_archive_relative_string();
                let outcome = process_save(&config, &save_api, &cloud_client, &req, &mut slots).await;
                tracing::debug!(slot = %slot_key, final_ok = outcome.final_result.is_ok(), "save processed");
                deliver(delivery, &req.slot, |slot, outcome| ServiceEvent::Save { slot, outcome }, outcome);
            }
            Operation::Reset { slot, reset_session, reply } => {
                let key = slot.to_archive_relative_string();
                let _ = save_api.delete(&slot);
                let mut state = SaveFileState::default();
                if reset_session {
                    state.metadata.session_guid = uuid::Uuid::new_v4().to_string();
                }
                slots.insert(key, state);
                let _ = reply.send(());
            }
            Operation::Shutdown { reply } => {
                let _ = reply.send(());
                break;
            }
        }
    }
}

async fn process_load(
    config: &SaveLoadServiceConfig,
    save_api: &Arc<dyn SaveApi>,
    cloud_client: &CloudClient,
    req: &LoadRequest,
    slots: &mut HashMap<String, SaveFileState>,
) -> LoadOutcome {
    let slot_key = req.slot.to_archive_relative_string();
    let mut state = slots.get(&slot_key).cloned().unwrap_or_default();

    let local_result = match save_api.read(&req.slot) {
        Ok(Some(bytes)) => match SaveContainer::decode(&config.encryption_key, &bytes) {
            Ok((save_data, pending_delta, metadata)) => {
                state.checkpoint = save_data;
                state.pending_delta = pending_delta;
                state.metadata = metadata;
                Ok(())
            }
            Err(e) => Err(e),
        },
        Ok(None) => Ok(()),
        Err(_) => Err(SaveError::FileNotFound(slot_key.clone())),
    };

    let mut cloud_result = None;
    if let Some(url) = &req.url {
        let outcome = cloud_client.fetch_load(url, &state.metadata).await;
        cloud_result = Some(match &outcome {
            Ok(CloudOutcome::DataReplacement(Some((metadata, save_data)))) => {
                state.checkpoint = save_data.clone();
                state.metadata = metadata.clone();
                state.pending_delta = DataNode::Null;
                Ok(())
            }
            Ok(CloudOutcome::DataReplacement(None)) => {
                state = SaveFileState::default();
                Ok(())
            }
            Ok(
                CloudOutcome::NoData | CloudOutcome::Success | CloudOutcome::SuccessWithMetadata(_) | CloudOutcome::NeedsFullCheckpoint,
            ) => Ok(()),
            Err(e) => Err(SaveError::Wrapped(e.to_string())),
        });
    }

    let mut data = apply_delta(&state.checkpoint, &state.pending_delta);
    let migration_result = if state.metadata.version != req.expected_version {
        match req.migrations.apply(data.clone(), state.metadata.version, req.expected_version) {
            Ok(migrated) => {
                data = migrated;
                state.metadata.version = req.expected_version;
                Ok(())
            }
            Err(e) => Err(e),
        }
    } else {
        Ok(())
    };

    if req.reset_session {
        state.metadata.session_guid = uuid::Uuid::new_v4().to_string();
    }

    slots.insert(slot_key, state);

    let final_result = match (&local_result, migration_result) {
        (Err(e), _) => Err(SaveError::Wrapped(e.to_string())),
        (Ok(()), migration_result) => migration_result,
    };

    LoadOutcome {
        local_result,
        cloud_result,
        final_result,
        data,
    }
}

async fn process_save(
    config: &SaveLoadServiceConfig,
    save_api: &Arc<dyn SaveApi>,
    cloud_client: &CloudClient,
    req: &SaveRequest,
    slots: &mut HashMap<String, SaveFileState>,
) -> SaveOutcome {
    let slot_key = req.slot.to_archive_relative_string();
    let mut state = slots.get(&slot_key).cloned().unwrap_or_default();
    state.metadata.version = req.data_version;

    let delta = diff(Some(&state.checkpoint), &req.object);
    state.pending_delta = delta.clone();

    let local_result = write_blob(config, save_api, &req.slot, &req.object, &state);

    let rate_limit_elapsed = state
        .last_cloud_save_at
        .is_none_or(|at| at.elapsed() >= config.cloud_save_rate_limit);

    let mut cloud_result = None;
    if let Some(url) = &req.url {
        if req.force_immediate_cloud || rate_limit_elapsed {
            cloud_result = Some(send_cloud_save(config, save_api, cloud_client, req, &delta, &mut state, url).await);
        }
    }

    slots.insert(slot_key, state);

    let final_result = match (&local_result, &cloud_result) {
        (Err(e), _) => Err(SaveError::Wrapped(e.to_string())),
        (Ok(()), Some(Err(e))) => Err(SaveError::Wrapped(e.to_string())),
        _ => Ok(()),
    };

    SaveOutcome {
        local_result,
        cloud_result,
        final_result,
    }
}

/// Sends the pending delta to `url`, transparently handling a `252
/// ServerNeedsFullCheckpoint` response (spec §7: "not a failure; a control
/// signal") by resending once with `transaction_id_min = 0` and the full
/// object in place of a delta (spec §4.7), rather than surfacing it as a
/// terminal error.
async fn send_cloud_save(
    config: &SaveLoadServiceConfig,
    save_api: &Arc<dyn SaveApi>,
    cloud_client: &CloudClient,
    req: &SaveRequest,
    delta: &DataNode,
    state: &mut SaveFileState,
    url: &Url,
) -> SaveResult<()> {
    state.metadata.transaction_id_max += 1;

    let outcome = submit_save_payload(config, cloud_client, req, delta, state, url).await?;

    let outcome = if matches!(outcome, CloudOutcome::NeedsFullCheckpoint) {
        tracing::info!(slot = %req.slot, "server requested a full checkpoint resync, resending full snapshot");
        state.metadata.transaction_id_min = 0;
        let full_snapshot = diff(None, &req.object);
        submit_save_payload(config, cloud_client, req, &full_snapshot, state, url).await?
    } else {
        outcome
    };

    state.last_cloud_save_at = Some(Instant::now());

    match outcome {
        CloudOutcome::Success | CloudOutcome::SuccessWithMetadata(_) => {
            state.checkpoint = req.object.clone();
            state.metadata.transaction_id_min = state.metadata.transaction_id_max;
            state.pending_delta = DataNode::Null;
            // Persist again so the on-disk pending delta is empty (spec
            // §4.7: "write the local blob again so the persisted pending
            // delta is empty").
            write_blob(config, save_api, &req.slot, &req.object, state)?;
            Ok(())
        }
        CloudOutcome::NeedsFullCheckpoint => {
            // The server asked for a full checkpoint a second time in a
            // row; treat this as a permanent protocol failure rather than
            // resending indefinitely.
            Err(SaveError::ServerInternalFailure(reqwest::StatusCode::from_u16(252).expect("valid status")))
        }
        CloudOutcome::NoData | CloudOutcome::DataReplacement(_) => Ok(()),
    }
}

async fn submit_save_payload(
    config: &SaveLoadServiceConfig,
    cloud_client: &CloudClient,
    req: &SaveRequest,
    delta: &DataNode,
    state: &SaveFileState,
    url: &Url,
) -> SaveResult<CloudOutcome> {
    let encoded_delta = SaveContainer::encode(&config.encryption_key, &req.object, delta, &state.metadata)?;
    let expected_bytes = encode_plain(&req.object);
    submit_with_retry(cloud_client, &config.retry_policy, url, &encoded_delta, &expected_bytes, &state.metadata).await
}

/// Retries a cloud `POST` with exponential backoff (spec §4.8), reusing
/// `pkgcore-downloader`'s `RetryPolicy` rather than inventing a second
/// backoff scheme for the one other place the core talks HTTP. Only
/// `Recoverable`-classified errors (5xx, connection failures) are retried;
/// a permanent rejection (4xx) or protocol error fails immediately.
async fn submit_with_retry(
    cloud_client: &CloudClient,
    policy: &pkgcore_downloader::RetryPolicy,
    url: &Url,
    encrypted_delta: &[u8],
    expected_save_data: &[u8],
    metadata: &SaveFileMetadata,
) -> SaveResult<CloudOutcome> {
    use pkgcore_types::{Classify, ErrorClass};

    let mut attempt = 0;
    loop {
        match cloud_client.submit_delta(url, encrypted_delta, expected_save_data, metadata).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.class() == ErrorClass::Recoverable && policy.should_retry(attempt) => {
                tracing::warn!(attempt, error = %e, "cloud save failed transiently, retrying");
                tokio::time::sleep(policy.backoff_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn write_blob(
    config: &SaveLoadServiceConfig,
    save_api: &Arc<dyn SaveApi>,
    slot: &FilePath,
    object: &DataNode,
    state: &SaveFileState,
) -> SaveResult<()> {
    let bytes = SaveContainer::encode(&config.encryption_key, object, &state.pending_delta, &state.metadata)?;
    save_api.write(slot, &bytes)
}

fn encode_plain(node: &DataNode) -> Vec<u8> {
    let mut stream = pkgcore_bytestream::ByteStream::new();
    node.encode(&mut stream);
    stream.into_vec()
}
