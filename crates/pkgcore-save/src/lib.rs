//! Encrypted save container and background save/load worker
//! (`SaveContainer`, `SaveLoadService` — spec §4.6, §4.7).
//!
//! A save slot is a `FilePath` under [`pkgcore_types::GameDirectory::Save`].
//! Its on-disk blob is produced by [`SaveContainer::encode`] and consumed
//! by [`SaveLoadService`], which owns the only background worker allowed to
//! mutate a slot's local file or its in-memory checkpoint/delta state.

mod cloud;
mod config;
mod container;
mod error;
mod migration;
mod save_api;
mod service;
mod tree;

pub use cloud::{CloudClient, CloudOutcome, CloudStatus};
pub use config::SaveLoadServiceConfig;
pub use container::{SaveContainer, SaveFileMetadata, CONTAINER_VERSION, SAVE_CONTAINER_SIGNATURE};
pub use error::{SaveError, SaveResult};
pub use migration::{MigrationChain, MigrationFn};
pub use save_api::{DiskSaveApi, SaveApi};
pub use service::{LoadOutcome, SaveLoadService, SaveOutcome, ServiceEvent};
pub use tree::{apply_delta, diff, DataNode};
