//! Capability-set dispatch for the file-system-like collaborators in the
//! core (spec §9: "virtual file-system dispatch"). Rather than a deep
//! `IFileSystem` inheritance hierarchy, each concrete type exposes the
//! capabilities it actually has; callers match on a `FileSystemKind` tag
//! instead of downcasting through a trait object hierarchy.

use crate::file_path::FilePath;
use std::time::SystemTime;

/// Tag identifying which concrete collaborator backs an [`FsCapabilities`]
/// implementor. Used for logging and for callers that need to special-case
/// one variant (e.g. only a `PackageDownloader` can be asked "is this
/// serviced by network").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemKind {
    Disk,
    PackageArchive,
    PackageDownloader,
    PatchablePackage,
    RemoteFileSystem,
}

/// The capability set a collaborator supports. Every method returns `None`
/// / an empty result for a capability the concrete type does not have,
/// rather than the trait requiring every method to be implemented.
pub trait FsCapabilities {
    fn kind(&self) -> FileSystemKind;
    fn exists(&self, path: &FilePath) -> bool;
    fn file_size(&self, path: &FilePath) -> Option<u64>;
    fn modified_time(&self, path: &FilePath) -> Option<SystemTime>;

    /// `Some(true/false)` if directory queries are supported, `None` if the
    /// underlying archive was opened without `has_support_directory_queries`.
    fn supports_directory_queries(&self) -> bool {
        false
    }

    /// Whether reading `path` right now would require a network fetch.
    /// Always `false` for collaborators with no network component.
    fn is_serviced_by_network(&self, _path: &FilePath) -> bool {
        false
    }
}
