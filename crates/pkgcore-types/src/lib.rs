//! Shared identifiers, error taxonomy and filesystem capability traits used
//! across the pkgcore workspace.
//!
//! This crate has no I/O of its own; it exists so `pkgcore-archive`,
//! `pkgcore-downloader` and `pkgcore-save` can share `FilePath`, the error
//! classification scheme (spec §7) and the capability-set dispatch pattern
//! (spec §9) without depending on each other.

pub mod error;
pub mod file_path;
pub mod filesystem;

pub use error::{Classify, ErrorClass, TerminalCode};
pub use file_path::{FilePath, FileType, GameDirectory};
pub use filesystem::{FileSystemKind, FsCapabilities};
