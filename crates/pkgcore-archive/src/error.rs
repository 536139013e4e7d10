//! Archive error taxonomy (spec §7), classified via
//! [`pkgcore_types::Classify`] so the downloader can reuse the same retry
//! logic for archive-shaped and network-shaped failures alike.

use pkgcore_types::{Classify, ErrorClass};
use thiserror::Error;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("bad signature: expected {expected:#010x}, got {actual:#010x}")]
    BadSignature { expected: u32, actual: u32 },

    #[error("unsupported version: {0} (supported range is 17..=21)")]
    UnsupportedVersion(u8),

    #[error(
        "header invariant violated: total_package_size {total} != offset_to_file_table {offset} + size_of_file_table {size}"
    )]
    SizeInvariantViolated { total: u64, offset: u64, size: u64 },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("codec error: {0}")]
    Codec(#[from] pkgcore_codec::CodecError),

    #[error("bytestream error: {0}")]
    ByteStream(#[from] pkgcore_bytestream::ByteStreamError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory queries are not supported by this archive")]
    DirectoryQueriesUnsupported,

    #[error("operation unsupported: archives are read-only at runtime ({0})")]
    UnsupportedOperation(&'static str),

    #[error("archive failed to open and is not ok: {0}")]
    NotOk(String),
}

impl Classify for ArchiveError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) => ErrorClass::Recoverable,
            _ => ErrorClass::Permanent,
        }
    }
}
