//! Downloader error taxonomy (spec §7, §4.5.2).

use pkgcore_types::{Classify, ErrorClass};
use thiserror::Error;

pub type DownloaderResult<T> = Result<T, DownloaderError>;

#[derive(Debug, Error)]
pub enum DownloaderError {
    #[error("archive error: {0}")]
    Archive(#[from] pkgcore_archive::ArchiveError),

    #[error("codec error: {0}")]
    Codec(#[from] pkgcore_codec::CodecError),

    #[error("bytestream error: {0}")]
    ByteStream(#[from] pkgcore_bytestream::ByteStreamError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned unexpected range response status {0}")]
    UnexpectedRangeStatus(reqwest::StatusCode),

    #[error("server returned {expected} bytes requested but {received} bytes")]
    IncompleteRange { expected: u64, received: u64 },

    #[error("target file is not writable: {0}")]
    TargetNotWritable(String),

    #[error("file not found in remote archive: {0}")]
    FileNotFound(String),

    #[error("downloader has not completed initialisation")]
    NotReady,

    #[error("a previous local write failed; downloader is permanently stuck")]
    WriteFailureSticky,

    #[error("request was cancelled")]
    Cancelled,

    #[error("downloader is shutting down")]
    ShuttingDown,

    #[error("worker task is gone")]
    WorkerGone,

    #[error("entry {0} failed crc32 check after exhausting reschedule retries")]
    Crc32Mismatch(String),
}

impl Classify for DownloaderError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Http(_) | Self::UnexpectedRangeStatus(_) | Self::IncompleteRange { .. } => {
                ErrorClass::Recoverable
            }
            Self::TargetNotWritable(_) | Self::WriteFailureSticky => ErrorClass::Sticky,
            _ => ErrorClass::Permanent,
        }
    }
}

impl DownloaderError {
    pub(crate) fn is_sticky(&self) -> bool {
        matches!(self.class(), ErrorClass::Sticky)
    }
}
