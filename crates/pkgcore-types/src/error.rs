//! Shared error taxonomy (spec §7): every component-local error type
//! classifies into one of [`ErrorClass`] so callers and retry loops can make
//! a single decision without matching on every concrete variant.

use std::fmt;

/// How the core should react to an error it just produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; retry with backoff (timeouts, 5xx, connection resets).
    Recoverable,
    /// Fail this request only (bad input, 4xx, corrupt data).
    Permanent,
    /// Fail this and all future requests against the same owner (a
    /// downloader that has experienced a local write failure).
    Sticky,
}

/// Implemented by every component-local error enum so generic retry/backoff
/// code (see `pkgcore-downloader`'s worker and `pkgcore-save`'s cloud
/// client) can classify errors without depending on each crate's concrete
/// error type.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// The taxonomy named in spec §7, used where a component needs to report a
/// single terminal code to a caller independent of its internal error enum
/// (e.g. `SaveLoadService`'s `final_result`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalCode {
    Ok,
    IntegritySignatureMismatch,
    IntegrityVersionOutOfRange,
    IntegrityCrcMismatch,
    IntegrityChecksumMismatch,
    IntegrityDecryptionFailure,
    IntegrityDecompressionFailure,
    IntegritySerializationMismatch,
    IoNotFound,
    IoTooBig,
    IoWriteFailure,
    IoNoSpace,
    IoRenameFailure,
    NetworkTransient,
    NetworkPermanent,
    NetworkCancelled,
    ProtocolSessionGuidMismatch,
    ProtocolTransactionIdMismatch,
    ProtocolServerNeedsFullCheckpoint,
    ProtocolUnexpectedStatus,
    MigrationMissing,
    MigrationCycle,
    MigrationCallbackFailed,
    UsageNotInitialised,
    UsageUnsupportedOperation,
}

impl fmt::Display for TerminalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl TerminalCode {
    pub fn class(self) -> ErrorClass {
        match self {
            Self::Ok | Self::ProtocolServerNeedsFullCheckpoint => ErrorClass::Recoverable,
            Self::NetworkTransient => ErrorClass::Recoverable,
            Self::IoWriteFailure => ErrorClass::Sticky,
            _ => ErrorClass::Permanent,
        }
    }
}
