//! Save/load error taxonomy (spec §7), grounded on the original's
//! `SaveLoadResult` enum: every failure mode the C++ worker distinguished
//! (signature, version, checksum, encryption, migration, cloud protocol)
//! gets its own variant here rather than collapsing into a generic "save
//! failed".

use pkgcore_types::{Classify, ErrorClass, TerminalCode};
use thiserror::Error;

pub type SaveResult<T> = Result<T, SaveError>;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("save blob signature missing or truncated")]
    SignatureData,

    #[error("save blob signature mismatch: expected {expected:#010x}, got {actual:#010x}")]
    SignatureCheck { expected: u32, actual: u32 },

    #[error("save blob version missing or truncated")]
    VersionData,

    #[error("save blob version {0} outside supported range")]
    VersionCheck(i32),

    #[error("save blob nonce or encrypted region missing or truncated")]
    Encryption,

    #[error("save blob checksum missing or truncated")]
    ChecksumData,

    #[error("save blob checksum mismatch")]
    ChecksumCheck,

    #[error("save blob has trailing bytes past the last data store")]
    ExtraData,

    #[error("save blob contains an unrecognised tree node tag {0}")]
    UnknownDataNodeTag(u8),

    #[error("save data failed to deserialize")]
    Deserialization,

    #[error("save file not found: {0}")]
    FileNotFound(String),

    #[error("save file exceeds the configured size limit")]
    TooBig,

    #[error("local write failed (no space)")]
    WriteNoSpace,

    #[error("renaming the save file into place failed (no space)")]
    RenameNoSpace,

    #[error("no migration registered for save version {0}")]
    NoMigrations(i32),

    #[error("migration chain revisited version {0}; it cycles")]
    CyclicalMigrations(i32),

    #[error("migration callback for version {0} failed")]
    MigrationCallback(i32),

    #[error("requested migration target version {target} is older than current version {current}")]
    FutureMigrationVersion { target: i32, current: i32 },

    #[error("cloud save/load disabled for this slot")]
    CloudDisabled,

    #[error("cloud request cancelled")]
    CloudCancelled,

    #[error("cloud endpoint rejected the request with session_guid mismatch")]
    SessionGuidMismatch,

    #[error("cloud endpoint rejected the request with transaction_id_max mismatch")]
    TransactionIdMax,

    #[error("cloud endpoint returned an unexpected HTTP status {0}")]
    ServerInternalFailure(reqwest::StatusCode),

    #[error("cloud endpoint permanently rejected the request with HTTP status {0}")]
    ServerRejection(reqwest::StatusCode),

    #[error("bytestream error: {0}")]
    ByteStream(#[from] pkgcore_bytestream::ByteStreamError),

    #[error("codec error: {0}")]
    Codec(#[from] pkgcore_codec::CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("worker task is gone")]
    WorkerGone,

    #[error("save request superseded by a later request with identical parameters")]
    Superseded,

    /// A stand-in for an error already reported elsewhere in the same
    /// outcome (`local_result`/`cloud_result`), used only where
    /// `SaveError`'s non-`Clone` inner error types (`reqwest::Error`, ...)
    /// prevent surfacing the original value twice.
    #[error("{0}")]
    Wrapped(String),
}

impl Classify for SaveError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::ServerInternalFailure(_) | Self::Http(_) => ErrorClass::Recoverable,
            Self::WriteNoSpace | Self::RenameNoSpace => ErrorClass::Sticky,
            _ => ErrorClass::Permanent,
        }
    }
}

impl SaveError {
    /// The single terminal code a caller sees for this failure (spec §7),
    /// independent of which of the many local variants produced it.
    pub fn terminal_code(&self) -> TerminalCode {
        match self {
            Self::SignatureData | Self::SignatureCheck { .. } => TerminalCode::IntegritySignatureMismatch,
            Self::VersionData | Self::VersionCheck(_) | Self::FutureMigrationVersion { .. } => {
                TerminalCode::IntegrityVersionOutOfRange
            }
            Self::Encryption => TerminalCode::IntegrityDecryptionFailure,
            Self::ChecksumData | Self::ChecksumCheck => TerminalCode::IntegrityChecksumMismatch,
            Self::ExtraData | Self::UnknownDataNodeTag(_) | Self::Deserialization | Self::Wrapped(_) => {
                TerminalCode::IntegritySerializationMismatch
            }
            Self::FileNotFound(_) => TerminalCode::IoNotFound,
            Self::TooBig => TerminalCode::IoTooBig,
            Self::WriteNoSpace => TerminalCode::IoNoSpace,
            Self::RenameNoSpace => TerminalCode::IoRenameFailure,
            Self::NoMigrations(_) => TerminalCode::MigrationMissing,
            Self::CyclicalMigrations(_) => TerminalCode::MigrationCycle,
            Self::MigrationCallback(_) => TerminalCode::MigrationCallbackFailed,
            Self::CloudDisabled => TerminalCode::UsageUnsupportedOperation,
            Self::CloudCancelled => TerminalCode::NetworkCancelled,
            Self::SessionGuidMismatch => TerminalCode::ProtocolSessionGuidMismatch,
            Self::TransactionIdMax => TerminalCode::ProtocolTransactionIdMismatch,
            Self::ServerInternalFailure(_) => TerminalCode::NetworkTransient,
            Self::ServerRejection(_) => TerminalCode::NetworkPermanent,
            Self::ByteStream(_) | Self::Codec(_) => TerminalCode::IntegritySerializationMismatch,
            Self::Io(_) => TerminalCode::IoWriteFailure,
            Self::Http(_) => TerminalCode::NetworkTransient,
            Self::WorkerGone => TerminalCode::UsageNotInitialised,
            Self::Superseded => TerminalCode::UsageUnsupportedOperation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_check_maps_to_integrity_checksum_mismatch() {
        assert_eq!(SaveError::ChecksumCheck.terminal_code(), TerminalCode::IntegrityChecksumMismatch);
    }

    #[test]
    fn write_no_space_is_sticky_both_as_class_and_terminal_code() {
        assert_eq!(SaveError::WriteNoSpace.class(), ErrorClass::Sticky);
        assert_eq!(SaveError::WriteNoSpace.terminal_code().class(), ErrorClass::Sticky);
    }

    #[test]
    fn server_internal_failure_maps_to_network_transient() {
        let status = reqwest::StatusCode::INTERNAL_SERVER_ERROR;
        assert_eq!(SaveError::ServerInternalFailure(status).terminal_code(), TerminalCode::NetworkTransient);
    }
}
