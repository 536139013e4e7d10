//! Error types for [`crate`] operations, distinguishing decompression
//! failure from integrity failure per spec §4.1.

use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("zlib error: {0}")]
    Zlib(String),

    #[error("lz4 error: {0}")]
    Lz4(String),

    #[error("zstd error: {0}")]
    Zstd(String),

    #[error("AES-CTR nonce must be 12-16 bytes, got {0}")]
    InvalidNonceSize(usize),

    #[error("AES key must be exactly 32 bytes, got {0}")]
    InvalidKeySize(usize),

    #[error("integrity check failed: expected crc32 {expected:08x}, got {actual:08x}")]
    Crc32Mismatch { expected: u32, actual: u32 },
}
