//! CRC32 and SHA-512 helpers used for archive-entry and save-blob integrity
//! (spec §4.1).

use crate::error::{CodecError, CodecResult};
use sha2::{Digest, Sha512};

/// CRC32 (IEEE polynomial) of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Verify `data`'s CRC32 equals `expected`, returning a distinct
/// [`CodecError::Crc32Mismatch`] on failure rather than a bare bool, so
/// callers can report the actual/expected pair (spec §8: "corrupting any
/// byte... causes exactly that entry's CRC32 to fail").
pub fn verify_crc32(data: &[u8], expected: u32) -> CodecResult<()> {
    let actual = crc32(data);
    if actual == expected {
        Ok(())
    } else {
        Err(CodecError::Crc32Mismatch { expected, actual })
    }
}

/// SHA-512 digest of a byte slice, used for the save container checksum
/// (spec §6.3).
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 64];
    out.copy_from_slice(&result);
    out
}
