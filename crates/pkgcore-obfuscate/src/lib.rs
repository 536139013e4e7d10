//! ObfuscationKey (spec §4.3): a deterministic, host-stable XOR keystream
//! derived from a relative path (or a reserved pseudo-name for the file
//! table itself).
//!
//! This is a cheap tamper/casual-inspection deterrent, not cryptography
//! (spec GLOSSARY). It is grounded on the same "keystream block generated
//! from a key, consumed byte by byte" shape as a stream cipher, but reuses
//! `pkgcore_codec::sha512` as the block primitive rather than reimplementing
//! a dedicated cipher: spec §4.3 only requires the output be a stable,
//! deterministic function of the path, not a particular algorithm.

use pkgcore_codec::sha512;

const BLOCK_SIZE: usize = 64;

/// A derived keystream source for one archive entry (or the file table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscationKey {
    seed: Vec<u8>,
}

impl ObfuscationKey {
    /// Derive the key for a normal entry from its on-disk relative path.
    /// Path separators must already be normalised to `/` by the caller
    /// (spec §4.3: "stable across platforms").
    pub fn for_path(relative_path: &str) -> Self {
        Self {
            seed: relative_path.as_bytes().to_vec(),
        }
    }

    /// Derive the reserved key used for the file table itself: the decimal
    /// concatenation `"<build_version_major><build_changelist>"` with no
    /// separator (spec §4.3, §4.4).
    pub fn for_file_table(build_version_major: u32, build_changelist: u32) -> Self {
        Self::for_path(&format!("{build_version_major}{build_changelist}"))
    }

    /// Produce `len` keystream bytes starting at `start_offset` within the
    /// logical stream for this key.
    pub fn keystream(&self, start_offset: usize, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut offset = start_offset;
        while out.len() < len {
            let block_index = (offset / BLOCK_SIZE) as u64;
            let mut block_input = self.seed.clone();
            block_input.extend_from_slice(&block_index.to_le_bytes());
            let block = sha512(&block_input);

            let within_block = offset % BLOCK_SIZE;
            let take = (BLOCK_SIZE - within_block).min(len - out.len());
            out.extend_from_slice(&block[within_block..within_block + take]);
            offset += take;
        }
        out
    }

    /// XOR `data` in place against this key's keystream, treating `data[0]`
    /// as logical offset `start_offset` within the stream (spec §4.4: "XOR
    /// decoding with the entry's key starting at offset 0 into the key
    /// stream").
    pub fn apply_xor(&self, data: &mut [u8], start_offset: usize) {
        let keystream = self.keystream(start_offset, data.len());
        for (byte, key_byte) in data.iter_mut().zip(keystream) {
            *byte ^= key_byte;
        }
    }
}
