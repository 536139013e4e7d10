//! `PackageFileEntry` (spec §3, §6.1): the fixed-size per-file record
//! inside the file table.

use pkgcore_bytestream::{ByteStream, ByteStreamResult};

/// Fixed size of the numeric portion of an entry, before the
/// `name_size_including_null_terminator` + path bytes that follow it.
pub const ENTRY_FIXED_SIZE: usize = 8 * 4 + 4 * 2;

/// A single file's record in the file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageFileEntry {
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub modified_time: u64,
    pub crc32_pre: u32,
    pub crc32_post: u32,
}

impl PackageFileEntry {
    /// The CRC32 describing the logical, de-obfuscated, decompressed
    /// contents. On legacy (pre-v19) archives there is only one CRC; both
    /// fields are populated identically at parse time so this accessor
    /// never needs to know the archive version (spec §3).
    pub fn crc32_post(&self) -> u32 {
        self.crc32_post
    }

    pub fn read(stream: &mut ByteStream) -> ByteStreamResult<Self> {
        Ok(Self {
            offset: stream.read()?,
            compressed_size: stream.read()?,
            uncompressed_size: stream.read()?,
            modified_time: stream.read()?,
            crc32_pre: stream.read()?,
            crc32_post: stream.read()?,
        })
    }

    pub fn write(&self, stream: &mut ByteStream) {
        stream.write(self.offset);
        stream.write(self.compressed_size);
        stream.write(self.uncompressed_size);
        stream.write(self.modified_time);
        stream.write(self.crc32_pre);
        stream.write(self.crc32_post);
    }

    /// Whether this entry's bytes are stored compressed (spec §4.4: an
    /// entry is compressed iff its recorded sizes differ, or the archive
    /// uses a compression dictionary and this entry is not the dictionary
    /// itself).
    pub fn is_compressed(&self, archive_uses_dictionary: bool, is_dictionary_entry: bool) -> bool {
        if is_dictionary_entry {
            return false;
        }
        archive_uses_dictionary || self.compressed_size != self.uncompressed_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_bytestream() {
        let entry = PackageFileEntry {
            offset: 4096,
            compressed_size: 100,
            uncompressed_size: 200,
            modified_time: 1_700_000_000,
            crc32_pre: 0xdead_beef,
            crc32_post: 0xcafe_babe,
        };
        let mut stream = ByteStream::new();
        entry.write(&mut stream);
        assert_eq!(stream.len(), ENTRY_FIXED_SIZE);

        stream.seek(0).unwrap();
        let parsed = PackageFileEntry::read(&mut stream).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn dictionary_entry_never_reports_compressed() {
        let entry = PackageFileEntry {
            offset: 0,
            compressed_size: 10,
            uncompressed_size: 10,
            modified_time: 0,
            crc32_pre: 0,
            crc32_post: 0,
        };
        assert!(!entry.is_compressed(true, true));
        assert!(entry.is_compressed(true, false));
    }

    #[test]
    fn equal_sizes_without_dictionary_is_uncompressed() {
        let entry = PackageFileEntry {
            offset: 0,
            compressed_size: 10,
            uncompressed_size: 10,
            modified_time: 0,
            crc32_pre: 0,
            crc32_post: 0,
        };
        assert!(!entry.is_compressed(false, false));
    }
}
