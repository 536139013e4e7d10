//! `PackageFileHeader` (spec §3, §6.1): the fixed-size 48-byte record at
//! offset 0 of an archive.

use crate::error::{ArchiveError, ArchiveResult};
use pkgcore_bytestream::ByteStream;

/// 32-bit magic identifying a `.sar` archive: ASCII `"SAR1"` little-endian.
pub const SIGNATURE: u32 = 0x3152_4153;

/// Fixed on-disk header size, including reserved padding.
pub const HEADER_SIZE: usize = 48;

const FLAG_COMPRESSED_FILE_TABLE: u8 = 1 << 0;
const FLAG_HAS_COMPRESSION_DICT: u8 = 1 << 1;
const FLAG_SUPPORTS_DIRECTORY_QUERIES: u8 = 1 << 2;
const FLAG_HAS_POST_CRC32: u8 = 1 << 3;

const OBFUSCATION_BIT: u8 = 1 << 7;
const PLATFORM_MASK: u8 = 0x7F;

/// Archive format version. `V17`/`V18` are read-only legacy (single CRC);
/// `V19`-`V21` are the actively written range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveVersion(pub u8);

impl ArchiveVersion {
    pub const MIN_SUPPORTED: u8 = 17;
    pub const LATEST: u8 = 21;
    pub const DUAL_CRC_FLOOR: u8 = 19;

    pub fn validate(self) -> ArchiveResult<Self> {
        if (Self::MIN_SUPPORTED..=Self::LATEST).contains(&self.0) {
            Ok(self)
        } else {
            Err(ArchiveError::UnsupportedVersion(self.0))
        }
    }

    /// Whether this version discriminates `crc32_pre` from `crc32_post`
    /// (spec §3: "Dual CRCs are present from v19 forward").
    pub fn has_dual_crc(self) -> bool {
        self.0 >= Self::DUAL_CRC_FLOOR
    }

    /// Whether the file table is followed by a trailing CRC32 of its
    /// obfuscated bytes (spec §3, §6.1).
    pub fn has_trailing_table_crc(self) -> bool {
        self.0 >= 20
    }
}

/// Header flags byte (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags {
    pub compressed_file_table: bool,
    pub has_compression_dict: bool,
    pub supports_directory_queries: bool,
    pub has_post_crc32: bool,
}

impl HeaderFlags {
    fn from_byte(byte: u8) -> Self {
        Self {
            compressed_file_table: byte & FLAG_COMPRESSED_FILE_TABLE != 0,
            has_compression_dict: byte & FLAG_HAS_COMPRESSION_DICT != 0,
            supports_directory_queries: byte & FLAG_SUPPORTS_DIRECTORY_QUERIES != 0,
            has_post_crc32: byte & FLAG_HAS_POST_CRC32 != 0,
        }
    }

    fn to_byte(self) -> u8 {
        let mut byte = 0u8;
        if self.compressed_file_table {
            byte |= FLAG_COMPRESSED_FILE_TABLE;
        }
        if self.has_compression_dict {
            byte |= FLAG_HAS_COMPRESSION_DICT;
        }
        if self.supports_directory_queries {
            byte |= FLAG_SUPPORTS_DIRECTORY_QUERIES;
        }
        if self.has_post_crc32 {
            byte |= FLAG_HAS_POST_CRC32;
        }
        byte
    }
}

/// The fixed-size record at offset 0 of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageFileHeader {
    pub version: ArchiveVersion,
    pub platform_tag: u8,
    pub obfuscated: bool,
    pub flags: HeaderFlags,
    pub game_directory_tag: u8,
    pub build_version_major: u32,
    pub build_changelist: u32,
    pub total_package_size: u64,
    pub offset_to_file_table: u64,
    pub size_of_file_table: u32,
    pub total_entries_in_file_table: u32,
}

impl PackageFileHeader {
    /// Parse and validate a header from the first `HEADER_SIZE` bytes of an
    /// archive, including the total/offset/size invariant (spec §3).
    pub fn parse(bytes: &[u8]) -> ArchiveResult<Self> {
        let mut stream = ByteStream::from_bytes(bytes[..HEADER_SIZE.min(bytes.len())].to_vec());

        let signature: u32 = stream.read()?;
        if signature != SIGNATURE {
            return Err(ArchiveError::BadSignature {
                expected: SIGNATURE,
                actual: signature,
            });
        }

        let version = ArchiveVersion(stream.read::<u8>()?).validate()?;
        let platform_and_obfuscation: u8 = stream.read()?;
        let flags = HeaderFlags::from_byte(stream.read::<u8>()?);
        let game_directory_tag: u8 = stream.read()?;
        let build_version_major: u32 = stream.read()?;
        let build_changelist: u32 = stream.read()?;
        let total_package_size: u64 = stream.read()?;
        let offset_to_file_table: u64 = stream.read()?;
        let size_of_file_table: u32 = stream.read()?;
        let total_entries_in_file_table: u32 = stream.read()?;

        let header = Self {
            version,
            platform_tag: platform_and_obfuscation & PLATFORM_MASK,
            obfuscated: platform_and_obfuscation & OBFUSCATION_BIT != 0,
            flags,
            game_directory_tag,
            build_version_major,
            build_changelist,
            total_package_size,
            offset_to_file_table,
            size_of_file_table,
            total_entries_in_file_table,
        };
        header.validate_size_invariant()?;
        Ok(header)
    }

    /// Table size plus the trailing CRC32 this version appends, if any.
    pub fn table_region_size(&self) -> u64 {
        u64::from(self.size_of_file_table) + if self.version.has_trailing_table_crc() { 4 } else { 0 }
    }

    fn validate_size_invariant(&self) -> ArchiveResult<()> {
        let expected = self.offset_to_file_table + self.table_region_size();
        if self.total_package_size == expected {
            Ok(())
        } else {
            Err(ArchiveError::SizeInvariantViolated {
                total: self.total_package_size,
                offset: self.offset_to_file_table,
                size: self.table_region_size(),
            })
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut stream = ByteStream::with_capacity(HEADER_SIZE);
        stream.write::<u32>(SIGNATURE);
        stream.write::<u8>(self.version.0);
        let platform_and_obfuscation =
            (self.platform_tag & PLATFORM_MASK) | if self.obfuscated { OBFUSCATION_BIT } else { 0 };
        stream.write::<u8>(platform_and_obfuscation);
        stream.write::<u8>(self.flags.to_byte());
        stream.write::<u8>(self.game_directory_tag);
        stream.write::<u32>(self.build_version_major);
        stream.write::<u32>(self.build_changelist);
        stream.write::<u64>(self.total_package_size);
        stream.write::<u64>(self.offset_to_file_table);
        stream.write::<u32>(self.size_of_file_table);
        stream.write::<u32>(self.total_entries_in_file_table);
        stream.pad_to(HEADER_SIZE);
        stream.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PackageFileHeader {
        PackageFileHeader {
            version: ArchiveVersion(20),
            platform_tag: 2,
            obfuscated: true,
            flags: HeaderFlags {
                compressed_file_table: true,
                has_compression_dict: false,
                supports_directory_queries: true,
                has_post_crc32: true,
            },
            game_directory_tag: 0,
            build_version_major: 19,
            build_changelist: 123456,
            total_package_size: 2048 + 256 + 4,
            offset_to_file_table: 2048,
            size_of_file_table: 256,
            total_entries_in_file_table: 10,
        }
    }

    #[test]
    fn round_trip() {
        let header = sample_header();
        let bytes = header.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let parsed = PackageFileHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = sample_header().serialize();
        bytes[0] = 0;
        assert!(matches!(
            PackageFileHeader::parse(&bytes),
            Err(ArchiveError::BadSignature { .. })
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut header = sample_header();
        header.version = ArchiveVersion(99);
        // Bypass validate() to hand-construct a header with a bad version
        // for the serialize/parse path.
        let bytes = {
            let mut s = ByteStream::with_capacity(HEADER_SIZE);
            s.write::<u32>(SIGNATURE);
            s.write::<u8>(99);
            s.pad_to(HEADER_SIZE);
            s.into_vec()
        };
        assert!(matches!(
            PackageFileHeader::parse(&bytes),
            Err(ArchiveError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn rejects_size_invariant_violation() {
        let mut header = sample_header();
        header.total_package_size += 1;
        let bytes = header.serialize();
        assert!(matches!(
            PackageFileHeader::parse(&bytes),
            Err(ArchiveError::SizeInvariantViolated { .. })
        ));
    }

    #[test]
    fn dual_crc_floor_is_v19() {
        assert!(!ArchiveVersion(18).has_dual_crc());
        assert!(ArchiveVersion(19).has_dual_crc());
        assert!(ArchiveVersion(21).has_dual_crc());
    }

    #[test]
    fn trailing_table_crc_floor_is_v20() {
        assert!(!ArchiveVersion(19).has_trailing_table_crc());
        assert!(ArchiveVersion(20).has_trailing_table_crc());
    }
}
