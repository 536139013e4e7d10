//! `FileTable` (spec §3, §6.1): `FilePath -> (Entry, xor_key)`, parsed from
//! the archive's obfuscated, optionally-compressed file-table region.

use crate::entry::PackageFileEntry;
use crate::error::{ArchiveError, ArchiveResult};
use crate::header::PackageFileHeader;
use pkgcore_bytestream::ByteStream;
use pkgcore_codec::{crc32, verify_crc32, zlib_compress, zlib_decompress};
use pkgcore_obfuscate::ObfuscationKey;
use pkgcore_types::{FilePath, GameDirectory};
use std::collections::HashMap;

/// One resolved row of the file table.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub entry: PackageFileEntry,
    pub xor_key: ObfuscationKey,
    /// The on-disk relative path text, kept for rebuilding the archive
    ///-relative string without re-deriving it from `FilePath`.
    pub relative_path: String,
}

/// The parsed, de-obfuscated, decompressed file table.
#[derive(Debug, Clone, Default)]
pub struct FileTable {
    rows: HashMap<FilePath, TableRow>,
}

impl FileTable {
    pub fn get(&self, path: &FilePath) -> Option<&TableRow> {
        self.rows.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FilePath, &TableRow)> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse the on-disk table region: de-obfuscate with the reserved
    /// pseudo-name key, verify the trailing CRC32 (`v>=20`, covering the
    /// obfuscated bytes), then decompress (if the header says so) and walk
    /// entries sequentially.
    pub fn parse(raw_region: &[u8], header: &PackageFileHeader) -> ArchiveResult<Self> {
        let table_size = header.size_of_file_table as usize;
        let obfuscated_table = &raw_region[..table_size];

        if header.version.has_trailing_table_crc() {
            let trailing = &raw_region[table_size..table_size + 4];
            let mut stream = ByteStream::from_bytes(trailing.to_vec());
            let expected: u32 = stream.read()?;
            verify_crc32(obfuscated_table, expected)
                .map_err(|_| ArchiveError::NotOk("file table CRC32 mismatch".to_string()))?;
        }

        let table_key =
            ObfuscationKey::for_file_table(header.build_version_major, header.build_changelist);
        let mut de_obfuscated = obfuscated_table.to_vec();
        table_key.apply_xor(&mut de_obfuscated, 0);

        let decompressed = if header.flags.compressed_file_table {
            zlib_decompress(&de_obfuscated, de_obfuscated.len() * 3)?
        } else {
            de_obfuscated
        };

        Self::parse_entries(&decompressed, header)
    }

    fn parse_entries(bytes: &[u8], header: &PackageFileHeader) -> ArchiveResult<Self> {
        let mut stream = ByteStream::from_bytes(bytes.to_vec());
        let mut rows = HashMap::with_capacity(header.total_entries_in_file_table as usize);

        for _ in 0..header.total_entries_in_file_table {
            let entry = PackageFileEntry::read(&mut stream)?;
            let name_size: u32 = stream.read()?;
            let name_size = name_size as usize;
            let name_bytes = stream.read_bytes(name_size)?;
            let relative_path = String::from_utf8_lossy(&name_bytes[..name_size.saturating_sub(1)])
                .replace('\\', "/");

            let xor_key = ObfuscationKey::for_path(&relative_path);
            let directory = GameDirectory::from_tag(header.game_directory_tag);
            let file_path = FilePath::from_relative_path(directory, &relative_path);

            rows.insert(
                file_path,
                TableRow {
                    entry,
                    xor_key,
                    relative_path,
                },
            );
        }

        Ok(Self { rows })
    }

    /// Serialise entries into table bytes (fixed fields + null-terminated
    /// name per row), for use by test fixtures. Not part of the public
    /// read-only archive API (spec Non-goals: no authoring at runtime).
    #[cfg(any(test, feature = "test-fixtures"))]
    pub fn build_entries_bytes(rows: &[(String, PackageFileEntry)]) -> Vec<u8> {
        let mut stream = ByteStream::new();
        for (relative_path, entry) in rows {
            entry.write(&mut stream);
            let mut name_bytes = relative_path.as_bytes().to_vec();
            name_bytes.push(0);
            stream.write::<u32>(name_bytes.len() as u32);
            stream.write_bytes(&name_bytes);
        }
        stream.into_vec()
    }

    /// Obfuscate (and optionally compress) a serialised table region for
    /// test fixtures, appending the trailing CRC32 when `trailing_crc` is
    /// set, mirroring [`Self::parse`] in reverse.
    #[cfg(any(test, feature = "test-fixtures"))]
    pub fn obfuscate_region(
        plain_table_bytes: &[u8],
        build_version_major: u32,
        build_changelist: u32,
        compress: bool,
        trailing_crc: bool,
    ) -> Vec<u8> {
        let body = if compress {
            zlib_compress(plain_table_bytes).expect("zlib compress in test fixture")
        } else {
            plain_table_bytes.to_vec()
        };
        let key = ObfuscationKey::for_file_table(build_version_major, build_changelist);
        let mut obfuscated = body;
        key.apply_xor(&mut obfuscated, 0);

        if trailing_crc {
            let checksum = crc32(&obfuscated);
            let mut stream = ByteStream::from_bytes(obfuscated);
            stream.seek(stream.len()).unwrap();
            stream.write::<u32>(checksum);
            stream.into_vec()
        } else {
            obfuscated
        }
    }
}
