//! zlib / LZ4 / ZSTD compress and decompress, with optional ZSTD
//! compression-dictionary support (spec §4.1, §6.1).

use crate::error::{CodecError, CodecResult};
use std::io::{Read, Write};

/// Compress `data` with zlib (DEFLATE), default compression level.
pub fn zlib_compress(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CodecError::Zlib(e.to_string()))?;
    encoder.finish().map_err(|e| CodecError::Zlib(e.to_string()))
}

/// Decompress a zlib stream.
pub fn zlib_decompress(data: &[u8], hint_size: usize) -> CodecResult<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(hint_size);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Zlib(e.to_string()))?;
    Ok(out)
}

/// Compress `data` as a single LZ4 block (no frame header), matching the
/// frameless block encoding legacy archive versions expect.
pub fn lz4_compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress(data)
}

/// Decompress an LZ4 block to exactly `decompressed_size` bytes.
pub fn lz4_decompress(data: &[u8], decompressed_size: usize) -> CodecResult<Vec<u8>> {
    lz4_flex::block::decompress(data, decompressed_size).map_err(|e| CodecError::Lz4(e.to_string()))
}

/// Compress `data` with ZSTD, optionally seeded with a precomputed
/// compression dictionary (spec: "Compression dictionary").
pub fn zstd_compress(data: &[u8], dictionary: Option<&[u8]>, level: i32) -> CodecResult<Vec<u8>> {
    let mut encoder = match dictionary {
        Some(dict) => zstd::Encoder::with_dictionary(Vec::new(), level, dict)
            .map_err(|e| CodecError::Zstd(e.to_string()))?,
        None => zstd::Encoder::new(Vec::new(), level).map_err(|e| CodecError::Zstd(e.to_string()))?,
    };
    encoder
        .write_all(data)
        .map_err(|e| CodecError::Zstd(e.to_string()))?;
    encoder.finish().map_err(|e| CodecError::Zstd(e.to_string()))
}

/// Decompress a ZSTD stream, optionally using the same dictionary it was
/// compressed with. The compression-dictionary entry itself is never
/// compressed against itself (spec §4.4): callers must not pass `Some`
/// when decompressing the dictionary entry.
pub fn zstd_decompress(data: &[u8], dictionary: Option<&[u8]>, hint_size: usize) -> CodecResult<Vec<u8>> {
    let mut decoder = match dictionary {
        Some(dict) => {
            zstd::Decoder::with_dictionary(data, dict).map_err(|e| CodecError::Zstd(e.to_string()))?
        }
        None => zstd::Decoder::new(data).map_err(|e| CodecError::Zstd(e.to_string()))?,
    };
    let mut out = Vec::with_capacity(hint_size);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Zstd(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = zlib_compress(&data).unwrap();
        let decompressed = zlib_decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn lz4_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = lz4_compress(&data);
        let decompressed = lz4_decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn zstd_round_trip_without_dictionary() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = zstd_compress(&data, None, 3).unwrap();
        let decompressed = zstd_decompress(&compressed, None, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn zstd_round_trip_with_dictionary() {
        let dictionary = b"common prefix shared across many small files ".repeat(20);
        let data = b"common prefix shared across many small files plus a tail".to_vec();
        let compressed = zstd_compress(&data, Some(&dictionary), 3).unwrap();
        let decompressed = zstd_decompress(&compressed, Some(&dictionary), data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn zstd_decompress_without_matching_dictionary_fails() {
        let dictionary = b"common prefix shared across many small files ".repeat(20);
        let data = b"some content".to_vec();
        let compressed = zstd_compress(&data, Some(&dictionary), 3).unwrap();
        assert!(zstd_decompress(&compressed, None, data.len()).is_err());
    }
}
