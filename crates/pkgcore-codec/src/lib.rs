//! BlobCodec (spec §4.1): pure compress/decompress, integrity and
//! encryption primitives shared by archives and save blobs. No ambient
//! state — every function takes its key material / dictionary explicitly.

mod compression;
mod crypto;
mod error;
mod integrity;

pub use compression::{
    lz4_compress, lz4_decompress, zlib_compress, zlib_decompress, zstd_compress, zstd_decompress,
};
pub use crypto::{aes_ctr_decrypt, aes_ctr_encrypt};
pub use error::{CodecError, CodecResult};
pub use integrity::{crc32, sha512, verify_crc32};
