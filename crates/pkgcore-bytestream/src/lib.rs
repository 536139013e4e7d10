//! Growable byte buffer with a read/write cursor (spec §4.2).
//!
//! `ByteStream` is the in-memory representation used everywhere a component
//! needs to serialise or parse a fixed binary layout: archive headers and
//! file tables (`pkgcore-archive`), save blobs (`pkgcore-save`), and HTTP
//! range bodies (`pkgcore-downloader`). It never panics on a bad read or
//! seek — every fallible operation returns a [`ByteStreamError`].

mod error;
mod pod;

pub use error::{ByteStreamError, ByteStreamResult};
pub use pod::Pod;

/// A growable, seekable byte buffer with an explicit read/write cursor.
#[derive(Debug, Clone, Default)]
pub struct ByteStream {
    buf: Vec<u8>,
    pos: usize,
}

impl ByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Wrap existing bytes for reading; cursor starts at 0.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { buf: bytes, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Move the cursor to an absolute offset. The offset may equal `len()`
    /// (a one-past-the-end cursor, valid for an immediately following
    /// write) but not exceed it.
    pub fn seek(&mut self, offset: usize) -> ByteStreamResult<()> {
        if offset > self.buf.len() {
            return Err(ByteStreamError::SeekOutOfBounds {
                offset,
                len: self.buf.len(),
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// Advance the cursor (growing the buffer with zero bytes if needed)
    /// until `position() % alignment == 0`. A no-op if already aligned.
    /// Used to maintain the archive format's 8-byte entry alignment
    /// (spec §3).
    pub fn pad_to(&mut self, alignment: usize) {
        if alignment <= 1 {
            return;
        }
        let remainder = self.pos % alignment;
        if remainder != 0 {
            let padding = alignment - remainder;
            self.write_bytes(&vec![0u8; padding]);
        }
    }

    /// Read exactly `len` raw bytes starting at the cursor, advancing it.
    pub fn read_bytes(&mut self, len: usize) -> ByteStreamResult<&[u8]> {
        let available = self.buf.len().saturating_sub(self.pos);
        if len > available {
            return Err(ByteStreamError::ReadPastEnd {
                requested: len,
                available,
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Append raw bytes at the cursor. If the cursor is before the end of
    /// the buffer this overwrites in place; if at the end it extends the
    /// buffer (the common append-only usage when serialising a header).
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    /// Read a little-endian POD value, advancing the cursor by its size.
    pub fn read<T: Pod>(&mut self) -> ByteStreamResult<T> {
        let bytes = self.read_bytes(T::SIZE)?;
        Ok(T::from_le_bytes(bytes))
    }

    /// Write a little-endian POD value, advancing the cursor by its size.
    pub fn write<T: Pod>(&mut self, value: T) {
        self.write_bytes(&value.to_le_bytes_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut s = ByteStream::new();
        s.write::<u32>(0xdead_beef);
        s.write::<u64>(42);
        s.write_bytes(b"hello");

        s.seek(0).unwrap();
        assert_eq!(s.read::<u32>().unwrap(), 0xdead_beef);
        assert_eq!(s.read::<u64>().unwrap(), 42);
        assert_eq!(s.read_bytes(5).unwrap(), b"hello");
    }

    #[test]
    fn read_past_end_errors_without_panicking() {
        let mut s = ByteStream::from_bytes(vec![1, 2, 3]);
        let err = s.read::<u64>().unwrap_err();
        assert_eq!(
            err,
            ByteStreamError::ReadPastEnd {
                requested: 8,
                available: 3
            }
        );
    }

    #[test]
    fn seek_past_end_errors() {
        let mut s = ByteStream::from_bytes(vec![1, 2, 3]);
        assert!(s.seek(10).is_err());
        assert!(s.seek(3).is_ok());
    }

    #[test]
    fn pad_to_alignment_writes_zero_bytes() {
        let mut s = ByteStream::new();
        s.write_bytes(b"abc");
        s.pad_to(8);
        assert_eq!(s.len(), 8);
        assert_eq!(s.position(), 8);
        s.pad_to(8);
        assert_eq!(s.len(), 8, "already aligned, no-op");
    }

    #[test]
    fn overwrite_in_place_does_not_truncate() {
        let mut s = ByteStream::from_bytes(vec![0u8; 8]);
        s.write::<u32>(1);
        s.seek(0).unwrap();
        s.write::<u32>(2);
        assert_eq!(s.len(), 8);
        s.seek(0).unwrap();
        assert_eq!(s.read::<u32>().unwrap(), 2);
    }

    proptest::proptest! {
        #[test]
        fn u64_round_trip(value: u64) {
            let mut s = ByteStream::new();
            s.write::<u64>(value);
            s.seek(0).unwrap();
            proptest::prop_assert_eq!(s.read::<u64>().unwrap(), value);
        }
    }
}
