//! Seekable, size-known read streams into archive entries (spec §4.4).
//! Multiple streams may be open simultaneously; the archive keeps an
//! active-stream counter so the read side never needs per-read locks
//! (spec §5).

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A handle into one entry's fully-decoded (de-obfuscated, decompressed)
/// bytes. Dropping it decrements the owning archive's active-stream count.
pub struct ReadStream {
    data: Vec<u8>,
    pos: usize,
    active_streams: Arc<AtomicUsize>,
}

impl ReadStream {
    pub(crate) fn new(data: Vec<u8>, active_streams: Arc<AtomicUsize>) -> Self {
        active_streams.fetch_add(1, Ordering::SeqCst);
        Self {
            data,
            pos: 0,
            active_streams,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for ReadStream {
    fn drop(&mut self) {
        self.active_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Read for ReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len() - self.pos;
        let to_copy = available.min(buf.len());
        buf[..to_copy].copy_from_slice(&self.data[self.pos..self.pos + to_copy]);
        self.pos += to_copy;
        Ok(to_copy)
    }
}

impl Seek for ReadStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.data.len() as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 || new_pos as usize > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek out of bounds"));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_stream_count_tracks_open_and_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _s1 = ReadStream::new(vec![1, 2, 3], counter.clone());
            assert_eq!(counter.load(Ordering::SeqCst), 1);
            let _s2 = ReadStream::new(vec![4, 5], counter.clone());
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn read_and_seek_behave() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut stream = ReadStream::new(vec![1, 2, 3, 4, 5], counter);
        let mut buf = [0u8; 2];
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        stream.seek(SeekFrom::Start(4)).unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
    }
}
