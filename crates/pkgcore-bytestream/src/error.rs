//! Error type for [`crate::ByteStream`] operations.

use thiserror::Error;

pub type ByteStreamResult<T> = Result<T, ByteStreamError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ByteStreamError {
    #[error("read past end of stream: requested {requested} bytes, {available} available")]
    ReadPastEnd { requested: usize, available: usize },

    #[error("seek out of bounds: offset {offset} exceeds length {len}")]
    SeekOutOfBounds { offset: usize, len: usize },
}
