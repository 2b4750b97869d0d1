use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::formats::Format;

pub type Result<T> = std::result::Result<T, TractError>;

#[derive(Error, Debug)]
pub enum TractError {
    /// The file does not start with the signature of the requested format.
    #[error("{path}: not a {format} file (signature mismatch)")]
    FormatMismatch { path: PathBuf, format: Format },

    /// Fixed header offsets unreadable, byte order unresolvable, or a header
    /// value out of range.
    #[error("{path}: malformed header: {reason}")]
    MalformedHeader { path: PathBuf, reason: String },

    /// A scan or an iteration ran past end-of-file in the middle of a record.
    #[error("truncated stream at byte {offset}: {reason}")]
    TruncatedStream { offset: u64, reason: String },

    /// A record whose own fields are inconsistent (negative point count,
    /// point index out of range).
    #[error("malformed record at byte {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    #[error("{0}: no supported tractography format detected")]
    UnsupportedExtension(PathBuf),

    #[error("{0}: more than one source maps to this destination")]
    DuplicateDestination(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TractError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TractError::MalformedHeader { path: path.into(), reason: reason.into() }
    }

    pub(crate) fn truncated(offset: u64, reason: impl Into<String>) -> Self {
        TractError::TruncatedStream { offset, reason: reason.into() }
    }

    pub(crate) fn bad_record(offset: u64, reason: impl Into<String>) -> Self {
        TractError::MalformedRecord { offset, reason: reason.into() }
    }

    /// Map an unexpected EOF raised while reading record data to
    /// `TruncatedStream`; every other I/O error passes through unchanged.
    pub(crate) fn from_record_io(err: io::Error, offset: u64) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            TractError::truncated(offset, "end of file inside a record")
        } else {
            TractError::Io(err)
        }
    }
}
