use std::io;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures while reading the plaintext index stream.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// The line does not split into `offset:id:title`
    #[error("bad record on line {line}")]
    BadRecord { line: u64 },

    #[error("invalid offset on line {line}: {detail}")]
    InvalidOffset { line: u64, detail: String },

    #[error("{context} parse failed on line {line}")]
    ParseFailed {
        context: &'static str,
        line: u64,
        #[source]
        source: ParseIntError,
    },

    #[error("failed to read index stream")]
    Io(#[source] Arc<io::Error>),
}

/// Failures while decoding pages out of the archive.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("parse failed ({context}): {message}")]
    ParseFailed {
        context: &'static str,
        message: String,
    },

    #[error("failed to {context} page archive")]
    Io {
        context: &'static str,
        #[source]
        source: Arc<io::Error>,
    },
}

impl DecodeError {
    pub(crate) fn parse(context: &'static str, message: impl Into<String>) -> Self {
        DecodeError::ParseFailed {
            context,
            message: message.into(),
        }
    }

    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        DecodeError::Io {
            context,
            source: Arc::new(source),
        }
    }
}

/// Failures inside a page sink or page source.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("failed to encode or decode page")]
    Codec(#[source] Arc<bincode::Error>),

    #[error("corrupt record in {path:?}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("{0} is already closed")]
    Closed(&'static str),
}

impl SinkError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        SinkError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }
}

impl From<bincode::Error> for SinkError {
    fn from(e: bincode::Error) -> Self {
        SinkError::Codec(Arc::new(e))
    }
}

/// Error surfaced at the crate boundary.
///
/// Cloneable so a pipeline can hand its first captured failure to every
/// subsequent caller.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid file {path:?}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to spawn {0} thread")]
    Spawn(&'static str, #[source] Arc<io::Error>),

    #[error("{0} thread panicked")]
    Panicked(&'static str),

    #[error("pipeline cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn invalid_file(path: &Path, reason: impl Into<String>) -> Self {
        Error::InvalidFile {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
