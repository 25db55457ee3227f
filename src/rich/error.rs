//! Error types for the index layer.

use crate::core::IdentifierError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by index backends.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The backing engine failed or could not be reached.
    #[error("Index backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A staging file could not be parsed.
    #[error("Malformed staging file {}, line {line}: {reason}", .path.display())]
    MalformedStagingFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A stored row could not be decoded back into a record.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        IndexError::BackendUnavailable(format!("sqlite: {}", err))
    }
}

impl From<r2d2::Error> for IndexError {
    fn from(err: r2d2::Error) -> Self {
        IndexError::BackendUnavailable(format!("connection pool: {}", err))
    }
}

impl From<rocksdb::Error> for IndexError {
    fn from(err: rocksdb::Error) -> Self {
        IndexError::BackendUnavailable(format!("rocksdb: {}", err))
    }
}

impl From<IdentifierError> for IndexError {
    fn from(err: IdentifierError) -> Self {
        IndexError::InvalidRecord(err.to_string())
    }
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
