//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or decoding a stored object failed.
    #[error("storage read error: {0}")]
    Read(String),

    /// Writing an object failed, including exhausted conditional-write retries.
    #[error("storage write error: {0}")]
    Write(String),

    /// IO error from a backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid object key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Storage backend error.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Read failure with a cause, matching the store contract that decode
    /// failures surface rather than being silently discarded.
    pub fn read(cause: impl Into<String>) -> Self {
        Self::Read(cause.into())
    }

    /// Write failure naming the object that could not be written.
    pub fn write(cause: impl Into<String>) -> Self {
        Self::Write(cause.into())
    }
}
