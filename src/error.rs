//! Error types for the file gateway

use thiserror::Error;

use crate::domain::FileId;
use crate::storage::StorageError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the gateway pipelines and their collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing request fields, rejected before any resource is touched
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown file identifier
    #[error("File not found: {0}")]
    NotFound(FileId),

    /// Backend communication, protocol or timeout failure
    #[error("Storage failure on backend '{backend}': {source}")]
    Storage {
        backend: String,
        #[source]
        source: StorageError,
    },

    /// Empty registry, duplicate or unresolvable backend name, bad pool size
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata store failure
    #[error("Metadata store error: {0}")]
    Metadata(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a backend error with the name of the backend that raised it.
    pub fn storage(backend: impl Into<String>, source: StorageError) -> Self {
        Error::Storage {
            backend: backend.into(),
            source,
        }
    }

    /// True for the typed miss outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True for caller-side validation failures.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}
