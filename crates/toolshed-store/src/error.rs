//! Errors raised by the persistent stores.

use std::path::PathBuf;

use thiserror::Error;
use toolshed_core::ToolName;

use crate::version::FormatVersion;

/// Errors that can occur while reading or writing a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem I/O failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File contents could not be (de)serialized
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The exclusive lock on the store could not be taken
    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was written by an incompatible format version
    #[error("Unsupported format version in {path}: got {found}, expected {expected}")]
    VersionMismatch {
        path: PathBuf,
        found: FormatVersion,
        expected: FormatVersion,
    },

    /// No record with this name
    #[error("Tool not found: {0}")]
    NotFound(ToolName),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error means "no such record".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
