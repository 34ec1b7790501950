//! Error types for the offline engine.

use crate::action::ActionId;
use harbor_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the cache, queue, or sync controller.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The backing table rejected a write; the previous state is intact.
    #[error("storage write failed for key '{key}': {source}")]
    StorageWriteFailed {
        /// Table key being written.
        key: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },

    /// The backing table could not be read.
    #[error("storage read failed for key '{key}': {source}")]
    StorageReadFailed {
        /// Table key being read.
        key: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },

    /// A stored record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// No live or dead-lettered action has this id.
    #[error("action not found: {0}")]
    ActionNotFound(ActionId),

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Creates a write failure for `key`.
    pub fn write_failed(key: impl Into<String>, source: StorageError) -> Self {
        Self::StorageWriteFailed {
            key: key.into(),
            source,
        }
    }

    /// Creates a read failure for `key`.
    pub fn read_failed(key: impl Into<String>, source: StorageError) -> Self {
        Self::StorageReadFailed {
            key: key.into(),
            source,
        }
    }

    /// Returns true if this error came from the backing table.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            EngineError::StorageWriteFailed { .. } | EngineError::StorageReadFailed { .. }
        )
    }
}
