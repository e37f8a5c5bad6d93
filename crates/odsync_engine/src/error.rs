//! Error types for the sync engine.

use odsync_protocol::{CodecError, QueueState};
use odsync_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
///
/// Named `EngineResult` so it does not collide with the
/// [`SyncResult`](odsync_protocol::SyncResult) run summary.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Sync attempted while the connectivity signal reports offline.
    #[error("no connection")]
    NoConnection,

    /// Another sync run is already in progress.
    #[error("sync already in progress")]
    SyncInProgress,

    /// Persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport or server failure on dispatch.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the dispatch can be retried.
        retryable: bool,
    },

    /// A remote dispatch exceeded its time bound.
    #[error("remote dispatch timed out")]
    Timeout,

    /// Malformed arguments rejected before persistence.
    #[error("validation error: {0}")]
    Validation(String),

    /// A queue transition was attempted from the wrong state.
    #[error("queue item {queue_id} is {state}, expected {expected}")]
    InvalidState {
        /// Queue item ID.
        queue_id: String,
        /// Current state.
        state: QueueState,
        /// State the transition requires.
        expected: QueueState,
    },

    /// A referenced queue item, operation or conflict does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Storage(StorageError::Unavailable(_)) => true,
            _ => false,
        }
    }
}
