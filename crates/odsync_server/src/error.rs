//! Error types for the reference server.

use odsync_protocol::CodecError;
use odsync_storage::StorageError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the reference server.
///
/// A stale write is not an error; it is answered with a conflict response.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed write.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Payload carries more fields than the server accepts.
    #[error("payload too large: {fields} fields, limit {max}")]
    PayloadTooLarge {
        /// Fields in the payload.
        fields: usize,
        /// Configured limit.
        max: usize,
    },

    /// Record persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A persisted record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ServerError {
    /// Returns true if the client sent something the server will never accept.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_) | ServerError::PayloadTooLarge { .. }
        )
    }

    /// Returns true if the failure is on the server side and a retry may succeed.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Storage(_) | ServerError::Codec(_))
    }
}
