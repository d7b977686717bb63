//! Store layer error types
//!
//! Every failure a `DocumentStore` can report is classified here. Driver
//! errors are folded into these variants so the layers above never match on
//! `mongodb::error::ErrorKind` directly.

use mongodb::error::{ErrorKind, WriteFailure};
use thiserror::Error;

/// server code for a duplicate key on a unique index
pub(crate) const DUPLICATE_KEY_CODE: i32 = 11000;

/// server code for a missing database or collection
const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

/// server codes for oversized documents
const DOCUMENT_TOO_LARGE_CODES: &[i32] = &[10334, 17419, 17420];

/// the main error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// the server could not be reached or the connection dropped
    #[error("connection failed: {0}")]
    Connection(String),

    /// credentials were rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// a unique index (or `_id`) already holds this value
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// filter, update, projection or options were malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// the document exceeds the maximum BSON size
    #[error("document too large: {size} bytes exceeds the {limit} byte limit")]
    DocumentTooLarge { size: usize, limit: usize },

    /// the database or collection does not exist
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// the server refused or failed the operation
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// BSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// the owning connection has been closed
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// check if this error means the server is unreachable or gone
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Authentication(_) | StoreError::Closed
        )
    }

    /// check if this error is a unique-constraint violation
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_))
    }

    /// check if this error was caused by the caller's input
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidArgument(_)
                | StoreError::DocumentTooLarge { .. }
                | StoreError::Serialization(_)
        )
    }

    fn from_code(code: i32, message: String) -> Self {
        match code {
            DUPLICATE_KEY_CODE => StoreError::DuplicateKey(message),
            NAMESPACE_NOT_FOUND_CODE => StoreError::NamespaceNotFound(message),
            c if DOCUMENT_TOO_LARGE_CODES.contains(&c) => StoreError::InvalidArgument(message),
            _ => StoreError::OperationFailed(message),
        }
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        let message = err.to_string();

        match *err.kind {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. } => StoreError::Connection(message),
            ErrorKind::Authentication { .. } => StoreError::Authentication(message),
            ErrorKind::InvalidArgument { .. } => StoreError::InvalidArgument(message),
            ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
                StoreError::Serialization(message)
            }
            ErrorKind::Write(WriteFailure::WriteError(ref write)) => {
                StoreError::from_code(write.code, message)
            }
            ErrorKind::Command(ref command) => StoreError::from_code(command.code, message),
            // insert_many reports per-document failures in a batch error
            _ if message.contains("E11000") => StoreError::DuplicateKey(message),
            _ => StoreError::OperationFailed(message),
        }
    }
}

/// result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
