//! Repository errors.

use thiserror::Error;

use super::guard::Operation;
use crate::store::StoreError;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Coarse classification of a failure, for callers that only need to know
/// what went wrong and not the driver's details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server is unreachable, rejected the credentials or the handle was closed.
    ConnectionFailed,
    /// The addressed document or namespace does not exist.
    NotFound,
    /// The caller's input was rejected before or by the server.
    ValidationFailed,
    /// A unique index already holds the value.
    DuplicateKey,
    /// Anything else the server reported.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::NotFound => "not found",
            ErrorKind::ValidationFailed => "validation failed",
            ErrorKind::DuplicateKey => "duplicate key",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{operation} failed: {source}")]
    Store {
        operation: Operation,
        #[source]
        source: StoreError,
    },

    #[error("invalid object id {0:?}: expected 24 hex characters")]
    InvalidObjectId(String),

    #[error("invalid sort direction {0:?}: use 1 (ascending) or -1 (descending)")]
    InvalidDirection(String),

    #[error("invalid time unit {0:?}: use seconds, minutes, hours or days")]
    InvalidTimeUnit(String),

    #[error("invalid update operator {0:?}: use $set, $unset or $inc")]
    InvalidUpdateOperator(String),

    #[error("increment for {field:?} must be an int or a float")]
    NonNumericIncrement { field: String },

    #[error("index needs at least one key")]
    EmptyIndexKeys,

    #[error("ttl of {seconds} seconds exceeds the maximum of {max} seconds")]
    TtlTooLong { seconds: u64, max: u64 },

    #[error("no document in {collection} matches {filter}")]
    NotFound { collection: String, filter: String },
}

impl RepositoryError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::Store { source, .. } => match source {
                StoreError::Connection(_) | StoreError::Authentication(_) | StoreError::Closed => {
                    ErrorKind::ConnectionFailed
                }
                StoreError::NamespaceNotFound(_) => ErrorKind::NotFound,
                StoreError::DuplicateKey(_) => ErrorKind::DuplicateKey,
                StoreError::InvalidArgument(_)
                | StoreError::DocumentTooLarge { .. }
                | StoreError::Serialization(_) => ErrorKind::ValidationFailed,
                StoreError::OperationFailed(_) => ErrorKind::Unknown,
            },
            RepositoryError::NotFound { .. } => ErrorKind::NotFound,
            RepositoryError::InvalidObjectId(_)
            | RepositoryError::InvalidDirection(_)
            | RepositoryError::InvalidTimeUnit(_)
            | RepositoryError::InvalidUpdateOperator(_)
            | RepositoryError::NonNumericIncrement { .. }
            | RepositoryError::EmptyIndexKeys
            | RepositoryError::TtlTooLong { .. } => ErrorKind::ValidationFailed,
        }
    }

    /// The operation that failed, when the failure came from the store.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            RepositoryError::Store { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        self.kind() == ErrorKind::ConnectionFailed
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
