//! Failure guard around store calls.
//!
//! Every repository operation runs its store call through [`guarded`]. A
//! failure is logged with a hint that depends on the operation and the kind
//! of failure, then handed back to the caller as a [`RepositoryError`].

use std::fmt;

use log::{debug, error};

use super::error::{ErrorKind, RepositoryError, RepositoryResult};
use crate::store::StoreResult;

/// The family an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Select,
    Update,
    Delete,
    Index,
    Ping,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Select => "select",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Index => "index",
            Operation::Ping => "ping",
        }
    }

    /// What to check when this operation fails with `kind`.
    pub fn hint(&self, kind: ErrorKind) -> &'static str {
        match (self, kind) {
            (_, ErrorKind::ConnectionFailed) => {
                "check the connection string, the credentials and whether the cluster is reachable"
            }
            (Operation::Insert, ErrorKind::DuplicateKey) => {
                "check that the document does not repeat a unique index value"
            }
            (Operation::Update, ErrorKind::DuplicateKey) => {
                "check that the update does not repeat a unique index value"
            }
            (Operation::Index, ErrorKind::DuplicateKey) => {
                "existing documents repeat the values of the new unique index"
            }
            (_, ErrorKind::DuplicateKey) => "a unique index already holds this value",
            (Operation::Insert | Operation::Update, ErrorKind::ValidationFailed) => {
                "check that the document is valid and below the maximum document size"
            }
            (_, ErrorKind::ValidationFailed) => "check that the parameters are valid and present",
            (_, ErrorKind::NotFound) => "check the database and collection names",
            (_, ErrorKind::Unknown) => {
                "check your permissions for this operation and the cluster infrastructure"
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run a store call, logging and converting any failure.
pub fn guarded<T, F>(operation: Operation, collection: &str, call: F) -> RepositoryResult<T>
where
    F: FnOnce() -> StoreResult<T>,
{
    match call() {
        Ok(value) => {
            debug!("{} on {} succeeded", operation, collection);
            Ok(value)
        }
        Err(source) => {
            let err = RepositoryError::Store { operation, source };
            let kind = err.kind();
            error!(
                "{} on {} failed ({}): {}; {}",
                operation,
                collection,
                kind,
                err,
                operation.hint(kind)
            );
            Err(err)
        }
    }
}
