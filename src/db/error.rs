//! Connection errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Result type for connection setup and lifecycle.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file: {0}")]
    ParseConfig(#[from] serde_json::Error),

    #[error("driver error: {0}")]
    Driver(#[from] StoreError),

    #[error("connection is closed")]
    Closed,
}

impl ConnectionError {
    /// Whether the server could not be reached or rejected the credentials.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ConnectionError::Driver(e) if e.is_connection())
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ConnectionError::InvalidConfig(_)
                | ConnectionError::ReadConfig { .. }
                | ConnectionError::ParseConfig(_)
        )
    }
}

impl From<mongodb::error::Error> for ConnectionError {
    fn from(err: mongodb::error::Error) -> Self {
        ConnectionError::Driver(StoreError::from(err))
    }
}
