//! Connection management and the interactive shell.
//!
//! [`connect`] turns a [`ConnectionConfig`] into a [`Connection`], which
//! hands out stores and repositories bound to the selected database.

mod config;
mod connection;
mod error;
mod repl;

pub use config::{ConnectionConfig, ENV_PREFIX};
pub use connection::{connect, Connection};
pub use error::{ConnectionError, ConnectionResult};
pub use repl::{Repl, ReplConfig, ReplError, ReplResult, Reply};
