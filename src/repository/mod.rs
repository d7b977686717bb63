//! Collection-bound CRUD on top of a [`DocumentStore`](crate::store::DocumentStore).

pub mod error;
pub mod guard;
pub mod options;
pub mod repository;

pub use error::{ErrorKind, RepositoryError, RepositoryResult};
pub use guard::{guarded, Operation};
pub use options::{SortOrder, TimeUnit, UpdateOperator};
pub use repository::{parse_object_id, Repository};
