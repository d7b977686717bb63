//! Store layer for mongorepo
//!
//! `DocumentStore` is the single seam between the repository and whatever
//! holds the documents. The repository never touches the driver directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Repository<S: DocumentStore>               │
//! │        (CRUD bound to one collection, guard, errors)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌─────────────┐               ┌─────────────┐
//!        │ MongoStore  │               │ MemoryStore │
//!        │  (driver)   │               │ (in-process)│
//!        └─────────────┘               └─────────────┘
//!                                             │
//!                              ┌──────────────┼──────────────┐
//!                              ▼              ▼              ▼
//!                        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!                        │  filter  │   │  update  │   │  query   │
//!                        └──────────┘   └──────────┘   └──────────┘
//! ```

mod error;
pub mod filter;
mod memory;
mod mongo;
pub mod query;
pub mod update;

use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::{Bson, Document};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub(crate) use mongo::SharedDatabase;
pub use mongo::MongoStore;

/// Maximum size of a single BSON document accepted by the server.
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Options shared by `find` and `find_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Fields to include (`1`) or exclude (`0`).
    pub projection: Option<Document>,
    /// Sort specification, `{field: 1 | -1}` in priority order.
    pub sort: Option<Document>,
    /// Maximum number of documents returned.
    pub limit: Option<i64>,
    /// Number of matching documents skipped before returning.
    pub skip: Option<u64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projection.
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set the sort specification.
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the result limit.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the number of documents to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Counts reported by an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents whose content actually changed.
    pub modified: u64,
}

/// Definition of an index to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    /// Indexed fields with their direction, in order.
    pub keys: Document,
    /// Explicit index name; the store derives one when absent.
    pub name: Option<String>,
    /// Reject documents repeating the indexed values.
    pub unique: bool,
    /// Remove documents once the indexed date is older than this.
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name the server would give this index: `field_dir` pairs joined by `_`.
    pub fn default_name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, dir)| format!("{}_{}", field, direction_label(dir)))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// The explicit name, or the default one.
    pub fn resolved_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.default_name())
    }
}

fn direction_label(dir: &Bson) -> String {
    match dir {
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => (*n as i64).to_string(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A backend holding collections of documents.
///
/// The collection name travels with every call so a handle can never point
/// at a stale collection.
pub trait DocumentStore: Send + Sync {
    /// Insert one document, returning its `_id`.
    fn insert_one(&self, collection: &str, document: Document) -> StoreResult<Bson>;

    /// Insert several documents, returning their `_id`s in input order.
    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<Vec<Bson>>;

    /// All documents matching `filter`.
    fn find(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Vec<Document>>;

    /// The first document matching `filter`, honouring sort and skip.
    fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Option<Document>>;

    fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateOutcome>;

    fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateOutcome>;

    /// Delete the first match; returns 0 or 1.
    fn delete_one(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    fn count(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    /// Create an index, returning its name.
    fn create_index(&self, collection: &str, index: IndexSpec) -> StoreResult<String>;

    /// Round-trip to the backend.
    fn ping(&self) -> StoreResult<()>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn insert_one(&self, collection: &str, document: Document) -> StoreResult<Bson> {
        (**self).insert_one(collection, document)
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<Vec<Bson>> {
        (**self).insert_many(collection, documents)
    }

    fn find(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Vec<Document>> {
        (**self).find(collection, filter, options)
    }

    fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Option<Document>> {
        (**self).find_one(collection, filter, options)
    }

    fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        (**self).update_one(collection, filter, update)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        (**self).update_many(collection, filter, update)
    }

    fn delete_one(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        (**self).delete_one(collection, filter)
    }

    fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        (**self).delete_many(collection, filter)
    }

    fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        (**self).count(collection, filter)
    }

    fn create_index(&self, collection: &str, index: IndexSpec) -> StoreResult<String> {
        (**self).create_index(collection, index)
    }

    fn ping(&self) -> StoreResult<()> {
        (**self).ping()
    }
}
