//! MongoDB-backed document store.
//!
//! Thin forwarding layer over the driver's blocking API. The database handle
//! is shared with the `Connection` that produced the store, so closing the
//! connection closes every store derived from it.

use std::sync::Arc;

use log::{debug, trace};
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{FindOneOptions, FindOptions, IndexOptions};
use mongodb::sync::{Collection, Database};
use mongodb::IndexModel;
use parking_lot::RwLock;

use super::error::{StoreError, StoreResult};
use super::{DocumentStore, IndexSpec, QueryOptions, UpdateOutcome};

/// Database handle shared between a connection and its stores.
pub(crate) type SharedDatabase = Arc<RwLock<Option<Database>>>;

/// A `DocumentStore` over one MongoDB database.
#[derive(Clone)]
pub struct MongoStore {
    database: SharedDatabase,
    name: String,
}

impl MongoStore {
    /// Wrap a driver database handle.
    pub fn new(database: Database) -> Self {
        let name = database.name().to_string();
        Self {
            database: Arc::new(RwLock::new(Some(database))),
            name,
        }
    }

    pub(crate) fn shared(database: SharedDatabase, name: impl Into<String>) -> Self {
        Self {
            database,
            name: name.into(),
        }
    }

    /// Name of the database this store writes to.
    pub fn database_name(&self) -> &str {
        &self.name
    }

    /// Whether the underlying handle is still open.
    pub fn is_open(&self) -> bool {
        self.database.read().is_some()
    }

    /// Names of the collections in the database.
    pub fn collection_names(&self) -> StoreResult<Vec<String>> {
        let db = self.handle()?;
        Ok(db.list_collection_names().run()?)
    }

    fn handle(&self) -> StoreResult<Database> {
        self.database.read().clone().ok_or(StoreError::Closed)
    }

    // resolved on every call so a handle never outlives its collection
    fn collection(&self, name: &str) -> StoreResult<Collection<Document>> {
        trace!("resolving collection {}.{}", self.name, name);
        Ok(self.handle()?.collection::<Document>(name))
    }
}

impl std::fmt::Debug for MongoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStore")
            .field("database", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

impl DocumentStore for MongoStore {
    fn insert_one(&self, collection: &str, document: Document) -> StoreResult<Bson> {
        let result = self.collection(collection)?.insert_one(document).run()?;
        Ok(result.inserted_id)
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<Vec<Bson>> {
        let result = self.collection(collection)?.insert_many(documents).run()?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(i, _)| *i);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    fn find(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Vec<Document>> {
        let mut find_options = FindOptions::default();
        find_options.projection = options.projection;
        find_options.sort = options.sort;
        find_options.limit = options.limit;
        find_options.skip = options.skip;

        let cursor = self
            .collection(collection)?
            .find(filter)
            .with_options(find_options)
            .run()?;
        let documents = cursor.collect::<Result<Vec<_>, _>>()?;
        debug!("{}.{}: fetched {} document(s)", self.name, collection, documents.len());
        Ok(documents)
    }

    fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Option<Document>> {
        let mut find_options = FindOneOptions::default();
        find_options.projection = options.projection;
        find_options.sort = options.sort;
        find_options.skip = options.skip;

        Ok(self
            .collection(collection)?
            .find_one(filter)
            .with_options(find_options)
            .run()?)
    }

    fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        let result = self.collection(collection)?.update_one(filter, update).run()?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        let result = self.collection(collection)?.update_many(filter, update).run()?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    fn delete_one(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        Ok(self.collection(collection)?.delete_one(filter).run()?.deleted_count)
    }

    fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        Ok(self.collection(collection)?.delete_many(filter).run()?.deleted_count)
    }

    fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        Ok(self.collection(collection)?.count_documents(filter).run()?)
    }

    fn create_index(&self, collection: &str, index: IndexSpec) -> StoreResult<String> {
        let mut options = IndexOptions::default();
        options.name = index.name;
        options.unique = index.unique.then_some(true);
        options.expire_after = index.expire_after;

        let model = IndexModel::builder()
            .keys(index.keys)
            .options(options)
            .build();
        let result = self.collection(collection)?.create_index(model).run()?;
        Ok(result.index_name)
    }

    fn ping(&self) -> StoreResult<()> {
        self.handle()?.run_command(doc! { "ping": 1 }).run()?;
        Ok(())
    }
}
