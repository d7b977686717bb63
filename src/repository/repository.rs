//! CRUD operations bound to one collection.

use log::info;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, Document};

use super::error::{RepositoryError, RepositoryResult};
use super::guard::{guarded, Operation};
use super::options::{SortOrder, TimeUnit, UpdateOperator};
use crate::store::{DocumentStore, IndexSpec, QueryOptions, StoreResult};

/// Largest `expireAfterSeconds` the server stores (a 32-bit int).
pub const MAX_TTL_SECONDS: u64 = i32::MAX as u64;

/// Create, read, update and delete documents of a single collection.
///
/// The collection is resolved by the store on every call, so a repository
/// never holds a stale collection handle.
#[derive(Debug, Clone)]
pub struct Repository<S> {
    store: S,
    collection: String,
}

impl<S: DocumentStore> Repository<S> {
    /// Bind a store to a collection.
    pub fn new(store: S, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Name of the collection this repository works on.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Same store, different collection.
    pub fn with_collection(&self, collection: impl Into<String>) -> Self
    where
        S: Clone,
    {
        Self::new(self.store.clone(), collection)
    }

    fn guard<T>(
        &self,
        operation: Operation,
        call: impl FnOnce(&S, &str) -> StoreResult<T>,
    ) -> RepositoryResult<T> {
        guarded(operation, &self.collection, || call(&self.store, &self.collection))
    }

    // ---- create ----

    /// Insert a document, returning it with its `_id`.
    pub fn create(&self, mut document: Document) -> RepositoryResult<Document> {
        let id = self.guard(Operation::Insert, |s, c| s.insert_one(c, document.clone()))?;
        if !document.contains_key("_id") {
            document = with_leading_id(document, id);
        }
        Ok(document)
    }

    /// Insert several documents, returning them with their `_id`s.
    pub fn create_many(&self, documents: Vec<Document>) -> RepositoryResult<Vec<Document>> {
        let ids = self.guard(Operation::Insert, |s, c| s.insert_many(c, documents.clone()))?;
        Ok(documents
            .into_iter()
            .zip(ids)
            .map(|(doc, id)| {
                if doc.contains_key("_id") {
                    doc
                } else {
                    with_leading_id(doc, id)
                }
            })
            .collect())
    }

    // ---- read ----

    /// Every document matching `filter`.
    pub fn read(&self, filter: Document) -> RepositoryResult<Vec<Document>> {
        self.read_with(filter, QueryOptions::new())
    }

    /// Every document matching `filter`, shaped by `options`.
    pub fn read_with(
        &self,
        filter: Document,
        options: QueryOptions,
    ) -> RepositoryResult<Vec<Document>> {
        self.guard(Operation::Select, |s, c| s.find(c, filter, options))
    }

    /// The first document matching `filter`.
    pub fn read_one(&self, filter: Document) -> RepositoryResult<Option<Document>> {
        self.read_one_with(filter, QueryOptions::new())
    }

    pub fn read_one_with(
        &self,
        filter: Document,
        options: QueryOptions,
    ) -> RepositoryResult<Option<Document>> {
        self.guard(Operation::Select, |s, c| s.find_one(c, filter, options))
    }

    /// Matching documents ordered by `order_by`, optionally projected.
    pub fn read_sorted<K: AsRef<str>>(
        &self,
        filter: Document,
        order_by: &[(K, SortOrder)],
        projection: Option<Document>,
    ) -> RepositoryResult<Vec<Document>> {
        let options = QueryOptions {
            projection,
            sort: Some(SortOrder::to_document(order_by)),
            ..QueryOptions::default()
        };
        self.read_with(filter, options)
    }

    /// The document whose `_id` is the ObjectId spelled by `id`.
    pub fn read_by_id(&self, id: &str, projection: Option<Document>) -> RepositoryResult<Document> {
        let oid = parse_object_id(id)?;
        let filter = doc! { "_id": oid };
        let options = QueryOptions {
            projection,
            ..QueryOptions::default()
        };

        self.read_one_with(filter.clone(), options)?
            .ok_or_else(|| RepositoryError::NotFound {
                collection: self.collection.clone(),
                filter: filter.to_string(),
            })
    }

    /// Documents matching any of `filters`.
    pub fn read_any<K: AsRef<str>>(
        &self,
        filters: Vec<Document>,
        projection: Option<Document>,
        order_by: Option<&[(K, SortOrder)]>,
    ) -> RepositoryResult<Vec<Document>> {
        let branches: Vec<Bson> = filters.into_iter().map(Bson::Document).collect();
        let options = QueryOptions {
            projection,
            sort: order_by.map(SortOrder::to_document),
            ..QueryOptions::default()
        };
        self.read_with(doc! { "$or": branches }, options)
    }

    /// Number of documents matching `filter`.
    pub fn count(&self, filter: Document) -> RepositoryResult<u64> {
        self.guard(Operation::Select, |s, c| s.count(c, filter))
    }

    // ---- update ----

    /// Set `changes` on every matching document; returns how many changed.
    pub fn update(&self, filter: Document, changes: Document) -> RepositoryResult<u64> {
        self.update_with(filter, UpdateOperator::Set, changes)
    }

    /// Set `changes` on the first matching document.
    pub fn update_one(&self, filter: Document, changes: Document) -> RepositoryResult<u64> {
        self.update_one_with(filter, UpdateOperator::Set, changes)
    }

    /// Apply `operator` to every matching document.
    ///
    /// A document already holding the requested values is matched but not
    /// counted as modified.
    pub fn update_with(
        &self,
        filter: Document,
        operator: UpdateOperator,
        properties: Document,
    ) -> RepositoryResult<u64> {
        if operator == UpdateOperator::Inc {
            check_increments(&properties)?;
        }
        let update = operator.wrap(properties);
        let outcome = self.guard(Operation::Update, |s, c| s.update_many(c, filter, update))?;
        Ok(outcome.modified)
    }

    pub fn update_one_with(
        &self,
        filter: Document,
        operator: UpdateOperator,
        properties: Document,
    ) -> RepositoryResult<u64> {
        if operator == UpdateOperator::Inc {
            check_increments(&properties)?;
        }
        let update = operator.wrap(properties);
        let outcome = self.guard(Operation::Update, |s, c| s.update_one(c, filter, update))?;
        Ok(outcome.modified)
    }

    /// Add (or subtract) numbers on every matching document.
    pub fn increment(&self, filter: Document, increments: Document) -> RepositoryResult<u64> {
        self.update_with(filter, UpdateOperator::Inc, increments)
    }

    // ---- delete ----

    /// Delete every matching document; returns how many were deleted.
    pub fn delete(&self, filter: Document) -> RepositoryResult<u64> {
        self.guard(Operation::Delete, |s, c| s.delete_many(c, filter))
    }

    /// Delete the first matching document.
    pub fn delete_one(&self, filter: Document) -> RepositoryResult<u64> {
        self.guard(Operation::Delete, |s, c| s.delete_one(c, filter))
    }

    // ---- indexes ----

    /// Create a (compound) index over `keys`; returns its name.
    pub fn create_index<K: AsRef<str>>(
        &self,
        keys: &[(K, SortOrder)],
        unique: bool,
    ) -> RepositoryResult<String> {
        if keys.is_empty() {
            return Err(RepositoryError::EmptyIndexKeys);
        }
        let spec = IndexSpec::new(SortOrder::to_document(keys)).unique(unique);
        let name = self.guard(Operation::Index, |s, c| s.create_index(c, spec))?;
        info!("index {} ready on {}", name, self.collection);
        Ok(name)
    }

    /// Create a TTL index: documents whose `field` holds a date older than
    /// `amount` `unit`s are removed by the database.
    pub fn create_ttl_index(
        &self,
        field: &str,
        amount: u64,
        unit: TimeUnit,
        order: SortOrder,
    ) -> RepositoryResult<String> {
        let ttl = unit.times(amount);
        if ttl.as_secs() > MAX_TTL_SECONDS {
            return Err(RepositoryError::TtlTooLong {
                seconds: ttl.as_secs(),
                max: MAX_TTL_SECONDS,
            });
        }
        let spec = IndexSpec::new(SortOrder::to_document(&[(field, order)])).expire_after(ttl);
        let name = self.guard(Operation::Index, |s, c| s.create_index(c, spec))?;
        info!(
            "ttl index {} ready on {} ({} {:?})",
            name, self.collection, amount, unit
        );
        Ok(name)
    }

    /// Round-trip to the store.
    pub fn ping(&self) -> RepositoryResult<()> {
        self.guard(Operation::Ping, |s, _| s.ping())
    }
}

/// Parse a 24-hex ObjectId string.
pub fn parse_object_id(id: &str) -> RepositoryResult<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| RepositoryError::InvalidObjectId(id.to_string()))
}

fn with_leading_id(document: Document, id: Bson) -> Document {
    let mut out = Document::new();
    out.insert("_id", id);
    for (k, v) in document {
        out.insert(k, v);
    }
    out
}

fn check_increments(increments: &Document) -> RepositoryResult<()> {
    for (field, value) in increments {
        if !matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) {
            return Err(RepositoryError::NonNumericIncrement {
                field: field.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ErrorKind;
    use crate::store::MemoryStore;

    fn repo() -> Repository<MemoryStore> {
        Repository::new(MemoryStore::new(), "people")
    }

    fn seeded() -> Repository<MemoryStore> {
        let repo = repo();
        repo.create_many(vec![
            doc! { "name": "pedro", "age": 31, "city": "Recife" },
            doc! { "name": "ana", "age": 25, "city": "Natal" },
            doc! { "name": "bruno", "age": 25, "city": "Recife" },
        ])
        .unwrap();
        repo
    }

    #[test]
    fn test_create_then_read_back() {
        let repo = repo();
        let created = repo.create(doc! { "name": "pedro", "cpf": "123" }).unwrap();
        let id = created.get_object_id("_id").unwrap();

        let found = repo.read(doc! { "cpf": "123" }).unwrap();
        assert_eq!(found, vec![created.clone()]);

        let by_id = repo.read_by_id(&id.to_hex(), None).unwrap();
        assert_eq!(by_id.get_str("name").unwrap(), "pedro");
    }

    #[test]
    fn test_create_keeps_caller_id() {
        let repo = repo();
        let created = repo.create(doc! { "_id": "custom", "name": "ana" }).unwrap();
        assert_eq!(created, doc! { "_id": "custom", "name": "ana" });
    }

    #[test]
    fn test_create_many_returns_ids_in_order() {
        let repo = repo();
        let created = repo
            .create_many(vec![doc! { "n": 1 }, doc! { "_id": 7, "n": 2 }])
            .unwrap();
        assert!(matches!(created[0].get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(created[1].get("_id"), Some(&Bson::Int32(7)));
        assert_eq!(repo.count(doc! {}).unwrap(), 2);
    }

    #[test]
    fn test_update_changes_only_targeted_fields() {
        let repo = seeded();
        let modified = repo
            .update(doc! { "name": "pedro" }, doc! { "city": "Olinda" })
            .unwrap();
        assert_eq!(modified, 1);

        let pedro = repo.read_one(doc! { "name": "pedro" }).unwrap().unwrap();
        assert_eq!(pedro.get_str("city").unwrap(), "Olinda");
        assert_eq!(pedro.get_i32("age").unwrap(), 31);

        let others = repo.read(doc! { "city": "Recife" }).unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].get_str("name").unwrap(), "bruno");
    }

    #[test]
    fn test_update_reports_zero_when_nothing_changes() {
        let repo = seeded();
        assert_eq!(repo.update(doc! { "name": "pedro" }, doc! { "age": 31 }).unwrap(), 0);
        assert_eq!(repo.update(doc! { "name": "nobody" }, doc! { "age": 1 }).unwrap(), 0);
    }

    #[test]
    fn test_update_one_touches_first_match() {
        let repo = seeded();
        let modified = repo
            .update_one(doc! { "age": 25 }, doc! { "flag": true })
            .unwrap();
        assert_eq!(modified, 1);
        assert_eq!(repo.count(doc! { "flag": true }).unwrap(), 1);
    }

    #[test]
    fn test_unset_operator() {
        let repo = seeded();
        repo.update_with(doc! {}, UpdateOperator::Unset, doc! { "city": "" })
            .unwrap();
        assert_eq!(repo.count(doc! { "city": { "$exists": true } }).unwrap(), 0);
    }

    #[test]
    fn test_increment() {
        let repo = seeded();
        let modified = repo
            .increment(doc! { "city": "Recife" }, doc! { "age": 1, "visits": 2.5 })
            .unwrap();
        assert_eq!(modified, 2);

        let bruno = repo.read_one(doc! { "name": "bruno" }).unwrap().unwrap();
        assert_eq!(bruno.get_i32("age").unwrap(), 26);
        assert_eq!(bruno.get_f64("visits").unwrap(), 2.5);
    }

    #[test]
    fn test_increment_rejects_non_numbers() {
        let repo = seeded();
        let err = repo
            .increment(doc! {}, doc! { "age": "1" })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(err.operation().is_none());
        assert_eq!(repo.count(doc! { "age": 25 }).unwrap(), 2);
    }

    #[test]
    fn test_delete_makes_record_unreadable() {
        let repo = seeded();
        assert_eq!(repo.delete_one(doc! { "name": "ana" }).unwrap(), 1);
        assert!(repo.read(doc! { "name": "ana" }).unwrap().is_empty());

        assert_eq!(repo.delete(doc! { "city": "Recife" }).unwrap(), 2);
        assert_eq!(repo.count(doc! {}).unwrap(), 0);
        assert_eq!(repo.delete(doc! { "name": "ghost" }).unwrap(), 0);
    }

    #[test]
    fn test_read_sorted_with_projection() {
        let repo = seeded();
        let rows = repo
            .read_sorted(
                doc! {},
                &[("age", SortOrder::Ascending), ("name", SortOrder::Descending)],
                Some(doc! { "_id": 0, "name": 1 }),
            )
            .unwrap();
        assert_eq!(
            rows,
            vec![
                doc! { "name": "bruno" },
                doc! { "name": "ana" },
                doc! { "name": "pedro" },
            ]
        );
    }

    #[test]
    fn test_read_any() {
        let repo = seeded();
        let rows = repo
            .read_any(
                vec![doc! { "name": "ana" }, doc! { "age": { "$gt": 30 } }],
                Some(doc! { "name": 1, "_id": 0 }),
                Some(&[("name", SortOrder::Ascending)][..]),
            )
            .unwrap();
        assert_eq!(rows, vec![doc! { "name": "ana" }, doc! { "name": "pedro" }]);

        let err = repo
            .read_any::<&str>(Vec::new(), None, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[test]
    fn test_read_by_id_errors() {
        let repo = seeded();
        let err = repo.read_by_id("not-an-id", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        let err = repo
            .read_by_id(&ObjectId::new().to_hex(), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_duplicate_key_kind() {
        let repo = repo();
        repo.create_index(&[("cpf", SortOrder::Ascending)], true).unwrap();
        repo.create(doc! { "cpf": "1" }).unwrap();

        let err = repo.create(doc! { "cpf": "1" }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert_eq!(err.operation(), Some(Operation::Insert));
    }

    #[test]
    fn test_create_index() {
        let repo = repo();
        let name = repo
            .create_index(&[("name", SortOrder::Descending), ("age", SortOrder::Ascending)], false)
            .unwrap();
        assert_eq!(name, "name_-1_age_1");

        let err = repo.create_index::<&str>(&[], false).unwrap_err();
        assert!(matches!(err, RepositoryError::EmptyIndexKeys));
    }

    #[test]
    fn test_ttl_index_expires_old_documents() {
        let repo = repo();
        repo.create(doc! { "user": "old", "created_at": mongodb::bson::DateTime::from_millis(0) })
            .unwrap();
        repo.create(doc! { "user": "new", "created_at": mongodb::bson::DateTime::now() })
            .unwrap();

        let name = repo
            .create_ttl_index("created_at", 2, TimeUnit::Days, SortOrder::Ascending)
            .unwrap();
        assert_eq!(name, "created_at_1");

        let users: Vec<String> = repo
            .read(doc! {})
            .unwrap()
            .iter()
            .map(|d| d.get_str("user").unwrap().to_string())
            .collect();
        assert_eq!(users, vec!["new".to_string()]);
    }

    #[test]
    fn test_ttl_lifetime_limits() {
        let repo = repo();
        repo.create(doc! { "user": "new", "created_at": mongodb::bson::DateTime::now() })
            .unwrap();

        for (amount, unit) in [(u64::MAX, TimeUnit::Seconds), (200_000_000_000, TimeUnit::Days)] {
            let err = repo
                .create_ttl_index("created_at", amount, unit, SortOrder::Ascending)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationFailed);
            assert!(err.operation().is_none());
        }
        assert!(repo.store().index_names("people").is_empty());

        repo.create_ttl_index("created_at", MAX_TTL_SECONDS, TimeUnit::Seconds, SortOrder::Ascending)
            .unwrap();
        assert_eq!(repo.count(doc! {}).unwrap(), 1);
    }

    #[test]
    fn test_with_collection_shares_store() {
        let people = repo();
        let pets = people.with_collection("pets");
        pets.create(doc! { "name": "rex" }).unwrap();
        assert_eq!(pets.count(doc! {}).unwrap(), 1);
        assert_eq!(people.count(doc! {}).unwrap(), 0);
        assert_eq!(people.store().collection_names(), vec!["pets".to_string()]);
    }

    #[test]
    fn test_unreachable_server_is_reported_not_raised() {
        let client = mongodb::sync::Client::with_uri_str(
            "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=300&connectTimeoutMS=300",
        )
        .unwrap();
        let repo = Repository::new(
            crate::store::MongoStore::new(client.database("mongorepo_test")),
            "people",
        );

        let err = repo.create(doc! { "name": "pedro" }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(err.operation(), Some(Operation::Insert));

        let err = repo.read(doc! {}).unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(err.operation(), Some(Operation::Select));
    }

    #[test]
    fn test_parse_object_id() {
        let oid = ObjectId::new();
        assert_eq!(parse_object_id(&oid.to_hex()).unwrap(), oid);
        assert!(matches!(
            parse_object_id("123"),
            Err(RepositoryError::InvalidObjectId(_))
        ));
    }
}
