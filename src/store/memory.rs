//! In-process document store.
//!
//! `MemoryStore` keeps every collection in a shared map and understands the
//! same filter, update, sort and projection documents as the server. Clones
//! share state, so a clone handed to a repository sees the same data as the
//! original.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};
use parking_lot::RwLock;

use super::error::{StoreError, StoreResult};
use super::{filter, query, update};
use super::{DocumentStore, IndexSpec, QueryOptions, UpdateOutcome, MAX_DOCUMENT_SIZE};

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl MemoryCollection {
    /// Drop documents whose TTL-indexed date has expired.
    fn purge_expired(&mut self, now_millis: i64) {
        let ttl_fields: Vec<(String, i64)> = self
            .indexes
            .iter()
            .filter_map(|idx| {
                let ttl = idx.expire_after?;
                let (field, _) = idx.keys.iter().next()?;
                Some((field.clone(), i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
            })
            .collect();
        if ttl_fields.is_empty() {
            return;
        }

        let before = self.documents.len();
        self.documents.retain(|doc| {
            !ttl_fields.iter().any(|(field, ttl)| {
                earliest_date(filter::lookup(doc, field))
                    .is_some_and(|millis| millis.saturating_add(*ttl) <= now_millis)
            })
        });

        let purged = before - self.documents.len();
        if purged > 0 {
            debug!("purged {} expired document(s)", purged);
        }
    }

    /// Check unique constraints for `candidate`, ignoring the document at `skip`.
    fn check_unique(
        &self,
        collection: &str,
        candidate: &Document,
        skip: Option<usize>,
    ) -> StoreResult<()> {
        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |(i, _)| Some(*i) != skip)
                .map(|(_, d)| d)
        };

        if let Some(id) = candidate.get("_id") {
            if others().any(|d| d.get("_id").is_some_and(|other| filter::bson_equal(id, other))) {
                return Err(StoreError::DuplicateKey(format!(
                    "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                    collection, id
                )));
            }
        }

        for idx in self.indexes.iter().filter(|idx| idx.unique) {
            let key = index_key(&idx.keys, candidate);
            if others().any(|d| keys_equal(&index_key(&idx.keys, d), &key)) {
                return Err(StoreError::DuplicateKey(format!(
                    "E11000 duplicate key error collection: {} index: {}",
                    collection,
                    idx.resolved_name()
                )));
            }
        }
        Ok(())
    }
}

fn index_key(keys: &Document, doc: &Document) -> Vec<Bson> {
    keys.keys()
        .map(|field| filter::lookup(doc, field).cloned().unwrap_or(Bson::Null))
        .collect()
}

fn keys_equal(a: &[Bson], b: &[Bson]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| filter::bson_equal(x, y))
}

fn earliest_date(value: Option<&Bson>) -> Option<i64> {
    match value? {
        Bson::DateTime(dt) => Some(dt.timestamp_millis()),
        Bson::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Bson::DateTime(dt) => Some(dt.timestamp_millis()),
                _ => None,
            })
            .min(),
        _ => None,
    }
}

fn encoded_size(document: &Document) -> StoreResult<usize> {
    let mut buf = Vec::new();
    document
        .to_writer(&mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf.len())
}

fn check_size(document: &Document) -> StoreResult<()> {
    let size = encoded_size(document)?;
    if size > MAX_DOCUMENT_SIZE {
        return Err(StoreError::DocumentTooLarge {
            size,
            limit: MAX_DOCUMENT_SIZE,
        });
    }
    Ok(())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Collections held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, MemoryCollection>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the collections created so far, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the indexes defined on a collection.
    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.iter().map(IndexSpec::resolved_name).collect())
            .unwrap_or_default()
    }

    /// Run `f` on a collection, creating it if missing.
    fn write<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut MemoryCollection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        coll.purge_expired(now_millis());
        f(coll)
    }

    /// Run `f` on a collection's documents without creating it.
    fn read<T>(&self, collection: &str, f: impl FnOnce(&[Document]) -> StoreResult<T>) -> StoreResult<T> {
        // expiry mutates, so even reads take the write lock
        let mut collections = self.collections.write();
        match collections.get_mut(collection) {
            Some(coll) => {
                coll.purge_expired(now_millis());
                f(&coll.documents)
            }
            None => f(&[]),
        }
    }

    fn insert_into(coll: &mut MemoryCollection, collection: &str, document: Document) -> StoreResult<Bson> {
        let document = match document.get("_id") {
            Some(_) => document,
            None => {
                let mut with_id = Document::new();
                with_id.insert("_id", ObjectId::new());
                for (k, v) in document {
                    with_id.insert(k, v);
                }
                with_id
            }
        };

        check_size(&document)?;
        coll.check_unique(collection, &document, None)?;

        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        coll.documents.push(document);
        Ok(id)
    }

    fn update(
        &self,
        collection: &str,
        filter_doc: Document,
        update_doc: Document,
        many: bool,
    ) -> StoreResult<UpdateOutcome> {
        filter::validate(&filter_doc)?;
        update::validate(&update_doc)?;

        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };
        coll.purge_expired(now_millis());

        let mut outcome = UpdateOutcome::default();
        for i in 0..coll.documents.len() {
            if !filter::matches(&coll.documents[i], &filter_doc)? {
                continue;
            }
            outcome.matched += 1;

            let updated = update::apply(&coll.documents[i], &update_doc)?;
            if updated != coll.documents[i] {
                check_size(&updated)?;
                coll.check_unique(collection, &updated, Some(i))?;
                coll.documents[i] = updated;
                outcome.modified += 1;
            }

            if !many {
                break;
            }
        }
        Ok(outcome)
    }

    fn delete(&self, collection: &str, filter_doc: Document, many: bool) -> StoreResult<u64> {
        filter::validate(&filter_doc)?;

        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        coll.purge_expired(now_millis());

        let mut doomed = Vec::new();
        for (i, doc) in coll.documents.iter().enumerate() {
            if filter::matches(doc, &filter_doc)? {
                doomed.push(i);
                if !many {
                    break;
                }
            }
        }

        for i in doomed.iter().rev() {
            coll.documents.remove(*i);
        }
        Ok(doomed.len() as u64)
    }
}

impl DocumentStore for MemoryStore {
    fn insert_one(&self, collection: &str, document: Document) -> StoreResult<Bson> {
        self.write(collection, |coll| Self::insert_into(coll, collection, document))
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<Vec<Bson>> {
        if documents.is_empty() {
            return Err(StoreError::InvalidArgument(
                "no documents provided to insert_many".to_string(),
            ));
        }

        // ordered insert: documents before a failure stay inserted
        self.write(collection, |coll| {
            documents
                .into_iter()
                .map(|doc| Self::insert_into(coll, collection, doc))
                .collect()
        })
    }

    fn find(
        &self,
        collection: &str,
        filter_doc: Document,
        options: QueryOptions,
    ) -> StoreResult<Vec<Document>> {
        filter::validate(&filter_doc)?;
        if let Some(projection) = &options.projection {
            query::validate_projection(projection)?;
        }

        self.read(collection, |docs| {
            let mut matched = Vec::new();
            for doc in docs {
                if filter::matches(doc, &filter_doc)? {
                    matched.push(doc.clone());
                }
            }
            query::shape(matched, &options)
        })
    }

    fn find_one(
        &self,
        collection: &str,
        filter_doc: Document,
        options: QueryOptions,
    ) -> StoreResult<Option<Document>> {
        let options = QueryOptions {
            limit: Some(1),
            ..options
        };
        Ok(self.find(collection, filter_doc, options)?.into_iter().next())
    }

    fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        self.update(collection, filter, update, false)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        self.update(collection, filter, update, true)
    }

    fn delete_one(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        self.delete(collection, filter, false)
    }

    fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        self.delete(collection, filter, true)
    }

    fn count(&self, collection: &str, filter_doc: Document) -> StoreResult<u64> {
        filter::validate(&filter_doc)?;
        self.read(collection, |docs| {
            let mut n = 0;
            for doc in docs {
                if filter::matches(doc, &filter_doc)? {
                    n += 1;
                }
            }
            Ok(n)
        })
    }

    fn create_index(&self, collection: &str, index: IndexSpec) -> StoreResult<String> {
        if index.keys.is_empty() {
            return Err(StoreError::InvalidArgument(
                "index keys must not be empty".to_string(),
            ));
        }
        for (field, dir) in &index.keys {
            let valid = matches!(dir, Bson::Int32(1 | -1) | Bson::Int64(1 | -1));
            if !valid {
                return Err(StoreError::InvalidArgument(format!(
                    "unsupported index direction for '{}': {}",
                    field, dir
                )));
            }
        }
        if index.expire_after.is_some() && index.keys.len() != 1 {
            return Err(StoreError::InvalidArgument(
                "TTL indexes are single-field indexes".to_string(),
            ));
        }

        let name = index.resolved_name();
        self.write(collection, |coll| {
            if let Some(existing) = coll.indexes.iter().find(|i| i.resolved_name() == name) {
                return if existing.keys == index.keys
                    && existing.unique == index.unique
                    && existing.expire_after == index.expire_after
                {
                    Ok(name.clone())
                } else {
                    Err(StoreError::OperationFailed(format!(
                        "an index named {} already exists with different options",
                        name
                    )))
                };
            }

            if index.unique {
                let keys: Vec<Vec<Bson>> = coll
                    .documents
                    .iter()
                    .map(|d| index_key(&index.keys, d))
                    .collect();
                for (i, key) in keys.iter().enumerate() {
                    if keys[i + 1..].iter().any(|other| keys_equal(key, other)) {
                        return Err(StoreError::DuplicateKey(format!(
                            "E11000 duplicate key error collection: {} index: {}",
                            collection, name
                        )));
                    }
                }
            }

            coll.indexes.push(index);
            coll.purge_expired(now_millis());
            Ok(name.clone())
        })
    }

    fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, DateTime};
    use std::time::Duration;

    #[test]
    fn test_insert_assigns_object_id() {
        let store = MemoryStore::new();
        let id = store.insert_one("people", doc! { "name": "pedro" }).unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let found = store
            .find_one("people", doc! { "name": "pedro" }, QueryOptions::new())
            .unwrap()
            .unwrap();
        // _id comes first, like on the server
        assert_eq!(found.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(found.get("_id"), Some(&id));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = MemoryStore::new();
        store.insert_one("people", doc! { "_id": 1 }).unwrap();
        let err = store.insert_one("people", doc! { "_id": 1 }).unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_insert_many_is_ordered() {
        let store = MemoryStore::new();
        let result = store.insert_many(
            "people",
            vec![doc! { "_id": 1 }, doc! { "_id": 2 }, doc! { "_id": 1 }, doc! { "_id": 3 }],
        );
        assert!(result.unwrap_err().is_duplicate_key());
        assert_eq!(store.count("people", doc! {}).unwrap(), 2);

        assert!(store.insert_many("people", Vec::new()).is_err());
    }

    #[test]
    fn test_update_counts_only_real_changes() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "people",
                vec![
                    doc! { "name": "pedro", "role": "ops" },
                    doc! { "name": "ana", "role": "dev" },
                ],
            )
            .unwrap();

        let outcome = store
            .update_many("people", doc! {}, doc! { "$set": { "role": "ops" } })
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 2, modified: 1 });

        let missing = store
            .update_one("nobody", doc! {}, doc! { "$set": { "x": 1 } })
            .unwrap();
        assert_eq!(missing, UpdateOutcome::default());
    }

    #[test]
    fn test_invalid_update_rejected_even_without_match() {
        let store = MemoryStore::new();
        let err = store
            .update_one("people", doc! { "name": "x" }, doc! { "name": "y" })
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_delete_one_and_many() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "people",
                vec![doc! { "team": "a" }, doc! { "team": "a" }, doc! { "team": "b" }],
            )
            .unwrap();

        assert_eq!(store.delete_one("people", doc! { "team": "a" }).unwrap(), 1);
        assert_eq!(store.delete_many("people", doc! { "team": { "$in": ["a", "b"] } }).unwrap(), 2);
        assert_eq!(store.count("people", doc! {}).unwrap(), 0);
        assert_eq!(store.delete_many("ghost", doc! {}).unwrap(), 0);
    }

    #[test]
    fn test_unique_index() {
        let store = MemoryStore::new();
        store.insert_one("people", doc! { "cpf": "1" }).unwrap();

        let name = store
            .create_index("people", IndexSpec::new(doc! { "cpf": 1 }).unique(true))
            .unwrap();
        assert_eq!(name, "cpf_1");
        assert_eq!(store.index_names("people"), vec!["cpf_1".to_string()]);

        let err = store.insert_one("people", doc! { "cpf": "1" }).unwrap_err();
        assert!(err.is_duplicate_key());

        store.insert_one("people", doc! { "cpf": "2" }).unwrap();
        let err = store
            .update_one("people", doc! { "cpf": "2" }, doc! { "$set": { "cpf": "1" } })
            .unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_unique_index_over_existing_duplicates() {
        let store = MemoryStore::new();
        store
            .insert_many("people", vec![doc! { "cpf": "1" }, doc! { "cpf": "1" }])
            .unwrap();
        let err = store
            .create_index("people", IndexSpec::new(doc! { "cpf": 1 }).unique(true))
            .unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_index_conflicts_and_idempotence() {
        let store = MemoryStore::new();
        let spec = IndexSpec::new(doc! { "name": 1 });
        store.create_index("people", spec.clone()).unwrap();
        store.create_index("people", spec).unwrap();
        assert_eq!(store.index_names("people").len(), 1);

        let conflicting = IndexSpec::new(doc! { "name": 1 }).unique(true);
        assert!(store.create_index("people", conflicting).is_err());
        assert!(store.create_index("people", IndexSpec::new(doc! {})).is_err());
        assert!(store
            .create_index("people", IndexSpec::new(doc! { "name": "text" }))
            .is_err());
    }

    #[test]
    fn test_ttl_index_purges_expired_documents() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "sessions",
                vec![
                    doc! { "user": "old", "created_at": DateTime::from_millis(0) },
                    doc! { "user": "new", "created_at": DateTime::now() },
                    doc! { "user": "undated" },
                ],
            )
            .unwrap();

        store
            .create_index(
                "sessions",
                IndexSpec::new(doc! { "created_at": 1 }).expire_after(Duration::from_secs(3600)),
            )
            .unwrap();

        let remaining = store.find("sessions", doc! {}, QueryOptions::new()).unwrap();
        let users: Vec<&str> = remaining.iter().map(|d| d.get_str("user").unwrap()).collect();
        assert_eq!(users, vec!["new", "undated"]);
    }

    #[test]
    fn test_huge_ttl_keeps_fresh_documents() {
        let store = MemoryStore::new();
        store
            .insert_one("sessions", doc! { "created_at": DateTime::now() })
            .unwrap();
        store
            .create_index(
                "sessions",
                IndexSpec::new(doc! { "created_at": 1 }).expire_after(Duration::MAX),
            )
            .unwrap();
        assert_eq!(store.count("sessions", doc! {}).unwrap(), 1);
    }

    #[test]
    fn test_ttl_index_requires_single_field() {
        let store = MemoryStore::new();
        let spec = IndexSpec::new(doc! { "a": 1, "b": 1 }).expire_after(Duration::from_secs(1));
        assert!(store.create_index("sessions", spec).is_err());
    }

    #[test]
    fn test_reads_do_not_create_collections() {
        let store = MemoryStore::new();
        assert!(store.find("ghost", doc! {}, QueryOptions::new()).unwrap().is_empty());
        assert_eq!(store.count("ghost", doc! {}).unwrap(), 0);
        assert!(store.collection_names().is_empty());

        store.insert_one("people", doc! {}).unwrap();
        assert_eq!(store.collection_names(), vec!["people".to_string()]);
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        clone.insert_one("people", doc! { "name": "ana" }).unwrap();
        assert_eq!(store.count("people", doc! {}).unwrap(), 1);
    }

    #[test]
    fn test_oversized_document_rejected() {
        let store = MemoryStore::new();
        let big = "x".repeat(MAX_DOCUMENT_SIZE + 1);
        let err = store.insert_one("blobs", doc! { "data": big }).unwrap_err();
        assert!(matches!(err, StoreError::DocumentTooLarge { .. }));
    }

    #[test]
    fn test_invalid_filter_on_empty_collection() {
        let store = MemoryStore::new();
        let err = store
            .find("ghost", doc! { "a": { "$nope": 1 } }, QueryOptions::new())
            .unwrap_err();
        assert!(err.is_invalid_input());
    }
}
