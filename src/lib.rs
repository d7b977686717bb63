//! mongorepo - a small CRUD layer over MongoDB
//!
//! Open a connection, bind a repository to a collection and create, read,
//! update and delete documents. Every failure comes back as a
//! [`RepositoryError`](repository::RepositoryError) whose
//! [`kind`](repository::RepositoryError::kind) tells connectivity problems
//! apart from bad input and missing documents.
//!
//! # Example
//!
//! ```no_run
//! use mongodb::bson::doc;
//! use mongorepo::db::{connect, ConnectionConfig};
//!
//! let connection = connect(&ConnectionConfig::new().database("company")).unwrap();
//! let people = connection.repository("people").unwrap();
//!
//! people.create(doc! { "name": "pedro", "cpf": "123" }).unwrap();
//! people.update(doc! { "cpf": "123" }, doc! { "city": "Recife" }).unwrap();
//! let found = people.read(doc! { "city": "Recife" }).unwrap();
//! assert_eq!(found.len(), 1);
//! people.delete(doc! { "cpf": "123" }).unwrap();
//! connection.close();
//! ```
//!
//! Tests and offline tools can use [`MemoryStore`](store::MemoryStore) in
//! place of a server:
//!
//! ```
//! use mongodb::bson::doc;
//! use mongorepo::repository::Repository;
//! use mongorepo::store::MemoryStore;
//!
//! let people = Repository::new(MemoryStore::new(), "people");
//! people.create(doc! { "name": "ana" }).unwrap();
//! assert_eq!(people.count(doc! {}).unwrap(), 1);
//! ```

pub mod db;
pub mod record;
pub mod repository;
pub mod store;
