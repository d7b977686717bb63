//! Connection manager.
//!
//! A [`Connection`] owns the driver client and the handle to the selected
//! database. Stores and repositories borrow that handle; [`Connection::close`]
//! drops it, after which every one of them reports a closed store.

use std::sync::Arc;

use log::{info, warn};
use mongodb::sync::Client;
use parking_lot::RwLock;

use super::config::ConnectionConfig;
use super::error::{ConnectionError, ConnectionResult};
use crate::repository::Repository;
use crate::store::{DocumentStore, MongoStore, SharedDatabase};

/// An open connection to one database.
pub struct Connection {
    client: RwLock<Option<Client>>,
    database: SharedDatabase,
    name: String,
}

/// Open a connection described by `config`.
///
/// When `verify_on_connect` is set the server is pinged, so an unreachable
/// host fails here instead of on the first operation.
pub fn connect(config: &ConnectionConfig) -> ConnectionResult<Connection> {
    let uri = config.connection_string()?;
    let client = Client::with_uri_str(&uri)?;
    let database = client.database(&config.database);

    let connection = Connection {
        client: RwLock::new(Some(client)),
        database: Arc::new(RwLock::new(Some(database))),
        name: config.database.clone(),
    };

    if config.verify_on_connect {
        if let Err(err) = connection.ping() {
            warn!("cannot reach {}:{}: {}", config.host, config.port, err);
            return Err(err);
        }
    }

    info!("connected to database {}", connection.name);
    Ok(connection)
}

impl Connection {
    /// Name of the selected database.
    pub fn database_name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.database.read().is_some()
    }

    /// The driver client, for anything the repositories do not cover.
    pub fn client(&self) -> ConnectionResult<Client> {
        self.client.read().clone().ok_or(ConnectionError::Closed)
    }

    /// A store over the selected database.
    pub fn store(&self) -> ConnectionResult<MongoStore> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        Ok(MongoStore::shared(self.database.clone(), self.name.clone()))
    }

    /// A repository over `collection` in the selected database.
    pub fn repository(&self, collection: &str) -> ConnectionResult<Repository<MongoStore>> {
        Ok(Repository::new(self.store()?, collection))
    }

    /// Round-trip to the server.
    pub fn ping(&self) -> ConnectionResult<()> {
        self.store()?.ping()?;
        Ok(())
    }

    /// Release the database handle and shut the driver client down.
    /// Safe to call more than once.
    ///
    /// Shutdown ends the client's background monitors and closes its pooled
    /// connections, so clones handed out by [`Connection::client`] stop
    /// working too.
    pub fn close(&self) {
        let database = self.database.write().take();
        let client = self.client.write().take();
        drop(database);
        if let Some(client) = client {
            client.shutdown().run();
            info!("closed connection to database {}", self.name);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ErrorKind;
    use crate::store::StoreError;
    use mongodb::bson::doc;

    fn unreachable() -> ConnectionConfig {
        ConnectionConfig::new()
            .host("127.0.0.1")
            .port(1)
            .database("mongorepo_test")
            .server_selection_timeout_ms(300)
            .connect_timeout_ms(300)
    }

    #[test]
    fn test_connect_reports_unreachable_host() {
        let err = connect(&unreachable()).unwrap_err();
        assert!(err.is_unreachable(), "unexpected error: {err}");
    }

    #[test]
    fn test_connect_rejects_bad_config() {
        let err = connect(&ConnectionConfig::new().database("")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_unverified_connection_fails_on_use() {
        let connection = connect(&unreachable().verify_on_connect(false)).unwrap();
        assert!(connection.is_open());
        assert_eq!(connection.database_name(), "mongorepo_test");

        let people = connection.repository("people").unwrap();
        let err = people.create(doc! { "name": "pedro" }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    }

    #[test]
    fn test_close_invalidates_handles() {
        let connection = connect(&unreachable().verify_on_connect(false)).unwrap();
        let store = connection.store().unwrap();
        let people = connection.repository("people").unwrap();

        connection.close();
        connection.close();

        assert!(!connection.is_open());
        assert!(matches!(connection.store(), Err(ConnectionError::Closed)));
        assert!(matches!(connection.client(), Err(ConnectionError::Closed)));
        assert!(matches!(connection.ping(), Err(ConnectionError::Closed)));
        assert!(matches!(store.count("people", doc! {}), Err(StoreError::Closed)));

        let err = people.read(doc! {}).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    }

    #[test]
    fn test_close_shuts_down_client_clones() {
        let connection = connect(&unreachable().verify_on_connect(false)).unwrap();
        let client = connection.client().unwrap();

        let started = std::time::Instant::now();
        connection.close();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        let result = client
            .database("mongorepo_test")
            .run_command(doc! { "ping": 1 })
            .run();
        assert!(result.is_err());
    }
}
