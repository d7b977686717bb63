//! Connection configuration.
//!
//! A config comes from defaults, a JSON file, or `MONGOREPO_*` environment
//! variables (a `.env` file is read first when present), and is turned into
//! a driver connection string by [`ConnectionConfig::connection_string`].

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{ConnectionError, ConnectionResult};

/// Prefix of every environment variable read by [`ConnectionConfig::from_env`].
pub const ENV_PREFIX: &str = "MONGOREPO_";

/// How to reach the database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Full connection string; when set, host, port and credentials are not used.
    pub uri: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database holding the user's credentials.
    pub auth_source: Option<String>,
    /// Database the repositories work on.
    pub database: String,
    pub app_name: Option<String>,
    pub server_selection_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_pool_size: Option<u32>,
    /// Ping the server while connecting.
    pub verify_on_connect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: None,
            host: "localhost".into(),
            port: 27017,
            username: None,
            password: None,
            auth_source: None,
            database: "test".into(),
            app_name: None,
            server_selection_timeout_ms: None,
            connect_timeout_ms: None,
            max_pool_size: None,
            verify_on_connect: true,
        }
    }
}

// keeps the password out of logs
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("uri", &self.uri.as_ref().map(|_| "<set>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auth_source", &self.auth_source)
            .field("database", &self.database)
            .field("app_name", &self.app_name)
            .field("server_selection_timeout_ms", &self.server_selection_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("max_pool_size", &self.max_pool_size)
            .field("verify_on_connect", &self.verify_on_connect)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a full connection string.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self::default().uri(uri)
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn auth_source(mut self, auth_source: impl Into<String>) -> Self {
        self.auth_source = Some(auth_source.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn server_selection_timeout_ms(mut self, ms: u64) -> Self {
        self.server_selection_timeout_ms = Some(ms);
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    pub fn verify_on_connect(mut self, value: bool) -> Self {
        self.verify_on_connect = value;
        self
    }

    /// Load a JSON config file. Missing fields take their default.
    pub fn from_file(path: impl AsRef<Path>) -> ConnectionResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConnectionError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Read `MONGOREPO_*` variables from the process environment, after
    /// loading `.env` if there is one.
    pub fn from_env() -> ConnectionResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from a variable lookup. Unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> ConnectionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(key.as_str()).filter(|v| !v.trim().is_empty())
        };

        let mut config = Self::default();
        config.uri = get("URI");
        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse_var("PORT", &port)?;
        }
        config.username = get("USERNAME");
        config.password = get("PASSWORD");
        config.auth_source = get("AUTH_SOURCE");
        if let Some(database) = get("DATABASE") {
            config.database = database;
        }
        config.app_name = get("APP_NAME");
        config.server_selection_timeout_ms = get("SERVER_SELECTION_TIMEOUT_MS")
            .map(|v| parse_var("SERVER_SELECTION_TIMEOUT_MS", &v))
            .transpose()?;
        config.connect_timeout_ms = get("CONNECT_TIMEOUT_MS")
            .map(|v| parse_var("CONNECT_TIMEOUT_MS", &v))
            .transpose()?;
        config.max_pool_size = get("MAX_POOL_SIZE")
            .map(|v| parse_var("MAX_POOL_SIZE", &v))
            .transpose()?;
        Ok(config)
    }

    /// Check the config and build the driver connection string.
    pub fn connection_string(&self) -> ConnectionResult<String> {
        if self.database.trim().is_empty() {
            return Err(ConnectionError::InvalidConfig("database name is empty".into()));
        }

        let query = self.encoded_options();
        match &self.uri {
            Some(uri) => {
                if self.username.is_some() || self.password.is_some() {
                    return Err(ConnectionError::InvalidConfig(
                        "credentials must be part of the uri when a uri is given".into(),
                    ));
                }
                // seed lists such as host1:27017,host2:27017 are not valid urls,
                // so a given uri is only checked for its scheme
                let rest = uri
                    .strip_prefix("mongodb://")
                    .or_else(|| uri.strip_prefix("mongodb+srv://"))
                    .filter(|rest| !rest.is_empty())
                    .ok_or_else(|| {
                        ConnectionError::InvalidConfig(format!(
                            "uri must start with mongodb:// or mongodb+srv://, got {:?}",
                            uri
                        ))
                    })?;
                if query.is_empty() {
                    Ok(uri.clone())
                } else if uri.contains('?') {
                    Ok(format!("{}&{}", uri, query))
                } else if rest.contains('/') {
                    Ok(format!("{}?{}", uri, query))
                } else {
                    Ok(format!("{}/?{}", uri, query))
                }
            }
            None => {
                let mut url = self.assemble()?;
                if !query.is_empty() {
                    url.set_query(Some(query.as_str()));
                }
                Ok(url.to_string())
            }
        }
    }

    fn assemble(&self) -> ConnectionResult<Url> {
        if self.host.trim().is_empty() {
            return Err(ConnectionError::InvalidConfig("host is empty".into()));
        }
        let mut url = Url::parse(&format!("mongodb://{}:{}/", self.host, self.port))
            .map_err(|e| ConnectionError::InvalidConfig(format!("bad host {:?}: {}", self.host, e)))?;

        if let Some(username) = &self.username {
            url.set_username(username)
                .map_err(|_| ConnectionError::InvalidConfig("cannot set username".into()))?;
        }
        if let Some(password) = &self.password {
            if self.username.is_none() {
                return Err(ConnectionError::InvalidConfig(
                    "password given without a username".into(),
                ));
            }
            url.set_password(Some(password))
                .map_err(|_| ConnectionError::InvalidConfig("cannot set password".into()))?;
        }
        Ok(url)
    }

    fn encoded_options(&self) -> String {
        let mut options = Vec::new();
        if let Some(app_name) = &self.app_name {
            options.push(("appName", app_name.clone()));
        }
        if let Some(auth_source) = &self.auth_source {
            options.push(("authSource", auth_source.clone()));
        }
        if let Some(ms) = self.server_selection_timeout_ms {
            options.push(("serverSelectionTimeoutMS", ms.to_string()));
        }
        if let Some(ms) = self.connect_timeout_ms {
            options.push(("connectTimeoutMS", ms.to_string()));
        }
        if let Some(size) = self.max_pool_size {
            options.push(("maxPoolSize", size.to_string()));
        }
        options
            .iter()
            .map(|(key, value)| format!("{}={}", key, percent_encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

// the driver percent-decodes option values but reads `+` literally
fn percent_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> ConnectionResult<T> {
    value.trim().parse().map_err(|_| {
        ConnectionError::InvalidConfig(format!("{}{} has an invalid value {:?}", ENV_PREFIX, name, value))
    })
}
