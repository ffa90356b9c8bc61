//! Document store client.
//!
//! A [`DocumentClient`] is opened for a named server (resolved through
//! [`crate::config::SyncConfig`]), owns its connection for its whole lifetime, and releases
//! it when dropped, on every exit path. Databases are held in an explicit name → handle map
//! built when the client opens; collections are addressed by `(database, collection)` name.
//!
//! The backing store is an embedded SQLite file (see [`crate::db`]). Opening a client runs
//! any pending migrations, so a fresh file is usable immediately.
//!
//! Example:
//! ```no_run
//! use ophys_sync::config::load_config;
//! use ophys_sync::store::{DocumentClient, Filter};
//!
//! let cfg = load_config().expect("config");
//! let mut client = DocumentClient::open("visual_behavior_data", &cfg).expect("open");
//! let n = client
//!     .collection("ophys_data", "manifest")
//!     .count(&Filter::new())
//!     .expect("count");
//! println!("{n} sessions");
//! ```

mod collection;
mod filter;

pub use collection::{Collection, DocumentId, StoredDocument};
pub use filter::{Filter, values_equal};

use std::collections::BTreeMap;

use anyhow::Context;
use diesel::SqliteConnection;
use diesel::prelude::*;
use tracing::info;

use crate::config::SyncConfig;
use crate::db::{connection::connect_sqlite, migrate};
use crate::schema::documents::dsl as d;

/// Database name every ophys collection lives under.
pub const OPHYS_DATABASE: &str = "ophys_data";

/// Database that is never exposed through [`DocumentClient::database_names`].
pub const ADMIN_DATABASE: &str = "admin";

/// Errors raised by the store and the upsert primitive.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record lacks one of its collection's identity fields.
    #[error("record for {collection} is missing key field '{field}'")]
    MissingKeyField {
        /// Target collection.
        collection: String,
        /// Absent key field.
        field: String,
    },
    /// More than one stored document matches an identity filter.
    #[error("{matches} documents in {collection} match identity {identity}")]
    AmbiguousIdentity {
        /// Target collection.
        collection: String,
        /// Rendered identity filter.
        identity: String,
        /// Number of matching documents found (at least 2).
        matches: usize,
    },
    /// The matched document disappeared between lookup and update.
    #[error("document {id} in {collection} vanished before update")]
    Vanished {
        /// Target collection.
        collection: String,
        /// Document id that was matched.
        id: DocumentId,
    },
}

/// Handle describing one database (collection group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    /// Database name.
    pub name: String,
    /// Collections that held documents when the client enumerated the store.
    pub collections: Vec<String>,
}

/// Scoped connection to one document server.
pub struct DocumentClient {
    server: String,
    conn: SqliteConnection,
    databases: BTreeMap<String, DatabaseHandle>,
}

impl DocumentClient {
    /// Resolve `server` through the configuration and connect.
    pub fn open(server: &str, cfg: &SyncConfig) -> anyhow::Result<Self> {
        let server_cfg = cfg.server(server)?;
        Self::connect(server, &server_cfg.url)
    }

    /// Connect to a store location directly, bypassing the server directory.
    pub fn connect(server: &str, url: &str) -> anyhow::Result<Self> {
        let mut conn = connect_sqlite(url)?;
        migrate::run_pending(&mut conn)
            .with_context(|| format!("migrate document store for {server}"))?;

        let mut client = Self {
            server: server.to_string(),
            conn,
            databases: BTreeMap::new(),
        };
        client.refresh()?;
        info!(
            server = %client.server,
            databases = client.databases.len(),
            "connected to document store"
        );
        Ok(client)
    }

    /// Re-enumerate the databases and collections currently holding documents.
    pub fn refresh(&mut self) -> anyhow::Result<()> {
        let pairs: Vec<(String, String)> = d::documents
            .select((d::database_name, d::collection))
            .distinct()
            .order((d::database_name.asc(), d::collection.asc()))
            .load(&mut self.conn)
            .context("enumerate databases")?;

        self.databases.clear();
        for (database, collection) in pairs {
            if database == ADMIN_DATABASE {
                continue;
            }
            self.databases
                .entry(database.clone())
                .or_insert_with(|| DatabaseHandle {
                    name: database,
                    collections: Vec::new(),
                })
                .collections
                .push(collection);
        }
        Ok(())
    }

    /// Server name this client was opened for.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Names of the non-administrative databases known to the client.
    pub fn database_names(&self) -> Vec<&str> {
        self.databases.keys().map(String::as_str).collect()
    }

    /// Look up a database by name.
    pub fn database(&self, name: &str) -> Option<&DatabaseHandle> {
        self.databases.get(name)
    }

    /// Address a collection. Databases and collections that hold no documents yet are
    /// registered here and come into existence on first write.
    pub fn collection<'a>(&'a mut self, database: &'a str, name: &'a str) -> Collection<'a> {
        let handle = self
            .databases
            .entry(database.to_string())
            .or_insert_with(|| DatabaseHandle {
                name: database.to_string(),
                collections: Vec::new(),
            });
        if !handle.collections.iter().any(|c| c == name) {
            handle.collections.push(name.to_string());
        }
        Collection::new(&mut self.conn, database, name)
    }

    /// Address a collection under [`OPHYS_DATABASE`].
    pub fn ophys<'a>(&'a mut self, name: &'a str) -> Collection<'a> {
        self.collection(OPHYS_DATABASE, name)
    }

    /// Close the connection explicitly. Dropping the client has the same effect.
    pub fn close(self) {
        info!(server = %self.server, "closing document store connection");
    }
}
