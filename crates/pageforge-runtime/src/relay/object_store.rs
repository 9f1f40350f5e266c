#![forbid(unsafe_code)]

//! Structured object stores with a versioned open handshake.
//!
//! [`ObjectStore`] models IndexedDB closely enough for the relay: a
//! database must be opened at a version before use, and opening at a newer
//! version runs an upgrade that creates the named object store. Values are
//! strings keyed by strings within an object store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::RelayError;

/// What an [`ObjectStore::open`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The database already existed at the requested version.
    Opened,
    /// The database was created or upgraded from `from` (0 = new).
    Upgraded {
        /// Previous version.
        from: u32,
    },
}

/// A versioned, structured key-value database.
pub trait ObjectStore: Send {
    /// Open `db` at `version`, creating `store` during an upgrade.
    fn open(&mut self, db: &str, version: u32, store: &str) -> Result<OpenOutcome, RelayError>;

    /// Whether a database is open on this handle.
    fn is_open(&self) -> bool;

    /// Read a value from an object store of the open database.
    fn get(&self, store: &str, key: &str) -> Result<Option<String>, RelayError>;

    /// Write a value.
    fn put(&mut self, store: &str, key: &str, value: &str) -> Result<(), RelayError>;

    /// Delete a value. Deleting a missing key succeeds.
    fn delete(&mut self, store: &str, key: &str) -> Result<(), RelayError>;
}

#[derive(Debug, Default)]
struct Database {
    version: u32,
    stores: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Default)]
struct Shared {
    databases: HashMap<String, Database>,
    fail_open: bool,
}

/// In-process [`ObjectStore`].
///
/// Clones share the databases but each clone is its own connection and
/// must be opened separately.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    shared: Arc<Mutex<Shared>>,
    connection: Option<String>,
}

impl MemoryObjectStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open` fail, as a browser does when the user
    /// has blocked storage.
    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Whether a database named `db` has been created.
    #[must_use]
    pub fn database_exists(&self, db: &str) -> bool {
        self.lock().databases.contains_key(db)
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connection(&self) -> Result<&str, RelayError> {
        self.connection
            .as_deref()
            .ok_or_else(|| RelayError::Unavailable("object store is not open".into()))
    }
}

fn missing_store(store: &str) -> RelayError {
    RelayError::Unavailable(format!("object store '{store}' does not exist"))
}

impl ObjectStore for MemoryObjectStore {
    fn open(&mut self, db: &str, version: u32, store: &str) -> Result<OpenOutcome, RelayError> {
        let outcome = {
            let mut shared = self.lock();
            if shared.fail_open {
                return Err(RelayError::Unavailable("opening the database was blocked".into()));
            }
            let database = shared.databases.entry(db.to_owned()).or_default();
            if database.version > version {
                return Err(RelayError::Unavailable(format!(
                    "database '{db}' is at version {}, requested {version}",
                    database.version
                )));
            }
            if database.version == version {
                OpenOutcome::Opened
            } else {
                let from = database.version;
                database.version = version;
                database.stores.entry(store.to_owned()).or_default();
                OpenOutcome::Upgraded { from }
            }
        };
        self.connection = Some(db.to_owned());
        Ok(outcome)
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn get(&self, store: &str, key: &str) -> Result<Option<String>, RelayError> {
        let db = self.connection()?;
        let shared = self.lock();
        let table = shared
            .databases
            .get(db)
            .and_then(|d| d.stores.get(store))
            .ok_or_else(|| missing_store(store))?;
        Ok(table.get(key).cloned())
    }

    fn put(&mut self, store: &str, key: &str, value: &str) -> Result<(), RelayError> {
        let db = self.connection()?.to_owned();
        let mut shared = self.lock();
        let table = shared
            .databases
            .get_mut(&db)
            .and_then(|d| d.stores.get_mut(store))
            .ok_or_else(|| missing_store(store))?;
        table.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&mut self, store: &str, key: &str) -> Result<(), RelayError> {
        let db = self.connection()?.to_owned();
        let mut shared = self.lock();
        let table = shared
            .databases
            .get_mut(&db)
            .and_then(|d| d.stores.get_mut(store))
            .ok_or_else(|| missing_store(store))?;
        table.remove(key);
        Ok(())
    }
}
