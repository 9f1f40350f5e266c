#![forbid(unsafe_code)]

//! The storage-backed [`RelayChannel`] strategies.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::kv::KeyValueStore;
use super::object_store::{ObjectStore, OpenOutcome};
use super::{ChannelKind, RelayChannel, RelayError};

/// Default headroom kept free in the key-value store (1 KiB).
pub const DEFAULT_SAFETY_MARGIN_BYTES: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Key-Value Channel
// ─────────────────────────────────────────────────────────────────────────────

/// Primary channel over a quota-limited [`KeyValueStore`].
///
/// Writes are checked against the remaining quota before they are
/// attempted: the value being replaced counts as free space, and a safety
/// margin is kept so other users of the store are not starved. A write that
/// would not fit is refused without touching the store.
pub struct KeyValueChannel {
    store: Arc<dyn KeyValueStore>,
    safety_margin: usize,
}

impl KeyValueChannel {
    /// Channel over `store` keeping `safety_margin` bytes free.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, safety_margin: usize) -> Self {
        Self {
            store,
            safety_margin,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Bytes a write of `value` under `key` may use.
    pub fn remaining_for(&self, key: &str) -> Result<usize, RelayError> {
        let used = self.store.used_bytes()?;
        let existing = self
            .store
            .get(key)?
            .map_or(0, |v| key.len() + v.len());
        Ok(self.store.quota_bytes().saturating_sub(used) + existing)
    }
}

impl RelayChannel for KeyValueChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::KeyValue
    }

    fn try_write(&mut self, key: &str, value: &str) -> Result<(), RelayError> {
        let available = self.remaining_for(key)?;
        let needed = key.len() + value.len() + self.safety_margin;
        if needed > available {
            return Err(RelayError::QuotaExceeded { needed, available });
        }
        self.store.set(key, value)
    }

    fn try_read(&mut self, key: &str) -> Result<Option<String>, RelayError> {
        self.store.get(key)
    }

    fn try_remove(&mut self, key: &str) -> Result<(), RelayError> {
        self.store.remove(key)
    }

    fn is_available(&self) -> bool {
        self.store.is_available()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Object Store Channel
// ─────────────────────────────────────────────────────────────────────────────

/// Secondary channel over a structured [`ObjectStore`].
///
/// The database is opened lazily on first use. A failed open fails only the
/// current call; the next call tries again.
pub struct ObjectStoreChannel {
    store: Box<dyn ObjectStore>,
    db_name: String,
    version: u32,
    table: String,
}

impl ObjectStoreChannel {
    /// Channel over `store`, opening `db_name` at `version` with one object
    /// store named `table`.
    #[must_use]
    pub fn new(store: Box<dyn ObjectStore>, db_name: &str, version: u32, table: &str) -> Self {
        Self {
            store,
            db_name: db_name.to_owned(),
            version,
            table: table.to_owned(),
        }
    }

    fn ensure_open(&mut self) -> Result<(), RelayError> {
        if self.store.is_open() {
            return Ok(());
        }
        match self.store.open(&self.db_name, self.version, &self.table)? {
            OpenOutcome::Opened => {
                tracing::debug!(target: "pageforge.relay", db = %self.db_name, "object store opened");
            }
            OpenOutcome::Upgraded { from } => {
                tracing::debug!(
                    target: "pageforge.relay",
                    db = %self.db_name,
                    from,
                    to = self.version,
                    "object store upgraded"
                );
            }
        }
        Ok(())
    }
}

impl RelayChannel for ObjectStoreChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::ObjectStore
    }

    fn try_write(&mut self, key: &str, value: &str) -> Result<(), RelayError> {
        self.ensure_open()?;
        self.store.put(&self.table, key, value)
    }

    fn try_read(&mut self, key: &str) -> Result<Option<String>, RelayError> {
        self.ensure_open()?;
        self.store.get(&self.table, key)
    }

    fn try_remove(&mut self, key: &str) -> Result<(), RelayError> {
        self.ensure_open()?;
        self.store.delete(&self.table, key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Channel
// ─────────────────────────────────────────────────────────────────────────────

/// Last-resort channel: a process-lifetime map.
///
/// Clones share the map, so an in-process preview can hold a clone and see
/// what the editor wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    map: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryChannel {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let guard = self.map.read().unwrap_or_else(|e| e.into_inner());
        guard.get(key).cloned()
    }

    /// Store a value directly.
    pub fn insert(&self, key: &str, value: &str) {
        let mut guard = self.map.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_owned(), value.to_owned());
    }
}

impl RelayChannel for MemoryChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Memory
    }

    fn try_write(&mut self, key: &str, value: &str) -> Result<(), RelayError> {
        self.insert(key, value);
        Ok(())
    }

    fn try_read(&mut self, key: &str) -> Result<Option<String>, RelayError> {
        Ok(self.get(key))
    }

    fn try_remove(&mut self, key: &str) -> Result<(), RelayError> {
        let mut guard = self.map.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
        Ok(())
    }
}
