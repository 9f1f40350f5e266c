#![forbid(unsafe_code)]

//! Synchronous, quota-limited key-value stores.
//!
//! [`KeyValueStore`] models the browser's origin-wide `localStorage`: string
//! keys, string values, a fixed byte quota shared by every key, and writes
//! that fail once the quota is exhausted. Two implementations ship here:
//!
//! - [`MemoryKeyValueStore`]: in-process (tests, embedded previews)
//! - [`FileKeyValueStore`]: one JSON file, for native hosts where the editor
//!   and the preview run as separate processes
//!
//! # Accounting
//!
//! Usage is the sum of `key.len() + value.len()` in bytes over all entries.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use super::RelayError;

/// Default quota of the primary store (5 MiB).
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// A synchronous, size-limited string store.
///
/// Implementations must be thread-safe (`Send + Sync`) so one store can back
/// the editor and an in-process preview at once.
pub trait KeyValueStore: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>, RelayError>;

    /// Write a value. Fails with [`RelayError::QuotaExceeded`] if the store
    /// would grow past its quota.
    fn set(&self, key: &str, value: &str) -> Result<(), RelayError>;

    /// Delete a value. Deleting a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), RelayError>;

    /// Bytes currently used by all entries.
    fn used_bytes(&self) -> Result<usize, RelayError>;

    /// Total quota in bytes.
    fn quota_bytes(&self) -> usize;

    /// Whether the store can be used at all (e.g. not disabled by policy).
    fn is_available(&self) -> bool {
        true
    }
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

fn usage(map: &HashMap<String, String>) -> usize {
    map.iter().map(|(k, v)| entry_size(k, v)).sum()
}

fn check_quota(
    map: &HashMap<String, String>,
    key: &str,
    value: &str,
    quota: usize,
) -> Result<(), RelayError> {
    let existing = map.get(key).map_or(0, |v| entry_size(key, v));
    let used = usage(map) - existing;
    let needed = entry_size(key, value);
    let available = quota.saturating_sub(used);
    if needed > available {
        return Err(RelayError::QuotaExceeded { needed, available });
    }
    Ok(())
}

fn poisoned() -> RelayError {
    RelayError::Corrupt("lock poisoned".into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory key-value store with a byte quota.
pub struct MemoryKeyValueStore {
    data: RwLock<HashMap<String, String>>,
    quota: usize,
    available: AtomicBool,
}

impl MemoryKeyValueStore {
    /// Create an empty store with the default 5 MiB quota.
    #[must_use]
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    /// Create an empty store with a custom quota.
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            quota,
            available: AtomicBool::new(true),
        }
    }

    /// Enable or disable the store, as a browser does when storage is
    /// blocked. A disabled store fails every operation.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn ensure_available(&self) -> Result<(), RelayError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(RelayError::Unavailable(format!("{} is disabled", self.name())))
        }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn name(&self) -> &str {
        "MemoryKeyValueStore"
    }

    fn get(&self, key: &str) -> Result<Option<String>, RelayError> {
        self.ensure_available()?;
        let guard = self.data.read().map_err(|_| poisoned())?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RelayError> {
        self.ensure_available()?;
        let mut guard = self.data.write().map_err(|_| poisoned())?;
        check_quota(&guard, key, value, self.quota)?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), RelayError> {
        self.ensure_available()?;
        let mut guard = self.data.write().map_err(|_| poisoned())?;
        guard.remove(key);
        Ok(())
    }

    fn used_bytes(&self) -> Result<usize, RelayError> {
        self.ensure_available()?;
        let guard = self.data.read().map_err(|_| poisoned())?;
        Ok(usage(&guard))
    }

    fn quota_bytes(&self) -> usize {
        self.quota
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MemoryKeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.data.read().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("MemoryKeyValueStore")
            .field("entries", &count)
            .field("quota", &self.quota)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Store
// ─────────────────────────────────────────────────────────────────────────────

/// File format for the JSON store.
#[derive(Serialize, Deserialize)]
struct StoreFile {
    /// Format version for future migrations.
    format_version: u32,
    entries: HashMap<String, String>,
}

impl StoreFile {
    const FORMAT_VERSION: u32 = 1;
}

/// Key-value store persisted as a single JSON file.
///
/// Every write rewrites the file with the write-then-rename pattern:
/// 1. Write to `{path}.tmp`
/// 2. Flush and sync
/// 3. Rename `{path}.tmp` -> `{path}`
///
/// A missing file reads as empty. A corrupt file or one with an unknown
/// format version is treated as empty and logged.
pub struct FileKeyValueStore {
    path: PathBuf,
    quota: usize,
}

impl FileKeyValueStore {
    /// Create a store at `path` with the default quota. The file does not
    /// need to exist.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_quota(path, DEFAULT_QUOTA_BYTES)
    }

    /// Create a store at `path` with a custom quota.
    #[must_use]
    pub fn with_quota(path: impl AsRef<Path>, quota: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            quota,
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone();
        tmp.set_extension("json.tmp");
        tmp
    }

    fn load(&self) -> Result<HashMap<String, String>, RelayError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        match serde_json::from_reader::<_, StoreFile>(reader) {
            Ok(file) if file.format_version == StoreFile::FORMAT_VERSION => Ok(file.entries),
            Ok(file) => {
                tracing::warn!(
                    target: "pageforge.relay",
                    stored = file.format_version,
                    expected = StoreFile::FORMAT_VERSION,
                    "store file format version mismatch, ignoring stored data"
                );
                Ok(HashMap::new())
            }
            Err(e) => {
                tracing::warn!(
                    target: "pageforge.relay",
                    path = %self.path.display(),
                    error = %e,
                    "store file is corrupt, ignoring stored data"
                );
                Ok(HashMap::new())
            }
        }
    }

    fn save(&self, entries: HashMap<String, String>) -> Result<(), RelayError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = StoreFile {
            format_version: StoreFile::FORMAT_VERSION,
            entries,
        };
        let tmp = self.temp_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, &file)
                .map_err(|e| RelayError::Corrupt(format!("failed to encode store file: {e}")))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn name(&self) -> &str {
        "FileKeyValueStore"
    }

    fn get(&self, key: &str) -> Result<Option<String>, RelayError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RelayError> {
        let mut entries = self.load()?;
        check_quota(&entries, key, value, self.quota)?;
        entries.insert(key.to_owned(), value.to_owned());
        self.save(entries)
    }

    fn remove(&self, key: &str) -> Result<(), RelayError> {
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(entries)?;
        }
        Ok(())
    }

    fn used_bytes(&self) -> Result<usize, RelayError> {
        Ok(usage(&self.load()?))
    }

    fn quota_bytes(&self) -> usize {
        self.quota
    }
}

impl fmt::Debug for FileKeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileKeyValueStore")
            .field("path", &self.path)
            .field("quota", &self.quota)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_set_get_remove() {
        let store = MemoryKeyValueStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.used_bytes().unwrap(), 2);
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn memory_quota_is_enforced() {
        let store = MemoryKeyValueStore::with_quota(10);
        store.set("a", "12345").unwrap();
        let err = store.set("b", "123456789").unwrap_err();
        assert!(matches!(
            err,
            RelayError::QuotaExceeded {
                needed: 10,
                available: 4
            }
        ));
    }

    #[test]
    fn overwriting_a_key_reuses_its_space() {
        let store = MemoryKeyValueStore::with_quota(10);
        store.set("a", "123456789").unwrap();
        store.set("a", "987654321").unwrap();
    }

    #[test]
    fn disabled_store_fails() {
        let store = MemoryKeyValueStore::new();
        store.set_available(false);
        assert!(matches!(store.get("k"), Err(RelayError::Unavailable(_))));
        assert!(matches!(store.set("k", "v"), Err(RelayError::Unavailable(_))));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path().join("nested").join("store.json"));
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v1").unwrap();
        store.set("other", "x").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));

        // A second handle on the same file sees the data.
        let reopened = FileKeyValueStore::new(store.path());
        assert_eq!(reopened.get("other").unwrap().as_deref(), Some("x"));

        store.remove("k").unwrap();
        assert_eq!(reopened.get("k").unwrap(), None);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn file_store_quota_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyValueStore::with_quota(dir.path().join("s.json"), 8);
        assert!(matches!(
            store.set("key", "too long value"),
            Err(RelayError::QuotaExceeded { .. })
        ));
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "{ not json").unwrap();
        let store = FileKeyValueStore::new(&path);
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
