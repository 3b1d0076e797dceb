//! Storage - durable key/value boundary and the prefixed JSON layer on top

use crate::core::keys::storage as keys;
use crate::errors::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub type StorageResult<T> = Result<T, StorageError>;

/// Raw string storage, `localStorage`-shaped.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Storage that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

impl Storage for NoopStorage {
    fn get(&self, _: &str) -> StorageResult<Option<String>> { Ok(None) }
    fn set(&self, _: &str, _: &str) -> StorageResult<()> { Ok(()) }
    fn remove(&self, _: &str) -> StorageResult<()> { Ok(()) }
}

/// In-memory storage. Reads and writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    fail_reads: Mutex<bool>,
    fail_writes: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn fail_reads(&self, fail: bool) { *self.fail_reads.lock().unwrap_or_else(|p| p.into_inner()) = fail; }
    /// Writes fail with `QuotaExceeded` while set.
    pub fn fail_writes(&self, fail: bool) { *self.fail_writes.lock().unwrap_or_else(|p| p.into_inner()) = fail; }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.items().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Raw value, bypassing failure injection.
    pub fn raw(&self, key: &str) -> Option<String> { self.items().get(key).cloned() }
    pub fn insert_raw(&self, key: &str, value: &str) { self.items().insert(key.to_string(), value.to_string()); }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        if *self.fail_reads.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(StorageError::Unavailable);
        }
        Ok(self.items().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if *self.fail_writes.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(StorageError::QuotaExceeded);
        }
        self.items().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.items().remove(key);
        Ok(())
    }
}

/// Single JSON file of string values under `$BEECONNECT_ROOT/<app>/data/storage.json`.
#[cfg(feature = "native")]
#[derive(Debug)]
pub struct FileStorage {
    path: std::path::PathBuf,
    lock: Mutex<()>,
}

#[cfg(feature = "native")]
impl FileStorage {
    pub fn open(app: &str) -> StorageResult<Self> {
        Ok(Self::at(storage_path(app)))
    }

    pub fn at(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &std::path::Path { &self.path }

    fn read_all(&self) -> StorageResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Items to rewrite. An unparseable file is replaced rather than
    /// blocking every later write.
    fn read_for_write(&self) -> StorageResult<HashMap<String, String>> {
        match self.read_all() {
            Err(StorageError::Serialization(e)) => {
                warn!(path = %self.path.display(), error = %e, "storage file unreadable, starting over");
                Ok(HashMap::new())
            }
            other => other,
        }
    }

    fn write_all(&self, items: &HashMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(items)?)?;
        Ok(())
    }
}

#[cfg(feature = "native")]
impl Storage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut items = self.read_for_write()?;
        items.insert(key.to_string(), value.to_string());
        self.write_all(&items)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let unreadable = self.path.exists() && matches!(self.read_all(), Err(StorageError::Serialization(_)));
        let mut items = self.read_for_write()?;
        if items.remove(key).is_some() || unreadable {
            self.write_all(&items)?;
        }
        Ok(())
    }
}

#[cfg(feature = "native")]
fn storage_path(app: &str) -> std::path::PathBuf {
    use std::path::PathBuf;
    let root = std::env::var(crate::core::keys::env::ROOT)
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")));
    root.join(app).join("data").join("storage.json")
}

/// Prefixed, JSON-serializing view over a [`Storage`].
///
/// Every failure is logged and absorbed: reads degrade to `None`,
/// writes report `false`.
#[derive(Clone)]
pub struct ClientStorage {
    inner: Arc<dyn Storage>,
    prefix: String,
}

impl ClientStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self::with_prefix(inner, keys::PREFIX)
    }

    pub fn with_prefix(inner: Arc<dyn Storage>, prefix: impl Into<String>) -> Self {
        Self { inner, prefix: prefix.into() }
    }

    pub fn noop() -> Self { Self::new(Arc::new(NoopStorage)) }

    pub fn key(&self, key: &str) -> String { format!("{}.{}", self.prefix, key) }

    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full = self.key(key);
        let raw = match self.inner.get(&full) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %full, error = %e, "storage read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = %full, error = %e, "discarding unreadable storage value");
                None
            }
        }
    }

    pub fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let full = self.key(key);
        let result = serde_json::to_string(value)
            .map_err(StorageError::from)
            .and_then(|raw| self.inner.set(&full, &raw));
        if let Err(e) = result {
            warn!(key = %full, error = %e, "storage write failed");
            return false;
        }
        true
    }

    pub fn remove_item(&self, key: &str) {
        let full = self.key(key);
        if let Err(e) = self.inner.remove(&full) {
            warn!(key = %full, error = %e, "storage remove failed");
        }
    }
}

impl std::fmt::Debug for ClientStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStorage").field("prefix", &self.prefix).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_storage_prefixes_and_serializes() {
        let raw = Arc::new(MemoryStorage::new());
        let storage = ClientStorage::new(raw.clone());
        assert!(storage.set_item("connected", &true));
        assert_eq!(raw.raw("beeconnect.connected").as_deref(), Some("true"));
        assert_eq!(storage.get_item::<bool>("connected"), Some(true));
        storage.remove_item("connected");
        assert_eq!(storage.get_item::<bool>("connected"), None);
    }

    #[test]
    fn failures_degrade_to_absence() {
        let raw = Arc::new(MemoryStorage::new());
        let storage = ClientStorage::new(raw.clone());
        raw.insert_raw("beeconnect.wallet", "{not json");
        assert_eq!(storage.get_item::<String>("wallet"), None);

        raw.fail_writes(true);
        assert!(!storage.set_item("wallet", "injected"));
        raw.fail_reads(true);
        assert_eq!(storage.get_item::<String>("wallet"), None);
    }

    #[cfg(feature = "native")]
    #[test]
    fn file_storage_round_trips_through_disk() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("app").join("data").join("storage.json");
        let storage = FileStorage::at(&path);
        assert_eq!(storage.get("k").unwrap(), None);
        storage.set("k", "v").unwrap();
        assert_eq!(FileStorage::at(&path).get("k").unwrap().as_deref(), Some("v"));
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[cfg(feature = "native")]
    #[test]
    fn corrupt_file_is_replaced_on_write() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "{trunc").unwrap();
        let storage = FileStorage::at(&path);
        assert!(storage.get("k").is_err());

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));

        std::fs::write(&path, "{trunc").unwrap();
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }
}
