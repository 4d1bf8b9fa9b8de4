//! Storage port: abstract key -> JSON-blob persistence.
//!
//! The core consumes this capability; concrete backends (browser storage,
//! files, databases) live with the host. Every operation may fail and the
//! core tolerates failure by falling back to in-memory behavior.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Storage not available: {0}")]
    NotAvailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Capacity/usage summary reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StorageInfo {
    pub used_space: u64,
    pub item_count: usize,
    /// Backend capacity estimate, when the backend can provide one.
    pub estimated_max: Option<u64>,
}

/// Abstract persistence interface consumed by the registry and the cache.
///
/// Values are JSON-serializable structures. Implementations must be safe to
/// share across threads; the core assumes a single writer per key namespace.
pub trait Storage: Send + Sync {
    /// Persist `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Load the value stored under `key`, or `None` when absent.
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix` (empty prefix lists everything).
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Remove everything.
    fn clear(&self) -> Result<(), StorageError>;

    /// Usage summary.
    fn storage_info(&self) -> Result<StorageInfo, StorageError>;
}

// ============================================================================
// In-memory reference implementation
// ============================================================================

/// In-memory [`Storage`] backend.
///
/// Reference implementation of the port; used by tests and as the default
/// when the host supplies no persistent backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>>, StorageError> {
        self.entries
            .read()
            .map_err(|e| StorageError::NotAvailable(format!("lock poisoned: {e}")))
    }

    fn write_guard(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>>, StorageError> {
        self.entries
            .write()
            .map_err(|e| StorageError::NotAvailable(format!("lock poisoned: {e}")))
    }
}

impl Storage for MemoryStorage {
    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.write_guard()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.read_guard()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.write_guard()?.remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .read_guard()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.write_guard()?.clear();
        Ok(())
    }

    fn storage_info(&self) -> Result<StorageInfo, StorageError> {
        let entries = self.read_guard()?;
        let used: u64 = entries
            .values()
            .map(|v| v.to_string().len() as u64)
            .sum();
        Ok(StorageInfo {
            used_space: used,
            item_count: entries.len(),
            estimated_max: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_load_delete_roundtrip() {
        let storage = MemoryStorage::new();
        storage
            .save("alpha", &json!({"x": 1}))
            .expect("save should succeed");

        let loaded = storage.load("alpha").expect("load should succeed");
        assert_eq!(loaded, Some(json!({"x": 1})));

        storage.delete("alpha").expect("delete should succeed");
        assert_eq!(storage.load("alpha").expect("load"), None);
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let storage = MemoryStorage::new();
        assert!(storage.delete("ghost").is_ok());
    }

    #[test]
    fn list_keys_filters_by_prefix() {
        let storage = MemoryStorage::new();
        storage.save("cache_a", &json!(1)).expect("save");
        storage.save("cache_b", &json!(2)).expect("save");
        storage.save("params_x", &json!(3)).expect("save");

        let keys = storage.list_keys("cache_").expect("list");
        assert_eq!(keys, vec!["cache_a", "cache_b"]);

        let all = storage.list_keys("").expect("list");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn clear_and_info() {
        let storage = MemoryStorage::new();
        storage.save("a", &json!([1, 2, 3])).expect("save");

        let info = storage.storage_info().expect("info");
        assert_eq!(info.item_count, 1);
        assert!(info.used_space > 0);

        storage.clear().expect("clear");
        let info = storage.storage_info().expect("info");
        assert_eq!(info.item_count, 0);
        assert_eq!(info.used_space, 0);
    }
}
