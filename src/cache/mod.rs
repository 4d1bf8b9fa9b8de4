//! Analysis result cache.
//!
//! Fingerprint-keyed memoization of kernel results with TTL expiry and a
//! size-bounded LRU eviction policy. The in-memory map is authoritative; the
//! Storage port, when configured, is a best-effort write-through mirror —
//! persistence failures are logged and never fail the caller.

pub mod fingerprint;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::Storage;

pub use fingerprint::{canonical_json, fingerprint, track_fingerprint};

/// Default cache capacity: 10 MB.
pub const DEFAULT_CACHE_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// Default item TTL: one hour.
pub const DEFAULT_CACHE_TTL_SECS: i64 = 3600;

/// Fraction of capacity freed per LRU eviction pass.
const EVICTION_TARGET_FRACTION: f64 = 0.2;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Cache Item
// ============================================================================

/// A single cached value with access bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    /// Monotonic insertion order; breaks LRU ties deterministically.
    #[serde(default)]
    pub insertion_seq: u64,
}

impl CacheItem {
    fn new(key: String, value: Value, metadata: Value, expiration: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        // JSON text length as the size estimate; floor of 1 keeps the
        // size invariant even for trivial values.
        let size_bytes = (value.to_string().len() as u64).max(1);
        Self {
            key,
            value,
            metadata,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            expiration,
            size_bytes,
            insertion_seq: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiration.is_some_and(|exp| Utc::now() > exp)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub namespace: String,
    pub item_count: usize,
    pub current_size_bytes: u64,
    pub max_size_bytes: u64,
    pub usage_percent: f64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Default)]
struct CacheInner {
    items: HashMap<String, CacheItem>,
    current_size_bytes: u64,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
    next_insertion_seq: u64,
}

type InvalidationCallback = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Size-bounded, TTL-expiring memoization cache.
///
/// Shared across workflow instances behind an `Arc`; size accounting and
/// eviction run inside one critical section.
pub struct AnalysisCache {
    namespace: String,
    max_size_bytes: u64,
    default_ttl: Option<Duration>,
    storage: Option<Arc<dyn Storage>>,
    storage_key_prefix: String,
    inner: Mutex<CacheInner>,
    invalidation_callbacks: Mutex<Vec<InvalidationCallback>>,
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("namespace", &self.namespace)
            .field("max_size_bytes", &self.max_size_bytes)
            .field("has_storage", &self.storage.is_some())
            .finish()
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisCache {
    /// Cache with default namespace, 10 MB budget and one-hour TTL.
    pub fn new() -> Self {
        Self::with_config("analysis_cache", DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL_SECS)
    }

    pub fn with_config(namespace: &str, max_size_bytes: u64, default_ttl_secs: i64) -> Self {
        Self {
            namespace: namespace.to_string(),
            max_size_bytes,
            default_ttl: (default_ttl_secs > 0).then(|| Duration::seconds(default_ttl_secs)),
            storage: None,
            storage_key_prefix: format!("cache_{namespace}_"),
            inner: Mutex::new(CacheInner::default()),
            invalidation_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Core operations
    // ------------------------------------------------------------------

    /// Store a value. Returns `false` when the item cannot be admitted (it is
    /// larger than the whole budget, which includes a zero-size budget).
    pub fn set(&self, key: &str, value: Value, ttl_secs: Option<i64>, metadata: Value) -> bool {
        let expiration = match ttl_secs {
            Some(secs) => Some(Utc::now() + Duration::seconds(secs)),
            None => self.default_ttl.map(|ttl| Utc::now() + ttl),
        };
        let mut item = CacheItem::new(key.to_string(), value, metadata, expiration);

        let evicted_keys;
        {
            let mut inner = self.lock_inner();

            // Replacing an existing entry: retire the old size first so the
            // admission check sees the true prospective total.
            if let Some(old) = inner.items.remove(key) {
                inner.current_size_bytes -= old.size_bytes;
            }

            if item.size_bytes > self.max_size_bytes {
                // Can never fit; counts as an immediate eviction of itself.
                inner.eviction_count += 1;
                debug!(
                    key = %key,
                    size = item.size_bytes,
                    max = self.max_size_bytes,
                    "Item exceeds cache budget, not stored"
                );
                return false;
            }

            evicted_keys = if inner.current_size_bytes + item.size_bytes > self.max_size_bytes {
                self.evict_locked(&mut inner, item.size_bytes)
            } else {
                Vec::new()
            };

            item.insertion_seq = inner.next_insertion_seq;
            inner.next_insertion_seq += 1;
            inner.current_size_bytes += item.size_bytes;
            inner.items.insert(key.to_string(), item.clone());
        }

        self.delete_mirrored(&evicted_keys);
        self.mirror_item(&item);
        true
    }

    /// Fetch a value, refreshing access bookkeeping. Expired or invalidated
    /// entries are removed and reported as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        // Memory first; fall back to the persistence mirror on a miss.
        let in_memory = self.lock_inner().items.contains_key(key);
        let from_storage = if in_memory { None } else { self.load_mirrored(key) };

        // Invalidation predicates run outside the critical section so a
        // predicate touching the cache cannot deadlock it.
        let invalidated = self.is_invalidated(key);

        enum Lookup {
            Miss,
            Stale,
            Hit,
        }

        let mut removed = false;
        let result = {
            let mut inner = self.lock_inner();

            if let Some(item) = from_storage {
                if !inner.items.contains_key(key) {
                    inner.current_size_bytes += item.size_bytes;
                    inner.items.insert(key.to_string(), item);
                }
            }

            let lookup = match inner.items.get(key) {
                None => Lookup::Miss,
                Some(item) if item.is_expired() || invalidated => Lookup::Stale,
                Some(_) => Lookup::Hit,
            };

            match lookup {
                Lookup::Miss => {
                    inner.miss_count += 1;
                    None
                }
                Lookup::Stale => {
                    if let Some(item) = inner.items.remove(key) {
                        inner.current_size_bytes -= item.size_bytes;
                    }
                    inner.miss_count += 1;
                    removed = true;
                    None
                }
                Lookup::Hit => {
                    inner.hit_count += 1;
                    inner.items.get_mut(key).map(|item| {
                        item.last_accessed_at = Utc::now();
                        item.access_count += 1;
                        item.value.clone()
                    })
                }
            }
        };

        if removed {
            self.delete_mirrored(std::slice::from_ref(&key.to_string()));
        }
        result
    }

    /// Remove a key from memory and the mirror.
    pub fn delete(&self, key: &str) -> bool {
        let removed = {
            let mut inner = self.lock_inner();
            if let Some(item) = inner.items.remove(key) {
                inner.current_size_bytes -= item.size_bytes;
                true
            } else {
                false
            }
        };
        self.delete_mirrored(std::slice::from_ref(&key.to_string()));
        removed
    }

    /// Drop every entry, memory and mirror.
    pub fn clear(&self) {
        {
            let mut inner = self.lock_inner();
            inner.items.clear();
            inner.current_size_bytes = 0;
        }
        if let Some(storage) = &self.storage {
            match storage.list_keys(&self.storage_key_prefix) {
                Ok(keys) => {
                    for key in keys {
                        if let Err(e) = storage.delete(&key) {
                            warn!(key = %key, error = %e, "Failed to clear mirrored cache entry");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Failed to list mirrored cache entries"),
            }
        }
    }

    /// Keys currently cached (union of memory and the mirror).
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock_inner().items.keys().cloned().collect();
        if let Some(storage) = &self.storage {
            if let Ok(stored) = storage.list_keys(&self.storage_key_prefix) {
                let prefix_len = self.storage_key_prefix.len();
                for key in stored {
                    let bare = key[prefix_len..].to_string();
                    if bare != "index" && bare != "stats" && !keys.contains(&bare) {
                        keys.push(bare);
                    }
                }
            }
        }
        keys.sort();
        keys
    }

    // ------------------------------------------------------------------
    // Get-or-compute
    // ------------------------------------------------------------------

    /// Return the cached value for `key`, or run `compute` and cache the
    /// result under it.
    pub fn compute_if_absent<E>(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<Value, E>,
        ttl_secs: Option<i64>,
        metadata: Value,
    ) -> Result<Value, E> {
        if let Some(cached) = self.get(key) {
            return Ok(cached);
        }
        let computed = compute()?;
        self.set(key, computed.clone(), ttl_secs, metadata);
        Ok(computed)
    }

    /// Fingerprint `params` under `prefix` and memoize `compute` on the
    /// resulting key. The stored metadata records the source prefix and
    /// parameters.
    pub fn compute_from_params<E>(
        &self,
        prefix: &str,
        params: &Value,
        compute: impl FnOnce(&Value) -> Result<Value, E>,
        ttl_secs: Option<i64>,
    ) -> Result<Value, E> {
        let key = fingerprint(prefix, params);
        let metadata = serde_json::json!({
            "source_prefix": prefix,
            "source_params": params,
            "computed_at": Utc::now().to_rfc3339(),
        });
        self.compute_if_absent(&key, || compute(params), ttl_secs, metadata)
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// Register a predicate; any `get` whose key satisfies it is treated as a
    /// miss and the entry is dropped.
    pub fn add_invalidation_callback(
        &self,
        callback: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) {
        self.invalidation_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(callback));
    }

    fn is_invalidated(&self, key: &str) -> bool {
        let callbacks = self
            .invalidation_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        callbacks.iter().any(|cb| cb(key))
    }

    /// Drop all expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let removed: Vec<String> = {
            let mut inner = self.lock_inner();
            let expired: Vec<String> = inner
                .items
                .values()
                .filter(|item| item.is_expired())
                .map(|item| item.key.clone())
                .collect();
            for key in &expired {
                if let Some(item) = inner.items.remove(key) {
                    inner.current_size_bytes -= item.size_bytes;
                }
            }
            expired
        };
        self.delete_mirrored(&removed);
        removed.len()
    }

    /// Drop every entry whose key starts with `prefix`. Returns the number
    /// removed.
    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let removed: Vec<String> = {
            let mut inner = self.lock_inner();
            let matching: Vec<String> = inner
                .items
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            for key in &matching {
                if let Some(item) = inner.items.remove(key) {
                    inner.current_size_bytes -= item.size_bytes;
                }
            }
            matching
        };
        self.delete_mirrored(&removed);
        removed.len()
    }

    /// `(key, value, metadata)` for every in-memory entry under `prefix`.
    pub fn cached_results_for_prefix(&self, prefix: &str) -> Vec<(String, Value, Value)> {
        let inner = self.lock_inner();
        let mut results: Vec<(String, Value, Value)> = inner
            .items
            .values()
            .filter(|item| item.key.starts_with(prefix))
            .map(|item| (item.key.clone(), item.value.clone(), item.metadata.clone()))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    // ------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------

    /// Free room for `required` bytes. Expired entries go first; if that is
    /// not enough the least-recently-accessed entries follow (insertion order
    /// breaks timestamp ties) until at least
    /// `max(required, 0.2 * max_size)` bytes are free.
    ///
    /// Returns the evicted keys so the caller can clean the mirror outside
    /// the critical section.
    fn evict_locked(&self, inner: &mut CacheInner, required: u64) -> Vec<String> {
        if inner.items.is_empty() {
            return Vec::new();
        }

        let target =
            (required as f64).max(self.max_size_bytes as f64 * EVICTION_TARGET_FRACTION) as u64;
        let mut freed: u64 = 0;
        let mut evicted: Vec<String> = Vec::new();

        // Pass 1: expired items.
        let expired: Vec<String> = inner
            .items
            .values()
            .filter(|item| item.is_expired())
            .map(|item| item.key.clone())
            .collect();
        for key in expired {
            if let Some(item) = inner.items.remove(&key) {
                inner.current_size_bytes -= item.size_bytes;
                freed += item.size_bytes;
                inner.eviction_count += 1;
                evicted.push(key);
            }
        }

        if freed >= target {
            return evicted;
        }

        // Pass 2: oldest access first, insertion order on equal timestamps.
        let mut by_age: Vec<(DateTime<Utc>, u64, String, u64)> = inner
            .items
            .values()
            .map(|item| {
                (
                    item.last_accessed_at,
                    item.insertion_seq,
                    item.key.clone(),
                    item.size_bytes,
                )
            })
            .collect();
        by_age.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        for (_, _, key, size) in by_age {
            if freed >= target {
                break;
            }
            inner.items.remove(&key);
            inner.current_size_bytes -= size;
            freed += size;
            inner.eviction_count += 1;
            evicted.push(key);
        }

        evicted
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock_inner();
        let total_requests = inner.hit_count + inner.miss_count;
        CacheStats {
            namespace: self.namespace.clone(),
            item_count: inner.items.len(),
            current_size_bytes: inner.current_size_bytes,
            max_size_bytes: self.max_size_bytes,
            usage_percent: if self.max_size_bytes > 0 {
                inner.current_size_bytes as f64 / self.max_size_bytes as f64 * 100.0
            } else {
                0.0
            },
            hit_count: inner.hit_count,
            miss_count: inner.miss_count,
            hit_rate: if total_requests > 0 {
                inner.hit_count as f64 / total_requests as f64
            } else {
                0.0
            },
            eviction_count: inner.eviction_count,
        }
    }

    // ------------------------------------------------------------------
    // Persistence mirror
    // ------------------------------------------------------------------

    fn mirror_item(&self, item: &CacheItem) {
        if let Some(storage) = &self.storage {
            let storage_key = format!("{}{}", self.storage_key_prefix, item.key);
            match serde_json::to_value(item) {
                Ok(value) => {
                    if let Err(e) = storage.save(&storage_key, &value) {
                        warn!(key = %item.key, error = %e, "Failed to mirror cache item");
                    }
                }
                Err(e) => warn!(key = %item.key, error = %e, "Failed to serialize cache item"),
            }
        }
    }

    fn load_mirrored(&self, key: &str) -> Option<CacheItem> {
        let storage = self.storage.as_ref()?;
        let storage_key = format!("{}{}", self.storage_key_prefix, key);
        match storage.load(&storage_key) {
            Ok(Some(value)) => match serde_json::from_value::<CacheItem>(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding malformed mirrored cache item");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read mirrored cache item");
                None
            }
        }
    }

    fn delete_mirrored(&self, keys: &[String]) {
        if let Some(storage) = &self.storage {
            for key in keys {
                let storage_key = format!("{}{}", self.storage_key_prefix, key);
                if let Err(e) = storage.delete(&storage_key) {
                    warn!(key = %key, error = %e, "Failed to delete mirrored cache item");
                }
            }
        }
    }

    /// Persist an index of current keys plus statistics. Best effort.
    pub fn save_state(&self) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };

        let stats = self.stats();
        let stats_value = match serde_json::to_value(&stats) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache stats");
                return false;
            }
        };
        if let Err(e) = storage.save(&format!("{}stats", self.storage_key_prefix), &stats_value) {
            warn!(error = %e, "Failed to save cache stats");
            return false;
        }

        let index = serde_json::json!({
            "keys": self.lock_inner().items.keys().cloned().collect::<Vec<_>>(),
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Err(e) = storage.save(&format!("{}index", self.storage_key_prefix), &index) {
            warn!(error = %e, "Failed to save cache index");
            return false;
        }
        true
    }

    /// Repopulate memory from the mirrored index. Expired or malformed
    /// entries are discarded; statistics counters are restored when present.
    pub fn load_state(&self) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };

        let index = match storage.load(&format!("{}index", self.storage_key_prefix)) {
            Ok(Some(index)) => index,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Failed to load cache index");
                return false;
            }
        };

        let Some(keys) = index.get("keys").and_then(Value::as_array) else {
            return false;
        };

        for key in keys.iter().filter_map(Value::as_str) {
            if let Some(item) = self.load_mirrored(key) {
                if !item.is_expired() {
                    let mut inner = self.lock_inner();
                    inner.current_size_bytes += item.size_bytes;
                    inner.items.insert(key.to_string(), item);
                }
            }
        }

        if let Ok(Some(stats)) = storage.load(&format!("{}stats", self.storage_key_prefix)) {
            let mut inner = self.lock_inner();
            inner.hit_count = stats.get("hit_count").and_then(Value::as_u64).unwrap_or(0);
            inner.miss_count = stats.get("miss_count").and_then(Value::as_u64).unwrap_or(0);
            inner.eviction_count = stats
                .get("eviction_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);
        }

        true
    }
}
