//! Cache laws and eviction behavior under pressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use windward::cache::{canonical_json, fingerprint, AnalysisCache, CacheError};
use windward::{MemoryStorage, Storage};

/// A JSON string payload whose serialized form is exactly `size` bytes.
fn payload(size: usize) -> Value {
    json!("x".repeat(size - 2))
}

#[test]
fn fingerprint_determinism_law() {
    // Same canonical JSON <=> same fingerprint.
    let a = json!({"beta": 2.5, "alpha": [1, 2, {"z": 1, "a": 2}]});
    let b = json!({"alpha": [1, 2, {"a": 2, "z": 1}], "beta": 2.5});
    assert_eq!(canonical_json(&a), canonical_json(&b));
    assert_eq!(fingerprint("wind", &a), fingerprint("wind", &b));

    let c = json!({"beta": 2.5000001, "alpha": [1, 2, {"z": 1, "a": 2}]});
    assert_ne!(canonical_json(&a), canonical_json(&c));
    assert_ne!(fingerprint("wind", &a), fingerprint("wind", &c));

    // The prefix is part of the identity.
    assert_ne!(fingerprint("wind", &a), fingerprint("strategy", &a));
}

#[test]
fn cache_idempotence_law() {
    let cache = AnalysisCache::new();
    let calls = AtomicUsize::new(0);
    let params = json!({"window": 5});

    let compute = |_: &Value| -> Result<Value, CacheError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"result": [1.0, 2.0, 3.0]}))
    };

    let first = cache
        .compute_from_params("kernel", &params, compute, None)
        .expect("first compute");
    let second = cache
        .compute_from_params(
            "kernel",
            &params,
            |_: &Value| -> Result<Value, CacheError> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"result": "should not run"}))
            },
            None,
        )
        .expect("second compute");

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second call must hit the cache");
}

#[test]
fn eviction_under_pressure_keeps_lru_invariants() {
    let cache = AnalysisCache::with_config("pressure", 1000, 3600);

    for i in 0..20 {
        let key = format!("item_{i:02}");
        assert!(cache.set(&key, payload(100), None, Value::Null));

        let stats = cache.stats();
        assert!(
            stats.current_size_bytes <= 1000,
            "after insert {i}: size {} exceeds the budget",
            stats.current_size_bytes
        );

        if i >= 10 {
            // LRU property: the survivors are exactly the most recent
            // insertions - every evicted key is older than every live key.
            let live = cache.keys();
            let oldest_live: usize = live
                .iter()
                .map(|k| k.trim_start_matches("item_").parse::<usize>().expect("index"))
                .min()
                .expect("cache not empty");
            for evicted in 0..oldest_live {
                assert!(
                    !live.contains(&format!("item_{evicted:02}")),
                    "older item {evicted} outlived newer evictions"
                );
            }
            assert!(stats.eviction_count > 0);
        }
    }

    // Size accounting is exact at the end.
    let stats = cache.stats();
    assert_eq!(stats.current_size_bytes, stats.item_count as u64 * 100);
}

#[test]
fn zero_budget_cache_never_stores_and_never_crashes() {
    let cache = AnalysisCache::with_config("disabled", 0, 3600);
    for i in 0..5 {
        assert!(!cache.set(&format!("k{i}"), payload(50), None, Value::Null));
        assert_eq!(cache.get(&format!("k{i}")), None);
    }
    let stats = cache.stats();
    assert_eq!(stats.item_count, 0);
    assert_eq!(stats.current_size_bytes, 0);
    assert!(stats.eviction_count >= 5);

    // compute_from_params still produces values, it just cannot memoize.
    let calls = AtomicUsize::new(0);
    for _ in 0..2 {
        let value = cache
            .compute_from_params(
                "p",
                &json!({"a": 1}),
                |_: &Value| -> Result<Value, CacheError> {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                },
                None,
            )
            .expect("compute");
        assert_eq!(value, json!(1));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn expired_items_never_served_and_size_stays_consistent() {
    let cache = AnalysisCache::with_config("expiry", 10_000, 3600);
    cache.set("fresh", payload(100), Some(3600), Value::Null);
    cache.set("stale", payload(100), Some(-1), Value::Null);

    assert!(cache.get("fresh").is_some());
    assert_eq!(cache.get("stale"), None);

    let stats = cache.stats();
    assert_eq!(stats.item_count, 1);
    assert_eq!(stats.current_size_bytes, 100);
}

#[test]
fn storage_mirror_is_best_effort() {
    /// A backend that fails every save.
    struct BrokenStorage;
    impl Storage for BrokenStorage {
        fn save(&self, _: &str, _: &Value) -> Result<(), windward::StorageError> {
            Err(windward::StorageError::Backend("disk on fire".to_string()))
        }
        fn load(&self, _: &str) -> Result<Option<Value>, windward::StorageError> {
            Err(windward::StorageError::Backend("disk on fire".to_string()))
        }
        fn delete(&self, _: &str) -> Result<(), windward::StorageError> {
            Err(windward::StorageError::Backend("disk on fire".to_string()))
        }
        fn list_keys(&self, _: &str) -> Result<Vec<String>, windward::StorageError> {
            Err(windward::StorageError::Backend("disk on fire".to_string()))
        }
        fn clear(&self) -> Result<(), windward::StorageError> {
            Err(windward::StorageError::Backend("disk on fire".to_string()))
        }
        fn storage_info(&self) -> Result<windward::StorageInfo, windward::StorageError> {
            Err(windward::StorageError::Backend("disk on fire".to_string()))
        }
    }

    let cache = AnalysisCache::with_config("broken", 10_000, 3600)
        .with_storage(Arc::new(BrokenStorage) as Arc<dyn Storage>);

    // All operations succeed against the in-memory authority.
    assert!(cache.set("a", json!(1), None, Value::Null));
    assert_eq!(cache.get("a"), Some(json!(1)));
    assert!(cache.delete("a"));
    assert!(!cache.save_state());
}

#[test]
fn mirrored_state_reloads_and_discards_expired() {
    let storage = Arc::new(MemoryStorage::new());
    {
        let cache = AnalysisCache::with_config("reload", 10_000, 3600)
            .with_storage(Arc::clone(&storage) as Arc<dyn Storage>);
        cache.set("keep", json!("valuable"), Some(3600), Value::Null);
        cache.set("drop", json!("stale"), Some(-1), Value::Null);
        assert!(cache.save_state());
    }

    let revived = AnalysisCache::with_config("reload", 10_000, 3600)
        .with_storage(Arc::clone(&storage) as Arc<dyn Storage>);
    assert!(revived.load_state());
    assert_eq!(revived.get("keep"), Some(json!("valuable")));
    assert_eq!(revived.get("drop"), None);
}
