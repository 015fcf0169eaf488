// Optimistic-concurrency and batch helpers over any StorageBackend

use super::{ListOptions, PutOptions, StorageBackend, StorageResult, ABSENT_VERSION};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

const DELETE_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct AtomicUpdateOptions {
    /// Retries after the first attempt before giving up
    pub max_retries: u32,
    /// Base delay; attempt `n` sleeps `backoff * n`
    pub backoff: Duration,
    /// Use a create-only conditional write when the key is absent.
    ///
    /// Off by default: two concurrent creators of the same absent key can
    /// then overwrite each other.
    pub strict_create: bool,
}

impl Default for AtomicUpdateOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_millis(50),
            strict_create: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AtomicUpdateResult<T> {
    pub success: bool,
    /// The value that was written, on success
    pub value: Option<T>,
    pub retries: u32,
}

/// Read-modify-write `key` without locks.
///
/// `updater` may run several times and must be free of side effects. When
/// retries are exhausted the result has `success == false`; callers have to
/// surface that rather than assume the write landed.
pub async fn atomic_update<T, F>(
    storage: &dyn StorageBackend,
    key: &str,
    mut updater: F,
    options: &AtomicUpdateOptions,
) -> StorageResult<AtomicUpdateResult<T>>
where
    T: Serialize + DeserializeOwned + Send,
    F: FnMut(Option<T>) -> T + Send,
{
    let mut retries = 0u32;
    loop {
        let (current, version) = match storage.get_with_version(key).await? {
            Some(found) => (Some(serde_json::from_value::<T>(found.value)?), found.version),
            None => (None, ABSENT_VERSION),
        };

        let next = updater(current);
        let encoded = serde_json::to_value(&next)?;

        let written = if version == ABSENT_VERSION && !options.strict_create {
            storage.put(key, encoded, PutOptions::default()).await?;
            true
        } else {
            storage.put_if_match(key, encoded, version).await?
        };

        if written {
            return Ok(AtomicUpdateResult {
                success: true,
                value: Some(next),
                retries,
            });
        }

        if retries >= options.max_retries {
            tracing::warn!("Atomic update of {} gave up after {} retries", key, retries);
            return Ok(AtomicUpdateResult {
                success: false,
                value: None,
                retries,
            });
        }

        retries += 1;
        tracing::debug!("Version conflict on {}, retry {}", key, retries);
        tokio::time::sleep(options.backoff * retries).await;
    }
}

/// Fetch several keys concurrently. Keys that are absent or fail to load are
/// left out of the result.
pub async fn batch_get(
    storage: &dyn StorageBackend,
    keys: &[String],
) -> HashMap<String, serde_json::Value> {
    let results = join_all(keys.iter().map(|key| storage.get(key))).await;

    keys.iter()
        .zip(results)
        .filter_map(|(key, result)| match result {
            Ok(Some(value)) => Some((key.clone(), value)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Batch get of {} failed, treating as absent: {}", key, e);
                None
            }
        })
        .collect()
}

/// Write several entries concurrently. Every write is attempted; the first
/// failure is returned afterwards.
pub async fn batch_put(
    storage: &dyn StorageBackend,
    entries: Vec<(String, serde_json::Value)>,
    options: PutOptions,
) -> StorageResult<()> {
    let results = join_all(
        entries
            .into_iter()
            .map(|(key, value)| {
                let options = options.clone();
                async move { storage.put(&key, value, options).await }
            }),
    )
    .await;

    results.into_iter().collect()
}

/// Delete every key under `prefix`, page by page. Not atomic: keys written
/// under the prefix while this runs may survive.
pub async fn delete_by_prefix(storage: &dyn StorageBackend, prefix: &str) -> StorageResult<usize> {
    let mut deleted = 0usize;
    let mut cursor = None;

    loop {
        let page = storage
            .list(prefix, ListOptions::page(DELETE_PAGE_SIZE, cursor))
            .await?;
        for key in &page.keys {
            storage.delete(key).await?;
            deleted += 1;
        }
        if page.complete {
            break;
        }
        cursor = page.cursor;
    }

    tracing::debug!("Deleted {} keys under prefix {}", deleted, prefix);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ListResult, MemoryStorage, StorageError, VersionedValue};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Counter {
        count: u64,
    }

    fn increment(current: Option<Counter>) -> Counter {
        let mut counter = current.unwrap_or_default();
        counter.count += 1;
        counter
    }

    /// Backend whose conditional writes always lose the race
    struct AlwaysConflicting {
        inner: MemoryStorage,
        attempts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl StorageBackend for AlwaysConflicting {
        async fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, value: serde_json::Value, options: PutOptions) -> StorageResult<()> {
            self.inner.put(key, value, options).await
        }
        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.inner.delete(key).await
        }
        async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<ListResult> {
            self.inner.list(prefix, options).await
        }
        async fn get_with_version(&self, key: &str) -> StorageResult<Option<VersionedValue>> {
            self.inner.get_with_version(key).await
        }
        async fn put_if_match(&self, _key: &str, _value: serde_json::Value, _expected: u64) -> StorageResult<bool> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    /// Backend that fails reads for keys containing "broken"
    struct PartiallyBroken {
        inner: MemoryStorage,
    }

    #[async_trait::async_trait]
    impl StorageBackend for PartiallyBroken {
        async fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
            if key.contains("broken") {
                return Err(StorageError::Backend(anyhow::anyhow!("disk on fire")));
            }
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, value: serde_json::Value, options: PutOptions) -> StorageResult<()> {
            self.inner.put(key, value, options).await
        }
        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.inner.delete(key).await
        }
        async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<ListResult> {
            self.inner.list(prefix, options).await
        }
        async fn get_with_version(&self, key: &str) -> StorageResult<Option<VersionedValue>> {
            self.inner.get_with_version(key).await
        }
        async fn put_if_match(&self, key: &str, value: serde_json::Value, expected: u64) -> StorageResult<bool> {
            self.inner.put_if_match(key, value, expected).await
        }
    }

    #[tokio::test]
    async fn test_atomic_update_creates_and_updates() {
        let storage = MemoryStorage::new();
        let options = AtomicUpdateOptions::default();

        let created = atomic_update(&storage, "counter", increment, &options).await.unwrap();
        assert!(created.success);
        assert_eq!(created.value.unwrap().count, 1);

        let updated = atomic_update(&storage, "counter", increment, &options).await.unwrap();
        assert!(updated.success);
        assert_eq!(updated.retries, 0);
        assert_eq!(storage.get("counter").await.unwrap(), Some(json!({"count": 2})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_lose_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        storage.put("counter", json!({"count": 0}), PutOptions::default()).await.unwrap();

        let options = AtomicUpdateOptions {
            max_retries: 200,
            backoff: Duration::from_millis(1),
            strict_create: false,
        };

        let tasks: Vec<_> = (0..25)
            .map(|_| {
                let storage = storage.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    atomic_update(storage.as_ref(), "counter", increment, &options).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().unwrap().success);
        }

        assert_eq!(storage.get("counter").await.unwrap(), Some(json!({"count": 25})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_strict_create_closes_creation_race() {
        let storage = Arc::new(MemoryStorage::new());
        let options = AtomicUpdateOptions {
            max_retries: 200,
            backoff: Duration::from_millis(1),
            strict_create: true,
        };

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let storage = storage.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    atomic_update(storage.as_ref(), "fresh", increment, &options).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().unwrap().success);
        }

        assert_eq!(storage.get("fresh").await.unwrap(), Some(json!({"count": 10})));
    }

    #[tokio::test]
    async fn test_atomic_update_reports_exhaustion() {
        let storage = AlwaysConflicting {
            inner: MemoryStorage::new(),
            attempts: AtomicU32::new(0),
        };
        storage.put("k", json!({"count": 5}), PutOptions::default()).await.unwrap();

        let options = AtomicUpdateOptions {
            max_retries: 3,
            backoff: Duration::from_millis(1),
            strict_create: false,
        };
        let result = atomic_update(&storage, "k", increment, &options).await.unwrap();

        assert!(!result.success);
        assert!(result.value.is_none());
        assert_eq!(result.retries, 3);
        assert_eq!(storage.attempts.load(Ordering::SeqCst), 4);
        // Stored value untouched
        assert_eq!(storage.get("k").await.unwrap(), Some(json!({"count": 5})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_linearly_per_retry() {
        let storage = AlwaysConflicting {
            inner: MemoryStorage::new(),
            attempts: AtomicU32::new(0),
        };
        storage.put("k", json!({"count": 0}), PutOptions::default()).await.unwrap();

        let options = AtomicUpdateOptions {
            max_retries: 3,
            backoff: Duration::from_millis(100),
            strict_create: false,
        };
        let started = tokio::time::Instant::now();
        let result = atomic_update(&storage, "k", increment, &options).await.unwrap();
        let elapsed = started.elapsed();

        assert!(!result.success);
        // 100ms + 200ms + 300ms of virtual time
        assert!(elapsed >= Duration::from_millis(600), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(650), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_batch_get_treats_failures_as_absent() {
        let storage = PartiallyBroken {
            inner: MemoryStorage::new(),
        };
        storage.put("a", json!(1), PutOptions::default()).await.unwrap();
        storage.put("broken", json!(2), PutOptions::default()).await.unwrap();

        let keys = vec!["a".to_string(), "broken".to_string(), "missing".to_string()];
        let found = batch_get(&storage, &keys).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found.get("a"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_batch_put_and_delete_by_prefix() {
        let storage = MemoryStorage::new();
        let entries = (0..250)
            .map(|i| (format!("tmp:{:04}", i), json!(i)))
            .chain(std::iter::once(("keep:1".to_string(), json!("stay"))))
            .collect();
        batch_put(&storage, entries, PutOptions::default()).await.unwrap();
        assert_eq!(storage.len().await, 251);

        let deleted = delete_by_prefix(&storage, "tmp:").await.unwrap();
        assert_eq!(deleted, 250);
        assert_eq!(storage.len().await, 1);
        assert_eq!(storage.get("keep:1").await.unwrap(), Some(json!("stay")));
    }
}
