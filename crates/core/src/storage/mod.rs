// Versioned key-value storage contract

pub mod atomic;
pub mod memory;

pub use atomic::{
    atomic_update, batch_get, batch_put, delete_by_prefix, AtomicUpdateOptions,
    AtomicUpdateResult,
};
pub use memory::MemoryStorage;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version reported for a key that does not exist
pub const ABSENT_VERSION: u64 = 0;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// A stored value with its write version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRecord {
    pub value: serde_json::Value,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StorageRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub value: serde_json::Value,
    pub version: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub metadata: Option<serde_json::Value>,
    /// Record is treated as absent once this has elapsed
    pub ttl: Option<Duration>,
}

impl PutOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            metadata: None,
            ttl: Some(ttl),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    /// Opaque position returned by a previous page
    pub cursor: Option<String>,
}

impl ListOptions {
    pub fn page(limit: usize, cursor: Option<String>) -> Self {
        Self {
            limit: Some(limit),
            cursor,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResult {
    pub keys: Vec<String>,
    pub cursor: Option<String>,
    pub complete: bool,
}

/// Storage backend abstraction.
///
/// Every successful write bumps the record version by one. Absent keys report
/// [`ABSENT_VERSION`], so `put_if_match(key, value, ABSENT_VERSION)` is a
/// create-only write.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>>;

    async fn put(&self, key: &str, value: serde_json::Value, options: PutOptions) -> StorageResult<()>;

    /// Remove a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys starting with `prefix` in lexicographic order, one page at a time
    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<ListResult>;

    async fn get_with_version(&self, key: &str) -> StorageResult<Option<VersionedValue>>;

    /// Write only if the stored version equals `expected_version`.
    /// Returns `false` on a version mismatch.
    async fn put_if_match(
        &self,
        key: &str,
        value: serde_json::Value,
        expected_version: u64,
    ) -> StorageResult<bool>;
}

/// Read and decode a typed value
pub async fn load<T: DeserializeOwned>(
    storage: &dyn StorageBackend,
    key: &str,
) -> StorageResult<Option<T>> {
    match storage.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and write a typed value
pub async fn store<T: Serialize + Sync>(
    storage: &dyn StorageBackend,
    key: &str,
    value: &T,
    options: PutOptions,
) -> StorageResult<()> {
    storage.put(key, serde_json::to_value(value)?, options).await
}
