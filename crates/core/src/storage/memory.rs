// In-memory reference backend with versions and lazy expiry

use super::{
    ListOptions, ListResult, PutOptions, StorageBackend, StorageRecord, StorageResult,
    VersionedValue, ABSENT_VERSION,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

const DEFAULT_LIST_LIMIT: usize = 1000;

/// In-process storage backend (tests and single-node deployments)
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<BTreeMap<String, StorageRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.records
            .read()
            .await
            .values()
            .filter(|r| !r.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired record
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        before - records.len()
    }

    fn live<'a>(
        records: &'a BTreeMap<String, StorageRecord>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a StorageRecord> {
        records.get(key).filter(|r| !r.is_expired(now))
    }
}

fn expiry(options: &PutOptions, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(options.ttl?).ok()?;
    now.checked_add_signed(ttl)
}

#[async_trait::async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
        let records = self.records.read().await;
        Ok(Self::live(&records, key, Utc::now()).map(|r| r.value.clone()))
    }

    async fn put(&self, key: &str, value: serde_json::Value, options: PutOptions) -> StorageResult<()> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let version = Self::live(&records, key, now).map_or(ABSENT_VERSION, |r| r.version) + 1;
        let expires_at = expiry(&options, now);
        records.insert(
            key.to_string(),
            StorageRecord {
                value,
                version,
                metadata: options.metadata,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<ListResult> {
        let now = Utc::now();
        let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
        let mut records = self.records.write().await;

        // Expired records under the prefix are dropped as the listing passes them
        let expired: Vec<String> = records
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, record)| record.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            records.remove(key);
        }

        let start = match options.cursor {
            Some(cursor) if cursor.as_str() >= prefix => Bound::Excluded(cursor),
            _ => Bound::Included(prefix.to_string()),
        };

        let mut matching = records
            .range::<String, _>((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone());

        let keys: Vec<String> = matching.by_ref().take(limit).collect();
        let complete = matching.next().is_none();
        let cursor = if complete { None } else { keys.last().cloned() };

        Ok(ListResult {
            keys,
            cursor,
            complete,
        })
    }

    async fn get_with_version(&self, key: &str) -> StorageResult<Option<VersionedValue>> {
        let records = self.records.read().await;
        Ok(Self::live(&records, key, Utc::now()).map(|r| VersionedValue {
            value: r.value.clone(),
            version: r.version,
        }))
    }

    async fn put_if_match(
        &self,
        key: &str,
        value: serde_json::Value,
        expected_version: u64,
    ) -> StorageResult<bool> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let current = Self::live(&records, key, now);
        let current_version = current.map_or(ABSENT_VERSION, |r| r.version);
        if current_version != expected_version {
            return Ok(false);
        }

        let (metadata, expires_at) = current
            .map(|r| (r.metadata.clone(), r.expires_at))
            .unwrap_or((None, None));
        records.insert(
            key.to_string(),
            StorageRecord {
                value,
                version: current_version + 1,
                metadata,
                expires_at,
            },
        );
        Ok(true)
    }
}
