// Storage-backed credential index with a budgeted fallback scan

use crate::hashing::{constant_time_eq, hash_secure, is_secure_digest};
use crate::storage::{self, ListOptions, PutOptions, StorageBackend, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key prefix for hash -> identity entries
pub const INDEX_PREFIX: &str = "index:key:";
/// Key prefix for provisioned user records
pub const USER_PREFIX: &str = "user:";

const SCAN_PAGE_SIZE: usize = 100;
const REBUILD_PAGE_SIZE: usize = 100;

pub fn index_key(key_hash: &str) -> String {
    format!("{}{}", INDEX_PREFIX, key_hash)
}

pub fn user_key(user_id: &str) -> String {
    format!("{}{}", USER_PREFIX, user_id)
}

/// Cached identity stored under the credential's secure hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub user_id: String,
    pub is_admin: bool,
    pub debug_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Provisioned user. This record, not the index, owns the privilege flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    /// `hash_secure` of the user's credential
    #[serde(default)]
    pub key_hash: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for IndexEntry {
    fn from(record: &UserRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            is_admin: record.is_admin,
            debug_mode: record.debug_mode,
            name: record.name.clone(),
            email: record.email.clone(),
            created_by: record.created_by.clone(),
            created_at: record.created_at,
        }
    }
}

/// Attributes supplied when provisioning a credential
#[derive(Debug, Clone, Default)]
pub struct IndexMetadata {
    pub is_admin: bool,
    pub debug_mode: bool,
    pub name: Option<String>,
    pub email: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub entry: Option<IndexEntry>,
    pub records_examined: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildProgress {
    pub processed: usize,
    pub rebuilt: usize,
    pub skipped: usize,
}

pub type RebuildReport = RebuildProgress;

/// Storage-backed credential index.
///
/// Point lookups hit `index:key:<hash>`. When the index misses, [`scan`]
/// walks `user:` records under a record budget so a cold or damaged index
/// degrades to bounded work instead of an unbounded search.
///
/// [`scan`]: IdentityIndex::scan
pub struct IdentityIndex {
    storage: Arc<dyn StorageBackend>,
}

impl IdentityIndex {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Index a credential. Replaces any existing entry wholesale.
    pub async fn put(
        &self,
        user_id: &str,
        credential: &str,
        metadata: IndexMetadata,
    ) -> StorageResult<IndexEntry> {
        let entry = IndexEntry {
            user_id: user_id.to_string(),
            is_admin: metadata.is_admin,
            debug_mode: metadata.debug_mode,
            name: metadata.name,
            email: metadata.email,
            created_by: metadata.created_by,
            created_at: Utc::now(),
        };
        self.store_hashed(&hash_secure(credential), &entry).await?;
        Ok(entry)
    }

    /// Write an entry for an already-hashed credential
    pub async fn store_hashed(&self, key_hash: &str, entry: &IndexEntry) -> StorageResult<()> {
        storage::store(
            self.storage.as_ref(),
            &index_key(key_hash),
            entry,
            PutOptions::default(),
        )
        .await
    }

    pub async fn remove(&self, credential: &str) -> StorageResult<()> {
        self.storage.delete(&index_key(&hash_secure(credential))).await
    }

    pub async fn lookup(&self, credential: &str) -> StorageResult<Option<IndexEntry>> {
        self.lookup_hashed(&hash_secure(credential)).await
    }

    pub async fn lookup_hashed(&self, key_hash: &str) -> StorageResult<Option<IndexEntry>> {
        storage::load(self.storage.as_ref(), &index_key(key_hash)).await
    }

    /// Linear search of user records, stopping at a match or after `budget`
    /// records have been examined.
    pub async fn scan(&self, credential: &str, budget: usize) -> StorageResult<ScanResult> {
        let target = hash_secure(credential);
        let mut examined = 0usize;
        let mut cursor = None;

        while examined < budget {
            let page_size = SCAN_PAGE_SIZE.min(budget - examined);
            let page = self
                .storage
                .list(USER_PREFIX, ListOptions::page(page_size, cursor))
                .await?;

            for key in &page.keys {
                examined += 1;
                if let Some(record) = self.load_user(key).await? {
                    let matched = record
                        .key_hash
                        .as_deref()
                        .is_some_and(|stored| constant_time_eq(stored, &target));
                    if matched {
                        return Ok(ScanResult {
                            entry: Some(IndexEntry::from(&record)),
                            records_examined: examined,
                        });
                    }
                }
                if examined >= budget {
                    break;
                }
            }

            if page.complete {
                break;
            }
            cursor = page.cursor;
        }

        Ok(ScanResult {
            entry: None,
            records_examined: examined,
        })
    }

    /// Regenerate every index entry from the stored user records.
    ///
    /// Maintenance only: this reads the whole user key space.
    pub async fn rebuild_all(
        &self,
        mut on_progress: Option<&mut (dyn FnMut(RebuildProgress) + Send)>,
    ) -> StorageResult<RebuildReport> {
        let mut progress = RebuildProgress::default();
        let mut cursor = None;

        loop {
            let page = self
                .storage
                .list(USER_PREFIX, ListOptions::page(REBUILD_PAGE_SIZE, cursor))
                .await?;

            for key in &page.keys {
                progress.processed += 1;
                let record = match self.load_user(key).await? {
                    Some(record) => record,
                    None => {
                        progress.skipped += 1;
                        continue;
                    }
                };
                match record.key_hash.as_deref() {
                    Some(hash) if is_secure_digest(hash) => {
                        self.store_hashed(hash, &IndexEntry::from(&record)).await?;
                        progress.rebuilt += 1;
                    }
                    _ => {
                        tracing::warn!("User {} has no usable key hash, skipping", record.user_id);
                        progress.skipped += 1;
                    }
                }
            }

            if let Some(callback) = on_progress.as_deref_mut() {
                callback(progress);
            }

            if page.complete {
                break;
            }
            cursor = page.cursor;
        }

        tracing::info!(
            "Index rebuild finished: {} processed, {} rebuilt, {} skipped",
            progress.processed,
            progress.rebuilt,
            progress.skipped
        );
        Ok(progress)
    }

    /// Create or replace a user record and its index entry
    pub async fn provision(
        &self,
        user_id: &str,
        credential: &str,
        metadata: IndexMetadata,
    ) -> StorageResult<UserRecord> {
        let record = UserRecord {
            user_id: user_id.to_string(),
            key_hash: Some(hash_secure(credential)),
            is_admin: metadata.is_admin,
            debug_mode: metadata.debug_mode,
            name: metadata.name,
            email: metadata.email,
            created_by: metadata.created_by,
            created_at: Utc::now(),
        };

        storage::store(
            self.storage.as_ref(),
            &user_key(user_id),
            &record,
            PutOptions::default(),
        )
        .await?;
        if let Some(hash) = record.key_hash.as_deref() {
            self.store_hashed(hash, &IndexEntry::from(&record)).await?;
        }

        tracing::info!("Provisioned user {}", user_id);
        Ok(record)
    }

    /// Delete a user record and its index entry. Idempotent.
    pub async fn revoke(&self, user_id: &str, credential: &str) -> StorageResult<()> {
        self.remove(credential).await?;
        self.storage.delete(&user_key(user_id)).await?;
        tracing::info!("Revoked user {}", user_id);
        Ok(())
    }

    async fn load_user(&self, key: &str) -> StorageResult<Option<UserRecord>> {
        let Some(value) = self.storage.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::debug!("Skipping malformed user record {}: {}", key, e);
                Ok(None)
            }
        }
    }
}
