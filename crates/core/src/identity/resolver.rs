// Layered credential resolution: admin key, allow-list, index, scan

use super::{AuthError, Identity, IdentityIndex};
use crate::hashing::{constant_time_eq, hash_fast, hash_secure};
use crate::rate_limit::RateLimiter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Credential resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Single privileged credential, checked before anything else
    #[serde(default)]
    pub admin_key: Option<String>,
    /// Static allow-list of non-admin credentials
    #[serde(default)]
    pub valid_keys: Vec<String>,
    /// Fall back to scanning user records when the index misses
    #[serde(default = "default_scan_enabled")]
    pub scan_enabled: bool,
    /// Maximum user records examined per scan
    #[serde(default = "default_scan_budget")]
    pub scan_budget: usize,
    /// Scans allowed per credential per rate-limit window
    #[serde(default = "default_scan_rate_limit")]
    pub scan_rate_limit: u32,
}

fn default_scan_enabled() -> bool {
    true
}

fn default_scan_budget() -> usize {
    500
}

fn default_scan_rate_limit() -> u32 {
    10
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_key: None,
            valid_keys: Vec::new(),
            scan_enabled: default_scan_enabled(),
            scan_budget: default_scan_budget(),
            scan_rate_limit: default_scan_rate_limit(),
        }
    }
}

/// Resolves a bearer credential to an [`Identity`].
///
/// Layers run cheapest first and stop at the first hit:
/// 1. configured admin key
/// 2. static allow-list
/// 3. index point lookup
/// 4. rate-limited, budgeted scan of user records, which back-fills the index
pub struct CredentialResolver {
    config: AuthConfig,
    index: Arc<IdentityIndex>,
    limiter: Arc<RateLimiter>,
}

impl CredentialResolver {
    pub fn new(config: AuthConfig, index: Arc<IdentityIndex>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            config,
            index,
            limiter,
        }
    }

    pub fn index(&self) -> &Arc<IdentityIndex> {
        &self.index
    }

    pub async fn resolve(&self, credential: &str) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::CredentialRequired);
        }

        if let Some(admin_key) = self.config.admin_key.as_deref().filter(|k| !k.is_empty()) {
            if constant_time_eq(credential, admin_key) {
                return Ok(Identity::admin());
            }
        }

        if self.matches_allow_list(credential) {
            return Ok(Identity::user(format!("key_{}", hash_fast(credential))));
        }

        let key_hash = hash_secure(credential);

        match self.index.lookup_hashed(&key_hash).await {
            Ok(Some(entry)) => return Ok(Identity::from(&entry)),
            Ok(None) => {}
            Err(e) => tracing::warn!("Index lookup failed, falling back: {}", e),
        }

        if !self.config.scan_enabled {
            return Err(AuthError::AuthFailed);
        }

        if !self.limiter.check(&key_hash, self.config.scan_rate_limit) {
            let retry_after_ms = self
                .limiter
                .reset_after(&key_hash)
                .map(|d| d.as_millis() as u64);
            tracing::warn!(
                "Credential scan throttled for key {}",
                &key_hash[..12]
            );
            return Err(AuthError::RateLimited { retry_after_ms });
        }

        let scan = match self.index.scan(credential, self.config.scan_budget).await {
            Ok(scan) => scan,
            Err(e) => {
                tracing::warn!("Credential scan failed: {}", e);
                return Err(AuthError::AuthFailed);
            }
        };

        let Some(entry) = scan.entry else {
            tracing::debug!("Credential scan missed after {} records", scan.records_examined);
            return Err(AuthError::AuthFailed);
        };

        tracing::info!(
            "Credential for user {} found by scan after {} records, back-filling index",
            entry.user_id,
            scan.records_examined
        );
        if let Err(e) = self.index.store_hashed(&key_hash, &entry).await {
            tracing::warn!("Failed to back-fill index for user {}: {}", entry.user_id, e);
        }

        Ok(Identity::from(&entry))
    }

    /// Visits every configured key so timing does not reveal list position
    fn matches_allow_list(&self, credential: &str) -> bool {
        let mut found = false;
        for key in &self.config.valid_keys {
            found |= !key.is_empty() && constant_time_eq(credential, key);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IndexMetadata, UserRecord};
    use crate::identity::index::user_key;
    use crate::rate_limit::RateLimitConfig;
    use crate::storage::{self, MemoryStorage, PutOptions, StorageBackend};
    use chrono::Utc;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        index: Arc<IdentityIndex>,
        limiter: Arc<RateLimiter>,
    }

    impl Fixture {
        fn new() -> Self {
            let storage = Arc::new(MemoryStorage::new());
            let index = Arc::new(IdentityIndex::new(storage.clone()));
            let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
            Self {
                storage,
                index,
                limiter,
            }
        }

        fn resolver(&self, config: AuthConfig) -> CredentialResolver {
            CredentialResolver::new(config, self.index.clone(), self.limiter.clone())
        }

        /// A provisioned user that is missing from the index
        async fn unindexed_user(&self, user_id: &str, credential: &str, is_admin: bool) {
            let record = UserRecord {
                user_id: user_id.to_string(),
                key_hash: Some(hash_secure(credential)),
                is_admin,
                debug_mode: false,
                name: None,
                email: None,
                created_by: None,
                created_at: Utc::now(),
            };
            storage::store(
                self.storage.as_ref(),
                &user_key(user_id),
                &record,
                PutOptions::default(),
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_admin_key_wins_over_allow_list() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(AuthConfig {
            admin_key: Some("X".to_string()),
            valid_keys: vec!["X".to_string()],
            ..Default::default()
        });

        let identity = resolver.resolve("X").await.unwrap();
        assert!(identity.is_admin);
        assert!(identity.debug_mode);
        assert_eq!(identity.user_id, "admin");
    }

    #[tokio::test]
    async fn test_allow_list_identity() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(AuthConfig {
            valid_keys: vec!["k1".to_string(), "k2".to_string()],
            ..Default::default()
        });

        let identity = resolver.resolve("k2").await.unwrap();
        assert!(!identity.is_admin);
        assert!(!identity.debug_mode);
        assert_eq!(identity.user_id, format!("key_{}", hash_fast("k2")));
        assert!(fixture.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_index_hit_trusts_entry() {
        let fixture = Fixture::new();
        let metadata = IndexMetadata {
            debug_mode: true,
            ..Default::default()
        };
        fixture.index.put("u1", "cred-1", metadata).await.unwrap();

        let identity = fixture.resolver(AuthConfig::default()).resolve("cred-1").await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert!(identity.debug_mode);
        assert!(!identity.is_admin);
        // No scan happened, so no limiter window was opened
        assert!(fixture.limiter.is_empty());
    }

    #[tokio::test]
    async fn test_scan_self_heals_index() {
        let fixture = Fixture::new();
        fixture.unindexed_user("u7", "cred-7", true).await;
        assert!(fixture.index.lookup("cred-7").await.unwrap().is_none());

        let identity = fixture.resolver(AuthConfig::default()).resolve("cred-7").await.unwrap();
        assert_eq!(identity.user_id, "u7");
        assert!(identity.is_admin);

        let no_scan = fixture.resolver(AuthConfig {
            scan_enabled: false,
            ..Default::default()
        });
        let again = no_scan.resolve("cred-7").await.unwrap();
        assert_eq!(again, identity);
    }

    #[tokio::test]
    async fn test_unknown_credential_fails_opaquely() {
        let fixture = Fixture::new();
        fixture.unindexed_user("u1", "cred-1", false).await;
        let resolver = fixture.resolver(AuthConfig {
            admin_key: Some("admin-secret".to_string()),
            valid_keys: vec!["static".to_string()],
            ..Default::default()
        });

        assert_eq!(resolver.resolve("nope").await, Err(AuthError::AuthFailed));
        assert_eq!(resolver.resolve("admin-secreT").await, Err(AuthError::AuthFailed));

        let no_scan = fixture.resolver(AuthConfig {
            scan_enabled: false,
            ..Default::default()
        });
        assert_eq!(no_scan.resolve("cred-1").await, Err(AuthError::AuthFailed));
    }

    #[tokio::test]
    async fn test_empty_credential_does_not_consume_budget() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(AuthConfig {
            scan_rate_limit: 1,
            ..Default::default()
        });

        assert_eq!(resolver.resolve("").await, Err(AuthError::CredentialRequired));
        assert_eq!(resolver.resolve("   ").await, Err(AuthError::CredentialRequired));
        assert!(fixture.limiter.is_empty());

        assert!(fixture.limiter.check(&hash_secure(""), 1));
    }

    #[tokio::test]
    async fn test_scan_is_rate_limited() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(AuthConfig {
            scan_rate_limit: 2,
            ..Default::default()
        });

        assert_eq!(resolver.resolve("guess").await, Err(AuthError::AuthFailed));
        assert_eq!(resolver.resolve("guess").await, Err(AuthError::AuthFailed));
        match resolver.resolve("guess").await {
            Err(AuthError::RateLimited { retry_after_ms }) => {
                assert!(retry_after_ms.unwrap() <= 60_000);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        // A different credential has its own budget
        assert_eq!(resolver.resolve("other").await, Err(AuthError::AuthFailed));
    }

    #[tokio::test]
    async fn test_scan_budget_bounds_resolution() {
        let fixture = Fixture::new();
        for i in 0..5 {
            fixture
                .unindexed_user(&format!("u{}", i), &format!("cred-{}", i), false)
                .await;
        }

        let tight = fixture.resolver(AuthConfig {
            scan_budget: 2,
            ..Default::default()
        });
        assert_eq!(tight.resolve("cred-4").await, Err(AuthError::AuthFailed));

        let roomy = fixture.resolver(AuthConfig::default());
        assert_eq!(roomy.resolve("cred-4").await.unwrap().user_id, "u4");
    }

    #[tokio::test]
    async fn test_revoked_credential_is_rejected() {
        let fixture = Fixture::new();
        fixture.index.provision("u1", "cred-1", IndexMetadata::default()).await.unwrap();
        let resolver = fixture.resolver(AuthConfig::default());
        assert!(resolver.resolve("cred-1").await.is_ok());

        fixture.index.revoke("u1", "cred-1").await.unwrap();
        assert_eq!(resolver.resolve("cred-1").await, Err(AuthError::AuthFailed));
        assert!(fixture.storage.get("user:u1").await.unwrap().is_none());
    }
}
