// Caller identity: credential index and layered resolution

pub mod index;
pub mod resolver;

pub use index::{
    IdentityIndex, IndexEntry, IndexMetadata, RebuildProgress, RebuildReport, ScanResult,
    UserRecord,
};
pub use resolver::{AuthConfig, CredentialResolver};

use serde::{Deserialize, Serialize};

/// User id assigned to the configured admin credential
pub const ADMIN_USER_ID: &str = "admin";

/// Resolved identity of an authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub is_admin: bool,
    pub debug_mode: bool,
}

impl Identity {
    pub fn admin() -> Self {
        Self {
            user_id: ADMIN_USER_ID.to_string(),
            is_admin: true,
            debug_mode: true,
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
            debug_mode: false,
        }
    }
}

impl From<&IndexEntry> for Identity {
    fn from(entry: &IndexEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            is_admin: entry.is_admin,
            debug_mode: entry.debug_mode,
        }
    }
}

/// Credential resolution failures.
///
/// `AuthFailed` is deliberately opaque: it never says which layer rejected
/// the credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Credential required")]
    CredentialRequired,

    #[error("Too many authentication attempts")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Invalid credential")]
    AuthFailed,
}
