// Per-call invocation context handed to tools

use std::collections::HashMap;
use std::sync::Arc;
use toolhost_core::{Identity, StorageBackend};

/// Opaque bindings passed through to tool handlers unchanged.
///
/// The dispatcher assumes nothing about its contents; each tool reads and
/// validates the keys it needs.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: HashMap<String, serde_json::Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<HashMap<String, serde_json::Value>> for Environment {
    fn from(values: HashMap<String, serde_json::Value>) -> Self {
        Self { values }
    }
}

/// Built fresh for every tool call and never shared between calls.
///
/// Carries the secure hash of the caller's credential, never the credential.
#[derive(Clone)]
pub struct InvocationContext {
    pub identity: Identity,
    /// `hash_secure` of the credential; `None` for anonymous calls
    pub credential_hash: Option<String>,
    pub storage: Arc<dyn StorageBackend>,
    pub env: Arc<Environment>,
    pub debug_mode: bool,
    pub request_id: String,
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("identity", &self.identity)
            .field("debug_mode", &self.debug_mode)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
