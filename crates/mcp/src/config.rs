// Server configuration and the composition root that wires it together

use crate::context::Environment;
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::quality::ProgressConfig;
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use toolhost_core::{
    create_rate_limiter, AuthConfig, CredentialResolver, IdentityIndex, RateLimitConfig,
    StorageBackend,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolhostConfig {
    #[serde(default)]
    pub server: DispatcherConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub progress: ProgressConfig,
}

impl ToolhostConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!("Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read configuration file {}", config_path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration file")
    }

    /// Wire the limiter, identity index, resolver and dispatcher over `storage`
    pub fn build_dispatcher(
        &self,
        storage: Arc<dyn StorageBackend>,
        registry: ToolRegistry,
        env: Environment,
    ) -> Dispatcher {
        let limiter = create_rate_limiter(self.rate_limit.clone());
        let index = Arc::new(IdentityIndex::new(storage.clone()));
        let resolver = Arc::new(CredentialResolver::new(self.auth.clone(), index, limiter));

        Dispatcher::new(self.server.clone(), Arc::new(registry), resolver, storage)
            .with_environment(Arc::new(env))
            .with_progress(&self.progress)
    }
}
