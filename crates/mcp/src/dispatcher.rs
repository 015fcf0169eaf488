// JSON-RPC method dispatch and the tool invocation pipeline

use crate::context::{Environment, InvocationContext};
use crate::error::{DispatchError, GENERIC_EXECUTION_MESSAGE};
use crate::protocol::*;
use crate::quality::{ProgressConfig, ProgressEntry, ProgressLog, QualityReport};
use crate::tools::{Tool, ToolRegistry};
use crate::transport::{extract_credential, TransportMeta};
use anyhow::{anyhow, Context};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use toolhost_core::hashing::{hash_fast, hash_secure};
use toolhost_core::{CredentialResolver, Identity, StorageBackend};
use tracing::{debug, info, warn};

/// User id for calls admitted without a credential
pub const ANONYMOUS_USER_ID: &str = "anonymous";

const LOG_LEVELS: &[&str] = &[
    "debug",
    "info",
    "notice",
    "warning",
    "error",
    "critical",
    "alert",
    "emergency",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub instructions: Option<String>,

    /// Reject `tools/call` without a credential
    #[serde(default = "default_true")]
    pub require_auth: bool,

    /// Return error detail to every caller, not just debug identities
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_true")]
    pub enable_resources: bool,

    #[serde(default = "default_true")]
    pub enable_prompts: bool,

    #[serde(default = "default_true")]
    pub enable_logging: bool,
}

fn default_name() -> String {
    "toolhost".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            instructions: None,
            require_auth: true,
            debug: false,
            enable_resources: true,
            enable_prompts: true,
            enable_logging: true,
        }
    }
}

/// Routes JSON-RPC requests. Holds no per-session state: identity is
/// resolved again on every call.
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: Arc<ToolRegistry>,
    resolver: Arc<CredentialResolver>,
    storage: Arc<dyn StorageBackend>,
    env: Arc<Environment>,
    progress: ProgressLog,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: Arc<ToolRegistry>,
        resolver: Arc<CredentialResolver>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let progress = ProgressLog::new(storage.clone(), ProgressConfig::default().retention());
        Self {
            config,
            registry,
            resolver,
            storage,
            env: Arc::new(Environment::new()),
            progress,
        }
    }

    pub fn with_environment(mut self, env: Arc<Environment>) -> Self {
        self.env = env;
        self
    }

    pub fn with_progress(mut self, progress: &ProgressConfig) -> Self {
        self.progress = ProgressLog::new(self.storage.clone(), progress.retention());
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Handle one raw message. Returns the encoded response, or `None`
    /// when the message was a notification.
    pub async fn handle_message(&self, message: &str, transport: &TransportMeta) -> Option<String> {
        let response = match serde_json::from_str::<Value>(message) {
            Err(e) => {
                debug!("Unparseable message: {}", e);
                Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error()))
            }
            Ok(value) => {
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<JsonRpcRequest>(value) {
                    Ok(request) => self.handle(request, transport).await,
                    Err(e) => Some(JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
                    )),
                }
            }
        }?;

        match serde_json::to_string(&response) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!("Failed to encode response: {}", e);
                None
            }
        }
    }

    /// Handle one decoded request
    pub async fn handle(&self, request: JsonRpcRequest, transport: &TransportMeta) -> Option<JsonRpcResponse> {
        let result = if request.jsonrpc != JSONRPC_VERSION {
            Err(DispatchError::InvalidRequest(format!(
                "Unsupported jsonrpc version: {}",
                request.jsonrpc
            )))
        } else {
            self.route(&request, transport).await
        };

        let Some(id) = request.id else {
            if let Err(e) = result {
                debug!("Notification {} failed: {}", request.method, e);
            }
            return None;
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, e.into_rpc_error()),
        })
    }

    async fn route(&self, request: &JsonRpcRequest, transport: &TransportMeta) -> Result<Value, DispatchError> {
        let params = request.params.as_ref();
        match request.method.as_str() {
            "initialize" => self.initialize(params),
            "notifications/initialized" | "initialized" => {
                debug!("Client finished initialization");
                Ok(Value::Null)
            }
            "ping" => Ok(json!({})),
            "tools/list" => to_json(ListToolsResult {
                tools: self.registry.list_schemas(),
            }),
            "tools/call" => to_json(self.call_tool(params, transport).await?),
            "resources/list" if self.config.enable_resources => Ok(json!({ "resources": [] })),
            "resources/read" if self.config.enable_resources => Err(DispatchError::ResourceNotFound(
                string_param(params, "uri").unwrap_or_default(),
            )),
            "prompts/list" if self.config.enable_prompts => Ok(json!({ "prompts": [] })),
            "prompts/get" if self.config.enable_prompts => Err(DispatchError::PromptNotFound(
                string_param(params, "name").unwrap_or_default(),
            )),
            "logging/setLevel" if self.config.enable_logging => self.set_level(params),
            other => Err(DispatchError::MethodNotFound(other.to_string())),
        }
    }

    fn capabilities(&self) -> ServerCapabilities {
        let list_changed = || {
            Some(ListChangedCapability {
                list_changed: false,
            })
        };
        ServerCapabilities {
            tools: list_changed(),
            resources: self.config.enable_resources.then(list_changed).flatten(),
            prompts: self.config.enable_prompts.then(list_changed).flatten(),
            logging: self.config.enable_logging.then(|| json!({})),
        }
    }

    fn initialize(&self, params: Option<&Value>) -> Result<Value, DispatchError> {
        let params = params.ok_or_else(|| DispatchError::invalid_params("Missing initialize params"))?;
        let params: InitializeParams = serde_json::from_value(params.clone())
            .map_err(|e| DispatchError::invalid_params(format!("Invalid initialize params: {}", e)))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            return Err(DispatchError::invalid_params(format!(
                "Unsupported protocol version: {} (supported: {})",
                params.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            )));
        }
        if params.client_info.name.trim().is_empty() {
            return Err(DispatchError::invalid_params("clientInfo.name is required"));
        }

        info!(
            "Client {} {} connected (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        to_json(InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: self.capabilities(),
            server_info: ServerInfo {
                name: self.config.name.clone(),
                version: self.config.version.clone(),
            },
            instructions: self.config.instructions.clone(),
        })
    }

    fn set_level(&self, params: Option<&Value>) -> Result<Value, DispatchError> {
        let level = string_param(params, "level")
            .ok_or_else(|| DispatchError::invalid_params("Missing log level"))?;
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(DispatchError::invalid_params(format!("Unknown log level: {}", level)));
        }
        debug!("Client requested log level {}", level);
        Ok(json!({}))
    }

    async fn call_tool(
        &self,
        params: Option<&Value>,
        transport: &TransportMeta,
    ) -> Result<CallToolResult, DispatchError> {
        let name = string_param(params, "name")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DispatchError::invalid_params("Missing tool name"))?;

        let (identity, credential_hash) = match extract_credential(transport, params) {
            Some(credential) => {
                let identity = self.resolver.resolve(&credential).await?;
                (identity, Some(hash_secure(&credential)))
            }
            None if self.config.require_auth => return Err(DispatchError::CredentialRequired),
            None => (Identity::user(ANONYMOUS_USER_ID), None),
        };

        let tool = self
            .registry
            .get(&name)
            .ok_or_else(|| DispatchError::ToolNotFound(name.clone()))?;

        let arguments = params
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        let violations = self
            .registry
            .validator(&name)
            .map(|validator| validator.validate(&arguments))
            .unwrap_or_default();
        if !violations.is_empty() {
            return Err(DispatchError::InvalidParams {
                message: format!("Invalid arguments for tool {}", name),
                violations,
            });
        }

        let ctx = InvocationContext {
            debug_mode: identity.debug_mode || self.config.debug,
            identity,
            credential_hash,
            storage: self.storage.clone(),
            env: self.env.clone(),
            request_id: uuid::Uuid::new_v4().to_string(),
        };

        info!(
            "Tool call: {} (request {}, user {}, key {})",
            name,
            ctx.request_id,
            ctx.identity.user_id,
            ctx.credential_hash.as_deref().map(hash_fast).unwrap_or_default()
        );

        let outcome = AssertUnwindSafe(run_pipeline(tool.as_ref(), &ctx, arguments))
            .catch_unwind()
            .await;
        let (mut result, report) = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(execution_error(&ctx, &name, e)),
            Err(panic) => {
                let e = anyhow!("Tool panicked: {}", panic_message(&*panic));
                return Err(execution_error(&ctx, &name, e));
            }
        };

        let Some(report) = report else {
            return Ok(result);
        };

        self.record_progress(&ctx, &name, &report).await;

        let blocking = report.blocking_failures();
        if !blocking.is_empty() {
            warn!(
                "Quality gate blocked {} (request {}): {} failing checks",
                name,
                ctx.request_id,
                blocking.len()
            );
            return Err(DispatchError::QualityGateFailed {
                tool: name,
                checks: blocking,
            });
        }

        let warnings = report.warnings();
        if !warnings.is_empty() {
            let mut meta = match result.meta.take() {
                Some(Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            meta.insert("qualityWarnings".to_string(), to_json(&warnings)?);
            result.meta = Some(Value::Object(meta));
        }

        Ok(result)
    }

    /// Best effort: a failed append is logged and never fails the call
    async fn record_progress(&self, ctx: &InvocationContext, tool_name: &str, report: &QualityReport) {
        let entry = ProgressEntry::from_report(tool_name, report);
        if let Err(e) = self
            .progress
            .append(&ctx.identity.user_id, &ctx.request_id, &entry)
            .await
        {
            warn!(
                "Failed to record progress for {} (user {}): {}",
                tool_name, ctx.identity.user_id, e
            );
        }
    }
}

/// before hook, handler, after hook, quality gate; strictly in that order
async fn run_pipeline(
    tool: &dyn Tool,
    ctx: &InvocationContext,
    arguments: Value,
) -> anyhow::Result<(CallToolResult, Option<QualityReport>)> {
    tool.before_execute(ctx, &arguments)
        .await
        .context("before_execute hook failed")?;
    let result = tool.execute(ctx, arguments.clone()).await?;
    tool.after_execute(ctx, &arguments, &result)
        .await
        .context("after_execute hook failed")?;
    let report = tool
        .validate(ctx, &arguments, &result)
        .await
        .context("Quality gate could not be evaluated")?;
    Ok((result, report))
}

fn execution_error(ctx: &InvocationContext, tool_name: &str, error: anyhow::Error) -> DispatchError {
    warn!("Tool {} failed (request {}): {:#}", tool_name, ctx.request_id, error);
    if ctx.debug_mode {
        DispatchError::ExecutionError {
            message: format!("{:#}", error),
            debug_details: Some(format!("{:?}", error)),
        }
    } else {
        DispatchError::ExecutionError {
            message: GENERIC_EXECUTION_MESSAGE.to_string(),
            debug_details: None,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn string_param(params: Option<&Value>, field: &str) -> Option<String> {
    params?.get(field)?.as_str().map(str::to_string)
}

fn to_json<T: Serialize>(value: T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: DispatcherConfig = toml::from_str("").unwrap();
        assert_eq!(config.name, "toolhost");
        assert!(config.require_auth);
        assert!(!config.debug);
        assert!(config.enable_resources);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_string_param() {
        let params = json!({"name": "whoami", "n": 3});
        assert_eq!(string_param(Some(&params), "name").as_deref(), Some("whoami"));
        assert!(string_param(Some(&params), "n").is_none());
        assert!(string_param(None, "name").is_none());
    }
}
