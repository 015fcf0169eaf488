// Dispatch error taxonomy and its mapping onto JSON-RPC errors

use crate::protocol::{error_codes, JsonRpcError};
use crate::quality::QualityCheck;
use crate::schema::SchemaViolation;
use serde_json::json;
use toolhost_core::AuthError;

/// Message returned for execution failures outside debug mode
pub const GENERIC_EXECUTION_MESSAGE: &str = "Tool execution failed";

/// Failures surfaced to the caller of a JSON-RPC method.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// Malformed envelope.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown or disabled method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Parameters failed validation; `violations` lists every schema problem.
    #[error("{message}")]
    InvalidParams {
        message: String,
        violations: Vec<SchemaViolation>,
    },

    /// No credential was presented but one is needed.
    #[error("Authentication required")]
    CredentialRequired,

    /// Presented credential was rejected. Says nothing about why.
    #[error("Authentication failed")]
    AuthFailed,

    #[error("Too many authentication attempts")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// A hook or handler failed. `debug_details` is only set in debug mode.
    #[error("{message}")]
    ExecutionError {
        message: String,
        debug_details: Option<String>,
    },

    /// The handler ran but its result failed an error-severity check.
    #[error("Quality gate failed for tool {tool}")]
    QualityGateFailed {
        tool: String,
        checks: Vec<QualityCheck>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            violations: Vec::new(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => error_codes::INVALID_PARAMS,
            Self::CredentialRequired => error_codes::AUTH_REQUIRED,
            Self::AuthFailed => error_codes::AUTH_FAILED,
            Self::RateLimited { .. } => error_codes::RATE_LIMITED,
            Self::ToolNotFound(_) => error_codes::TOOL_NOT_FOUND,
            Self::ResourceNotFound(_) => error_codes::RESOURCE_NOT_FOUND,
            Self::PromptNotFound(_) => error_codes::PROMPT_NOT_FOUND,
            Self::ExecutionError { .. } => error_codes::TOOL_EXECUTION_ERROR,
            Self::QualityGateFailed { .. } => error_codes::TOOL_QUALITY_GATE_FAILED,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn into_rpc_error(self) -> JsonRpcError {
        let error = JsonRpcError::custom(self.code(), self.to_string());
        match self {
            Self::InvalidParams { violations, .. } if !violations.is_empty() => {
                error.with_data(json!({ "violations": violations }))
            }
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => error.with_data(json!({ "retryAfterMs": ms })),
            Self::ToolNotFound(tool) => error.with_data(json!({ "tool": tool })),
            Self::ExecutionError {
                debug_details: Some(details),
                ..
            } => error.with_data(json!({ "debug": details })),
            Self::QualityGateFailed { tool, checks } => {
                error.with_data(json!({ "tool": tool, "checks": checks }))
            }
            _ => error,
        }
    }
}

impl From<AuthError> for DispatchError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::CredentialRequired => Self::CredentialRequired,
            AuthError::RateLimited { retry_after_ms } => Self::RateLimited { retry_after_ms },
            AuthError::AuthFailed => Self::AuthFailed,
        }
    }
}
