// Identity echo tool, useful for smoke-testing credentials

use crate::context::InvocationContext;
use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{json_schema_object, Tool};
use anyhow::Result;
use toolhost_core::hashing::hash_fast;

/// Reports the identity the server resolved for the caller
pub struct WhoAmITool;

#[async_trait::async_trait]
impl Tool for WhoAmITool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "whoami".to_string(),
            description: "Show the identity resolved for the current credential".to_string(),
            input_schema: json_schema_object(serde_json::json!({}), vec![]),
        }
    }

    async fn execute(&self, ctx: &InvocationContext, _arguments: serde_json::Value) -> Result<CallToolResult> {
        let summary = serde_json::json!({
            "userId": ctx.identity.user_id,
            "isAdmin": ctx.identity.is_admin,
            "debugMode": ctx.debug_mode,
            "keyFingerprint": ctx.credential_hash.as_deref().map(hash_fast),
            "requestId": ctx.request_id,
        });
        Ok(CallToolResult::text(serde_json::to_string_pretty(&summary)?))
    }
}
