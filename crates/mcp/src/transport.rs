// Transport metadata and credential extraction

use std::collections::HashMap;

pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Headers (or header-like values) that arrived with a request.
/// Names are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct TransportMeta {
    headers: HashMap<String, String>,
}

impl TransportMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header(AUTHORIZATION_HEADER, format!("Bearer {}", token))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Token from `Authorization: Bearer <token>`; the scheme is case-insensitive
    pub fn bearer_token(&self) -> Option<&str> {
        let (scheme, token) = self.header(AUTHORIZATION_HEADER)?.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        non_empty(token)
    }
}

/// Pick the caller's credential: bearer header, then `X-API-Key`, then
/// `params._meta.apiKey`. The first non-empty source wins.
pub fn extract_credential(
    transport: &TransportMeta,
    params: Option<&serde_json::Value>,
) -> Option<String> {
    transport
        .bearer_token()
        .or_else(|| transport.header(API_KEY_HEADER).and_then(non_empty))
        .or_else(|| {
            params?
                .get("_meta")?
                .get("apiKey")?
                .as_str()
                .and_then(non_empty)
        })
        .map(str::to_string)
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
