// Tool argument validation backed by compiled JSON Schemas

use anyhow::{anyhow, Result};
use jsonschema::error::ValidationErrorKind;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single schema violation at a dotted path (`a.b`, `items[2]`).
/// The empty path is the argument object itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A tool's input schema, compiled once at registration
pub struct ArgumentValidator {
    compiled: JSONSchema,
    expects_object: bool,
}

impl ArgumentValidator {
    /// Compile `schema`, failing if it is not a valid JSON Schema
    pub fn compile(schema: &Value) -> Result<Self> {
        let compiled = JSONSchema::options()
            .compile(schema)
            .map_err(|e| anyhow!("Invalid input schema: {}", e))?;

        Ok(Self {
            compiled,
            expects_object: schema.get("type").and_then(Value::as_str) == Some("object"),
        })
    }

    /// Validate `value`, collecting every violation.
    ///
    /// Object fields set to `null` count as absent, so an optional field may
    /// be sent as null while a required one is reported missing.
    pub fn validate(&self, value: &Value) -> Vec<SchemaViolation> {
        if self.expects_object {
            match value {
                Value::Null => {
                    return vec![SchemaViolation::new("", "Expected an object but received null")]
                }
                Value::Array(_) => {
                    return vec![SchemaViolation::new("", "Expected an object but received an array")]
                }
                _ => {}
            }
        }

        let instance = without_null_fields(value);
        let errors = match self.compiled.validate(&instance) {
            Ok(()) => return Vec::new(),
            Err(errors) => errors,
        };

        errors
            .map(|error| {
                let path = dotted_path(&instance, &error.instance_path.to_string());
                match &error.kind {
                    ValidationErrorKind::Required { property } => {
                        let field = property.as_str().map(str::to_string).unwrap_or_else(|| property.to_string());
                        SchemaViolation::new(join(&path, &field), "Required field is missing")
                    }
                    _ => SchemaViolation::new(path, error.to_string()),
                }
            })
            .collect()
    }
}

/// Keep only the parts of an input schema callers should see
pub fn public_schema(schema: &Value) -> Value {
    let mut public = serde_json::Map::new();
    public.insert("type".to_string(), Value::String("object".to_string()));
    public.insert(
        "properties".to_string(),
        schema
            .get("properties")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
    );
    if let Some(required) = schema.get("required").filter(|r| r.is_array()) {
        public.insert("required".to_string(), required.clone());
    }
    Value::Object(public)
}

fn without_null_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, field)| !field.is_null())
                .map(|(name, field)| (name.clone(), without_null_fields(field)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(without_null_fields).collect()),
        other => other.clone(),
    }
}

/// Render a JSON pointer (`/tags/1`, `/owner/email`) as `tags[1]` or
/// `owner.email`, using the instance to tell indexes from keys.
fn dotted_path(instance: &Value, pointer: &str) -> String {
    let mut path = String::new();
    let mut node = Some(instance);

    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        match node {
            Some(Value::Array(items)) => {
                let index = segment.parse::<usize>().ok();
                path.push_str(&format!("[{}]", segment));
                node = index.and_then(|i| items.get(i));
            }
            _ => {
                path = join(&path, &segment);
                node = node.and_then(|n| n.get(&segment));
            }
        }
    }

    path
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}
