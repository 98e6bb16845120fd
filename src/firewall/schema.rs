//! JSON Schema validation for API responses.
//!
//! Responses are decoded into a [`serde_json::Value`], checked against a
//! compiled schema, and only then mapped onto typed structs.

use crate::error::{Result, SyncError};
use jsonschema::{Draft, Validator};
use serde::Serialize;
use serde_json::{json, Value};

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value (e.g. "/result/rules/0/id").
    pub path: String,
    /// Schema keyword that failed (e.g. "required", "type").
    pub code: String,
    pub message: String,
}

/// All violations found in one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolations(Vec<SchemaViolation>);

impl SchemaViolations {
    pub fn as_slice(&self) -> &[SchemaViolation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for SchemaViolations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|v| format!("{} [{}]: {}", display_path(&v.path), v.code, v.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for SchemaViolations {}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

/// A compiled response schema.
pub struct ResponseSchema {
    validator: Validator,
}

impl std::fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSchema").finish_non_exhaustive()
    }
}

impl ResponseSchema {
    /// Compile an arbitrary schema.
    pub fn compile(schema: &Value) -> Result<Self> {
        let validator = Validator::options()
            .with_draft(Draft::Draft7)
            .build(schema)
            .map_err(|e| SyncError::Schema(e.to_string()))?;
        Ok(Self { validator })
    }

    /// Schema for every ruleset-bearing response.
    pub fn ruleset() -> Result<Self> {
        Self::compile(&ruleset_response_schema())
    }

    /// Validate `instance`, collecting every violation.
    pub fn validate(&self, instance: &Value) -> std::result::Result<(), SchemaViolations> {
        let violations: Vec<SchemaViolation> = self
            .validator
            .iter_errors(instance)
            .map(|e| {
                let schema_path = e.schema_path.to_string();
                SchemaViolation {
                    path: e.instance_path.to_string(),
                    code: schema_path
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                    message: e.to_string(),
                }
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaViolations(violations))
        }
    }
}

fn ruleset_response_schema() -> Value {
    json!({
        "type": "object",
        "required": ["success", "errors", "messages", "result"],
        "properties": {
            "success": { "const": true },
            "errors": { "type": "array", "items": { "$ref": "#/definitions/message" } },
            "messages": { "type": "array", "items": { "$ref": "#/definitions/message" } },
            "result": {
                "type": "object",
                "required": ["id", "rules"],
                "properties": {
                    "id": { "type": "string" },
                    "rules": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["id", "description"],
                            "properties": {
                                "id": { "type": "string" },
                                "description": { "type": "string" }
                            }
                        }
                    }
                }
            }
        },
        "definitions": {
            "message": {
                "type": "object",
                "required": ["message"],
                "properties": {
                    "message": { "type": "string" },
                    "code": { "type": "integer" },
                    "source": {
                        "type": "object",
                        "required": ["pointer"],
                        "properties": { "pointer": { "type": "string" } }
                    }
                }
            }
        }
    })
}
