//! Error types for the ban sync service.

use crate::firewall::schema::SchemaViolations;
use crate::firewall::{ApiMessage, NOT_FOUND_CODE};
use serde::Deserialize;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Missing per-domain credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    MissingZone,
    MissingApiToken,
}

impl ConfigErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigErrorKind::MissingZone => "missingZone",
            ConfigErrorKind::MissingApiToken => "missingApiToken",
        }
    }
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigErrorKind::MissingZone => write!(f, "Zone ID missing"),
            ConfigErrorKind::MissingApiToken => write!(f, "API token missing"),
        }
    }
}

/// Everything a sync can fail with.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Domain is not on the allow-list.
    #[error("Domain {0} not allowed")]
    DisallowedDomain(String),

    /// Domain is empty or whitespace.
    #[error("Domain cannot be empty")]
    InvalidDomain,

    /// Required per-domain credential is absent.
    #[error("{0}")]
    Config(ConfigErrorKind),

    /// Remote answered with a non-2xx status.
    #[error("HTTP {status}: {status_text} - {body}")]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    /// Remote answered 2xx but the envelope reports `success: false`.
    #[error("API request failed: {}", format_api_messages(.errors))]
    Api { errors: Vec<ApiMessage> },

    /// Response body is not JSON, or does not map onto the expected type.
    #[error("Invalid API response: {0}")]
    Decode(#[source] serde_json::Error),

    /// Response JSON does not match the expected schema.
    #[error("API response validation failed: {details}")]
    Validation {
        details: String,
        #[source]
        violations: SchemaViolations,
    },

    /// Request exceeded the configured timeout.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection-level failure.
    #[error("HTTP transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Response schema could not be compiled.
    #[error("Invalid response schema: {0}")]
    Schema(String),

    /// Ruleset is still missing after it was created.
    #[error("Failed to retrieve ruleset after creation")]
    RulesetUnavailable,

    /// Created rule is missing from its own creation response.
    #[error("Failed to create rule: {0}")]
    RuleNotCreated(String),
}

impl SyncError {
    /// Wrap a set of schema violations, embedding them in the message.
    pub fn validation(violations: SchemaViolations) -> Self {
        let details = serde_json::to_string_pretty(violations.as_slice())
            .unwrap_or_else(|_| violations.to_string());
        SyncError::Validation {
            details,
            violations,
        }
    }

    /// Whether the remote reported the "not found" error code.
    ///
    /// The code travels in the response body, so both HTTP failures and
    /// unsuccessful envelopes are inspected.
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Http { body, .. } => serde_json::from_str::<ErrorEnvelope>(body)
                .map(|envelope| has_not_found(&envelope.errors))
                .unwrap_or(false),
            SyncError::Api { errors } => has_not_found(errors),
            _ => false,
        }
    }

    /// Whether the request was aborted by the timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }

    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::DisallowedDomain(_) => "authorization",
            SyncError::InvalidDomain => "invalid_domain",
            SyncError::Config(_) => "configuration",
            SyncError::Http { .. }
            | SyncError::Api { .. }
            | SyncError::Decode(_)
            | SyncError::Transport(_) => "remote",
            SyncError::Validation { .. } => "validation",
            SyncError::Timeout { .. } => "timeout",
            SyncError::Schema(_) | SyncError::RulesetUnavailable | SyncError::RuleNotCreated(_) => {
                "internal"
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

fn has_not_found(errors: &[ApiMessage]) -> bool {
    errors.iter().any(|e| e.code == Some(NOT_FOUND_CODE))
}

fn format_api_messages(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "no error details".to_string();
    }
    errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("{} ({})", e.message, code),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_message() {
        let err = SyncError::Http {
            status: 403,
            status_text: "Forbidden".to_string(),
            body: "Forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 403: Forbidden - Forbidden");
        assert_eq!(err.kind(), "remote");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_from_http_body() {
        let err = SyncError::Http {
            status: 404,
            status_text: "Not Found".to_string(),
            body: r#"{"success":false,"errors":[{"code":10003,"message":"Ruleset not found"}],"messages":[],"result":null}"#.to_string(),
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn test_not_found_from_envelope() {
        let err = SyncError::Api {
            errors: vec![ApiMessage {
                code: Some(10003),
                message: "not found".to_string(),
            }],
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "API request failed: not found (10003)");
    }

    #[test]
    fn test_other_codes_are_not_not_found() {
        let err = SyncError::Api {
            errors: vec![ApiMessage {
                code: Some(10000),
                message: "Authentication error".to_string(),
            }],
        };
        assert!(!err.is_not_found());

        let err = SyncError::Http {
            status: 500,
            status_text: "Internal Server Error".to_string(),
            body: "upstream exploded".to_string(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            SyncError::Config(ConfigErrorKind::MissingZone).to_string(),
            "Zone ID missing"
        );
        assert_eq!(
            SyncError::Config(ConfigErrorKind::MissingApiToken).to_string(),
            "API token missing"
        );
        assert_eq!(ConfigErrorKind::MissingZone.as_str(), "missingZone");
    }

    #[test]
    fn test_timeout_is_recognisable() {
        let err = SyncError::Timeout { timeout_ms: 5000 };
        assert!(err.is_timeout());
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.to_string(), "Request timed out after 5000ms");
    }
}
