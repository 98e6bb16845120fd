//! Remote firewall access.
//!
//! The [`FirewallClient`] trait is the seam between the sync engine and the
//! remote rulesets API; [`cloudflare::CloudflareClient`] is the HTTP
//! implementation.

pub mod cloudflare;
pub mod schema;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Phase at which custom firewall rules are evaluated.
pub const FIREWALL_CUSTOM_PHASE: &str = "http_request_firewall_custom";

/// Error code the API uses for a missing entrypoint ruleset.
pub const NOT_FOUND_CODE: i64 = 10003;

/// The only rule action this service manages.
pub const BLOCK_ACTION: &str = "block";

/// A ruleset (rule container) for one zone and phase.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Ruleset {
    pub id: String,
    pub rules: Vec<RuleSummary>,
}

impl Ruleset {
    /// Find the rule whose description matches `description`.
    pub fn find_rule(&self, description: &str) -> Option<&RuleSummary> {
        self.rules.iter().find(|r| r.description == description)
    }
}

/// A rule as returned by the API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub description: String,

    /// Fields this service does not interpret (action, expression, version...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Desired rule state sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuleData {
    pub action: String,
    pub description: String,
    pub expression: String,
    pub enabled: bool,
}

impl RuleData {
    /// An enabled blocking rule.
    pub fn block(description: &str, expression: impl Into<String>) -> Self {
        Self {
            action: BLOCK_ACTION.to_string(),
            description: description.to_string(),
            expression: expression.into(),
            enabled: true,
        }
    }
}

/// Body for creating a ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CreateRulesetRequest {
    pub name: String,
    pub kind: String,
    pub phase: String,
    pub description: String,
    pub rules: Vec<RuleData>,
}

impl CreateRulesetRequest {
    /// Empty zone entrypoint ruleset for `phase`.
    pub fn zone_entrypoint(phase: &str) -> Self {
        Self {
            name: "default".to_string(),
            kind: "zone".to_string(),
            phase: phase.to_string(),
            description: String::new(),
            rules: Vec::new(),
        }
    }
}

/// Entry in the `errors` / `messages` arrays of an API envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

/// Successful API envelope carrying a ruleset.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesetResponse {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    #[serde(default)]
    pub messages: Vec<ApiMessage>,
    pub result: Ruleset,
}

/// Operations the sync engine needs from the remote firewall.
#[async_trait]
pub trait FirewallClient: Send + Sync {
    /// Fetch the entrypoint ruleset for `phase`, or `None` if the zone has none.
    async fn get_ruleset(
        &self,
        zone_id: &str,
        api_token: &str,
        phase: &str,
    ) -> Result<Option<Ruleset>>;

    /// Create a ruleset.
    async fn create_ruleset(
        &self,
        zone_id: &str,
        api_token: &str,
        request: &CreateRulesetRequest,
    ) -> Result<Ruleset>;

    /// Add a rule to a ruleset and return its id.
    async fn create_rule(
        &self,
        zone_id: &str,
        ruleset_id: &str,
        api_token: &str,
        rule: &RuleData,
    ) -> Result<String>;

    /// Replace an existing rule.
    async fn update_rule(
        &self,
        zone_id: &str,
        ruleset_id: &str,
        rule_id: &str,
        api_token: &str,
        rule: &RuleData,
    ) -> Result<()>;

    /// Client name for logging.
    fn name(&self) -> &str;
}
