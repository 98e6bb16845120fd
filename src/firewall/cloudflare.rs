//! Cloudflare rulesets API client.

use super::schema::ResponseSchema;
use super::{
    ApiMessage, CreateRulesetRequest, FirewallClient, RuleData, Ruleset, RulesetResponse,
};
use crate::config::CloudflareConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Envelope fields inspected before schema validation.
#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct CreateRulesBody<'a> {
    rules: [&'a RuleData; 1],
}

/// Cloudflare rulesets API client.
pub struct CloudflareClient {
    client: Client,
    base_url: String,
    timeout_ms: u64,
    schema: ResponseSchema,
}

impl CloudflareClient {
    /// Create a new client.
    pub fn new(config: &CloudflareConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(SyncError::Transport)?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
            schema: ResponseSchema::ruleset()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, api_token: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(api_token)
            .header("Accept", "application/json")
    }

    fn transport_error(&self, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            SyncError::Transport(e)
        }
    }

    /// Send a request and decode, validate and map its JSON response.
    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        schema: &ResponseSchema,
    ) -> Result<T> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(|e| self.transport_error(e))?;
            return Err(SyncError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        let json: Value = serde_json::from_slice(&bytes).map_err(SyncError::Decode)?;

        if let Ok(envelope) = EnvelopeStatus::deserialize(&json) {
            if envelope.success == Some(false) {
                return Err(SyncError::Api {
                    errors: envelope.errors,
                });
            }
        }

        schema.validate(&json).map_err(SyncError::validation)?;

        serde_json::from_value(json).map_err(SyncError::Decode)
    }
}

#[async_trait]
impl FirewallClient for CloudflareClient {
    async fn get_ruleset(
        &self,
        zone_id: &str,
        api_token: &str,
        phase: &str,
    ) -> Result<Option<Ruleset>> {
        let path = format!("/zones/{}/rulesets/phases/{}/entrypoint", zone_id, phase);
        debug!(zone_id = %zone_id, phase = %phase, "Fetching entrypoint ruleset");

        let request = self.request(Method::GET, &path, api_token);
        match self.fetch_json::<RulesetResponse>(request, &self.schema).await {
            Ok(response) => Ok(Some(response.result)),
            Err(e) if e.is_not_found() => {
                info!(zone_id = %zone_id, "Entrypoint ruleset not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_ruleset(
        &self,
        zone_id: &str,
        api_token: &str,
        request: &CreateRulesetRequest,
    ) -> Result<Ruleset> {
        info!(zone_id = %zone_id, phase = %request.phase, "Creating entrypoint ruleset");

        let path = format!("/zones/{}/rulesets", zone_id);
        let builder = self.request(Method::POST, &path, api_token).json(request);
        let response: RulesetResponse = self.fetch_json(builder, &self.schema).await?;

        Ok(response.result)
    }

    async fn create_rule(
        &self,
        zone_id: &str,
        ruleset_id: &str,
        api_token: &str,
        rule: &RuleData,
    ) -> Result<String> {
        info!(
            ruleset_id = %ruleset_id,
            description = %rule.description,
            "Creating rule"
        );

        let path = format!("/zones/{}/rulesets/{}/rules", zone_id, ruleset_id);
        let body = CreateRulesBody { rules: [rule] };
        let builder = self.request(Method::POST, &path, api_token).json(&body);
        let response: RulesetResponse = self.fetch_json(builder, &self.schema).await?;

        let created = response
            .result
            .find_rule(&rule.description)
            .ok_or_else(|| SyncError::RuleNotCreated(rule.description.clone()))?;

        info!(
            description = %rule.description,
            rule_id = %created.id,
            "Created rule"
        );

        Ok(created.id.clone())
    }

    async fn update_rule(
        &self,
        zone_id: &str,
        ruleset_id: &str,
        rule_id: &str,
        api_token: &str,
        rule: &RuleData,
    ) -> Result<()> {
        info!(
            description = %rule.description,
            rule_id = %rule_id,
            "Updating rule"
        );

        let path = format!(
            "/zones/{}/rulesets/{}/rules/{}",
            zone_id, ruleset_id, rule_id
        );
        let builder = self.request(Method::PATCH, &path, api_token).json(rule);
        let _: RulesetResponse = self.fetch_json(builder, &self.schema).await?;

        info!(description = %rule.description, "Updated rule");
        Ok(())
    }

    fn name(&self) -> &str {
        "cloudflare"
    }
}
