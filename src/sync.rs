//! Ban reconciliation.
//!
//! [`BanSyncService::sync_bans`] makes the remote firewall hold exactly one
//! rule, named after the configured rule name, whose expression blocks the
//! given ban set. Missing infrastructure is created on first use.
//!
//! Two overlapping syncs for the same domain can both decide the rule is
//! missing and both create it. Callers that may run concurrently for one
//! domain must serialise them; the HTTP server does this per domain.

use crate::error::{Result, SyncError};
use crate::expression::{build_expression, BanSet, NO_MATCH_EXPRESSION};
use crate::firewall::{
    CreateRulesetRequest, FirewallClient, RuleData, Ruleset, FIREWALL_CUSTOM_PHASE,
};
use crate::resolver::DomainResolver;
use std::sync::Arc;
use tracing::{debug, info};

/// Keeps one firewall rule per domain in step with its ban set.
#[derive(Clone)]
pub struct BanSyncService {
    resolver: DomainResolver,
    client: Arc<dyn FirewallClient>,
    rule_name: String,
}

impl BanSyncService {
    pub fn new(
        resolver: DomainResolver,
        client: Arc<dyn FirewallClient>,
        rule_name: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            client,
            rule_name: rule_name.into(),
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub fn resolver(&self) -> &DomainResolver {
        &self.resolver
    }

    /// Fetch the entrypoint ruleset, creating it if the zone has none.
    async fn ensure_ruleset(&self, zone_id: &str, api_token: &str) -> Result<Ruleset> {
        if let Some(ruleset) = self
            .client
            .get_ruleset(zone_id, api_token, FIREWALL_CUSTOM_PHASE)
            .await?
        {
            debug!(ruleset_id = %ruleset.id, "Using existing entrypoint ruleset");
            return Ok(ruleset);
        }

        info!(zone_id = %zone_id, "No entrypoint ruleset found, creating one");
        let request = CreateRulesetRequest::zone_entrypoint(FIREWALL_CUSTOM_PHASE);
        self.client
            .create_ruleset(zone_id, api_token, &request)
            .await?;

        // The entrypoint is re-read rather than trusting the creation response.
        match self
            .client
            .get_ruleset(zone_id, api_token, FIREWALL_CUSTOM_PHASE)
            .await?
        {
            Some(ruleset) if !ruleset.id.is_empty() => Ok(ruleset),
            _ => Err(SyncError::RulesetUnavailable),
        }
    }

    /// Return the id of the managed rule, creating it with an inert expression if needed.
    async fn find_or_create_rule(
        &self,
        zone_id: &str,
        api_token: &str,
        ruleset: &Ruleset,
    ) -> Result<String> {
        if let Some(rule) = ruleset.find_rule(&self.rule_name) {
            debug!(rule_id = %rule.id, "Using existing rule");
            return Ok(rule.id.clone());
        }

        info!(rule_name = %self.rule_name, "Rule not found, creating");
        let placeholder = RuleData::block(&self.rule_name, NO_MATCH_EXPRESSION);
        self.client
            .create_rule(zone_id, &ruleset.id, api_token, &placeholder)
            .await
    }

    /// Push `bans` to the firewall rule for `domain`.
    pub async fn sync_bans(&self, domain: &str, bans: &BanSet) -> Result<String> {
        let domain_config = self.resolver.resolve(domain)?;

        info!(
            domain = %domain,
            bans = bans.len(),
            rule_name = %self.rule_name,
            client = self.client.name(),
            "Syncing bans"
        );

        let ruleset = self
            .ensure_ruleset(&domain_config.zone_id, &domain_config.api_token)
            .await?;
        let rule_id = self
            .find_or_create_rule(&domain_config.zone_id, &domain_config.api_token, &ruleset)
            .await?;

        let rule = RuleData::block(&self.rule_name, build_expression(bans));
        self.client
            .update_rule(
                &domain_config.zone_id,
                &ruleset.id,
                &rule_id,
                &domain_config.api_token,
                &rule,
            )
            .await?;

        Ok(format!(
            "Successfully synced {} IP bans for {}",
            bans.len(),
            domain
        ))
    }
}

impl std::fmt::Debug for BanSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BanSyncService")
            .field("resolver", &self.resolver)
            .field("client", &self.client.name())
            .field("rule_name", &self.rule_name)
            .finish()
    }
}
