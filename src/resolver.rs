//! Domain to credential resolution.

use crate::error::{ConfigErrorKind, Result, SyncError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Source of per-domain credentials.
pub trait CredentialLookup: Send + Sync {
    /// Value stored under `key`, if any.
    fn lookup(&self, key: &str) -> Option<String>;
}

impl CredentialLookup for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Credentials needed to act on one domain's firewall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    pub zone_id: String,
    pub api_token: String,
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_comma_separated(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Turn a domain into the fragment used in credential keys.
///
/// `example.com` becomes `EXAMPLE_COM`.
pub fn sanitize_domain_key(domain: &str) -> Result<String> {
    if domain.trim().is_empty() {
        return Err(SyncError::InvalidDomain);
    }

    Ok(domain
        .to_uppercase()
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect())
}

/// Maps allowed domains to their credentials.
#[derive(Clone)]
pub struct DomainResolver {
    allowed_domains: Vec<String>,
    credentials: Arc<dyn CredentialLookup>,
}

impl DomainResolver {
    pub fn new(allowed_domains: &str, credentials: Arc<dyn CredentialLookup>) -> Self {
        Self {
            allowed_domains: parse_comma_separated(allowed_domains),
            credentials,
        }
    }

    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    pub fn is_allowed(&self, domain: &str) -> bool {
        self.allowed_domains.iter().any(|d| d == domain)
    }

    /// Resolve the credentials for `domain`.
    pub fn resolve(&self, domain: &str) -> Result<DomainConfig> {
        if !self.is_allowed(domain) {
            return Err(SyncError::DisallowedDomain(domain.to_string()));
        }

        let key = sanitize_domain_key(domain)?;
        let zone_id = self.credentials.lookup(&format!("ZONE_ID_{}", key));
        let api_token = self.credentials.lookup(&format!("API_TOKEN_{}", key));

        match (zone_id, api_token) {
            (Some(zone_id), Some(api_token)) => Ok(DomainConfig { zone_id, api_token }),
            (None, api_token) => {
                if api_token.is_none() {
                    warn!(domain = %domain, "Zone ID and API token are both missing");
                }
                Err(SyncError::Config(ConfigErrorKind::MissingZone))
            }
            (Some(_), None) => Err(SyncError::Config(ConfigErrorKind::MissingApiToken)),
        }
    }
}

impl std::fmt::Debug for DomainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainResolver")
            .field("allowed_domains", &self.allowed_domains)
            .finish_non_exhaustive()
    }
}
