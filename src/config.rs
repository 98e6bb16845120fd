//! Configuration types for the ban sync service.

use crate::resolver::CredentialLookup;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// Rule description used when none is configured.
pub const DEFAULT_RULE_NAME: &str = "fail2ban";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Cloudflare API client settings.
    #[serde(default)]
    pub cloudflare: CloudflareConfig,

    /// HTTP listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Caller IP authorization.
    #[serde(default)]
    pub caller: CallerConfig,

    /// Per-domain credentials, keyed `ZONE_ID_<DOMAIN>` / `API_TOKEN_<DOMAIN>`.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Comma-separated list of domains that may be synced.
    #[serde(default)]
    pub allowed_domains: String,

    /// Description of the managed firewall rule.
    #[serde(default = "default_rule_name")]
    pub rule_name: String,

    /// Fall back to process environment for credentials.
    #[serde(default = "default_true")]
    pub credentials_from_env: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allowed_domains: String::new(),
            rule_name: default_rule_name(),
            credentials_from_env: true,
        }
    }
}

impl Settings {
    /// Rule name, falling back to the default when blank.
    pub fn effective_rule_name(&self) -> &str {
        let name = self.rule_name.trim();
        if name.is_empty() {
            DEFAULT_RULE_NAME
        } else {
            name
        }
    }
}

fn default_rule_name() -> String {
    DEFAULT_RULE_NAME.to_string()
}

/// Cloudflare API client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudflareConfig {
    /// API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            timeout_ms: default_timeout(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_timeout() -> u64 {
    5000
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Caller IP authorization.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallerConfig {
    /// IPs or CIDR ranges allowed to call the API. Empty allows everyone.
    #[serde(default)]
    pub allowed_ips: Vec<String>,

    /// Headers to read the caller IP from, in order of preference. Only list
    /// headers that a trusted proxy in front of the service overwrites.
    #[serde(default = "default_ip_headers")]
    pub headers: Vec<String>,

    /// Use first IP from X-Forwarded-For (true) or last IP (false).
    #[serde(default = "default_true")]
    pub use_first_ip: bool,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            allowed_ips: Vec::new(),
            headers: default_ip_headers(),
            use_first_ip: true,
        }
    }
}

fn default_ip_headers() -> Vec<String> {
    vec!["cf-connecting-ip".to_string()]
}

fn default_true() -> bool {
    true
}

impl CallerConfig {
    /// Parse allowed IP entries into IpAddr or IpNet.
    pub fn parse_allowlist(&self) -> Vec<AllowlistEntry> {
        self.allowed_ips
            .iter()
            .filter_map(|s| AllowlistEntry::parse(s.trim()))
            .collect()
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML, expanding `${VAR}` references first.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(content)?;
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if crate::resolver::parse_comma_separated(&self.settings.allowed_domains).is_empty() {
            anyhow::bail!("settings.allowed_domains is empty; every sync would be rejected");
        }

        if self.cloudflare.timeout_ms == 0 {
            anyhow::bail!("cloudflare.timeout_ms must be greater than 0");
        }

        let base = &self.cloudflare.api_base_url;
        if !base.starts_with("http://") && !base.starts_with("https://") {
            anyhow::bail!("cloudflare.api_base_url must be an http(s) URL: {}", base);
        }

        for entry in &self.caller.allowed_ips {
            if AllowlistEntry::parse(entry.trim()).is_none() {
                anyhow::bail!("Invalid caller.allowed_ips entry: {}", entry);
            }
        }

        if self.caller.headers.is_empty() {
            anyhow::bail!("caller.headers must name at least one header");
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Ban Sync Configuration

settings:
  allowed_domains: "example.com,example.org"
  rule_name: fail2ban            # description of the managed firewall rule
  credentials_from_env: true     # also read ZONE_ID_* / API_TOKEN_* from the environment

cloudflare:
  api_base_url: "https://api.cloudflare.com/client/v4"
  timeout_ms: 5000               # per-request timeout

server:
  listen: "0.0.0.0:8080"

# Who may call POST /api/sync. Empty list allows everyone.
# Supports single IPs and CIDR notation.
caller:
  allowed_ips:
    - "203.0.113.10"
    - "10.0.0.0/8"
  # Clients can set any header they like. Add x-forwarded-for or x-real-ip
  # only when a trusted proxy in front of this service overwrites them.
  headers:
    - "cf-connecting-ip"
  use_first_ip: true

# Per-domain credentials. Keys are the domain upper-cased with every
# character outside A-Z and 0-9 replaced by '_'.
credentials:
  ZONE_ID_EXAMPLE_COM: "${ZONE_ID_EXAMPLE_COM}"
  API_TOKEN_EXAMPLE_COM: "${API_TOKEN_EXAMPLE_COM}"
"#
        .to_string()
    }
}

impl CredentialLookup for Config {
    fn lookup(&self, key: &str) -> Option<String> {
        self.credentials
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| {
                if self.settings.credentials_from_env {
                    std::env::var(key).ok().filter(|v| !v.is_empty())
                } else {
                    None
                }
            })
    }
}

/// Parsed caller allowlist entry.
#[derive(Debug, Clone)]
pub enum AllowlistEntry {
    Single(IpAddr),
    Network(IpNet),
}

impl AllowlistEntry {
    /// Parse a single IP or a CIDR range.
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(ip) = s.parse::<IpAddr>() {
            Some(AllowlistEntry::Single(ip))
        } else if let Ok(net) = s.parse::<IpNet>() {
            Some(AllowlistEntry::Network(net))
        } else {
            None
        }
    }

    /// Check if an IP address matches this allowlist entry.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            AllowlistEntry::Single(allowed) => allowed == ip,
            AllowlistEntry::Network(net) => net.contains(ip),
        }
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> anyhow::Result<String> {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}
