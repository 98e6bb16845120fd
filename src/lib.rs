//! Ban Sync service for Zentinel.
//!
//! Keeps a single Cloudflare firewall rule per domain in step with the ban list
//! reported by fail2ban (or any other ban reporter).
//!
//! # Features
//!
//! - **Idempotent provisioning** - Creates the entrypoint ruleset and the named
//!   rule on first use, updates the rule in place afterwards
//! - **Domain allow-list** - Only configured domains can be synced
//! - **Per-domain credentials** - Zone ID and API token looked up by domain
//! - **Validated responses** - Every API response is checked against a JSON Schema
//! - **Bounded calls** - Every API request carries a timeout
//! - **Caller allowlist** - Restrict who may report bans by IP or CIDR
//! - **API docs** - OpenAPI document at `/openapi.json`, Swagger UI at `/docs`
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   allowed_domains: "example.com"
//!   rule_name: fail2ban
//!
//! cloudflare:
//!   timeout_ms: 5000
//!
//! caller:
//!   allowed_ips:
//!     - "10.0.0.0/8"
//!
//! credentials:
//!   ZONE_ID_EXAMPLE_COM: "${ZONE_ID_EXAMPLE_COM}"
//!   API_TOKEN_EXAMPLE_COM: "${API_TOKEN_EXAMPLE_COM}"
//! ```

pub mod config;
pub mod docs;
pub mod error;
pub mod expression;
pub mod firewall;
pub mod resolver;
pub mod server;
pub mod sync;

pub use config::Config;
pub use error::{Result, SyncError};
pub use expression::{build_expression, BanSet};
pub use resolver::{DomainConfig, DomainResolver};
pub use sync::BanSyncService;
