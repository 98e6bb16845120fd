//! Firewall expression construction.

use indexmap::IndexMap;
use std::net::IpAddr;

/// Banned IPs mapped to ban duration in seconds, in the order they were received.
pub type BanSet = IndexMap<IpAddr, u64>;

/// Expression that never matches real traffic.
pub const NO_MATCH_EXPRESSION: &str = "ip.src eq 0.0.0.0";

/// Build the match expression for `bans`.
///
/// An empty set yields [`NO_MATCH_EXPRESSION`] so the rule stays valid but inert.
pub fn build_expression(bans: &BanSet) -> String {
    if bans.is_empty() {
        return NO_MATCH_EXPRESSION.to_string();
    }

    let ips: Vec<String> = bans.keys().map(IpAddr::to_string).collect();
    format!("ip.src in {{{}}}", ips.join(" "))
}
