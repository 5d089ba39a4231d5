// Reserved-range filter for collected prefixes

use ipnet::IpNet;

use super::normalize::canonical_network;

/// Prefixes never worth tracking: multicast, link-local and loopback
pub const EXCLUDED_ROUTE_NETWORKS: [&str; 6] = [
    "224.0.0.0/4",    // IPv4 multicast (includes 239.0.0.0/8)
    "169.254.0.0/16", // IPv4 link-local
    "127.0.0.0/8",    // IPv4 loopback
    "ff00::/8",       // IPv6 multicast
    "fe80::/10",      // IPv6 link-local
    "::1/128",        // IPv6 loopback
];

#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    networks: Vec<IpNet>,
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        ExclusionFilter {
            networks: EXCLUDED_ROUTE_NETWORKS
                .iter()
                .filter_map(|n| n.parse().ok())
                .collect(),
        }
    }
}

impl ExclusionFilter {
    /// True if `network` equals or lies inside a reserved range of the same
    /// address family. Unparsable input is never excluded.
    pub fn is_excluded(&self, network: &str) -> bool {
        match canonical_network(network) {
            Ok(net) => self.networks.iter().any(|reserved| subnet_of(&net, reserved)),
            Err(_) => false,
        }
    }
}

/// `inner` equals or is contained in `outer`; families never mix
pub fn subnet_of(inner: &IpNet, outer: &IpNet) -> bool {
    match (inner, outer) {
        (IpNet::V4(i), IpNet::V4(o)) => o.contains(i),
        (IpNet::V6(i), IpNet::V6(o)) => o.contains(i),
        _ => false,
    }
}

pub fn is_excluded_route(network: &str) -> bool {
    ExclusionFilter::default().is_excluded(network)
}
