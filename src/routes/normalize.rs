// Normalization of parser observations into canonical routes

use ipnet::IpNet;
use std::net::IpAddr;

use super::{NormalizedRoute, Protocol, RouteObservation};
use crate::error::{CollectError, CollectResult};

pub const DEFAULT_ROUTING_TABLE: &str = "default";

/// Parse a prefix non-strictly: host bits are accepted and zeroed.
/// A bare address is treated as a host route.
pub fn canonical_network(network: &str) -> CollectResult<IpNet> {
    let trimmed = network.trim();

    let parsed = if trimmed.contains('/') {
        trimmed.parse::<IpNet>().ok()
    } else {
        trimmed.parse::<IpAddr>().ok().map(IpNet::from)
    };

    parsed
        .map(|net| net.trunc())
        .ok_or_else(|| CollectError::InvalidPrefix(network.to_string()))
}

/// Canonical CIDR string and the prefix length derived from it
pub fn canonicalize(network: &str) -> CollectResult<(String, u8)> {
    let net = canonical_network(network)?;
    Ok((net.to_string(), net.prefix_len()))
}

pub fn normalize(observation: &RouteObservation) -> CollectResult<NormalizedRoute> {
    let (network, prefix_length) = canonicalize(&observation.prefix)?;

    let next_hop = observation
        .next_hop
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let outgoing_interface = observation
        .outgoing_interface
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from);

    let routing_table = match observation.routing_table.trim() {
        "" => DEFAULT_ROUTING_TABLE.to_string(),
        name => name.to_string(),
    };

    Ok(NormalizedRoute {
        network,
        prefix_length,
        protocol: Protocol::from_label(&observation.protocol),
        next_hop,
        outgoing_interface,
        metric: observation.metric.unwrap_or(0),
        admin_distance: observation.admin_distance.unwrap_or(0),
        is_active: observation.is_active.unwrap_or(true),
        routing_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_zeroes_host_bits() {
        assert_eq!(canonicalize("10.1.2.3/8").unwrap(), ("10.0.0.0/8".to_string(), 8));
        assert_eq!(
            canonicalize("2001:db8::1/32").unwrap(),
            ("2001:db8::/32".to_string(), 32)
        );
        assert_eq!(canonicalize("0.0.0.0/0").unwrap(), ("0.0.0.0/0".to_string(), 0));
    }

    #[test]
    fn test_canonicalize_bare_address_is_host_route() {
        assert_eq!(canonicalize("192.0.2.7").unwrap(), ("192.0.2.7/32".to_string(), 32));
        assert_eq!(canonicalize("::1").unwrap(), ("::1/128".to_string(), 128));
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        for input in ["10.1.2.3/24", "172.16.5.4/12", "fe80::1:2/64", "203.0.113.9/32", "::/0"] {
            let once = canonicalize(input).unwrap();
            let twice = canonicalize(&once.0).unwrap();
            assert_eq!(once, twice, "{}", input);
        }
    }

    #[test]
    fn test_canonicalize_rejects_garbage() {
        for input in ["", "not-a-prefix", "10.0.0.0/33", "300.1.1.1/8", "10.0.0.0/"] {
            assert!(
                matches!(canonicalize(input), Err(CollectError::InvalidPrefix(_))),
                "{}",
                input
            );
        }
    }

    #[test]
    fn test_normalize_fills_defaults() {
        let obs = RouteObservation {
            prefix: "10.9.8.7/16".to_string(),
            protocol: "OSPF".to_string(),
            outgoing_interface: Some("".to_string()),
            ..Default::default()
        };
        let route = normalize(&obs).unwrap();
        assert_eq!(route.network, "10.9.0.0/16");
        assert_eq!(route.prefix_length, 16);
        assert_eq!(route.protocol, Protocol::Ospf);
        assert_eq!(route.next_hop, "");
        assert_eq!(route.outgoing_interface, None);
        assert_eq!(route.metric, 0);
        assert_eq!(route.admin_distance, 0);
        assert!(route.is_active);
        assert_eq!(route.routing_table, "default");
    }

    #[test]
    fn test_normalize_coerces_unknown_protocol() {
        let obs = RouteObservation {
            prefix: "10.0.0.0/8".to_string(),
            protocol: "odr".to_string(),
            ..Default::default()
        };
        assert_eq!(normalize(&obs).unwrap().protocol, Protocol::Unknown);
    }
}
