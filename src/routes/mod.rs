// Routes module - canonical route records, identity rules and normalization

pub mod exclusion;
pub mod normalize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::inventory::{DeviceId, InterfaceRef, VrfId};

/// Routing protocol, normalized to lowercase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ospf,
    Bgp,
    Static,
    Connected,
    Isis,
    Rip,
    Eigrp,
    Local,
    Unknown,
}

impl Protocol {
    pub const ALL: [Protocol; 9] = [
        Protocol::Ospf,
        Protocol::Bgp,
        Protocol::Static,
        Protocol::Connected,
        Protocol::Isis,
        Protocol::Rip,
        Protocol::Eigrp,
        Protocol::Local,
        Protocol::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ospf => "ospf",
            Protocol::Bgp => "bgp",
            Protocol::Static => "static",
            Protocol::Connected => "connected",
            Protocol::Isis => "isis",
            Protocol::Rip => "rip",
            Protocol::Eigrp => "eigrp",
            Protocol::Local => "local",
            Protocol::Unknown => "unknown",
        }
    }

    /// Case-insensitive lookup; anything outside the enumeration is `Unknown`
    pub fn from_label(label: &str) -> Protocol {
        let label = label.trim().to_lowercase();
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str() == label)
            .unwrap_or(Protocol::Unknown)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One next-hop for one prefix as reported by a vendor parser, before
/// normalization. Every field except `prefix` may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteObservation {
    pub prefix: String,
    /// Protocol label already mapped by the parser's own code table
    pub protocol: String,
    pub next_hop: Option<String>,
    pub outgoing_interface: Option<String>,
    pub admin_distance: Option<u32>,
    pub metric: Option<u32>,
    pub is_active: Option<bool>,
    /// Raw table/VRF name as the device reported it
    pub routing_table: String,
}

/// Parser output: prefix string to every next-hop observed for it
pub type PrefixTable = BTreeMap<String, Vec<RouteObservation>>;

/// Merge `other` into `table`, concatenating next-hops per prefix
pub fn merge_prefix_tables(table: &mut PrefixTable, other: PrefixTable) {
    for (prefix, observations) in other {
        table.entry(prefix).or_default().extend(observations);
    }
}

/// A route observation after normalization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRoute {
    /// Canonical CIDR with host bits zeroed
    pub network: String,
    pub prefix_length: u8,
    pub protocol: Protocol,
    /// Empty for connected/local routes
    pub next_hop: String,
    pub outgoing_interface: Option<String>,
    pub metric: u32,
    pub admin_distance: u32,
    pub is_active: bool,
    pub routing_table: String,
}

/// Identity of a stored route: exactly one live row per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdentityKey {
    pub device_id: DeviceId,
    pub vrf: Option<VrfId>,
    pub network: String,
    pub next_hop: String,
    pub protocol: Protocol,
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.device_id, self.network)?;
        if !self.next_hop.is_empty() {
            write!(f, " via {}", self.next_hop)?;
        }
        write!(f, " ({})", self.protocol)?;
        if let Some(vrf) = &self.vrf {
            write!(f, " [{}]", vrf)?;
        }
        Ok(())
    }
}

/// Input to the reconciliation store
#[derive(Debug, Clone, PartialEq)]
pub struct RouteCandidate {
    pub device_id: DeviceId,
    pub vrf: Option<VrfId>,
    /// Re-validated by the store; need not be canonical
    pub network: String,
    pub protocol: Protocol,
    pub next_hop: String,
    pub outgoing_interface: Option<InterfaceRef>,
    pub metric: u32,
    pub admin_distance: u32,
    pub is_active: bool,
    pub routing_table: String,
}

impl RouteCandidate {
    pub fn new(device_id: DeviceId, network: impl Into<String>, protocol: Protocol) -> Self {
        RouteCandidate {
            device_id,
            vrf: None,
            network: network.into(),
            protocol,
            next_hop: String::new(),
            outgoing_interface: None,
            metric: 0,
            admin_distance: 0,
            is_active: true,
            routing_table: "default".to_string(),
        }
    }

    pub fn from_normalized(
        device_id: DeviceId,
        vrf: Option<VrfId>,
        route: &NormalizedRoute,
        outgoing_interface: Option<InterfaceRef>,
    ) -> Self {
        RouteCandidate {
            device_id,
            vrf,
            network: route.network.clone(),
            protocol: route.protocol,
            next_hop: route.next_hop.clone(),
            outgoing_interface,
            metric: route.metric,
            admin_distance: route.admin_distance,
            is_active: route.is_active,
            routing_table: route.routing_table.clone(),
        }
    }
}

/// One observed next-hop for one prefix on one device, as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRecord {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub vrf: Option<VrfId>,
    pub network: String,
    pub prefix_length: u8,
    pub protocol: Protocol,
    pub next_hop: String,
    pub outgoing_interface: Option<InterfaceRef>,
    pub metric: u32,
    pub admin_distance: u32,
    pub is_active: bool,
    pub routing_table: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl RouteRecord {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            device_id: self.device_id.clone(),
            vrf: self.vrf.clone(),
            network: self.network.clone(),
            next_hop: self.next_hop.clone(),
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for RouteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.identity().fmt(f)
    }
}
