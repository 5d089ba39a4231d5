// Arista EOS strategy: `show ip route vrf all | json`

use serde::Deserialize;
use std::collections::BTreeMap;

use super::{CommandOutputs, VendorParser, saturating_u32};
use crate::error::{CollectError, CollectResult};
use crate::routes::{PrefixTable, Protocol, RouteObservation};

pub const EOS_ROUTE_COMMAND: &str = "show ip route vrf all | json";

#[derive(Debug, Deserialize)]
struct EosRouteOutput {
    #[serde(default)]
    vrfs: BTreeMap<String, EosVrf>,
}

#[derive(Debug, Deserialize)]
struct EosVrf {
    #[serde(default)]
    routes: BTreeMap<String, EosRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EosRoute {
    route_type: Option<String>,
    /// Administrative distance
    preference: Option<u64>,
    metric: Option<u64>,
    vias: Option<Vec<EosVia>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EosVia {
    nexthop_addr: Option<String>,
    interface: Option<String>,
}

/// Map an EOS `routeType` (e.g. "eBGP", "ospfInter") to a protocol
pub fn eos_protocol(route_type: &str) -> Protocol {
    match route_type.to_lowercase().as_str() {
        "ebgp" | "ibgp" | "bgp" => Protocol::Bgp,
        "ospf" | "ospfinter" | "ospfintra" | "ospfext1" | "ospfext2" | "ospfnssa1"
        | "ospfnssa2" => Protocol::Ospf,
        "static" | "aggregate" => Protocol::Static,
        "connected" => Protocol::Connected,
        "local" => Protocol::Local,
        "isis" => Protocol::Isis,
        "rip" => Protocol::Rip,
        "eigrp" => Protocol::Eigrp,
        _ => Protocol::Unknown,
    }
}

pub struct EosParser;

impl EosParser {
    pub fn parse_json(&self, json_text: &str) -> CollectResult<PrefixTable> {
        let mut routes = PrefixTable::new();
        if json_text.trim().is_empty() {
            return Ok(routes);
        }

        let output: EosRouteOutput = serde_json::from_str(json_text)
            .map_err(|e| CollectError::ParseFailure(format!("invalid EOS JSON: {}", e)))?;

        for (vrf_name, vrf) in output.vrfs {
            for (prefix, route) in vrf.routes {
                let protocol = eos_protocol(route.route_type.as_deref().unwrap_or("unknown"));
                let base = RouteObservation {
                    prefix: prefix.clone(),
                    protocol: protocol.as_str().to_string(),
                    next_hop: None,
                    outgoing_interface: None,
                    admin_distance: Some(saturating_u32(route.preference.unwrap_or(0))),
                    metric: Some(saturating_u32(route.metric.unwrap_or(0))),
                    is_active: Some(true),
                    routing_table: vrf_name.clone(),
                };

                let vias = route.vias.unwrap_or_default();
                let entry = routes.entry(prefix).or_default();

                if vias.is_empty() {
                    // Blackhole and similar: still one observation
                    entry.push(base);
                    continue;
                }

                for via in vias {
                    entry.push(RouteObservation {
                        next_hop: via.nexthop_addr,
                        outgoing_interface: via.interface,
                        ..base.clone()
                    });
                }
            }
        }

        Ok(routes)
    }
}

impl VendorParser for EosParser {
    fn platform(&self) -> &'static str {
        "arista_eos"
    }

    fn commands(&self) -> &'static [&'static str] {
        &[EOS_ROUTE_COMMAND]
    }

    fn parse(&self, outputs: &CommandOutputs) -> CollectResult<PrefixTable> {
        match outputs.get(EOS_ROUTE_COMMAND) {
            Some(text) => self.parse_json(text),
            None => Ok(PrefixTable::new()),
        }
    }
}
