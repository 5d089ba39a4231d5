// Cisco IOS strategy: `show ip route` + `show ip route vrf *` text grammar
//
// The grammar is compiled once when the parser is built and then shared
// read-only by every collection task.

use ipnet::Ipv4Net;
use regex::Regex;
use std::net::Ipv4Addr;

use super::{CommandOutputs, VendorParser};
use crate::error::CollectResult;
use crate::routes::normalize::DEFAULT_ROUTING_TABLE;
use crate::routes::{PrefixTable, Protocol, RouteObservation, merge_prefix_tables};

pub const IOS_GLOBAL_COMMAND: &str = "show ip route";
pub const IOS_VRF_COMMAND: &str = "show ip route vrf *";

const IPV4: &str = r"\d{1,3}(?:\.\d{1,3}){3}";

/// Map an IOS route code (or its sub-type) to a protocol
pub fn ios_protocol(code: &str) -> Option<Protocol> {
    let protocol = match code {
        "C" => Protocol::Connected,
        "L" => Protocol::Local,
        "S" => Protocol::Static,
        "R" => Protocol::Rip,
        "B" => Protocol::Bgp,
        "D" | "EX" => Protocol::Eigrp,
        "O" | "IA" | "N1" | "N2" | "E1" | "E2" => Protocol::Ospf,
        "i" | "su" | "L1" | "L2" | "ia" => Protocol::Isis,
        "M" => Protocol::Unknown,
        _ => return None,
    };
    Some(protocol)
}

/// One row extracted by the grammar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IosRouteRow {
    pub vrf: String,
    pub protocol_code: String,
    pub protocol_subtype: Option<String>,
    pub network: String,
    pub prefix_length: Option<u8>,
    pub nexthop_ip: Option<String>,
    pub nexthop_if: Option<String>,
    pub distance: Option<u32>,
    pub metric: Option<u32>,
}

impl IosRouteRow {
    pub fn protocol(&self) -> Protocol {
        ios_protocol(&self.protocol_code)
            .or_else(|| self.protocol_subtype.as_deref().and_then(ios_protocol))
            .unwrap_or(Protocol::Unknown)
    }
}

/// Route line the following continuation lines belong to
#[derive(Debug, Clone)]
struct RouteHead {
    code: String,
    subtype: Option<String>,
    network: String,
    prefix_length: Option<u8>,
}

/// Mask announced by an "is subnetted" header, valid for its major network
#[derive(Debug, Clone, Copy)]
struct SubnetScope {
    major: Ipv4Net,
    length: u8,
}

impl SubnetScope {
    fn new(network: &str, length: u8) -> Option<Self> {
        let addr: Ipv4Addr = network.parse().ok()?;
        let major = Ipv4Net::new(addr, classful_length(addr)).ok()?.trunc();
        Some(SubnetScope { major, length })
    }

    fn length_for(&self, network: &str) -> Option<u8> {
        let addr: Ipv4Addr = network.parse().ok()?;
        self.major.contains(&addr).then_some(self.length)
    }
}

fn classful_length(addr: Ipv4Addr) -> u8 {
    match addr.octets()[0] {
        0..=127 => 8,
        128..=191 => 16,
        _ => 24,
    }
}

/// Compiled line grammar for `show ip route`
#[derive(Debug, Clone)]
pub struct IosRouteGrammar {
    vrf_header: Regex,
    subnetted: Regex,
    route: Regex,
    continuation: Regex,
    via: Regex,
    attached: Regex,
    uptime: Regex,
}

impl IosRouteGrammar {
    pub fn new() -> CollectResult<Self> {
        Ok(IosRouteGrammar {
            vrf_header: Regex::new(r"^\s*Routing Table:\s+(?P<vrf>\S+)")?,
            subnetted: Regex::new(&format!(
                r"^\s+(?P<network>{IPV4})/(?P<len>\d{{1,2}})\s+is\s+(?P<variably>variably\s+)?subnetted"
            ))?,
            route: Regex::new(&format!(
                r"^(?P<code>[A-Za-z]{{1,2}})(?:\*\s*|\s+)(?:(?P<subtype>IA|N1|N2|E1|E2|EX|L1|L2|su|ia)\s+)?(?:[+%p&]\s+)?(?P<network>{IPV4})(?:/(?P<len>\d{{1,2}}))?(?:\s+(?P<rest>\S.*))?$"
            ))?,
            continuation: Regex::new(r"^\s+(?P<rest>\[\d+/\d+\]\s+via\s+.*)$")?,
            via: Regex::new(&format!(
                r"^\[(?P<distance>\d+)/(?P<metric>\d+)\]\s+via\s+(?P<nexthop>{IPV4})(?P<tail>.*)$"
            ))?,
            attached: Regex::new(r"^is\s+(?:directly\s+connected|a\s+summary)(?P<tail>.*)$")?,
            uptime: Regex::new(r"^(?:\d+:\d+:\d+|\d+[ywdh]\d*[ywdhm]?)$")?,
        })
    }

    /// Extract every route row from one command's output
    pub fn parse_rows(&self, text: &str) -> Vec<IosRouteRow> {
        let mut rows = Vec::new();
        let mut vrf = String::new();
        let mut scope: Option<SubnetScope> = None;
        let mut head: Option<RouteHead> = None;

        for line in text.lines() {
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }

            if let Some(caps) = self.vrf_header.captures(line) {
                vrf = caps["vrf"].to_string();
                scope = None;
                head = None;
                continue;
            }

            if let Some(caps) = self.subnetted.captures(line) {
                scope = if caps.name("variably").is_some() {
                    None
                } else {
                    caps["len"]
                        .parse()
                        .ok()
                        .and_then(|len| SubnetScope::new(&caps["network"], len))
                };
                head = None;
                continue;
            }

            if let Some(caps) = self.route.captures(line) {
                let prefix_length = caps
                    .name("len")
                    .and_then(|m| m.as_str().parse().ok())
                    .or_else(|| scope.and_then(|s| s.length_for(&caps["network"])));
                let current = RouteHead {
                    code: caps["code"].to_string(),
                    subtype: caps.name("subtype").map(|m| m.as_str().to_string()),
                    network: caps["network"].to_string(),
                    prefix_length,
                };
                if let Some(rest) = caps.name("rest") {
                    if let Some(row) = self.row_from_rest(&current, &vrf, rest.as_str()) {
                        rows.push(row);
                    }
                }
                // A head without a rest is wrapped onto the next line
                head = Some(current);
                continue;
            }

            if let Some(caps) = self.continuation.captures(line) {
                if let Some(current) = &head {
                    if let Some(row) = self.row_from_rest(current, &vrf, &caps["rest"]) {
                        rows.push(row);
                    }
                }
                continue;
            }

            // Legend, gateway of last resort, anything else
            head = None;
        }

        rows
    }

    fn row_from_rest(&self, head: &RouteHead, vrf: &str, rest: &str) -> Option<IosRouteRow> {
        let mut row = IosRouteRow {
            vrf: vrf.to_string(),
            protocol_code: head.code.clone(),
            protocol_subtype: head.subtype.clone(),
            network: head.network.clone(),
            prefix_length: head.prefix_length,
            ..Default::default()
        };

        let tail = if let Some(caps) = self.via.captures(rest) {
            row.distance = caps["distance"].parse().ok();
            row.metric = caps["metric"].parse().ok();
            row.nexthop_ip = Some(caps["nexthop"].to_string());
            caps.name("tail").map(|m| m.as_str().to_string())
        } else if let Some(caps) = self.attached.captures(rest) {
            caps.name("tail").map(|m| m.as_str().to_string())
        } else {
            return None;
        };

        row.nexthop_if = tail.as_deref().and_then(|t| self.interface_from_tail(t));
        Some(row)
    }

    /// Trailing ", 00:01:02, GigabitEthernet0/0" -> the interface, if any
    fn interface_from_tail(&self, tail: &str) -> Option<String> {
        tail.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty() && !self.uptime.is_match(token))
            .filter(|token| token.starts_with(|c: char| c.is_ascii_alphabetic()))
            .last()
            .map(String::from)
    }

    /// Rows grouped by prefix. Rows with no network or prefix length are dropped.
    pub fn parse_routes(&self, text: &str) -> PrefixTable {
        let mut routes = PrefixTable::new();

        for row in self.parse_rows(text) {
            let Some(prefix_length) = row.prefix_length else {
                continue;
            };
            if row.network.is_empty() {
                continue;
            }

            let prefix = format!("{}/{}", row.network, prefix_length);
            let routing_table = if row.vrf.is_empty() {
                DEFAULT_ROUTING_TABLE.to_string()
            } else {
                row.vrf.clone()
            };

            routes.entry(prefix.clone()).or_default().push(RouteObservation {
                prefix,
                protocol: row.protocol().as_str().to_string(),
                next_hop: row.nexthop_ip,
                outgoing_interface: row.nexthop_if,
                admin_distance: Some(row.distance.unwrap_or(0)),
                metric: Some(row.metric.unwrap_or(0)),
                is_active: Some(true),
                routing_table,
            });
        }

        routes
    }
}

pub struct IosParser {
    grammar: IosRouteGrammar,
}

impl IosParser {
    pub fn new() -> CollectResult<Self> {
        Ok(IosParser {
            grammar: IosRouteGrammar::new()?,
        })
    }
}

impl VendorParser for IosParser {
    fn platform(&self) -> &'static str {
        "cisco_ios"
    }

    fn commands(&self) -> &'static [&'static str] {
        &[IOS_GLOBAL_COMMAND, IOS_VRF_COMMAND]
    }

    fn parse(&self, outputs: &CommandOutputs) -> CollectResult<PrefixTable> {
        let mut routes = PrefixTable::new();

        if let Some(text) = outputs.get(IOS_GLOBAL_COMMAND) {
            routes = self.grammar.parse_routes(text);
        }

        // Best-effort: empty when no VRFs are configured
        if let Some(text) = outputs.get(IOS_VRF_COMMAND) {
            merge_prefix_tables(&mut routes, self.grammar.parse_routes(text));
        }

        Ok(routes)
    }
}
