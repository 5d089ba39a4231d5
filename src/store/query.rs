// Route queries - filters over stored route entries and longest-prefix lookup

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use rusqlite::types::Value;
use std::net::IpAddr;

use crate::inventory::{DeviceId, VrfId};
use crate::routes::exclusion::subnet_of;
use crate::routes::{Protocol, RouteRecord};

/// Filter over route entries. Empty lists and `None` match everything.
///
/// Substring filters are case-insensitive. `*_after` bounds are inclusive,
/// `*_before` bounds are exclusive. Results come back newest `last_seen`
/// first.
#[derive(Debug, Clone, Default)]
pub struct RouteQuery {
    pub device_ids: Vec<DeviceId>,
    pub vrf_ids: Vec<VrfId>,
    /// Only routes in the global table (no VRF)
    pub global_only: bool,
    pub protocols: Vec<Protocol>,
    /// Substring of the canonical network
    pub network: Option<String>,
    /// Networks equal to or inside this prefix
    pub within: Option<IpNet>,
    pub next_hop: Option<String>,
    pub is_active: Option<bool>,
    pub routing_table: Option<String>,
    pub first_seen_after: Option<DateTime<Utc>>,
    pub first_seen_before: Option<DateTime<Utc>>,
    pub last_seen_after: Option<DateTime<Utc>>,
    pub last_seen_before: Option<DateTime<Utc>>,
    /// Free text over network, next hop, protocol, routing table and device
    pub q: Option<String>,
    pub limit: Option<usize>,
}

impl RouteQuery {
    /// Every entry whose last sighting is strictly older than `cutoff`
    pub fn stale_before(cutoff: DateTime<Utc>) -> Self {
        RouteQuery {
            last_seen_before: Some(cutoff),
            ..Default::default()
        }
    }

    pub fn for_device(device_id: DeviceId) -> Self {
        RouteQuery {
            device_ids: vec![device_id],
            ..Default::default()
        }
    }

    /// Containment cannot be expressed in SQL over text columns; it is
    /// applied to rows after the fetch
    pub(crate) fn needs_post_filter(&self) -> bool {
        self.within.is_some()
    }

    pub(crate) fn post_filter(&self, record: &RouteRecord) -> bool {
        match &self.within {
            Some(outer) => record
                .network
                .parse::<IpNet>()
                .is_ok_and(|inner| subnet_of(&inner, outer)),
            None => true,
        }
    }

    /// WHERE clause (without the keyword) and its positional values
    pub(crate) fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !self.device_ids.is_empty() {
            clauses.push(format!("device_id IN ({})", placeholders(self.device_ids.len())));
            values.extend(self.device_ids.iter().map(|d| Value::Text(d.to_string())));
        }

        if self.global_only {
            clauses.push("vrf_id IS NULL".to_string());
        } else if !self.vrf_ids.is_empty() {
            clauses.push(format!("vrf_id IN ({})", placeholders(self.vrf_ids.len())));
            values.extend(self.vrf_ids.iter().map(|v| Value::Text(v.to_string())));
        }

        if !self.protocols.is_empty() {
            clauses.push(format!("protocol IN ({})", placeholders(self.protocols.len())));
            values.extend(self.protocols.iter().map(|p| Value::Text(p.as_str().to_string())));
        }

        for (column, needle) in [
            ("network", &self.network),
            ("next_hop", &self.next_hop),
            ("routing_table", &self.routing_table),
        ] {
            if let Some(needle) = needle {
                clauses.push(format!("{} LIKE ? ESCAPE '\\'", column));
                values.push(Value::Text(like_pattern(needle)));
            }
        }

        if let Some(active) = self.is_active {
            clauses.push("is_active = ?".to_string());
            values.push(Value::Integer(i64::from(active)));
        }

        for (clause, bound) in [
            ("first_seen >= ?", self.first_seen_after),
            ("first_seen < ?", self.first_seen_before),
            ("last_seen >= ?", self.last_seen_after),
            ("last_seen < ?", self.last_seen_before),
        ] {
            if let Some(bound) = bound {
                clauses.push(clause.to_string());
                values.push(Value::Integer(bound.timestamp_micros()));
            }
        }

        if let Some(q) = &self.q {
            let q = q.trim();
            if !q.is_empty() {
                let columns = ["network", "next_hop", "protocol", "routing_table", "device_id"];
                let any = columns
                    .iter()
                    .map(|c| format!("{} LIKE ? ESCAPE '\\'", c))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                clauses.push(format!("({})", any));
                for _ in columns {
                    values.push(Value::Text(like_pattern(q)));
                }
            }
        }

        if clauses.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (clauses.join(" AND "), values)
        }
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `%needle%` with LIKE metacharacters escaped
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Routes whose network contains `dest`, narrowed to the longest prefix.
///
/// ECMP entries for the winning prefix are all returned. Inactive routes
/// never match.
pub fn longest_match(records: &[RouteRecord], dest: IpAddr) -> Vec<&RouteRecord> {
    let mut best_len: Option<u8> = None;
    let mut best: Vec<&RouteRecord> = Vec::new();

    for record in records.iter().filter(|r| r.is_active) {
        let Ok(net) = record.network.parse::<IpNet>() else {
            continue;
        };
        if !net.contains(&dest) {
            continue;
        }
        match best_len {
            Some(len) if net.prefix_len() < len => {}
            Some(len) if net.prefix_len() == len => best.push(record),
            _ => {
                best_len = Some(net.prefix_len());
                best = vec![record];
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(network: &str, next_hop: &str) -> RouteRecord {
        let now = Utc::now();
        let net: IpNet = network.parse().unwrap();
        RouteRecord {
            id: Uuid::new_v4(),
            device_id: DeviceId::from("edge-1"),
            vrf: None,
            network: network.to_string(),
            prefix_length: net.prefix_len(),
            protocol: Protocol::Static,
            next_hop: next_hop.to_string(),
            outgoing_interface: None,
            metric: 0,
            admin_distance: 1,
            is_active: true,
            routing_table: "default".to_string(),
            first_seen: now,
            last_seen: now,
        }
    }

    #[test]
    fn test_like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("10.0"), "%10.0%");
        assert_eq!(like_pattern("50%_x"), "%50\\%\\_x%");
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let (clause, values) = RouteQuery::default().where_clause();
        assert_eq!(clause, "1 = 1");
        assert!(values.is_empty());
    }

    #[test]
    fn test_where_clause_orders_values_with_placeholders() {
        let query = RouteQuery {
            device_ids: vec![DeviceId::from("a"), DeviceId::from("b")],
            protocols: vec![Protocol::Bgp],
            is_active: Some(true),
            ..Default::default()
        };
        let (clause, values) = query.where_clause();
        assert_eq!(clause, "device_id IN (?, ?) AND protocol IN (?) AND is_active = ?");
        assert_eq!(
            values,
            vec![
                Value::Text("a".to_string()),
                Value::Text("b".to_string()),
                Value::Text("bgp".to_string()),
                Value::Integer(1),
            ]
        );
    }

    #[test]
    fn test_global_only_wins_over_vrf_ids() {
        let query = RouteQuery {
            global_only: true,
            vrf_ids: vec![VrfId::from("CUST-A")],
            ..Default::default()
        };
        let (clause, values) = query.where_clause();
        assert_eq!(clause, "vrf_id IS NULL");
        assert!(values.is_empty());
    }

    #[test]
    fn test_within_post_filter() {
        let query = RouteQuery {
            within: Some("10.0.0.0/8".parse().unwrap()),
            ..Default::default()
        };
        assert!(query.needs_post_filter());
        assert!(query.post_filter(&record("10.2.0.0/24", "")));
        assert!(query.post_filter(&record("10.0.0.0/8", "")));
        assert!(!query.post_filter(&record("0.0.0.0/0", "")));
        assert!(!query.post_filter(&record("2001:db8::/32", "")));
    }

    #[test]
    fn test_longest_match_prefers_specific_route() {
        let records = vec![
            record("0.0.0.0/0", "192.0.2.1"),
            record("10.0.0.0/8", "10.255.0.1"),
            record("10.2.0.0/24", "10.0.0.1"),
            record("10.2.0.0/24", "10.0.0.2"),
        ];

        let hits = longest_match(&records, "10.2.0.77".parse().unwrap());
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|r| r.network == "10.2.0.0/24"));

        let hits = longest_match(&records, "10.9.9.9".parse().unwrap());
        assert_eq!(hits[0].network, "10.0.0.0/8");

        let hits = longest_match(&records, "8.8.8.8".parse().unwrap());
        assert_eq!(hits[0].network, "0.0.0.0/0");
    }

    #[test]
    fn test_longest_match_ignores_inactive_and_other_family() {
        let mut inactive = record("10.2.0.0/24", "10.0.0.1");
        inactive.is_active = false;
        let records = vec![inactive, record("::/0", "2001:db8::1")];
        assert!(longest_match(&records, "10.2.0.1".parse().unwrap()).is_empty());
    }
}
