// Device selection: resolve a filter specification into concrete targets

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::{Device, DeviceInventory};
use crate::error::{CollectError, CollectResult};

/// Which devices a collection run targets.
///
/// Priority: `device` overrides everything, then `dynamic_group`, then the
/// combinable role/location/tag filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceFilter {
    /// Single device by id or name; ignores every other filter
    pub device: Option<String>,
    pub dynamic_group: Option<String>,
    /// Any of these roles
    #[serde(default)]
    pub roles: Vec<String>,
    /// Any of these locations, descendants included
    #[serde(default)]
    pub locations: Vec<String>,
    /// All of these tags
    #[serde(default)]
    pub tags: Vec<String>,
}

pub struct DeviceSelector<'a> {
    inventory: &'a dyn DeviceInventory,
    supported_platforms: &'a [String],
}

impl<'a> DeviceSelector<'a> {
    pub fn new(inventory: &'a dyn DeviceInventory, supported_platforms: &'a [String]) -> Self {
        DeviceSelector {
            inventory,
            supported_platforms,
        }
    }

    /// Deduplicated targets ordered by name. Fails with `EmptyTargetSet`
    /// when nothing matches.
    pub fn select(&self, filter: &DeviceFilter) -> CollectResult<Vec<Device>> {
        if let Some(key) = &filter.device {
            tracing::info!("Targeting specific device: {}", key);
            return self
                .inventory
                .device(key)
                .map(|device| vec![device])
                .ok_or(CollectError::EmptyTargetSet);
        }

        let mut candidates: Vec<Device> = self
            .inventory
            .devices()
            .into_iter()
            .filter(|d| d.reachable && d.primary_address.is_some() && d.platform.is_some())
            .collect();

        if let Some(group) = &filter.dynamic_group {
            tracing::info!("Using dynamic group: {}", group);
            candidates.retain(|d| d.groups.iter().any(|g| g == group));
        }

        if !filter.roles.is_empty() {
            tracing::info!("Filtering by role(s): {}", filter.roles.join(", "));
            candidates.retain(|d| d.role.as_ref().is_some_and(|r| filter.roles.contains(r)));
        }

        if !filter.locations.is_empty() {
            let mut allowed: HashSet<String> = HashSet::new();
            for location in &filter.locations {
                tracing::info!("Filtering by location: {} (including descendants)", location);
                allowed.extend(self.inventory.location_descendants(location));
            }
            candidates.retain(|d| d.location.as_ref().is_some_and(|l| allowed.contains(l)));
        }

        if !filter.tags.is_empty() {
            tracing::info!("Filtering by tag(s): {}", filter.tags.join(", "));
            candidates.retain(|d| filter.tags.iter().all(|t| d.tags.contains(t)));
        }

        candidates.retain(|d| {
            d.platform
                .as_ref()
                .is_some_and(|p| self.supported_platforms.contains(p))
        });

        let unique: BTreeMap<String, Device> = candidates
            .into_iter()
            .map(|d| (d.id.to_string(), d))
            .collect();
        let mut devices: Vec<Device> = unique.into_values().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));

        if devices.is_empty() {
            return Err(CollectError::EmptyTargetSet);
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventoryFile, StaticInventory};

    const INVENTORY: &str = r#"
[[device]]
name = "eos-1"
platform = "arista_eos"
primary_address = "192.0.2.1"
role = "edge"
location = "dc1-hall-a"
tags = ["prod", "bgp"]
groups = ["edges"]

[[device]]
name = "ios-1"
platform = "cisco_ios"
primary_address = "192.0.2.2"
role = "core"
location = "dc1"
tags = ["prod"]

[[device]]
name = "panos-1"
platform = "paloalto_panos"
primary_address = "192.0.2.3"
role = "edge"
location = "dc1"

[[device]]
name = "ios-down"
platform = "cisco_ios"
status = "offline"
primary_address = "192.0.2.4"
role = "edge"

[[device]]
name = "ios-noip"
platform = "cisco_ios"
role = "edge"

[[device]]
name = "eos-noplatform"
primary_address = "192.0.2.6"
role = "edge"

[[location]]
name = "dc1"

[[location]]
name = "dc1-hall-a"
parent = "dc1"
"#;

    fn inventory() -> StaticInventory {
        let file: InventoryFile = toml::from_str(INVENTORY).unwrap();
        StaticInventory::from_file(file).unwrap()
    }

    fn supported() -> Vec<String> {
        vec!["cisco_ios".to_string(), "arista_eos".to_string()]
    }

    fn names(devices: &[Device]) -> Vec<&str> {
        devices.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_default_selection_applies_base_filters() {
        let inv = inventory();
        let platforms = supported();
        let selected = DeviceSelector::new(&inv, &platforms)
            .select(&DeviceFilter::default())
            .unwrap();
        assert_eq!(names(&selected), vec!["eos-1", "ios-1"]);
    }

    #[test]
    fn test_explicit_device_overrides_everything() {
        let inv = inventory();
        let platforms = supported();
        let filter = DeviceFilter {
            device: Some("ios-down".to_string()),
            roles: vec!["core".to_string()],
            ..Default::default()
        };
        let selected = DeviceSelector::new(&inv, &platforms).select(&filter).unwrap();
        assert_eq!(names(&selected), vec!["ios-down"]);

        let filter = DeviceFilter {
            device: Some("panos-1".to_string()),
            ..Default::default()
        };
        let selected = DeviceSelector::new(&inv, &platforms).select(&filter).unwrap();
        assert_eq!(names(&selected), vec!["panos-1"]);
    }

    #[test]
    fn test_role_and_location_filters_combine() {
        let inv = inventory();
        let platforms = supported();
        let filter = DeviceFilter {
            roles: vec!["edge".to_string(), "core".to_string()],
            locations: vec!["dc1".to_string()],
            ..Default::default()
        };
        let selected = DeviceSelector::new(&inv, &platforms).select(&filter).unwrap();
        assert_eq!(names(&selected), vec!["eos-1", "ios-1"]);

        let filter = DeviceFilter {
            roles: vec!["edge".to_string()],
            locations: vec!["dc1".to_string()],
            ..Default::default()
        };
        let selected = DeviceSelector::new(&inv, &platforms).select(&filter).unwrap();
        assert_eq!(names(&selected), vec!["eos-1"]);
    }

    #[test]
    fn test_tags_require_all() {
        let inv = inventory();
        let platforms = supported();
        let filter = DeviceFilter {
            tags: vec!["prod".to_string(), "bgp".to_string()],
            ..Default::default()
        };
        let selected = DeviceSelector::new(&inv, &platforms).select(&filter).unwrap();
        assert_eq!(names(&selected), vec!["eos-1"]);
    }

    #[test]
    fn test_dynamic_group() {
        let inv = inventory();
        let platforms = supported();
        let filter = DeviceFilter {
            dynamic_group: Some("edges".to_string()),
            ..Default::default()
        };
        let selected = DeviceSelector::new(&inv, &platforms).select(&filter).unwrap();
        assert_eq!(names(&selected), vec!["eos-1"]);
    }

    #[test]
    fn test_no_match_is_empty_target_set() {
        let inv = inventory();
        let platforms = supported();
        let filter = DeviceFilter {
            roles: vec!["spine".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            DeviceSelector::new(&inv, &platforms).select(&filter),
            Err(CollectError::EmptyTargetSet)
        ));

        let filter = DeviceFilter {
            device: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            DeviceSelector::new(&inv, &platforms).select(&filter),
            Err(CollectError::EmptyTargetSet)
        ));
    }
}
