// Inventory module - devices, interfaces and VRFs the collector works against

pub mod selector;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use crate::error::{CollectError, CollectResult};

/// Device statuses that mean "try to reach it"
pub const REACHABLE_STATUSES: [&str; 2] = ["active", "staged"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VrfId(pub String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                $ty(value.to_string())
            }
        }
    };
}

string_id!(DeviceId);
string_id!(VrfId);

/// Reference to an interface owned by exactly one device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceRef {
    pub id: String,
    pub device_id: DeviceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Platform key, e.g. "cisco_ios"
    pub platform: Option<String>,
    pub reachable: bool,
    pub primary_address: Option<IpAddr>,
    pub role: Option<String>,
    pub location: Option<String>,
    pub tags: Vec<String>,
    /// Dynamic groups the device is currently a member of
    pub groups: Vec<String>,
}

/// Device inventory collaborator
pub trait DeviceInventory: Send + Sync {
    fn devices(&self) -> Vec<Device>;

    /// Look a device up by id or name
    fn device(&self, key: &str) -> Option<Device>;

    /// The named location and every location beneath it
    fn location_descendants(&self, location: &str) -> Vec<String>;
}

/// Interface directory collaborator
pub trait InterfaceDirectory: Send + Sync {
    /// Interfaces of one device, keyed by name
    fn interfaces_of(&self, device: &DeviceId) -> HashMap<String, InterfaceRef>;
}

/// VRF directory collaborator
pub trait VrfDirectory: Send + Sync {
    fn lookup_vrf(&self, name: &str) -> Option<VrfId>;
}

/// Inventory file structure (TOML format)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryFile {
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceEntry>,

    #[serde(default, rename = "location")]
    pub locations: Vec<LocationEntry>,

    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceEntry>,

    #[serde(default, rename = "vrf")]
    pub vrfs: Vec<VrfEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Defaults to the name
    pub id: Option<String>,
    pub name: String,
    pub platform: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    pub primary_address: Option<IpAddr>,
    pub role: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationEntry {
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceEntry {
    pub id: Option<String>,
    /// Owning device name or id
    pub device: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrfEntry {
    pub id: Option<String>,
    pub name: String,
}

fn default_status() -> String {
    "active".to_string()
}

/// Immutable in-memory inventory implementing every collaborator trait
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    devices: BTreeMap<DeviceId, Device>,
    location_parents: HashMap<String, Option<String>>,
    interfaces: HashMap<DeviceId, HashMap<String, InterfaceRef>>,
    vrfs: HashMap<String, VrfId>,
}

impl StaticInventory {
    pub fn load(path: &Path) -> CollectResult<Self> {
        tracing::info!("Loading inventory from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let file: InventoryFile = toml::from_str(&content)
            .map_err(|e| CollectError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_file(file)
    }

    pub fn from_file(file: InventoryFile) -> CollectResult<Self> {
        let mut inventory = StaticInventory::default();

        for entry in file.devices {
            let id = DeviceId(entry.id.unwrap_or_else(|| entry.name.clone()));
            let reachable = REACHABLE_STATUSES.contains(&entry.status.to_lowercase().as_str());
            let device = Device {
                id: id.clone(),
                name: entry.name,
                platform: entry.platform,
                reachable,
                primary_address: entry.primary_address,
                role: entry.role,
                location: entry.location,
                tags: entry.tags,
                groups: entry.groups,
            };
            if inventory.devices.insert(id.clone(), device).is_some() {
                return Err(CollectError::Config(format!("duplicate device id {}", id)));
            }
        }

        for location in file.locations {
            inventory.location_parents.insert(location.name, location.parent);
        }

        for entry in file.interfaces {
            let device = inventory
                .device(&entry.device)
                .ok_or_else(|| CollectError::Config(format!("interface {} references unknown device {}", entry.name, entry.device)))?;
            let iface = InterfaceRef {
                id: entry.id.unwrap_or_else(|| format!("{}:{}", device.id, entry.name)),
                device_id: device.id.clone(),
                name: entry.name.clone(),
            };
            inventory
                .interfaces
                .entry(device.id)
                .or_default()
                .insert(entry.name, iface);
        }

        for vrf in file.vrfs {
            let id = VrfId(vrf.id.unwrap_or_else(|| vrf.name.clone()));
            inventory.vrfs.insert(vrf.name, id);
        }

        Ok(inventory)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

impl DeviceInventory for StaticInventory {
    fn devices(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    fn device(&self, key: &str) -> Option<Device> {
        self.devices
            .get(&DeviceId::from(key))
            .or_else(|| self.devices.values().find(|d| d.name == key))
            .cloned()
    }

    fn location_descendants(&self, location: &str) -> Vec<String> {
        let mut found: HashSet<String> = HashSet::from([location.to_string()]);
        // Walk until no new children appear; tolerates cycles in the file
        loop {
            let before = found.len();
            for (name, parent) in &self.location_parents {
                if let Some(parent) = parent {
                    if found.contains(parent) {
                        found.insert(name.clone());
                    }
                }
            }
            if found.len() == before {
                break;
            }
        }
        let mut names: Vec<String> = found.into_iter().collect();
        names.sort();
        names
    }
}

impl InterfaceDirectory for StaticInventory {
    fn interfaces_of(&self, device: &DeviceId) -> HashMap<String, InterfaceRef> {
        self.interfaces.get(device).cloned().unwrap_or_default()
    }
}

impl VrfDirectory for StaticInventory {
    fn lookup_vrf(&self, name: &str) -> Option<VrfId> {
        self.vrfs.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
[[device]]
name = "edge-1"
platform = "arista_eos"
primary_address = "192.0.2.1"
role = "edge"
location = "dc1-hall-a"

[[device]]
id = "dev-2"
name = "core-1"
platform = "cisco_ios"
status = "Offline"

[[location]]
name = "dc1"

[[location]]
name = "dc1-hall-a"
parent = "dc1"

[[location]]
name = "dc1-hall-a-row-3"
parent = "dc1-hall-a"

[[interface]]
device = "edge-1"
name = "Ethernet1"

[[vrf]]
name = "CUST-A"
"#;

    fn inventory() -> StaticInventory {
        StaticInventory::from_file(toml::from_str(INVENTORY).unwrap()).unwrap()
    }

    #[test]
    fn test_load_inventory_file() {
        let inv = inventory();
        assert_eq!(inv.device_count(), 2);

        let edge = inv.device("edge-1").unwrap();
        assert!(edge.reachable);
        assert_eq!(edge.primary_address, Some("192.0.2.1".parse().unwrap()));

        let core = inv.device("core-1").unwrap();
        assert_eq!(core.id, DeviceId::from("dev-2"));
        assert!(!core.reachable);
    }

    #[test]
    fn test_location_descendants_include_self() {
        let inv = inventory();
        assert_eq!(
            inv.location_descendants("dc1"),
            vec!["dc1", "dc1-hall-a", "dc1-hall-a-row-3"]
        );
        assert_eq!(inv.location_descendants("dc1-hall-a-row-3"), vec!["dc1-hall-a-row-3"]);
    }

    #[test]
    fn test_interfaces_and_vrfs() {
        let inv = inventory();
        let ifaces = inv.interfaces_of(&DeviceId::from("edge-1"));
        assert_eq!(ifaces["Ethernet1"].device_id, DeviceId::from("edge-1"));
        assert!(inv.interfaces_of(&DeviceId::from("dev-2")).is_empty());
        assert_eq!(inv.lookup_vrf("CUST-A"), Some(VrfId::from("CUST-A")));
        assert_eq!(inv.lookup_vrf("CUST-B"), None);
    }

    #[test]
    fn test_interface_for_unknown_device_is_rejected() {
        let file: InventoryFile = toml::from_str(
            r#"
[[interface]]
device = "ghost"
name = "Ethernet1"
"#,
        )
        .unwrap();
        assert!(matches!(StaticInventory::from_file(file), Err(CollectError::Config(_))));
    }
}
