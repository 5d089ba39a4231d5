// Vendor parsers - platform-specific routing table strategies

pub mod eos;
pub mod ios;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{CollectError, CollectResult};
use crate::routes::PrefixTable;

/// Raw output keyed by the command that produced it
pub type CommandOutputs = HashMap<String, String>;

/// Platforms known to the inventory that can never be collected from
/// (no structured routing table output over the CLI)
pub const KNOWN_UNSUPPORTED_PLATFORMS: [&str; 1] = ["paloalto_panos"];

/// Turns raw command output from one platform into route observations
pub trait VendorParser: Send + Sync {
    /// Platform key this strategy serves, e.g. "arista_eos"
    fn platform(&self) -> &'static str;

    /// Commands to run on the device, in order
    fn commands(&self) -> &'static [&'static str];

    fn parse(&self, outputs: &CommandOutputs) -> CollectResult<PrefixTable>;
}

/// Platform key to parser. Built once at start-up and shared read-only.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: BTreeMap<&'static str, Arc<dyn VendorParser>>,
}

impl ParserRegistry {
    /// Registry with the built-in EOS and IOS strategies
    pub fn with_builtin() -> CollectResult<Self> {
        let mut registry = ParserRegistry::default();
        registry.register(Arc::new(eos::EosParser));
        registry.register(Arc::new(ios::IosParser::new()?));
        Ok(registry)
    }

    pub fn register(&mut self, parser: Arc<dyn VendorParser>) {
        self.parsers.insert(parser.platform(), parser);
    }

    pub fn get(&self, platform: &str) -> CollectResult<Arc<dyn VendorParser>> {
        self.parsers
            .get(platform)
            .cloned()
            .ok_or_else(|| CollectError::UnsupportedPlatform(platform.to_string()))
    }

    pub fn platforms(&self) -> Vec<&'static str> {
        self.parsers.keys().copied().collect()
    }

    pub fn supports(&self, platform: &str) -> bool {
        self.parsers.contains_key(platform)
    }
}

/// Non-negative counter from device output, saturating at u32::MAX
pub(crate) fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
