// Configuration management for the route tracker
// Supports CLI arguments, config file (TOML), and environment variables

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

use crate::collector::{
    CollectOptions, DEFAULT_SOFT_TIME_LIMIT_SECS, DEFAULT_TIME_LIMIT_SECS, DEFAULT_TIMEOUT_SECS,
    DEFAULT_WORKERS,
};
use crate::error::{CollectError, CollectResult};
use crate::inventory::selector::DeviceFilter;
use crate::inventory::{DeviceId, VrfId};
use crate::parsers::{KNOWN_UNSUPPORTED_PLATFORMS, ParserRegistry};
use crate::purge::{DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};
use crate::routes::Protocol;
use crate::store::RouteQuery;

pub const WORKERS_RANGE: (usize, usize) = (1, 200);
pub const TIMEOUT_RANGE_SECS: (u64, u64) = (5, 300);

/// Route tracker - collect device routing tables into a historical route database
#[derive(Parser, Debug, Clone)]
#[command(name = "route-tracker")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "ROUTE_TRACKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, global = true, env = "ROUTE_TRACKER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Route database file
    #[arg(long, global = true, env = "ROUTE_TRACKER_DATABASE")]
    pub database: Option<PathBuf>,

    /// Inventory file (devices, locations, interfaces, VRFs)
    #[arg(long, global = true, env = "ROUTE_TRACKER_INVENTORY")]
    pub inventory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Collect routing tables and reconcile them into the database
    Collect(CollectArgs),
    /// Delete route entries not seen within the retention window
    Purge(PurgeArgs),
    /// List stored routes
    Routes(RoutesArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct CollectArgs {
    /// Single device by name or id; ignores every other filter
    #[arg(long, conflicts_with = "group")]
    pub device: Option<String>,

    /// Dynamic group
    #[arg(long)]
    pub group: Option<String>,

    /// Device role (repeatable, any match)
    #[arg(long = "role")]
    pub roles: Vec<String>,

    /// Location, descendants included (repeatable, any match)
    #[arg(long = "location")]
    pub locations: Vec<String>,

    /// Tag (repeatable, all must match)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Parallel device workers
    #[arg(long, env = "ROUTE_TRACKER_WORKERS")]
    pub workers: Option<usize>,

    /// Per-device timeout in seconds
    #[arg(long, env = "ROUTE_TRACKER_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Count what would be written without touching the database
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose per-route logging and skip reasons in the report
    #[arg(long)]
    pub debug: bool,

    /// Replay saved command output from this directory instead of
    /// running the fetch program
    #[arg(long, env = "ROUTE_TRACKER_CAPTURE_DIR")]
    pub capture_dir: Option<PathBuf>,
}

impl CollectArgs {
    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter {
            device: self.device.clone(),
            dynamic_group: self.group.clone(),
            roles: self.roles.clone(),
            locations: self.locations.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PurgeArgs {
    /// Delete entries not seen for this many days
    #[arg(long, env = "ROUTE_TRACKER_RETENTION_DAYS")]
    pub retention_days: Option<u32>,

    /// Only count matching entries
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RoutesArgs {
    /// Device id (repeatable)
    #[arg(long = "device")]
    pub devices: Vec<String>,

    /// VRF id (repeatable)
    #[arg(long = "vrf", conflicts_with = "global")]
    pub vrfs: Vec<String>,

    /// Only the global routing table
    #[arg(long)]
    pub global: bool,

    /// Protocol (repeatable)
    #[arg(long = "protocol", value_parser = parse_protocol)]
    pub protocols: Vec<Protocol>,

    /// Network substring
    #[arg(long)]
    pub network: Option<String>,

    /// Networks equal to or inside this prefix
    #[arg(long)]
    pub within: Option<IpNet>,

    /// Next-hop substring
    #[arg(long)]
    pub next_hop: Option<String>,

    #[arg(long, conflicts_with = "inactive")]
    pub active: bool,

    #[arg(long)]
    pub inactive: bool,

    /// Free-text search
    #[arg(long)]
    pub q: Option<String>,

    #[arg(long)]
    pub limit: Option<usize>,

    /// Longest-prefix match for this address (needs exactly one --device)
    #[arg(long)]
    pub lookup: Option<IpAddr>,
}

impl RoutesArgs {
    pub fn query(&self) -> RouteQuery {
        let is_active = match (self.active, self.inactive) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        RouteQuery {
            device_ids: self.devices.iter().map(|d| DeviceId::from(d.as_str())).collect(),
            vrf_ids: self.vrfs.iter().map(|v| VrfId::from(v.as_str())).collect(),
            global_only: self.global,
            protocols: self.protocols.clone(),
            network: self.network.clone(),
            within: self.within,
            next_hop: self.next_hop.clone(),
            is_active,
            q: self.q.clone(),
            limit: self.limit,
            ..Default::default()
        }
    }
}

fn parse_protocol(value: &str) -> Result<Protocol, String> {
    let protocol = Protocol::from_label(value);
    if protocol == Protocol::Unknown && !value.eq_ignore_ascii_case("unknown") {
        let names: Vec<&str> = Protocol::ALL.iter().map(|p| p.as_str()).collect();
        return Err(format!("expected one of {}", names.join(", ")));
    }
    Ok(protocol)
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Collection job settings
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Retention settings
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Route database settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Inventory settings
    #[serde(default)]
    pub inventory: InventoryConfig,

    /// How command output is fetched
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-device timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_soft_time_limit")]
    pub soft_time_limit_seconds: u64,

    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: u64,

    #[serde(default = "default_supported_platforms")]
    pub supported_platforms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_inventory_file")]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Run an external program per command
    Exec,
    /// Replay saved output from disk
    Capture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    /// Invoked as `<program> <address> <platform> <command>`
    #[serde(default = "default_program")]
    pub program: PathBuf,

    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_soft_time_limit() -> u64 {
    DEFAULT_SOFT_TIME_LIMIT_SECS
}
fn default_time_limit() -> u64 {
    DEFAULT_TIME_LIMIT_SECS
}
fn default_supported_platforms() -> Vec<String> {
    vec!["cisco_ios".to_string(), "arista_eos".to_string()]
}
fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}
fn default_database() -> PathBuf {
    PathBuf::from("route-tracker.db")
}
fn default_inventory_file() -> PathBuf {
    PathBuf::from("inventory.toml")
}
fn default_transport_kind() -> TransportKind {
    TransportKind::Exec
}
fn default_program() -> PathBuf {
    PathBuf::from("route-fetch")
}
fn default_capture_dir() -> PathBuf {
    PathBuf::from("captures")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            workers: default_workers(),
            timeout_seconds: default_timeout(),
            soft_time_limit_seconds: default_soft_time_limit(),
            time_limit_seconds: default_time_limit(),
            supported_platforms: default_supported_platforms(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            retention_days: default_retention_days(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database: default_database(),
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        InventoryConfig {
            file: default_inventory_file(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            kind: default_transport_kind(),
            program: default_program(),
            capture_dir: default_capture_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSettings {
    Exec { program: PathBuf },
    Capture { dir: PathBuf },
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: Level,
    pub database: PathBuf,
    pub inventory_file: PathBuf,
    pub transport: TransportSettings,
    pub workers: usize,
    pub timeout: Duration,
    pub soft_time_limit: Duration,
    pub time_limit: Duration,
    pub supported_platforms: Vec<String>,
    pub retention_days: u32,
    /// Config file the values were read from, if any
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args (or their environment variables) > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> anyhow::Result<Self> {
        let source = match &cli_args.config {
            Some(config_path) => Some(config_path.clone()),
            None => Some(PathBuf::from("route-tracker.toml")).filter(|path| path.exists()),
        };
        let config_file = match &source {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };

        let mut config = Self::from_sources(cli_args, config_file)?;
        config.source = source;
        Ok(config)
    }

    /// Merge CLI arguments over a parsed config file, then validate
    pub fn from_sources(cli_args: &CliArgs, file: ConfigFile) -> CollectResult<Self> {
        let (collect, purge) = match &cli_args.command {
            Command::Collect(args) => (Some(args), None),
            Command::Purge(args) => (None, Some(args)),
            Command::Routes(_) => (None, None),
        };

        let debug = collect.is_some_and(|args| args.debug);
        let level = cli_args.log_level.as_deref().unwrap_or(&file.logging.level);
        let mut log_level = parse_log_level(level)?;
        if debug && log_level < Level::DEBUG {
            log_level = Level::DEBUG;
        }

        let transport = match collect.and_then(|args| args.capture_dir.clone()) {
            Some(dir) => TransportSettings::Capture { dir },
            None => match file.transport.kind {
                TransportKind::Exec => TransportSettings::Exec {
                    program: file.transport.program,
                },
                TransportKind::Capture => TransportSettings::Capture {
                    dir: file.transport.capture_dir,
                },
            },
        };

        let config = Config {
            log_level,
            database: cli_args.database.clone().unwrap_or(file.storage.database),
            inventory_file: cli_args.inventory.clone().unwrap_or(file.inventory.file),
            transport,
            workers: collect
                .and_then(|args| args.workers)
                .unwrap_or(file.collection.workers),
            timeout: Duration::from_secs(
                collect
                    .and_then(|args| args.timeout)
                    .unwrap_or(file.collection.timeout_seconds),
            ),
            soft_time_limit: Duration::from_secs(file.collection.soft_time_limit_seconds),
            time_limit: Duration::from_secs(file.collection.time_limit_seconds),
            supported_platforms: file.collection.supported_platforms,
            retention_days: purge
                .and_then(|args| args.retention_days)
                .unwrap_or(file.retention.retention_days),
            source: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CollectResult<()> {
        let (min, max) = WORKERS_RANGE;
        if !(min..=max).contains(&self.workers) {
            return Err(CollectError::Config(format!(
                "workers must be between {} and {}, got {}",
                min, max, self.workers
            )));
        }

        let (min, max) = TIMEOUT_RANGE_SECS;
        let timeout = self.timeout.as_secs();
        if !(min..=max).contains(&timeout) {
            return Err(CollectError::Config(format!(
                "timeout must be between {}s and {}s, got {}s",
                min, max, timeout
            )));
        }

        if self.soft_time_limit.is_zero() {
            return Err(CollectError::Config("soft_time_limit_seconds must be at least 1".to_string()));
        }
        if self.time_limit < self.soft_time_limit {
            return Err(CollectError::Config(format!(
                "time_limit_seconds ({}) must not be below soft_time_limit_seconds ({})",
                self.time_limit.as_secs(),
                self.soft_time_limit.as_secs()
            )));
        }

        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(CollectError::Config(format!(
                "retention_days must be between 1 and {}, got {}",
                MAX_RETENTION_DAYS, self.retention_days
            )));
        }

        if self.supported_platforms.is_empty() {
            return Err(CollectError::Config("supported_platforms must not be empty".to_string()));
        }
        if let Some(platform) = self
            .supported_platforms
            .iter()
            .find(|p| KNOWN_UNSUPPORTED_PLATFORMS.contains(&p.as_str()))
        {
            return Err(CollectError::Config(format!(
                "platform {} cannot be collected from",
                platform
            )));
        }

        Ok(())
    }

    /// Every configured platform must have a parser
    pub fn check_platforms(&self, registry: &ParserRegistry) -> CollectResult<()> {
        for platform in &self.supported_platforms {
            if !registry.supports(platform) {
                return Err(CollectError::Config(format!(
                    "no parser registered for supported platform {}",
                    platform
                )));
            }
        }
        Ok(())
    }

    pub fn collect_options(&self, args: &CollectArgs) -> CollectOptions {
        CollectOptions {
            filter: args.device_filter(),
            workers: self.workers,
            timeout: self.timeout,
            commit: !args.dry_run,
            debug: args.debug,
        }
    }
}

fn read_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    Ok(toml::from_str::<ConfigFile>(&content)?)
}

pub fn parse_log_level(level_str: &str) -> CollectResult<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(CollectError::Config(format!("Invalid log level: {}", level_str))),
    }
}
