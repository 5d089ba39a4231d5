// Collector module - the collection job: select, fetch, parse, reconcile

pub mod scheduler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;

use crate::error::{CollectError, CollectResult, StoreError};
use crate::inventory::selector::{DeviceFilter, DeviceSelector};
use crate::inventory::{DeviceInventory, InterfaceDirectory, VrfDirectory, VrfId};
use crate::parsers::ParserRegistry;
use crate::routes::RouteCandidate;
use crate::routes::exclusion::ExclusionFilter;
use crate::store::RouteStore;
use crate::transport::Transport;
use scheduler::{DeviceOutcome, DeviceRoutes, Scheduler, SchedulerSettings};

/// Routing-table names that mean the global table
pub const GLOBAL_TABLE_NAMES: [&str; 3] = ["default", "inet.0", ""];

pub const DEFAULT_WORKERS: usize = 50;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SOFT_TIME_LIMIT_SECS: u64 = 3600;
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 7200;

/// Counters for one collection job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub devices_total: usize,
    pub devices_success: usize,
    pub devices_failed: usize,
    pub devices_skipped: usize,
    pub routes_created: usize,
    pub routes_updated: usize,
    pub routes_excluded: usize,
    pub routes_invalid: usize,
    pub routes_dryrun: usize,
}

impl CollectionStats {
    fn absorb(&mut self, counts: &RouteCounts) {
        self.routes_created += counts.created;
        self.routes_updated += counts.updated;
        self.routes_excluded += counts.excluded;
        self.routes_invalid += counts.invalid;
        self.routes_dryrun += counts.dryrun;
    }

    pub fn summary(&self, elapsed: Duration, commit: bool) -> String {
        let mut summary = format!(
            "Job completed in {:.1}s. Devices: {} success, {} failed, {} skipped | Routes: {} created, {} updated, {} excluded, {} invalid",
            elapsed.as_secs_f64(),
            self.devices_success,
            self.devices_failed,
            self.devices_skipped,
            self.routes_created,
            self.routes_updated,
            self.routes_excluded,
            self.routes_invalid
        );
        if !commit {
            summary.push_str(&format!(", {} dry-run", self.routes_dryrun));
        }
        summary
    }
}

/// What happened to one route during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Created,
    Updated,
    Excluded,
    DryRun,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRoute {
    pub device: String,
    pub network: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
struct RouteCounts {
    created: usize,
    updated: usize,
    excluded: usize,
    invalid: usize,
    dryrun: usize,
}

impl RouteCounts {
    fn record(&mut self, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Created => self.created += 1,
            RouteOutcome::Updated => self.updated += 1,
            RouteOutcome::Excluded => self.excluded += 1,
            RouteOutcome::DryRun => self.dryrun += 1,
            RouteOutcome::Skipped(_) => self.invalid += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    /// No device failed
    pub success: bool,
    pub message: String,
    pub summary: String,
    pub stats: CollectionStats,
    /// Per-route skip reasons, filled in debug mode only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_routes: Vec<SkippedRoute>,
}

/// Per-invocation knobs for `Collector::collect`
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub filter: DeviceFilter,
    pub workers: usize,
    pub timeout: Duration,
    /// false = dry-run, nothing is written
    pub commit: bool,
    /// Keep the reason for every skipped route in the report
    pub debug: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        CollectOptions {
            filter: DeviceFilter::default(),
            workers: DEFAULT_WORKERS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            commit: true,
            debug: false,
        }
    }
}

/// Job-scoped VRF name resolution
struct VrfCache<'a> {
    directory: &'a dyn VrfDirectory,
    resolved: HashMap<String, Option<VrfId>>,
}

impl<'a> VrfCache<'a> {
    fn new(directory: &'a dyn VrfDirectory) -> Self {
        VrfCache {
            directory,
            resolved: HashMap::new(),
        }
    }

    /// `None` is the global table; unknown names fall back to it too
    fn resolve(&mut self, routing_table: &str) -> Option<VrfId> {
        if GLOBAL_TABLE_NAMES.contains(&routing_table) {
            return None;
        }
        let directory = self.directory;
        self.resolved
            .entry(routing_table.to_string())
            .or_insert_with(|| {
                let vrf = directory.lookup_vrf(routing_table);
                if vrf.is_none() {
                    tracing::debug!("VRF {:?} not found, using the global table", routing_table);
                }
                vrf
            })
            .clone()
    }
}

pub struct Collector {
    devices: Arc<dyn DeviceInventory>,
    interfaces: Arc<dyn InterfaceDirectory>,
    vrfs: Arc<dyn VrfDirectory>,
    registry: Arc<ParserRegistry>,
    transport: Arc<dyn Transport>,
    store: Arc<RouteStore>,
    exclusion: ExclusionFilter,
    supported_platforms: Vec<String>,
    soft_time_limit: Duration,
    time_limit: Duration,
}

impl Collector {
    pub fn new<I>(
        inventory: Arc<I>,
        registry: Arc<ParserRegistry>,
        transport: Arc<dyn Transport>,
        store: Arc<RouteStore>,
    ) -> Self
    where
        I: DeviceInventory + InterfaceDirectory + VrfDirectory + 'static,
    {
        let supported_platforms = registry.platforms().into_iter().map(String::from).collect();
        Collector {
            devices: inventory.clone(),
            interfaces: inventory.clone(),
            vrfs: inventory,
            registry,
            transport,
            store,
            exclusion: ExclusionFilter::default(),
            supported_platforms,
            soft_time_limit: Duration::from_secs(DEFAULT_SOFT_TIME_LIMIT_SECS),
            time_limit: Duration::from_secs(DEFAULT_TIME_LIMIT_SECS),
        }
    }

    pub fn with_supported_platforms(mut self, platforms: Vec<String>) -> Self {
        self.supported_platforms = platforms;
        self
    }

    pub fn with_time_limits(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_time_limit = soft;
        self.time_limit = hard;
        self
    }

    /// Run one collection job.
    ///
    /// Device and route failures are counted, never raised. The only error
    /// for a run that got past device selection is `TotalCollectionFailure`,
    /// returned when no device succeeded and at least one failed.
    pub async fn collect(&self, options: &CollectOptions) -> CollectResult<CollectionReport> {
        let started = Instant::now();
        tracing::info!(
            "Starting route collection ({} mode, {} workers, {}s timeout)",
            if options.commit { "COMMIT" } else { "DRY-RUN" },
            options.workers,
            options.timeout.as_secs()
        );

        let selector = DeviceSelector::new(self.devices.as_ref(), &self.supported_platforms);
        let devices = match selector.select(&options.filter) {
            Ok(devices) => devices,
            Err(CollectError::EmptyTargetSet) => {
                tracing::warn!("No devices matched the specified filters");
                return Ok(CollectionReport {
                    success: false,
                    message: "No devices matched filters".to_string(),
                    summary: CollectionStats::default().summary(started.elapsed(), options.commit),
                    stats: CollectionStats::default(),
                    skipped_routes: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };
        tracing::info!("Found {} device(s) to process", devices.len());

        let mut stats = CollectionStats {
            devices_total: devices.len(),
            ..Default::default()
        };
        let scheduler = Scheduler::new(
            self.registry.clone(),
            self.transport.clone(),
            SchedulerSettings {
                workers: options.workers,
                timeout: options.timeout,
                soft_time_limit: self.soft_time_limit,
                time_limit: self.time_limit,
            },
        );
        let outcomes = scheduler.run(devices).await;

        let mut vrf_cache = VrfCache::new(self.vrfs.as_ref());
        let mut skipped_routes = Vec::new();

        for outcome in outcomes {
            match outcome {
                DeviceOutcome::Skipped { device, reason } => {
                    tracing::warn!("{}: skipped, {}", device.name, reason);
                    stats.devices_skipped += 1;
                }
                DeviceOutcome::Failed { device, error } => {
                    tracing::error!("{}: {}", device.name, error);
                    stats.devices_failed += 1;
                }
                DeviceOutcome::Collected(routes) => {
                    match self
                        .persist_device(&routes, &mut vrf_cache, options, &mut skipped_routes)
                        .await
                    {
                        Ok(counts) => {
                            stats.absorb(&counts);
                            stats.devices_success += 1;
                        }
                        Err(e) => {
                            tracing::error!("{}: {}", routes.device.name, e);
                            stats.devices_failed += 1;
                        }
                    }
                }
            }
        }

        let summary = stats.summary(started.elapsed(), options.commit);
        tracing::info!("{}", summary);

        if stats.devices_success == 0 && stats.devices_failed > 0 {
            return Err(CollectError::TotalCollectionFailure { summary, stats });
        }

        let success = stats.devices_failed == 0;
        Ok(CollectionReport {
            success,
            message: if success {
                "Route collection completed".to_string()
            } else {
                format!("Route collection completed, {} device(s) failed", stats.devices_failed)
            },
            summary,
            stats,
            skipped_routes: if options.debug { skipped_routes } else { Vec::new() },
        })
    }

    /// Filter, resolve and reconcile one device's routes under one transaction
    async fn persist_device(
        &self,
        routes: &DeviceRoutes,
        vrf_cache: &mut VrfCache<'_>,
        options: &CollectOptions,
        skipped: &mut Vec<SkippedRoute>,
    ) -> CollectResult<RouteCounts> {
        let device = &routes.device;
        let mut counts = RouteCounts::default();
        let mut skip = |counts: &mut RouteCounts, network: &str, reason: String| {
            tracing::debug!("{}: skipping {}: {}", device.name, network, reason);
            skipped.push(SkippedRoute {
                device: device.name.clone(),
                network: network.to_string(),
                reason: reason.clone(),
            });
            counts.record(&RouteOutcome::Skipped(reason));
        };

        for prefix in &routes.invalid {
            skip(&mut counts, prefix, "invalid CIDR prefix".to_string());
        }

        let interfaces = self.interfaces.interfaces_of(&device.id);
        let mut candidates = Vec::with_capacity(routes.routes.len());
        let mut excluded = HashSet::new();

        for route in &routes.routes {
            if self.exclusion.is_excluded(&route.network) {
                // Once per prefix, however many next hops it has
                if excluded.insert(route.network.as_str()) {
                    tracing::debug!("{}: excluded {}", device.name, route.network);
                    counts.record(&RouteOutcome::Excluded);
                }
                continue;
            }

            let interface = route
                .outgoing_interface
                .as_ref()
                .and_then(|name| interfaces.get(name).cloned());
            let vrf = vrf_cache.resolve(&route.routing_table);
            candidates.push(RouteCandidate::from_normalized(device.id.clone(), vrf, route, interface));
        }

        if !options.commit {
            let prefixes: BTreeSet<&str> = candidates.iter().map(|c| c.network.as_str()).collect();
            for _ in &candidates {
                counts.record(&RouteOutcome::DryRun);
            }
            tracing::info!(
                "{}: DRY-RUN: {} prefix(es), {} nexthops, {} excluded",
                device.name,
                prefixes.len(),
                candidates.len(),
                counts.excluded
            );
            return Ok(counts);
        }

        // rusqlite blocks, and conflict retries sleep the calling thread
        let store = self.store.clone();
        let now = Utc::now();
        let written = task::spawn_blocking(move || write_routes(&store, &candidates, now))
            .await
            .map_err(|e| CollectError::Task(format!("route writer for {}: {}", device.name, e)))??;

        for (network, outcome) in written {
            match outcome {
                RouteOutcome::Skipped(reason) => skip(&mut counts, &network, reason),
                outcome => counts.record(&outcome),
            }
        }

        tracing::info!(
            "{}: Routes: {} created, {} updated, {} excluded, {} invalid",
            device.name,
            counts.created,
            counts.updated,
            counts.excluded,
            counts.invalid
        );
        Ok(counts)
    }
}

/// Upsert every candidate in one device transaction. Rejected routes come
/// back as `Skipped` and leave the rest of the batch intact.
fn write_routes(
    store: &RouteStore,
    candidates: &[RouteCandidate],
    now: DateTime<Utc>,
) -> Result<Vec<(String, RouteOutcome)>, StoreError> {
    store.device_batch(|batch| {
        let mut written = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let outcome = match batch.upsert(candidate, now) {
                Ok((record, true)) => {
                    tracing::debug!("Created {}", record);
                    RouteOutcome::Created
                }
                Ok((record, false)) => {
                    tracing::debug!("Updated {}", record);
                    RouteOutcome::Updated
                }
                Err(e @ (StoreError::InvalidPrefix(_) | StoreError::InvalidReference { .. })) => {
                    RouteOutcome::Skipped(e.to_string())
                }
                Err(e) => return Err(e),
            };
            written.push((candidate.network.clone(), outcome));
        }
        Ok(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{DeviceId, InventoryFile, StaticInventory};
    use crate::parsers::eos::EOS_ROUTE_COMMAND;
    use crate::routes::Protocol;
    use crate::store::RouteQuery;
    use crate::transport::fake::{FakeTransport, eos_route};

    const INVENTORY: &str = r#"
[[device]]
name = "eos-1"
platform = "arista_eos"
primary_address = "192.0.2.1"

[[device]]
name = "eos-2"
platform = "arista_eos"
primary_address = "192.0.2.2"

[[device]]
name = "eos-3"
platform = "arista_eos"
primary_address = "192.0.2.3"

[[device]]
name = "eos-4"
platform = "arista_eos"
primary_address = "192.0.2.4"

[[device]]
name = "eos-5"
platform = "arista_eos"
primary_address = "192.0.2.5"

[[device]]
name = "fw-1"
platform = "paloalto_panos"
primary_address = "192.0.2.9"

[[interface]]
device = "eos-1"
name = "Ethernet1"

[[interface]]
device = "eos-1"
name = "Ethernet2"

[[vrf]]
id = "vrf-cust-a"
name = "CUST-A"
"#;

    struct Harness {
        transport: Arc<FakeTransport>,
        store: Arc<RouteStore>,
        collector: Collector,
    }

    fn harness() -> Harness {
        let file: InventoryFile = toml::from_str(INVENTORY).unwrap();
        let inventory = Arc::new(StaticInventory::from_file(file).unwrap());
        let registry = Arc::new(ParserRegistry::with_builtin().unwrap());
        let transport = Arc::new(FakeTransport::new());
        let store = Arc::new(RouteStore::open_in_memory().unwrap());
        let collector = Collector::new(inventory, registry, transport.clone(), store.clone());
        Harness {
            transport,
            store,
            collector,
        }
    }

    fn only(device: &str) -> CollectOptions {
        CollectOptions {
            filter: DeviceFilter {
                device: Some(device.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_fatal() {
        let h = harness();
        for name in ["eos-1", "eos-2", "eos-3"] {
            h.transport
                .respond(name, EOS_ROUTE_COMMAND, eos_route("10.2.0.0/24", &["10.0.0.1"], 0));
        }
        h.transport.fail("eos-4", "connection refused");
        h.transport.fail("eos-5", "authentication failed");

        let report = h.collector.collect(&CollectOptions::default()).await.unwrap();
        assert_eq!(report.stats.devices_total, 5);
        assert_eq!(report.stats.devices_success, 3);
        assert_eq!(report.stats.devices_failed, 2);
        assert_eq!(report.stats.routes_created, 3);
        assert!(!report.success);
        assert!(report.summary.contains("Devices: 3 success, 2 failed, 0 skipped"));
    }

    #[tokio::test]
    async fn test_total_failure_is_raised() {
        let h = harness();
        h.transport.fail("eos-1", "connection refused");

        match h.collector.collect(&only("eos-1")).await {
            Err(CollectError::TotalCollectionFailure { stats, .. }) => {
                assert_eq!(stats.devices_failed, 1);
                assert_eq!(stats.devices_success, 0);
            }
            other => panic!("expected total failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ecmp_created_then_updated() {
        let h = harness();
        h.transport.respond(
            "eos-1",
            EOS_ROUTE_COMMAND,
            eos_route("10.2.0.0/24", &["10.0.0.1", "10.0.0.2"], 0),
        );

        let first = h.collector.collect(&only("eos-1")).await.unwrap();
        assert!(first.success);
        assert_eq!(first.stats.routes_created, 2);
        assert_eq!(first.stats.routes_updated, 0);
        let mut ids: Vec<_> = h
            .store
            .query(&RouteQuery::default())
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();

        h.transport.respond(
            "eos-1",
            EOS_ROUTE_COMMAND,
            eos_route("10.2.0.0/24", &["10.0.0.1", "10.0.0.2"], 5),
        );
        let second = h.collector.collect(&only("eos-1")).await.unwrap();
        assert_eq!(second.stats.routes_created, 0);
        assert_eq!(second.stats.routes_updated, 2);

        let records = h.store.query(&RouteQuery::default()).unwrap();
        let mut after: Vec<_> = records.iter().map(|r| r.id).collect();
        after.sort();
        assert_eq!(after, ids);
        assert!(records.iter().all(|r| r.metric == 5 && r.admin_distance == 20));
        assert!(records.iter().all(|r| r.outgoing_interface.is_some()));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let h = harness();
        h.transport.respond(
            "eos-1",
            EOS_ROUTE_COMMAND,
            eos_route("10.2.0.0/24", &["10.0.0.1", "10.0.0.2"], 0),
        );

        let options = CollectOptions {
            commit: false,
            ..only("eos-1")
        };
        let report = h.collector.collect(&options).await.unwrap();
        assert_eq!(report.stats.routes_dryrun, 2);
        assert_eq!(report.stats.routes_created, 0);
        assert!(report.summary.ends_with(", 2 dry-run"));
        assert_eq!(h.store.count(&RouteQuery::default()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reserved_ranges_are_excluded() {
        let h = harness();
        let json = r#"{"vrfs": {"default": {"routes": {
            "224.0.0.0/4": {"routeType": "static", "vias": []},
            "169.254.0.0/16": {"routeType": "connected", "vias": [{"interface": "Ethernet1"}]},
            "10.9.0.0/16": {"routeType": "static", "vias": [{"nexthopAddr": "10.0.0.1"}]}
        }}}}"#;
        h.transport.respond("eos-1", EOS_ROUTE_COMMAND, json);

        let report = h.collector.collect(&only("eos-1")).await.unwrap();
        assert_eq!(report.stats.routes_excluded, 2);
        assert_eq!(report.stats.routes_created, 1);
    }

    #[tokio::test]
    async fn test_excluded_prefix_counts_once_across_next_hops() {
        let h = harness();
        h.transport.respond(
            "eos-1",
            EOS_ROUTE_COMMAND,
            eos_route("224.0.0.0/4", &["10.0.0.1", "10.0.0.2", "10.0.0.3"], 0),
        );

        let options = CollectOptions {
            commit: false,
            ..only("eos-1")
        };
        let report = h.collector.collect(&options).await.unwrap();
        assert_eq!(report.stats.routes_excluded, 1);
        assert_eq!(report.stats.routes_dryrun, 0);

        let report = h.collector.collect(&only("eos-1")).await.unwrap();
        assert_eq!(report.stats.routes_excluded, 1);
        assert_eq!(h.store.count(&RouteQuery::default()).unwrap(), 0);
    }

    #[test]
    fn test_write_routes_keeps_batch_on_rejected_route() {
        let store = RouteStore::open_in_memory().unwrap();
        let good = RouteCandidate::new(DeviceId::from("eos-1"), "10.2.0.0/24", Protocol::Bgp);
        let bad = RouteCandidate::new(DeviceId::from("eos-1"), "not-a-prefix", Protocol::Bgp);

        let written = write_routes(&store, &[good, bad], Utc::now()).unwrap();
        assert_eq!(written[0], ("10.2.0.0/24".to_string(), RouteOutcome::Created));
        assert!(matches!(&written[1].1, RouteOutcome::Skipped(_)));
        assert_eq!(store.count(&RouteQuery::default()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vrf_and_interface_resolution() {
        let h = harness();
        let json = r#"{"vrfs": {
            "CUST-A": {"routes": {
                "172.16.0.0/16": {"routeType": "ospfInter", "vias": [{"nexthopAddr": "172.31.0.1", "interface": "Ethernet2"}]}
            }},
            "CUST-B": {"routes": {
                "172.17.0.0/16": {"routeType": "static", "vias": [{"nexthopAddr": "172.31.0.2", "interface": "Port-Channel9"}]}
            }}
        }}"#;
        h.transport.respond("eos-1", EOS_ROUTE_COMMAND, json);
        h.collector.collect(&only("eos-1")).await.unwrap();

        let known = h
            .store
            .query(&RouteQuery {
                vrf_ids: vec![VrfId::from("vrf-cust-a")],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].routing_table, "CUST-A");
        assert_eq!(known[0].outgoing_interface.as_ref().unwrap().name, "Ethernet2");

        let unknown = h
            .store
            .query(&RouteQuery {
                global_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].routing_table, "CUST-B");
        assert!(unknown[0].outgoing_interface.is_none());
    }

    #[tokio::test]
    async fn test_invalid_routes_are_counted_and_reported_in_debug() {
        let h = harness();
        let json = r#"{"vrfs": {"default": {"routes": {
            "10.9.0.0/16": {"routeType": "static", "vias": [{"nexthopAddr": "10.0.0.1"}]},
            "10.300.0.0/16": {"routeType": "static", "vias": [{"nexthopAddr": "10.0.0.1"}]}
        }}}}"#;
        h.transport.respond("eos-1", EOS_ROUTE_COMMAND, json);

        let options = CollectOptions {
            debug: true,
            ..only("eos-1")
        };
        let report = h.collector.collect(&options).await.unwrap();
        assert_eq!(report.stats.routes_invalid, 1);
        assert_eq!(report.stats.routes_created, 1);
        assert_eq!(report.skipped_routes.len(), 1);
        assert_eq!(report.skipped_routes[0].network, "10.300.0.0/16");
    }

    #[tokio::test]
    async fn test_empty_table_counts_as_success() {
        let h = harness();
        h.transport.respond("eos-1", EOS_ROUTE_COMMAND, "");
        let report = h.collector.collect(&only("eos-1")).await.unwrap();
        assert!(report.success);
        assert_eq!(report.stats.devices_success, 1);
        assert_eq!(report.stats.routes_created, 0);
    }

    #[tokio::test]
    async fn test_empty_target_set_is_clean_failure() {
        let h = harness();
        let options = CollectOptions {
            filter: DeviceFilter {
                roles: vec!["spine".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let report = h.collector.collect(&options).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.message, "No devices matched filters");
        assert_eq!(report.stats.devices_total, 0);
    }

    #[tokio::test]
    async fn test_explicit_unsupported_device_fails() {
        let h = harness();
        match h.collector.collect(&only("fw-1")).await {
            Err(CollectError::TotalCollectionFailure { stats, .. }) => {
                assert_eq!(stats.devices_total, 1);
                assert_eq!(stats.devices_failed, 1);
            }
            other => panic!("expected total failure, got {:?}", other),
        }
        assert_eq!(h.transport.calls(), 0);
    }

    #[test]
    fn test_summary_format() {
        let stats = CollectionStats {
            devices_success: 3,
            devices_failed: 1,
            routes_created: 10,
            routes_updated: 4,
            routes_excluded: 2,
            routes_invalid: 1,
            routes_dryrun: 0,
            ..Default::default()
        };
        assert_eq!(
            stats.summary(Duration::from_millis(2500), true),
            "Job completed in 2.5s. Devices: 3 success, 1 failed, 0 skipped | Routes: 10 created, 4 updated, 2 excluded, 1 invalid"
        );
        assert!(stats.summary(Duration::ZERO, false).ends_with(", 0 dry-run"));
    }

    #[test]
    fn test_vrf_cache_maps_global_names() {
        let file: InventoryFile = toml::from_str(INVENTORY).unwrap();
        let inventory = StaticInventory::from_file(file).unwrap();
        let mut cache = VrfCache::new(&inventory);
        assert_eq!(cache.resolve("default"), None);
        assert_eq!(cache.resolve("inet.0"), None);
        assert_eq!(cache.resolve(""), None);
        assert_eq!(cache.resolve("CUST-A"), Some(VrfId::from("vrf-cust-a")));
        assert_eq!(cache.resolve("CUST-Z"), None);
    }
}
