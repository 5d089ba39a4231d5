// Collection scheduler - bounded fan-out of one fetch+parse task per device

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::CollectError;
use crate::inventory::{Device, DeviceId};
use crate::parsers::ParserRegistry;
use crate::routes::NormalizedRoute;
use crate::routes::normalize::normalize;
use crate::transport::Transport;

pub const TIME_LIMIT_EXCEEDED: &str = "job time limit exceeded";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub workers: usize,
    /// Per-device fetch timeout
    pub timeout: Duration,
    /// Overrunning this only logs a warning
    pub soft_time_limit: Duration,
    /// Outstanding tasks are aborted past this
    pub time_limit: Duration,
}

/// Normalized routes of one device plus the prefixes that failed to normalize
#[derive(Debug, Clone)]
pub struct DeviceRoutes {
    pub device: Device,
    pub routes: Vec<NormalizedRoute>,
    pub invalid: Vec<String>,
}

#[derive(Debug)]
pub enum DeviceOutcome {
    Collected(DeviceRoutes),
    Skipped { device: Device, reason: String },
    Failed { device: Device, error: CollectError },
}

impl DeviceOutcome {
    pub fn device(&self) -> &Device {
        match self {
            DeviceOutcome::Collected(routes) => &routes.device,
            DeviceOutcome::Skipped { device, .. } | DeviceOutcome::Failed { device, .. } => device,
        }
    }
}

pub struct Scheduler {
    registry: Arc<ParserRegistry>,
    transport: Arc<dyn Transport>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ParserRegistry>,
        transport: Arc<dyn Transport>,
        settings: SchedulerSettings,
    ) -> Self {
        Scheduler {
            registry,
            transport,
            settings,
        }
    }

    /// Fetch and parse every device. Returns exactly one outcome per device,
    /// ordered by device name.
    pub async fn run(&self, devices: Vec<Device>) -> Vec<DeviceOutcome> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();

        for device in devices.iter().cloned() {
            let semaphore = semaphore.clone();
            let registry = self.registry.clone();
            let transport = self.transport.clone();
            let timeout = self.settings.timeout;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return DeviceOutcome::Failed {
                            device,
                            error: CollectError::DeviceUnreachable("worker pool closed".to_string()),
                        };
                    }
                };
                collect_device(device, &registry, transport.as_ref(), timeout).await
            });
        }

        let soft = tokio::time::sleep(self.settings.soft_time_limit);
        let hard = tokio::time::sleep(self.settings.time_limit);
        tokio::pin!(soft);
        tokio::pin!(hard);
        let mut soft_warned = false;
        let mut limit_hit = false;
        let mut outcomes: Vec<DeviceOutcome> = Vec::with_capacity(devices.len());

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => outcomes.push(outcome),
                    Some(Err(e)) => tracing::error!("Device task did not complete: {}", e),
                    None => break,
                },
                _ = &mut soft, if !soft_warned => {
                    soft_warned = true;
                    tracing::warn!(
                        "Collection passed its soft time limit ({}s) with {} device(s) outstanding",
                        self.settings.soft_time_limit.as_secs(),
                        tasks.len()
                    );
                }
                _ = &mut hard => {
                    limit_hit = true;
                    tracing::error!(
                        "Collection hit its time limit ({}s), aborting {} device(s)",
                        self.settings.time_limit.as_secs(),
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        // Devices whose task was aborted or panicked have no outcome yet
        let finished: HashSet<DeviceId> = outcomes.iter().map(|o| o.device().id.clone()).collect();
        let cause = if limit_hit {
            TIME_LIMIT_EXCEEDED
        } else {
            "collection task aborted"
        };
        for device in devices {
            if !finished.contains(&device.id) {
                outcomes.push(DeviceOutcome::Failed {
                    device,
                    error: CollectError::DeviceUnreachable(cause.to_string()),
                });
            }
        }

        outcomes.sort_by(|a, b| a.device().name.cmp(&b.device().name));
        tracing::info!(
            "Fetch phase finished in {:.1}s for {} device(s)",
            started.elapsed().as_secs_f64(),
            outcomes.len()
        );
        outcomes
    }
}

async fn collect_device(
    device: Device,
    registry: &ParserRegistry,
    transport: &dyn Transport,
    timeout: Duration,
) -> DeviceOutcome {
    if device.primary_address.is_none() {
        return DeviceOutcome::Skipped {
            reason: format!("{} has no primary address", device.name),
            device,
        };
    }

    let parser = match registry.get(device.platform.as_deref().unwrap_or_default()) {
        Ok(parser) => parser,
        Err(error) => return DeviceOutcome::Failed { device, error },
    };

    tracing::debug!("{}: fetching {:?}", device.name, parser.commands());
    let fetched = tokio::time::timeout(timeout, transport.fetch(&device, parser.commands(), timeout)).await;
    let outputs = match fetched {
        Ok(Ok(outputs)) => outputs,
        Ok(Err(e)) => return DeviceOutcome::Failed { device, error: e.into() },
        Err(_) => {
            return DeviceOutcome::Failed {
                device,
                error: CollectError::FetchTimeout(timeout.as_secs()),
            };
        }
    };

    let table = match parser.parse(&outputs) {
        Ok(table) => table,
        Err(error) => return DeviceOutcome::Failed { device, error },
    };

    let mut routes = Vec::new();
    let mut invalid = Vec::new();
    for observation in table.values().flatten() {
        match normalize(observation) {
            Ok(route) => routes.push(route),
            Err(e) => {
                tracing::debug!("{}: {}", device.name, e);
                invalid.push(observation.prefix.clone());
            }
        }
    }

    tracing::debug!(
        "{}: parsed {} prefix(es), {} route(s)",
        device.name,
        table.len(),
        routes.len() + invalid.len()
    );
    DeviceOutcome::Collected(DeviceRoutes {
        device,
        routes,
        invalid,
    })
}
