// Retention purge - drop route entries not seen within the retention window

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::error::{CollectError, CollectResult};
use crate::store::{RouteQuery, RouteStore};

pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const MAX_RETENTION_DAYS: u32 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Deleted, or in dry-run the number that would be deleted
    pub route_entries: usize,
    pub cutoff: DateTime<Utc>,
    pub committed: bool,
}

/// Delete (or with `commit == false`, count) every entry whose `last_seen`
/// is older than `now - retention_days`
pub fn purge(
    store: &RouteStore,
    retention_days: u32,
    commit: bool,
    now: DateTime<Utc>,
) -> CollectResult<PurgeReport> {
    if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
        return Err(CollectError::Config(format!(
            "retention_days must be between 1 and {}, got {}",
            MAX_RETENTION_DAYS, retention_days
        )));
    }

    let started = Instant::now();
    let cutoff = now - Duration::days(i64::from(retention_days));
    tracing::info!(
        "Purging route entries older than {} day(s) (cutoff: {})",
        retention_days,
        cutoff.to_rfc3339()
    );

    let stale = RouteQuery::stale_before(cutoff);
    let route_entries = if commit {
        let deleted = store.delete(&stale)?;
        tracing::info!("Deleted {} route entry(ies)", deleted);
        deleted
    } else {
        let count = store.count(&stale)?;
        tracing::info!("DRY-RUN: would delete {} route entry(ies), no changes written", count);
        count
    };

    tracing::info!("Purge completed in {:.1}s", started.elapsed().as_secs_f64());
    Ok(PurgeReport {
        route_entries,
        cutoff,
        committed: commit,
    })
}
