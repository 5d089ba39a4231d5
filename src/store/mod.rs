// Route store - SQLite-backed reconciliation of observed routes
//
// One row per identity key (device, vrf, network, next_hop, protocol).
// Timestamps are stored as microseconds since the Unix epoch.

pub mod query;

use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, OptionalExtension, Row, Savepoint, Transaction, TransactionBehavior, params,
    params_from_iter,
};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{RetryConfig, StoreError, retry_with_backoff};
use crate::inventory::{DeviceId, InterfaceRef, VrfId};
use crate::routes::normalize::canonicalize;
use crate::routes::{Protocol, RouteCandidate, RouteRecord};
pub use query::{RouteQuery, longest_match};

pub const ROUTE_SCHEMA_VERSION: i64 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "
    id, device_id, vrf_id, network, prefix_length, protocol, next_hop,
    outgoing_interface_id, outgoing_interface_name, metric, admin_distance,
    is_active, routing_table, first_seen, last_seen
";

pub struct RouteStore {
    conn: Mutex<Connection>,
    retry: RetryConfig,
}

impl RouteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn: Mutex::new(conn),
            retry: RetryConfig::default(),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let mut current = self.schema_version()?;
        if current > ROUTE_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: ROUTE_SCHEMA_VERSION,
            });
        }

        let conn = self.lock()?;
        if current < 1 {
            let sql = include_str!("../../migrations/0001_route_entries.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../../migrations/0002_unique_route_no_vrf.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 2", []).map(|_| ())?;
        }

        Ok(())
    }

    /// Insert or refresh one route in its own transaction.
    ///
    /// Returns the stored record and whether it was newly created.
    pub fn upsert(
        &self,
        candidate: &RouteCandidate,
        now: DateTime<Utc>,
    ) -> Result<(RouteRecord, bool), StoreError> {
        self.device_batch(|batch| batch.upsert(candidate, now))
    }

    /// Run `work` inside one IMMEDIATE transaction. Commits when `work`
    /// returns `Ok`, rolls everything back otherwise.
    pub fn device_batch<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut DeviceBatch<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut batch = DeviceBatch {
            tx,
            retry: &self.retry,
        };
        let result = work(&mut batch)?;
        batch.tx.commit()?;
        Ok(result)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<RouteRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM route_entries WHERE id = ?1", SELECT_COLUMNS);
        let row = conn
            .query_row(&sql, params![id.to_string()], RawRoute::from_row)
            .optional()?;
        row.map(RawRoute::into_record).transpose()
    }

    pub fn query(&self, query: &RouteQuery) -> Result<Vec<RouteRecord>, StoreError> {
        let (clause, values) = query.where_clause();
        let mut sql = format!(
            "SELECT {} FROM route_entries WHERE {} ORDER BY last_seen DESC, network, next_hop",
            SELECT_COLUMNS, clause
        );
        // Containment is filtered after the fetch, so the limit must be too
        let limit = query.limit.filter(|_| !query.needs_post_filter());
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(values.iter()), RawRoute::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(raw.len());
        for row in raw {
            let record = row.into_record()?;
            if query.post_filter(&record) {
                records.push(record);
            }
        }
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    pub fn count(&self, query: &RouteQuery) -> Result<usize, StoreError> {
        if query.needs_post_filter() || query.limit.is_some() {
            return Ok(self.query(query)?.len());
        }
        let (clause, values) = query.where_clause();
        let sql = format!("SELECT COUNT(*) FROM route_entries WHERE {}", clause);
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Delete every matching entry; returns how many rows went
    pub fn delete(&self, query: &RouteQuery) -> Result<usize, StoreError> {
        if query.needs_post_filter() || query.limit.is_some() {
            let ids: Vec<String> = self
                .query(query)?
                .into_iter()
                .map(|r| r.id.to_string())
                .collect();
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for id in &ids {
                deleted += tx.execute("DELETE FROM route_entries WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            return Ok(deleted);
        }

        let (clause, values) = query.where_clause();
        let sql = format!("DELETE FROM route_entries WHERE {}", clause);
        let conn = self.lock()?;
        Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
    }

    /// Active routes on `device_id` that would carry traffic for `dest`
    pub fn lookup(&self, device_id: &DeviceId, dest: IpAddr) -> Result<Vec<RouteRecord>, StoreError> {
        let records = self.query(&RouteQuery {
            is_active: Some(true),
            ..RouteQuery::for_device(device_id.clone())
        })?;
        Ok(longest_match(&records, dest).into_iter().cloned().collect())
    }
}

/// Open write transaction scoped to one device's routes
pub struct DeviceBatch<'conn> {
    tx: Transaction<'conn>,
    retry: &'conn RetryConfig,
}

impl DeviceBatch<'_> {
    /// Insert or refresh one route under a savepoint. A failed route rolls
    /// back alone; the batch stays usable.
    pub fn upsert(
        &mut self,
        candidate: &RouteCandidate,
        now: DateTime<Utc>,
    ) -> Result<(RouteRecord, bool), StoreError> {
        let prepared = PreparedRoute::validate(candidate)?;
        let now = truncate_micros(now);
        let tx = &mut self.tx;

        retry_with_backoff(
            || {
                let sp = tx.savepoint()?;
                let result = upsert_row(&sp, &prepared, now)?;
                sp.commit()?;
                Ok(result)
            },
            self.retry,
            "route upsert",
        )
    }
}

/// Candidate that passed validation, with its canonical network
struct PreparedRoute<'a> {
    candidate: &'a RouteCandidate,
    network: String,
    prefix_length: u8,
}

impl<'a> PreparedRoute<'a> {
    fn validate(candidate: &'a RouteCandidate) -> Result<Self, StoreError> {
        let (network, prefix_length) = canonicalize(&candidate.network)
            .map_err(|_| StoreError::InvalidPrefix(candidate.network.clone()))?;

        if let Some(iface) = &candidate.outgoing_interface {
            if iface.device_id != candidate.device_id {
                return Err(StoreError::InvalidReference {
                    interface: format!("{} ({})", iface.name, iface.device_id),
                    device: candidate.device_id.to_string(),
                });
            }
        }

        Ok(PreparedRoute {
            candidate,
            network,
            prefix_length,
        })
    }

    fn record(&self, id: Uuid, first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) -> RouteRecord {
        let c = self.candidate;
        RouteRecord {
            id,
            device_id: c.device_id.clone(),
            vrf: c.vrf.clone(),
            network: self.network.clone(),
            prefix_length: self.prefix_length,
            protocol: c.protocol,
            next_hop: c.next_hop.clone(),
            outgoing_interface: c.outgoing_interface.clone(),
            metric: c.metric,
            admin_distance: c.admin_distance,
            is_active: c.is_active,
            routing_table: c.routing_table.clone(),
            first_seen,
            last_seen,
        }
    }
}

fn upsert_row(
    sp: &Savepoint<'_>,
    route: &PreparedRoute<'_>,
    now: DateTime<Utc>,
) -> Result<(RouteRecord, bool), StoreError> {
    let c = route.candidate;
    let vrf = c.vrf.as_ref().map(VrfId::as_str);
    let iface_id = c.outgoing_interface.as_ref().map(|i| i.id.as_str());
    let iface_name = c.outgoing_interface.as_ref().map(|i| i.name.as_str());

    let existing: Option<(String, i64, i64)> = sp
        .query_row(
            "
            SELECT id, first_seen, last_seen FROM route_entries
            WHERE device_id = ?1 AND vrf_id IS ?2 AND network = ?3
              AND next_hop = ?4 AND protocol = ?5
            ",
            params![c.device_id.as_str(), vrf, route.network, c.next_hop, c.protocol.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    if let Some((id, first_seen, last_seen)) = existing {
        let last_seen = last_seen.max(now.timestamp_micros());
        sp.execute(
            "
            UPDATE route_entries SET
                prefix_length = ?2,
                outgoing_interface_id = ?3,
                outgoing_interface_name = ?4,
                metric = ?5,
                admin_distance = ?6,
                is_active = ?7,
                routing_table = ?8,
                last_seen = ?9
            WHERE id = ?1
            ",
            params![
                id,
                route.prefix_length,
                iface_id,
                iface_name,
                c.metric,
                c.admin_distance,
                c.is_active,
                c.routing_table,
                last_seen,
            ],
        )?;
        let id = parse_uuid(&id)?;
        let record = route.record(id, from_micros(first_seen)?, from_micros(last_seen)?);
        return Ok((record, false));
    }

    let id = Uuid::new_v4();
    let stamp = now.timestamp_micros();
    let inserted = sp.execute(
        "
        INSERT INTO route_entries (
            id, device_id, vrf_id, network, prefix_length, protocol, next_hop,
            outgoing_interface_id, outgoing_interface_name, metric, admin_distance,
            is_active, routing_table, first_seen, last_seen
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
        ",
        params![
            id.to_string(),
            c.device_id.as_str(),
            vrf,
            route.network,
            route.prefix_length,
            c.protocol.as_str(),
            c.next_hop,
            iface_id,
            iface_name,
            c.metric,
            c.admin_distance,
            c.is_active,
            c.routing_table,
            stamp,
        ],
    );

    match inserted {
        Ok(_) => Ok((route.record(id, now, now), true)),
        // Another writer created the same identity first; retrying takes the update path
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(StoreError::Conflict(route.record(id, now, now).identity().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Row as read from SQLite, before value conversion
struct RawRoute {
    id: String,
    device_id: String,
    vrf_id: Option<String>,
    network: String,
    prefix_length: u8,
    protocol: String,
    next_hop: String,
    interface_id: Option<String>,
    interface_name: Option<String>,
    metric: u32,
    admin_distance: u32,
    is_active: bool,
    routing_table: String,
    first_seen: i64,
    last_seen: i64,
}

impl RawRoute {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(RawRoute {
            id: row.get(0)?,
            device_id: row.get(1)?,
            vrf_id: row.get(2)?,
            network: row.get(3)?,
            prefix_length: row.get(4)?,
            protocol: row.get(5)?,
            next_hop: row.get(6)?,
            interface_id: row.get(7)?,
            interface_name: row.get(8)?,
            metric: row.get(9)?,
            admin_distance: row.get(10)?,
            is_active: row.get(11)?,
            routing_table: row.get(12)?,
            first_seen: row.get(13)?,
            last_seen: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<RouteRecord, StoreError> {
        let device_id = DeviceId(self.device_id);
        let outgoing_interface = match (self.interface_id, self.interface_name) {
            (Some(id), Some(name)) => Some(InterfaceRef {
                id,
                device_id: device_id.clone(),
                name,
            }),
            _ => None,
        };
        Ok(RouteRecord {
            id: parse_uuid(&self.id)?,
            device_id,
            vrf: self.vrf_id.map(VrfId),
            network: self.network,
            prefix_length: self.prefix_length,
            protocol: Protocol::from_label(&self.protocol),
            next_hop: self.next_hop,
            outgoing_interface,
            metric: self.metric,
            admin_distance: self.admin_distance,
            is_active: self.is_active,
            routing_table: self.routing_table,
            first_seen: from_micros(self.first_seen)?,
            last_seen: from_micros(self.last_seen)?,
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::Corrupt(format!("route id {:?}", value)))
}

fn from_micros(value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {}", value)))
}

/// Drop sub-microsecond precision so returned records equal stored ones
fn truncate_micros(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(value.timestamp_micros()).unwrap_or(value)
}
