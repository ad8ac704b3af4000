// ── Persistent cache store ──
//
// SQLite mirror of backend machine/metric state plus a small kv table
// for the migration flag and legacy flat records. Every write goes
// through an upsert keyed by machine id or (machine_id, metric_key),
// so duplicate records cannot exist. The connection sits behind a
// mutex: one writer at a time, which is the concurrency model the rest
// of the crate assumes.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::CoreError;
use crate::model::{IconKind, Machine, Metric, MetricId, MetricRange};

/// Default freshness window for backend-sourced records.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS machines (
    machine_id   TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    location     TEXT,
    status       TEXT NOT NULL,
    last_updated INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS metrics (
    id            TEXT NOT NULL,
    machine_id    TEXT NOT NULL,
    metric_key    TEXT NOT NULL,
    name          TEXT NOT NULL,
    unit          TEXT NOT NULL,
    icon          TEXT NOT NULL,
    good_min      REAL NOT NULL,
    good_max      REAL NOT NULL,
    okay_min      REAL NOT NULL,
    okay_max      REAL NOT NULL,
    bad_min       REAL NOT NULL,
    bad_max       REAL NOT NULL,
    is_active     INTEGER NOT NULL,
    current_value REAL NOT NULL,
    is_local_only INTEGER NOT NULL,
    last_updated  INTEGER NOT NULL,
    PRIMARY KEY (machine_id, metric_key)
);
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// A cached machine with its freshness timestamp.
#[derive(Debug, Clone)]
pub struct CachedMachine {
    pub machine: Machine,
    pub last_updated: DateTime<Utc>,
}

impl CachedMachine {
    /// Fresh iff `now - last_updated < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        age_within(self.last_updated, ttl, now)
    }
}

/// A cached metric with its freshness timestamp.
#[derive(Debug, Clone)]
pub struct CachedMetric {
    pub metric: Metric,
    pub last_updated: DateTime<Utc>,
}

impl CachedMetric {
    /// Local-only metrics never expire; backend metrics are fresh iff
    /// `now - last_updated < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.metric.is_local_only || age_within(self.last_updated, ttl, now)
    }
}

fn age_within(last_updated: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(last_updated);
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => age < ttl,
        Err(_) => true, // absurdly large TTL: treat as never expiring
    }
}

/// SQLite-backed store for machine and metric cache records.
pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory cache (tests, ephemeral sessions).
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, CoreError> {
        conn.execute_batch(SCHEMA)?;
        debug!("cache schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Cache("cache mutex poisoned".into()))?;
        f(&conn).map_err(CoreError::from)
    }

    // ── Machines ────────────────────────────────────────────────────

    /// Insert or update a machine record, stamping `last_updated = now`.
    pub fn upsert_machine(&self, machine: &Machine, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO machines (machine_id, name, location, status, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(machine_id) DO UPDATE SET
                     name = excluded.name,
                     location = excluded.location,
                     status = excluded.status,
                     last_updated = excluded.last_updated",
                params![
                    machine.id,
                    machine.name,
                    machine.location,
                    machine.status,
                    now.timestamp()
                ],
            )?;
            Ok(())
        })
    }

    /// All cached machines, ordered by id.
    pub fn machines(&self) -> Result<Vec<CachedMachine>, CoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT machine_id, name, location, status, last_updated
                 FROM machines ORDER BY machine_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(CachedMachine {
                    machine: Machine {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        location: row.get(2)?,
                        status: row.get(3)?,
                    },
                    last_updated: epoch_secs(row.get(4)?),
                })
            })?;
            rows.collect()
        })
    }

    /// Delete a machine and cascade to its cached metrics.
    pub fn delete_machine(&self, machine_id: &str) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM metrics WHERE machine_id = ?1", [machine_id])?;
            conn.execute("DELETE FROM machines WHERE machine_id = ?1", [machine_id])?;
            Ok(())
        })
    }

    // ── Metrics ─────────────────────────────────────────────────────

    /// Insert or update a metric record, keyed by
    /// `(machine_id, metric_key)`, stamping `last_updated = now`.
    pub fn upsert_metric(&self, metric: &Metric, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO metrics (
                     id, machine_id, metric_key, name, unit, icon,
                     good_min, good_max, okay_min, okay_max, bad_min, bad_max,
                     is_active, current_value, is_local_only, last_updated
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT(machine_id, metric_key) DO UPDATE SET
                     id = excluded.id,
                     name = excluded.name,
                     unit = excluded.unit,
                     icon = excluded.icon,
                     good_min = excluded.good_min,
                     good_max = excluded.good_max,
                     okay_min = excluded.okay_min,
                     okay_max = excluded.okay_max,
                     bad_min = excluded.bad_min,
                     bad_max = excluded.bad_max,
                     is_active = excluded.is_active,
                     current_value = excluded.current_value,
                     is_local_only = excluded.is_local_only,
                     last_updated = excluded.last_updated",
                params![
                    metric.id.to_string(),
                    metric.machine_id,
                    metric.metric_key,
                    metric.name,
                    metric.unit,
                    metric.icon.as_str(),
                    metric.good_range.min,
                    metric.good_range.max,
                    metric.okay_range.min,
                    metric.okay_range.max,
                    metric.bad_range.min,
                    metric.bad_range.max,
                    metric.is_active,
                    metric.current_value,
                    metric.is_local_only,
                    now.timestamp()
                ],
            )?;
            Ok(())
        })
    }

    /// Cached metrics for one machine, ordered by key.
    pub fn metrics_for(&self, machine_id: &str) -> Result<Vec<CachedMetric>, CoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, machine_id, metric_key, name, unit, icon,
                        good_min, good_max, okay_min, okay_max, bad_min, bad_max,
                        is_active, current_value, is_local_only, last_updated
                 FROM metrics WHERE machine_id = ?1 ORDER BY metric_key",
            )?;
            let rows = stmt.query_map([machine_id], row_to_metric)?;
            rows.collect()
        })
    }

    /// Update only the live value of a metric (poll-tick write path).
    pub fn set_metric_value(
        &self,
        id: MetricId,
        machine_id: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE metrics SET current_value = ?1, last_updated = ?2
                 WHERE id = ?3 AND machine_id = ?4",
                params![value, now.timestamp(), id.to_string(), machine_id],
            )?;
            Ok(())
        })
    }

    /// Toggle a metric's active flag.
    pub fn set_metric_active(
        &self,
        id: MetricId,
        machine_id: &str,
        active: bool,
    ) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE metrics SET is_active = ?1 WHERE id = ?2 AND machine_id = ?3",
                params![active, id.to_string(), machine_id],
            )?;
            Ok(())
        })
    }

    /// Delete exactly the metric matching stable id and machine scope.
    /// Returns `true` if a record was removed.
    pub fn delete_metric(&self, id: MetricId, machine_id: &str) -> Result<bool, CoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM metrics WHERE id = ?1 AND machine_id = ?2",
                params![id.to_string(), machine_id],
            )?;
            Ok(n > 0)
        })
    }

    // ── Key-value records ───────────────────────────────────────────

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, CoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn kv_delete(&self, key: &str) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            Ok(())
        })
    }
}

fn epoch_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn row_to_metric(row: &rusqlite::Row<'_>) -> Result<CachedMetric, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let icon_str: String = row.get(5)?;
    Ok(CachedMetric {
        metric: Metric {
            id: MetricId::from_str(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            machine_id: row.get(1)?,
            metric_key: row.get(2)?,
            name: row.get(3)?,
            unit: row.get(4)?,
            icon: IconKind::from_str(&icon_str).unwrap_or_default(),
            good_range: MetricRange::new(row.get(6)?, row.get(7)?),
            okay_range: MetricRange::new(row.get(8)?, row.get(9)?),
            bad_range: MetricRange::new(row.get(10)?, row.get(11)?),
            is_active: row.get(12)?,
            current_value: row.get(13)?,
            is_local_only: row.get(14)?,
        },
        last_updated: epoch_secs(row.get(15)?),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Metric;

    fn machine(id: &str) -> Machine {
        Machine {
            id: id.into(),
            name: format!("Machine {id}"),
            location: None,
            status: "running".into(),
        }
    }

    #[test]
    fn upsert_machine_is_idempotent() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();

        store.upsert_machine(&machine("m-001"), now).unwrap();
        store.upsert_machine(&machine("m-001"), now).unwrap();

        assert_eq!(store.machines().unwrap().len(), 1);
    }

    #[test]
    fn upsert_metric_mutates_in_place() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        let mut m = Metric::from_backend("m-001", "temperature", "Temperature", "°C");

        store.upsert_metric(&m, now).unwrap();
        m.current_value = 71.5;
        store.upsert_metric(&m, now).unwrap();

        let cached = store.metrics_for("m-001").unwrap();
        assert_eq!(cached.len(), 1);
        assert!((cached[0].metric.current_value - 71.5).abs() < f64::EPSILON);
        assert_eq!(cached[0].metric.id, m.id);
    }

    #[test]
    fn metric_roundtrips_all_fields() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        let mut m = Metric::from_backend("m-001", "vibration", "Vibration", "mm/s");
        m.icon = IconKind::Vibration;
        m.good_range = MetricRange::new(65.0, 45.0); // inverted sentinel survives
        m.is_active = false;

        store.upsert_metric(&m, now).unwrap();
        let cached = store.metrics_for("m-001").unwrap();
        let got = &cached[0].metric;

        assert_eq!(got.icon, IconKind::Vibration);
        assert!(got.good_range.is_inverted());
        assert!(!got.is_active);
        assert_eq!(got.metric_key, "vibration");
    }

    #[test]
    fn freshness_respects_ttl_boundary() {
        let ttl = Duration::from_secs(3600);
        let now = Utc::now();

        let stale = CachedMachine {
            machine: machine("m-001"),
            last_updated: now - chrono::Duration::seconds(3601),
        };
        let fresh = CachedMachine {
            machine: machine("m-002"),
            last_updated: now - chrono::Duration::seconds(3599),
        };

        assert!(!stale.is_fresh(ttl, now));
        assert!(fresh.is_fresh(ttl, now));
    }

    #[test]
    fn local_only_metrics_never_expire() {
        let now = Utc::now();
        let mut m = Metric::from_backend("m-001", "custom", "Custom", "");
        m.is_local_only = true;

        let cached = CachedMetric {
            metric: m,
            last_updated: now - chrono::Duration::days(365),
        };
        assert!(cached.is_fresh(Duration::from_secs(1), now));
    }

    #[test]
    fn delete_machine_cascades_to_metrics() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();

        store.upsert_machine(&machine("m-001"), now).unwrap();
        store
            .upsert_metric(
                &Metric::from_backend("m-001", "temperature", "Temperature", "°C"),
                now,
            )
            .unwrap();

        store.delete_machine("m-001").unwrap();

        assert!(store.machines().unwrap().is_empty());
        assert!(store.metrics_for("m-001").unwrap().is_empty());
    }

    #[test]
    fn delete_metric_is_scoped_to_machine() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        let a = Metric::from_backend("m-001", "temperature", "Temperature", "°C");
        let b = Metric::from_backend("m-002", "temperature", "Temperature", "°C");

        store.upsert_metric(&a, now).unwrap();
        store.upsert_metric(&b, now).unwrap();

        assert!(store.delete_metric(a.id, "m-001").unwrap());
        // Wrong scope: no-op.
        assert!(!store.delete_metric(b.id, "m-001").unwrap());

        assert!(store.metrics_for("m-001").unwrap().is_empty());
        assert_eq!(store.metrics_for("m-002").unwrap().len(), 1);
    }

    #[test]
    fn kv_roundtrip_and_delete() {
        let store = CacheStore::open_in_memory().unwrap();

        assert!(store.kv_get("migration_completed").unwrap().is_none());
        store.kv_set("migration_completed", "true").unwrap();
        assert_eq!(
            store.kv_get("migration_completed").unwrap().as_deref(),
            Some("true")
        );
        store.kv_delete("migration_completed").unwrap();
        assert!(store.kv_get("migration_completed").unwrap().is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let now = Utc::now();

        {
            let store = CacheStore::open(&path).unwrap();
            store.upsert_machine(&machine("m-001"), now).unwrap();
        }

        let store = CacheStore::open(&path).unwrap();
        assert_eq!(store.machines().unwrap().len(), 1);
    }
}
