// ── Legacy flat-store migration ──
//
// Earlier releases kept locally authored metrics as one JSON blob per
// machine under the kv key `localMetrics_<machineId>`. This one-time
// pass moves them into the metrics table as local-only records, deletes
// each blob, and then sets the completed flag. Because every write is
// an upsert keyed by (machine_id, metric_key), an interrupted run can
// be repeated safely until the flag sticks.

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::error::CoreError;
use crate::model::{IconKind, Metric, MetricId, MetricRange};

/// kv flag set once migration has fully completed.
pub const MIGRATION_FLAG: &str = "migration_completed";

/// kv key prefix of the legacy per-machine blobs.
pub const LEGACY_PREFIX: &str = "localMetrics_";

/// One metric record in the legacy flat format (camelCase JSON).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMetricRecord {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    icon: Option<String>,
    good_min: f64,
    good_max: f64,
    okay_min: f64,
    okay_max: f64,
    bad_min: f64,
    bad_max: f64,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default)]
    value: f64,
}

fn default_true() -> bool {
    true
}

impl LegacyMetricRecord {
    fn into_metric(self, machine_id: &str) -> Metric {
        let metric_key = slugify(&self.name);
        // Records without an id get a derived one so a repeated run
        // resolves to the same identity instead of minting fresh ids.
        let id = self
            .id
            .map_or_else(|| MetricId::derived(machine_id, &metric_key), MetricId::from);
        Metric {
            id,
            machine_id: machine_id.to_owned(),
            metric_key,
            name: self.name,
            unit: self.unit,
            icon: self
                .icon
                .as_deref()
                .and_then(|s| s.parse::<IconKind>().ok())
                .unwrap_or_default(),
            good_range: MetricRange::new(self.good_min, self.good_max),
            okay_range: MetricRange::new(self.okay_min, self.okay_max),
            bad_range: MetricRange::new(self.bad_min, self.bad_max),
            is_active: self.is_active,
            current_value: self.value,
            is_local_only: true,
        }
    }
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Outcome of a migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Metrics moved into the metrics table.
    pub migrated: usize,
    /// Legacy blobs that failed to decode and were left in place.
    pub corrupt: usize,
    /// `true` when the completed flag was already set and nothing ran.
    pub skipped: bool,
}

/// Run the one-time migration if it has not completed yet.
///
/// Idempotent: guarded by the persisted [`MIGRATION_FLAG`], and every
/// record write is an upsert, so repeated invocations (including after
/// a mid-run crash) converge on the same final state. The flag is only
/// written after every legacy blob has been migrated and deleted; a
/// corrupt blob keeps the flag unset so a later release can retry.
pub fn migrate_if_needed(store: &CacheStore) -> Result<MigrationReport, CoreError> {
    if store.kv_get(MIGRATION_FLAG)?.as_deref() == Some("true") {
        debug!("legacy migration already completed");
        return Ok(MigrationReport {
            skipped: true,
            ..MigrationReport::default()
        });
    }

    let now = Utc::now();
    let mut report = MigrationReport::default();

    for cached in store.machines()? {
        let machine_id = cached.machine.id;
        let key = format!("{LEGACY_PREFIX}{machine_id}");
        let Some(blob) = store.kv_get(&key)? else {
            continue;
        };

        let records: Vec<LegacyMetricRecord> = match serde_json::from_str(&blob) {
            Ok(records) => records,
            Err(e) => {
                warn!(machine = %machine_id, error = %e, "legacy record corrupt, leaving in place");
                report.corrupt += 1;
                continue;
            }
        };

        for record in records {
            let metric = record.into_metric(&machine_id);
            store.upsert_metric(&metric, now)?;
            report.migrated += 1;
        }

        // Blob removed only after its metrics are durably upserted.
        store.kv_delete(&key)?;
        debug!(machine = %machine_id, "legacy record migrated");
    }

    if report.corrupt == 0 {
        store.kv_set(MIGRATION_FLAG, "true")?;
        info!(migrated = report.migrated, "legacy migration completed");
    }

    Ok(report)
}
