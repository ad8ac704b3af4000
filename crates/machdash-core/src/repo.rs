// ── Cache-first repository ──
//
// The only component that decides cache vs. remote. Reads return the
// cached mirror immediately (stale or not) so a UI can render at once;
// refreshes happen against the backend and land in the cache through
// upserts. Cache failures degrade to remote-only behavior: they are
// logged and reported as "no cache", never propagated to readers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use machdash_api::TelemetryClient;

use crate::cache::{CacheStore, CachedMetric};
use crate::error::CoreError;
use crate::model::{IconKind, Machine, Metric, MetricId, MetricRange};

/// Parameters for a user-authored metric.
#[derive(Debug, Clone)]
pub struct NewMetric {
    pub metric_key: String,
    pub name: String,
    pub unit: String,
    pub icon: IconKind,
    pub good_range: MetricRange,
    pub okay_range: MetricRange,
    pub bad_range: MetricRange,
}

/// Cache-first facade over [`CacheStore`] and the backend client.
pub struct Repository {
    client: Arc<TelemetryClient>,
    store: Arc<CacheStore>,
    ttl: Duration,
}

impl Repository {
    pub fn new(client: Arc<TelemetryClient>, store: Arc<CacheStore>, ttl: Duration) -> Self {
        Self { client, store, ttl }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    // ── Machines ────────────────────────────────────────────────────

    /// Cached machines, instantly. A cache failure yields an empty list
    /// (degrade to remote-only), never an error.
    pub fn cached_machines(&self) -> Vec<Machine> {
        match self.store.machines() {
            Ok(cached) => cached.into_iter().map(|c| c.machine).collect(),
            Err(e) => {
                warn!(error = %e, "machine cache read failed, treating as empty");
                Vec::new()
            }
        }
    }

    /// `true` when the machine cache is empty or any record has aged
    /// past the TTL.
    pub fn machines_stale(&self) -> bool {
        let now = Utc::now();
        match self.store.machines() {
            Ok(cached) if !cached.is_empty() => {
                cached.iter().any(|c| !c.is_fresh(self.ttl, now))
            }
            Ok(_) => true,
            Err(_) => true,
        }
    }

    /// Fetch the machine catalog from the backend and upsert it into
    /// the cache. On failure the cache is left untouched and the error
    /// surfaces to the caller; already-shown cached data stays valid.
    pub async fn refresh_machines(&self) -> Result<Vec<Machine>, CoreError> {
        if self.client.is_preview() {
            return Ok(self.cached_machines());
        }
        let dtos = self.client.machines().await?;
        let now = Utc::now();
        let machines: Vec<Machine> = dtos.into_iter().map(Machine::from).collect();

        for machine in &machines {
            if let Err(e) = self.store.upsert_machine(machine, now) {
                warn!(machine = %machine.id, error = %e, "machine cache write failed");
            }
        }
        debug!(count = machines.len(), "machine refresh complete");
        Ok(machines)
    }

    /// Refresh only when the cache is missing or stale; otherwise the
    /// cached set is authoritative and no request is made.
    pub async fn ensure_machines(&self) -> Result<Vec<Machine>, CoreError> {
        if self.machines_stale() {
            self.refresh_machines().await
        } else {
            Ok(self.cached_machines())
        }
    }

    /// Remove a machine and its metrics from the cache.
    pub fn remove_machine(&self, machine_id: &str) -> Result<(), CoreError> {
        self.store.delete_machine(machine_id)
    }

    // ── Metrics ─────────────────────────────────────────────────────

    /// Cached metrics for a machine in presentation order: backend
    /// metrics first, then local-only, each group sorted by display
    /// name (case-insensitive). Reproducible from cache alone.
    pub fn cached_metrics(&self, machine_id: &str) -> Vec<Metric> {
        let cached = match self.store.metrics_for(machine_id) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(machine = machine_id, error = %e, "metric cache read failed, treating as empty");
                return Vec::new();
            }
        };
        merge_ordered(cached)
    }

    /// Fetch the metric catalog and latest readings for one machine,
    /// upsert backend metrics into the cache, and return the merged
    /// ordered list. User configuration on known metrics (ranges, icon,
    /// active flag) survives the refresh; local-only metrics are never
    /// touched.
    pub async fn refresh_metrics(&self, machine_id: &str) -> Result<Vec<Metric>, CoreError> {
        if self.client.is_preview() {
            return Ok(self.cached_metrics(machine_id));
        }
        let (defs, latest) = tokio::join!(
            self.client.metric_defs(),
            self.client.latest(machine_id),
        );
        let defs = defs?;
        let latest = latest?;

        let existing = self.store.metrics_for(machine_id).unwrap_or_else(|e| {
            warn!(machine = machine_id, error = %e, "metric cache read failed during refresh");
            Vec::new()
        });
        let now = Utc::now();

        for def in defs {
            // A machine reports a metric iff the backend has a latest
            // reading for the pair; other catalog entries are skipped.
            let Some(reading) = latest.iter().find(|r| r.metric_key == def.metric_key) else {
                continue;
            };

            let mut metric =
                Metric::from_backend(machine_id, &def.metric_key, &def.display_name, &def.unit);
            metric.current_value = reading.value;

            // Preserve user configuration across refreshes: the backend
            // owns name/unit/value, the user owns ranges, icon, and the
            // active flag.
            if let Some(prev) = existing
                .iter()
                .find(|c| !c.metric.is_local_only && c.metric.metric_key == def.metric_key)
            {
                metric.icon = prev.metric.icon;
                metric.good_range = prev.metric.good_range;
                metric.okay_range = prev.metric.okay_range;
                metric.bad_range = prev.metric.bad_range;
                metric.is_active = prev.metric.is_active;
            }

            if let Err(e) = self.store.upsert_metric(&metric, now) {
                warn!(machine = machine_id, metric = %def.metric_key, error = %e, "metric cache write failed");
            }
        }

        Ok(self.cached_metrics(machine_id))
    }

    /// Create a user-authored metric. Persisted before returning, so
    /// the writer's own subsequent reads always include it.
    pub fn add_metric(&self, machine_id: &str, params: NewMetric) -> Result<Metric, CoreError> {
        let metric = Metric {
            id: MetricId::random(),
            machine_id: machine_id.to_owned(),
            metric_key: params.metric_key,
            name: params.name,
            unit: params.unit,
            icon: params.icon,
            good_range: params.good_range,
            okay_range: params.okay_range,
            bad_range: params.bad_range,
            is_active: true,
            current_value: 0.0,
            is_local_only: true,
        };
        self.store.upsert_metric(&metric, Utc::now())?;
        Ok(metric)
    }

    /// Persist an edited metric.
    pub fn update_metric(&self, metric: &Metric) -> Result<(), CoreError> {
        self.store.upsert_metric(metric, Utc::now())
    }

    /// Delete the given metrics from one machine's cache. Returns the
    /// number actually removed.
    pub fn delete_metrics(
        &self,
        machine_id: &str,
        ids: &[MetricId],
    ) -> Result<usize, CoreError> {
        let mut removed = 0;
        for &id in ids {
            if self.store.delete_metric(id, machine_id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Persist a metric's active flag.
    pub fn set_metric_active(
        &self,
        id: MetricId,
        machine_id: &str,
        active: bool,
    ) -> Result<(), CoreError> {
        self.store.set_metric_active(id, machine_id, active)
    }

    /// Persist the latest polled value for a metric.
    pub fn record_value(
        &self,
        id: MetricId,
        machine_id: &str,
        value: f64,
    ) -> Result<(), CoreError> {
        self.store.set_metric_value(id, machine_id, value, Utc::now())
    }
}

/// Backend group before local group, each sorted by display name.
fn merge_ordered(cached: Vec<CachedMetric>) -> Vec<Metric> {
    let (mut local, mut backend): (Vec<Metric>, Vec<Metric>) = cached
        .into_iter()
        .map(|c| c.metric)
        .partition(|m| m.is_local_only);

    let by_name = |a: &Metric, b: &Metric| a.name.to_lowercase().cmp(&b.name.to_lowercase());
    backend.sort_by(by_name);
    local.sort_by(by_name);

    backend.extend(local);
    backend
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use machdash_api::TransportConfig;

    fn new_local(key: &str, name: &str) -> NewMetric {
        NewMetric {
            metric_key: key.into(),
            name: name.into(),
            unit: String::new(),
            icon: IconKind::Gauge,
            good_range: MetricRange::new(0.0, 50.0),
            okay_range: MetricRange::new(50.0, 75.0),
            bad_range: MetricRange::new(75.0, 100.0),
        }
    }

    async fn repo_with_server(server: &MockServer) -> Repository {
        let base = Url::parse(&server.uri()).unwrap();
        let client = Arc::new(TelemetryClient::new(base, &TransportConfig::default()).unwrap());
        let store = Arc::new(CacheStore::open_in_memory().unwrap());
        Repository::new(client, store, Duration::from_secs(3600))
    }

    fn mount_catalog(server: &MockServer) -> (serde_json::Value, serde_json::Value) {
        let defs = json!([
            { "metric_key": "temperature", "display_name": "Temperature", "unit": "°C" },
            { "metric_key": "pressure", "display_name": "Pressure", "unit": "bar" },
            { "metric_key": "humidity", "display_name": "Humidity", "unit": "%" }
        ]);
        let latest = json!([
            { "machine_id": "m-001", "metric_key": "temperature", "ts_ms": 1000, "value": 71.0 },
            { "machine_id": "m-001", "metric_key": "pressure", "ts_ms": 1000, "value": 2.5 }
        ]);
        (defs, latest)
    }

    #[tokio::test]
    async fn refresh_machines_populates_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/machines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "machine_id": "m-001", "name": "Press A", "status": "running" }
            ])))
            .mount(&server)
            .await;

        let repo = repo_with_server(&server).await;
        assert!(repo.cached_machines().is_empty());

        let machines = repo.refresh_machines().await.unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(repo.cached_machines().len(), 1);
    }

    #[tokio::test]
    async fn refresh_failure_leaves_cache_intact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/machines"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let repo = repo_with_server(&server).await;
        repo.store()
            .upsert_machine(
                &Machine {
                    id: "m-001".into(),
                    name: "Press A".into(),
                    location: None,
                    status: "running".into(),
                },
                Utc::now(),
            )
            .unwrap();

        let err = repo.refresh_machines().await.unwrap_err();
        assert!(err.is_transient());
        // Cached data still visible after the failed refresh.
        assert_eq!(repo.cached_machines().len(), 1);
    }

    #[tokio::test]
    async fn ensure_machines_skips_request_when_fresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/machines"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let repo = repo_with_server(&server).await;
        repo.store()
            .upsert_machine(
                &Machine {
                    id: "m-001".into(),
                    name: "Press A".into(),
                    location: None,
                    status: "running".into(),
                },
                Utc::now(),
            )
            .unwrap();

        let machines = repo.ensure_machines().await.unwrap();
        assert_eq!(machines.len(), 1);
    }

    #[tokio::test]
    async fn refresh_metrics_joins_catalog_with_latest() {
        let server = MockServer::start().await;
        let (defs, latest) = mount_catalog(&server);
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&defs))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&latest))
            .mount(&server)
            .await;

        let repo = repo_with_server(&server).await;
        let metrics = repo.refresh_metrics("m-001").await.unwrap();

        // Humidity has no latest reading for this machine: skipped.
        assert_eq!(metrics.len(), 2);
        let temp = metrics.iter().find(|m| m.metric_key == "temperature").unwrap();
        assert!((temp.current_value - 71.0).abs() < f64::EPSILON);
        assert_eq!(temp.id, MetricId::derived("m-001", "temperature"));
    }

    #[tokio::test]
    async fn refresh_preserves_user_configuration() {
        let server = MockServer::start().await;
        let (defs, latest) = mount_catalog(&server);
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&defs))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&latest))
            .mount(&server)
            .await;

        let repo = repo_with_server(&server).await;
        repo.refresh_metrics("m-001").await.unwrap();

        // User edits ranges and deactivates the metric.
        let mut temp = repo
            .cached_metrics("m-001")
            .into_iter()
            .find(|m| m.metric_key == "temperature")
            .unwrap();
        temp.good_range = MetricRange::new(65.0, 45.0); // open-ended
        temp.is_active = false;
        repo.update_metric(&temp).unwrap();

        let metrics = repo.refresh_metrics("m-001").await.unwrap();
        let temp = metrics.iter().find(|m| m.metric_key == "temperature").unwrap();
        assert!(temp.good_range.is_inverted());
        assert!(!temp.is_active);
    }

    #[tokio::test]
    async fn merged_order_is_backend_then_local_each_alphabetical() {
        let server = MockServer::start().await;
        let (defs, latest) = mount_catalog(&server);
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&defs))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&latest))
            .mount(&server)
            .await;

        let repo = repo_with_server(&server).await;
        repo.refresh_metrics("m-001").await.unwrap();
        repo.add_metric("m-001", new_local("custom_noise", "Custom Noise"))
            .unwrap();

        let names: Vec<String> = repo
            .cached_metrics("m-001")
            .into_iter()
            .map(|m| m.metric_key)
            .collect();
        assert_eq!(names, vec!["pressure", "temperature", "custom_noise"]);
    }

    #[tokio::test]
    async fn add_metric_is_read_after_write_consistent() {
        let server = MockServer::start().await;
        let repo = repo_with_server(&server).await;

        let added = repo
            .add_metric("m-001", new_local("custom_noise", "Custom Noise"))
            .unwrap();

        let cached = repo.cached_metrics("m-001");
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, added.id);
        assert!(cached[0].is_local_only);
    }

    #[tokio::test]
    async fn delete_metrics_removes_exactly_requested() {
        let server = MockServer::start().await;
        let repo = repo_with_server(&server).await;

        let a = repo
            .add_metric("m-001", new_local("alpha", "Alpha"))
            .unwrap();
        let _b = repo
            .add_metric("m-001", new_local("beta", "Beta"))
            .unwrap();

        let removed = repo.delete_metrics("m-001", &[a.id]).unwrap();
        assert_eq!(removed, 1);

        let remaining = repo.cached_metrics("m-001");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].metric_key, "beta");
    }
}
