// ── Dashboard coordinator ──
//
// The main entry point for consumers. Composes the repository, the
// per-metric poll streams, and distribution aggregation behind a
// cheaply cloneable facade. One machine is selected at a time; its
// active metrics each get an owned stream task, and switching machines
// fully stops the old streams before the new ones start, so a write
// from a previous selection can never land after a switch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use machdash_api::{TelemetryClient, TransportConfig};

use crate::aggregate;
use crate::cache::CacheStore;
use crate::config::RuntimeConfig;
use crate::error::CoreError;
use crate::migrate;
use crate::model::{Machine, Metric, MetricId, ZoneDistribution};
use crate::poll::{
    DistributionStream, Feed, MetricStream, ReadingStream, SimProfile, StreamTuning,
};
use crate::repo::{NewMetric, Repository};

/// Streams owned by the current selection for one metric.
struct StreamSet {
    stream: MetricStream,
    dist: Option<DistributionStream>,
}

impl StreamSet {
    async fn stop(&self) {
        self.stream.stop().await;
        if let Some(ref dist) = self.dist {
            dist.stop().await;
        }
    }
}

/// The currently selected machine and its running streams.
struct Selection {
    machine_id: String,
    streams: Arc<Mutex<HashMap<MetricId, StreamSet>>>,
    cancel: CancellationToken,
    sync_handle: Option<JoinHandle<()>>,
}

/// Orchestrates the repository, polling streams, and distribution
/// sources for a dashboard UI.
///
/// Cheaply cloneable via `Arc`. Consumers observe state through watch
/// channels (last value wins, no buffering of intermediate states) and
/// issue mutations through async methods.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<DashboardInner>,
}

struct DashboardInner {
    config: RuntimeConfig,
    client: Arc<TelemetryClient>,
    repo: Repository,
    machines: watch::Sender<Vec<Machine>>,
    metrics: watch::Sender<Vec<Metric>>,
    last_error: watch::Sender<Option<String>>,
    selection: Mutex<Option<Selection>>,
}

impl Dashboard {
    /// Build the full data layer from configuration: HTTP client (or
    /// preview mode), cache store, one-time legacy migration, and the
    /// repository. No streams run until a machine is selected.
    pub fn new(config: RuntimeConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            timeout: config.request_timeout,
            long_poll_timeout: config.long_poll_timeout,
        };
        let client = match config.server_url.clone() {
            Some(url) => Arc::new(TelemetryClient::new(url, &transport)?),
            None => {
                info!("no backend configured, running in preview mode");
                Arc::new(TelemetryClient::preview())
            }
        };

        let store = match config.cache_path.as_deref() {
            Some(path) => Arc::new(CacheStore::open(path)?),
            None => Arc::new(CacheStore::open_in_memory()?),
        };

        let report = migrate::migrate_if_needed(&store)?;
        if report.migrated > 0 {
            info!(migrated = report.migrated, "migrated legacy local metrics");
        }

        let repo = Repository::new(Arc::clone(&client), Arc::clone(&store), config.cache_ttl);

        let (machines, _) = watch::channel(Vec::new());
        let (metrics, _) = watch::channel(Vec::new());
        let (last_error, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(DashboardInner {
                config,
                client,
                repo,
                machines,
                metrics,
                last_error,
                selection: Mutex::new(None),
            }),
        })
    }

    /// Direct repository access (tests, embedding applications).
    pub fn repository(&self) -> &Repository {
        &self.inner.repo
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Subscribe to the machine list.
    pub fn machines(&self) -> watch::Receiver<Vec<Machine>> {
        self.inner.machines.subscribe()
    }

    /// Subscribe to the selected machine's metric list.
    pub fn metrics(&self) -> watch::Receiver<Vec<Metric>> {
        self.inner.metrics.subscribe()
    }

    /// Subscribe to the most recent remote error, if any. Cleared on
    /// the next successful operation.
    pub fn last_error(&self) -> watch::Receiver<Option<String>> {
        self.inner.last_error.subscribe()
    }

    /// Reading snapshots for one metric of the current selection.
    pub async fn readings(&self, metric_id: MetricId) -> Option<ReadingStream> {
        let selection = self.inner.selection.lock().await;
        let streams = selection.as_ref()?.streams.lock().await;
        streams.get(&metric_id).map(|s| s.stream.readings())
    }

    /// Zone distribution for one metric: the remote aggregate when the
    /// long-poll has produced one, otherwise computed locally from the
    /// reading window with the metric's last known value as fallback.
    pub async fn distribution(&self, metric_id: MetricId) -> Result<ZoneDistribution, CoreError> {
        let metric = self
            .inner
            .metrics
            .borrow()
            .iter()
            .find(|m| m.id == metric_id)
            .cloned()
            .ok_or_else(|| CoreError::MetricNotFound {
                metric_id: metric_id.to_string(),
            })?;

        let selection = self.inner.selection.lock().await;
        let Some(selection) = selection.as_ref() else {
            // No running stream: single-sample distribution from the
            // cached value.
            return Ok(local_distribution(&metric, &[]));
        };
        let streams = selection.streams.lock().await;
        let Some(set) = streams.get(&metric_id) else {
            return Ok(local_distribution(&metric, &[]));
        };

        // Remote aggregate replaces local computation entirely.
        if let Some(remote) = set.dist.as_ref().and_then(DistributionStream::latest) {
            return Ok(remote);
        }
        Ok(local_distribution(&metric, &set.stream.snapshot().values()))
    }

    // ── Machine lifecycle ───────────────────────────────────────────

    /// Publish cached machines instantly, then refresh from the backend
    /// if the cache is stale. A failed refresh keeps the cached list
    /// visible and records the error signal.
    pub async fn load_machines(&self) -> Vec<Machine> {
        let cached = self.inner.repo.cached_machines();
        self.inner.machines.send_replace(cached.clone());

        match self.inner.repo.ensure_machines().await {
            Ok(machines) => {
                self.inner.machines.send_replace(machines.clone());
                self.inner.last_error.send_replace(None);
                machines
            }
            Err(e) => {
                warn!(error = %e, "machine refresh failed, serving cache");
                self.inner.last_error.send_replace(Some(e.to_string()));
                cached
            }
        }
    }

    /// Select a machine: stop every stream of the previous selection,
    /// publish its cached metrics instantly, refresh from the backend,
    /// and start streams for the active metrics.
    pub async fn select_machine(&self, machine_id: &str) -> Result<(), CoreError> {
        self.stop_selection().await;

        let cached = self.inner.repo.cached_metrics(machine_id);
        self.inner.metrics.send_replace(cached);

        let metrics = match self.inner.repo.refresh_metrics(machine_id).await {
            Ok(metrics) => {
                self.inner.last_error.send_replace(None);
                metrics
            }
            Err(e) if e.is_transient() => {
                warn!(machine = machine_id, error = %e, "metric refresh failed, serving cache");
                self.inner.last_error.send_replace(Some(e.to_string()));
                self.inner.repo.cached_metrics(machine_id)
            }
            Err(e) => return Err(e),
        };
        self.inner.metrics.send_replace(metrics.clone());

        let streams = Arc::new(Mutex::new(HashMap::new()));
        {
            let mut map = streams.lock().await;
            for metric in metrics.iter().filter(|m| m.is_active) {
                map.insert(metric.id, self.start_streams(metric));
            }
        }

        let cancel = CancellationToken::new();
        let sync_handle = tokio::spawn(value_sync_task(
            self.clone(),
            machine_id.to_owned(),
            Arc::clone(&streams),
            cancel.clone(),
        ));

        *self.inner.selection.lock().await = Some(Selection {
            machine_id: machine_id.to_owned(),
            streams,
            cancel,
            sync_handle: Some(sync_handle),
        });

        debug!(machine = machine_id, "machine selected");
        Ok(())
    }

    /// Stop all streams and clear the selection. Idempotent.
    pub async fn stop_selection(&self) {
        let Some(mut selection) = self.inner.selection.lock().await.take() else {
            return;
        };

        selection.cancel.cancel();
        if let Some(handle) = selection.sync_handle.take() {
            let _ = handle.await;
        }

        let streams = selection.streams.lock().await;
        for set in streams.values() {
            set.stop().await;
        }
        debug!(machine = %selection.machine_id, "selection stopped");
    }

    // ── Metric mutations ────────────────────────────────────────────

    /// Create a user-authored metric on `machine_id`. If that machine
    /// is selected, a simulated-or-live stream starts immediately.
    pub async fn add_metric(
        &self,
        machine_id: &str,
        params: NewMetric,
    ) -> Result<Metric, CoreError> {
        let metric = self.inner.repo.add_metric(machine_id, params)?;

        let selection = self.inner.selection.lock().await;
        if let Some(selection) = selection.as_ref() {
            if selection.machine_id == machine_id {
                selection
                    .streams
                    .lock()
                    .await
                    .insert(metric.id, self.start_streams(&metric));
            }
        }
        drop(selection);

        self.republish_metrics(machine_id);
        Ok(metric)
    }

    /// Delete metrics from `machine_id`, stopping their streams first.
    pub async fn delete_metrics(
        &self,
        machine_id: &str,
        ids: &[MetricId],
    ) -> Result<usize, CoreError> {
        let selection = self.inner.selection.lock().await;
        if let Some(selection) = selection.as_ref() {
            if selection.machine_id == machine_id {
                let mut streams = selection.streams.lock().await;
                for id in ids {
                    if let Some(set) = streams.remove(id) {
                        set.stop().await;
                    }
                }
            }
        }
        drop(selection);

        let removed = self.inner.repo.delete_metrics(machine_id, ids)?;
        self.republish_metrics(machine_id);
        Ok(removed)
    }

    /// Toggle a metric's active flag. Deactivation stops its stream;
    /// reactivation restarts it with a fresh backfill.
    pub async fn set_metric_active(
        &self,
        machine_id: &str,
        metric_id: MetricId,
        active: bool,
    ) -> Result<(), CoreError> {
        self.inner
            .repo
            .set_metric_active(metric_id, machine_id, active)?;

        let selection = self.inner.selection.lock().await;
        if let Some(selection) = selection.as_ref() {
            if selection.machine_id == machine_id {
                let mut streams = selection.streams.lock().await;
                if active {
                    let metric = self
                        .inner
                        .repo
                        .cached_metrics(machine_id)
                        .into_iter()
                        .find(|m| m.id == metric_id)
                        .ok_or_else(|| CoreError::MetricNotFound {
                            metric_id: metric_id.to_string(),
                        })?;
                    streams
                        .entry(metric_id)
                        .or_insert_with(|| self.start_streams(&metric));
                } else if let Some(set) = streams.remove(&metric_id) {
                    set.stop().await;
                }
            }
        }
        drop(selection);

        self.republish_metrics(machine_id);
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    fn tuning(&self) -> StreamTuning {
        StreamTuning {
            poll_interval: self.inner.config.poll_interval,
            buffer_capacity: self.inner.config.buffer_capacity,
        }
    }

    fn start_streams(&self, metric: &Metric) -> StreamSet {
        // Local-only metrics have no backend feed to poll: they always
        // simulate, even when a backend is configured.
        let feed = if self.inner.client.is_preview() || metric.is_local_only {
            Feed::Simulated(sim_profile_for(metric))
        } else {
            Feed::Live {
                client: Arc::clone(&self.inner.client),
                machine_id: metric.machine_id.clone(),
                metric_key: metric.metric_key.clone(),
                backfill_limit: self.inner.config.history_backfill_limit,
            }
        };

        // The long-poll only exists against a real backend, and only
        // for backend metrics — the server knows nothing about local
        // ones.
        let dist = if self.inner.client.is_preview() || metric.is_local_only {
            None
        } else {
            Some(DistributionStream::start(
                Arc::clone(&self.inner.client),
                metric.id.to_string(),
                self.inner.config.long_poll_delay,
            ))
        };

        StreamSet {
            stream: MetricStream::start(feed, self.tuning()),
            dist,
        }
    }

    fn republish_metrics(&self, machine_id: &str) {
        let metrics = self.inner.repo.cached_metrics(machine_id);
        self.inner.metrics.send_replace(metrics);
    }
}

/// Remote-less distribution: classify the window, or the last known
/// value when the window is empty.
fn local_distribution(metric: &Metric, values: &[f64]) -> ZoneDistribution {
    aggregate::distribution(
        values,
        metric.current_value,
        metric.good_range,
        metric.okay_range,
        metric.bad_range,
    )
}

/// Per-metric waveform so parallel simulated streams don't move in
/// lockstep: phase folded from the key bytes, base centered on the
/// okay range when it is closed.
fn sim_profile_for(metric: &Metric) -> SimProfile {
    let phase = f64::from(
        metric
            .metric_key
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)))
            % 628,
    ) / 100.0;

    let okay = metric.okay_range;
    let (base, amplitude) = if okay.is_inverted() {
        (60.0, 20.0)
    } else {
        ((okay.min + okay.max) / 2.0, (okay.max - okay.min).abs())
    };

    SimProfile {
        base,
        amplitude,
        jitter: amplitude / 10.0,
        phase,
        ..SimProfile::default()
    }
}

/// Persists each stream's latest value once per poll interval and
/// republishes the metric list, so cached `current_value` tracks the
/// live feed. Runs until the selection is torn down.
async fn value_sync_task(
    dash: Dashboard,
    machine_id: String,
    streams: Arc<Mutex<HashMap<MetricId, StreamSet>>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(dash.inner.config.poll_interval);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let mut any_update = false;
                {
                    let streams = streams.lock().await;
                    for (id, set) in streams.iter() {
                        let snap = set.stream.snapshot();
                        if snap.is_empty() {
                            continue;
                        }
                        let value = snap.latest(0.0);
                        if let Err(e) = dash.inner.repo.record_value(*id, &machine_id, value) {
                            warn!(metric = %id, error = %e, "value persist failed");
                        } else {
                            any_update = true;
                        }
                    }
                }
                if any_update {
                    dash.republish_metrics(&machine_id);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::model::{IconKind, MetricRange};

    fn preview_config() -> RuntimeConfig {
        RuntimeConfig {
            poll_interval: Duration::from_millis(10),
            ..RuntimeConfig::default()
        }
    }

    fn live_config(server: &MockServer) -> RuntimeConfig {
        RuntimeConfig {
            server_url: Some(Url::parse(&server.uri()).unwrap()),
            poll_interval: Duration::from_millis(10),
            ..RuntimeConfig::default()
        }
    }

    fn noise_metric() -> NewMetric {
        NewMetric {
            metric_key: "custom_noise".into(),
            name: "Custom Noise".into(),
            unit: "dB".into(),
            icon: IconKind::Vibration,
            good_range: MetricRange::new(40.0, 80.0),
            okay_range: MetricRange::new(20.0, 40.0),
            bad_range: MetricRange::new(80.0, 200.0),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preview_selection_streams_simulated_readings() {
        let dash = Dashboard::new(preview_config()).unwrap();
        dash.select_machine("m-001").await.unwrap();

        let metric = dash.add_metric("m-001", noise_metric()).await.unwrap();

        let mut readings = dash.readings(metric.id).await.unwrap();
        for _ in 0..3 {
            readings.changed().await.unwrap();
        }
        let snap = readings.current();
        assert!(snap.len() >= 3);

        dash.stop_selection().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publications_land_before_any_subscriber_exists() {
        let dash = Dashboard::new(preview_config()).unwrap();
        dash.select_machine("m-001").await.unwrap();

        // No receiver exists yet: the metric list must still be stored
        // so a late subscriber sees the current state immediately.
        let metric = dash.add_metric("m-001", noise_metric()).await.unwrap();

        let metrics_rx = dash.metrics();
        assert!(metrics_rx.borrow().iter().any(|m| m.id == metric.id));

        dash.stop_selection().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn local_metric_simulates_even_with_live_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let dash = Dashboard::new(live_config(&server)).unwrap();
        dash.select_machine("m-001").await.unwrap();
        let metric = dash.add_metric("m-001", noise_metric()).await.unwrap();

        // The backend never reports this key, so the stream must feed
        // itself; readings still accumulate.
        let mut readings = dash.readings(metric.id).await.unwrap();
        for _ in 0..3 {
            readings.changed().await.unwrap();
        }
        assert!(readings.current().len() >= 3);

        dash.stop_selection().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn distribution_falls_back_to_local_computation() {
        let dash = Dashboard::new(preview_config()).unwrap();
        dash.select_machine("m-001").await.unwrap();
        let metric = dash.add_metric("m-001", noise_metric()).await.unwrap();

        let mut readings = dash.readings(metric.id).await.unwrap();
        readings.changed().await.unwrap();

        let dist = dash.distribution(metric.id).await.unwrap();
        assert!(dist.total() > 0);

        dash.stop_selection().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deactivating_metric_stops_its_stream() {
        let dash = Dashboard::new(preview_config()).unwrap();
        dash.select_machine("m-001").await.unwrap();
        let metric = dash.add_metric("m-001", noise_metric()).await.unwrap();

        dash.set_metric_active("m-001", metric.id, false)
            .await
            .unwrap();

        assert!(dash.readings(metric.id).await.is_none());
        let cached = dash.repository().cached_metrics("m-001");
        assert!(!cached[0].is_active);

        // Reactivation restarts with a fresh stream.
        dash.set_metric_active("m-001", metric.id, true)
            .await
            .unwrap();
        assert!(dash.readings(metric.id).await.is_some());

        dash.stop_selection().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn switching_machines_stops_previous_streams() {
        let dash = Dashboard::new(preview_config()).unwrap();
        dash.select_machine("m-001").await.unwrap();
        let metric = dash.add_metric("m-001", noise_metric()).await.unwrap();

        let mut readings = dash.readings(metric.id).await.unwrap();
        readings.changed().await.unwrap();

        dash.select_machine("m-002").await.unwrap();

        // The old machine's stream is gone from the new selection.
        assert!(dash.readings(metric.id).await.is_none());

        dash.stop_selection().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_metrics_stops_streams_and_removes_records() {
        let dash = Dashboard::new(preview_config()).unwrap();
        dash.select_machine("m-001").await.unwrap();
        let metric = dash.add_metric("m-001", noise_metric()).await.unwrap();

        let removed = dash.delete_metrics("m-001", &[metric.id]).await.unwrap();

        assert_eq!(removed, 1);
        assert!(dash.readings(metric.id).await.is_none());
        assert!(dash.repository().cached_metrics("m-001").is_empty());

        dash.stop_selection().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn value_sync_updates_cached_current_value() {
        let dash = Dashboard::new(preview_config()).unwrap();
        dash.select_machine("m-001").await.unwrap();
        let metric = dash.add_metric("m-001", noise_metric()).await.unwrap();

        let mut metrics_rx = dash.metrics();
        // Wait for a republish carrying a synced value.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            tokio::select! {
                _ = metrics_rx.changed() => {
                    let synced = metrics_rx
                        .borrow()
                        .iter()
                        .any(|m| m.id == metric.id && m.current_value.abs() > f64::EPSILON);
                    if synced {
                        break;
                    }
                }
                () = tokio::time::sleep_until(deadline) => panic!("value never synced"),
            }
        }

        dash.stop_selection().await;
    }
}
