// ── Polling engine ──
//
// One owned task per metric stream. The task is the only mutator of its
// ReadingBuffer; consumers observe it through watch-channel snapshots.
// `stop()` cancels the token and joins the task, so once it returns no
// further buffer mutation can occur — a caller may tear down a view and
// immediately start a different stream without racing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use machdash_api::TelemetryClient;

use crate::buffer::ReadingBuffer;
use crate::model::{Reading, ZoneDistribution};

/// Stream lifecycle state: `Idle` before start and after stop,
/// `Polling` while the feed task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Polling,
}

/// Waveform parameters for the simulated feed.
#[derive(Debug, Clone)]
pub struct SimProfile {
    pub base: f64,
    pub amplitude: f64,
    pub period: Duration,
    /// Bounded uniform jitter added to every sample.
    pub jitter: f64,
    /// Per-metric phase offset so parallel streams don't move in step.
    pub phase: f64,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            base: 60.0,
            amplitude: 20.0,
            period: Duration::from_secs(60),
            jitter: 2.0,
            phase: 0.0,
        }
    }
}

/// Where a stream's readings come from, chosen at start time.
pub enum Feed {
    /// Synthetic waveform, used when no backend is configured.
    Simulated(SimProfile),
    /// Fetch-then-poll against the backend: one bounded history
    /// backfill to seed the buffer, then a tight latest-reading loop.
    Live {
        client: Arc<TelemetryClient>,
        machine_id: String,
        metric_key: String,
        backfill_limit: u32,
    },
}

/// Cadence and capacity tuning for one stream.
#[derive(Debug, Clone)]
pub struct StreamTuning {
    pub poll_interval: Duration,
    pub buffer_capacity: usize,
}

impl Default for StreamTuning {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            buffer_capacity: crate::buffer::DEFAULT_CAPACITY,
        }
    }
}

/// Subscription handle to a stream's reading snapshots.
///
/// Mirrors the watch-channel pattern used throughout the crate:
/// `current()` for point-in-time access, `changed()` to await the next
/// published snapshot.
#[derive(Clone)]
pub struct ReadingStream {
    receiver: watch::Receiver<Arc<ReadingBuffer>>,
}

impl ReadingStream {
    pub fn current(&self) -> Arc<ReadingBuffer> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot. `None` once the stream task is gone.
    pub async fn changed(&mut self) -> Option<Arc<ReadingBuffer>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

/// A running (or stopped) poll stream for one metric.
pub struct MetricStream {
    snapshot_rx: watch::Receiver<Arc<ReadingBuffer>>,
    last_error: watch::Receiver<Option<String>>,
    state: watch::Sender<StreamState>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MetricStream {
    /// Spawn the feed task and transition to `Polling`.
    pub fn start(feed: Feed, tuning: StreamTuning) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(ReadingBuffer::new(
            tuning.buffer_capacity,
        )));
        let (error_tx, last_error) = watch::channel(None);
        let (state, _) = watch::channel(StreamState::Polling);
        let cancel = CancellationToken::new();

        let task = StreamTask {
            buffer: ReadingBuffer::new(tuning.buffer_capacity),
            snapshot_tx,
            error_tx,
            cancel: cancel.clone(),
            poll_interval: tuning.poll_interval,
        };
        let handle = tokio::spawn(task.run(feed));

        Self {
            snapshot_rx,
            last_error,
            state,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the stream. Idempotent and safe from any state; when this
    /// returns the feed task has fully exited and the buffer will never
    /// mutate again.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        // send_replace: the value must land even with no subscribers,
        // since state() reads it back through the sender.
        self.state.send_replace(StreamState::Idle);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Subscribe to reading snapshots.
    pub fn readings(&self) -> ReadingStream {
        ReadingStream {
            receiver: self.snapshot_rx.clone(),
        }
    }

    /// Most recent snapshot without subscribing.
    pub fn snapshot(&self) -> Arc<ReadingBuffer> {
        self.snapshot_rx.borrow().clone()
    }

    /// Last poll error, if the most recent tick failed.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }
}

// ── Feed task ────────────────────────────────────────────────────────

struct StreamTask {
    buffer: ReadingBuffer,
    snapshot_tx: watch::Sender<Arc<ReadingBuffer>>,
    error_tx: watch::Sender<Option<String>>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl StreamTask {
    async fn run(mut self, feed: Feed) {
        match feed {
            Feed::Simulated(profile) => self.run_simulated(profile).await,
            Feed::Live {
                client,
                machine_id,
                metric_key,
                backfill_limit,
            } => {
                self.run_live(&client, &machine_id, &metric_key, backfill_limit)
                    .await;
            }
        }
        debug!("stream task exited");
    }

    fn publish(&self) {
        self.snapshot_tx
            .send_modify(|snap| *snap = Arc::new(self.buffer.clone()));
    }

    async fn run_simulated(&mut self, profile: SimProfile) {
        let mut interval = tokio::time::interval(self.poll_interval);
        let start_ms = Utc::now().timestamp_millis();
        let interval_ms = i64::try_from(self.poll_interval.as_millis()).unwrap_or(1000);
        let mut tick: i64 = 0;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    // Synthetic timestamps advance by exactly one
                    // interval per tick, keeping the buffer's monotonic
                    // rule satisfied regardless of wall-clock jitter.
                    let ts = start_ms + tick * interval_ms;
                    let value = simulated_value(&profile, tick, interval_ms);
                    tick += 1;
                    self.buffer.push(Reading::new(ts, value));
                    self.publish();
                }
            }
        }
    }

    async fn run_live(
        &mut self,
        client: &TelemetryClient,
        machine_id: &str,
        metric_key: &str,
        backfill_limit: u32,
    ) {
        // One-shot backfill seeds the chart window before polling.
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            result = client.history(machine_id, metric_key, None, None, backfill_limit) => {
                match result {
                    Ok(points) => {
                        let stored = self
                            .buffer
                            .extend_history(points.into_iter().map(Reading::from));
                        debug!(machine = machine_id, metric = metric_key, stored, "backfill complete");
                        self.publish();
                        self.error_tx.send_replace(None);
                    }
                    Err(e) => {
                        // Transient: the poll loop below will still fill
                        // the buffer, just without history.
                        warn!(machine = machine_id, metric = metric_key, error = %e, "backfill failed");
                        self.error_tx.send_replace(Some(e.to_string()));
                    }
                }
            }
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    match client.latest(machine_id).await {
                        Ok(readings) => {
                            if let Some(r) = readings.iter().find(|r| r.metric_key == metric_key) {
                                // Same-timestamp repeats are dropped by
                                // the buffer's monotonic rule.
                                self.buffer.push(Reading::new(r.ts_ms, r.value));
                                self.publish();
                            }
                            self.error_tx.send_replace(None);
                        }
                        Err(e) => {
                            // Swallow and retry on the next tick; the
                            // fast loop is its own backoff.
                            warn!(machine = machine_id, metric = metric_key, error = %e, "poll tick failed");
                            self.error_tx.send_replace(Some(e.to_string()));
                        }
                    }
                }
            }
        }
    }
}

/// Deterministic waveform plus bounded uniform jitter.
#[allow(clippy::cast_precision_loss)]
fn simulated_value(profile: &SimProfile, tick: i64, interval_ms: i64) -> f64 {
    let elapsed_secs = (tick * interval_ms) as f64 / 1000.0;
    let period_secs = profile.period.as_secs_f64().max(1.0);
    let angle = std::f64::consts::TAU * elapsed_secs / period_secs + profile.phase;
    let jitter = if profile.jitter > 0.0 {
        rand::thread_rng().gen_range(-profile.jitter..=profile.jitter)
    } else {
        0.0
    };
    profile.base + profile.amplitude * angle.sin() + jitter
}

// ── Distribution long-poll ───────────────────────────────────────────

/// Optional long-poll stream for a server-computed zone distribution.
///
/// One attempt per cycle with a long request timeout, then a short
/// fixed delay regardless of outcome so a failing endpoint never spins.
/// A 404 permanently disables the stream for this metric — the backend
/// does not implement the endpoint and the coordinator falls back to
/// local classification.
pub struct DistributionStream {
    receiver: watch::Receiver<Option<ZoneDistribution>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DistributionStream {
    pub fn start(client: Arc<TelemetryClient>, metric_id: String, delay: Duration) -> Self {
        let (tx, receiver) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => break,
                    result = client.distribution(&metric_id) => {
                        match result {
                            Ok(dto) => {
                                tx.send_replace(Some(ZoneDistribution::from(dto)));
                            }
                            Err(e) if e.is_not_found() => {
                                debug!(metric = %metric_id, "distribution endpoint absent, disabling");
                                break;
                            }
                            Err(machdash_api::Error::PreviewSkip) => break,
                            Err(e) => {
                                warn!(metric = %metric_id, error = %e, "distribution long-poll failed");
                            }
                        }
                    }
                }
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        });

        Self {
            receiver,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Latest remote aggregate, if the backend has produced one.
    pub fn latest(&self) -> Option<ZoneDistribution> {
        *self.receiver.borrow()
    }

    /// Subscribe to aggregate updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<ZoneDistribution>> {
        self.receiver.clone()
    }

    /// Stop the long-poll. Idempotent; joins the task.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
