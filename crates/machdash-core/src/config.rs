// ── Runtime configuration ──
//
// Describes how the data layer should run: backend endpoint, cache
// location, and polling cadence. Built by the embedding application
// (or machdash-config) and handed in — core never reads config files.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Tuning for the whole data layer.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Backend base URL. `None` enables preview mode: no network, all
    /// streams simulated.
    pub server_url: Option<Url>,
    /// Cache database path. `None` selects an in-memory cache (useful
    /// for tests and ephemeral sessions).
    pub cache_path: Option<PathBuf>,
    /// How long a cached record stays fresh.
    pub cache_ttl: Duration,
    /// Fast poll cadence for latest readings and simulated ticks.
    pub poll_interval: Duration,
    /// Request timeout for catalog/poll/history requests.
    pub request_timeout: Duration,
    /// Request timeout for the distribution long-poll.
    pub long_poll_timeout: Duration,
    /// Fixed delay between long-poll attempts, success or failure.
    pub long_poll_delay: Duration,
    /// Maximum points fetched by the one-shot history backfill.
    pub history_backfill_limit: u32,
    /// Retained sample count per metric stream.
    pub buffer_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            cache_path: None,
            cache_ttl: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            long_poll_timeout: Duration::from_secs(45),
            long_poll_delay: Duration::from_secs(1),
            history_backfill_limit: 500,
            buffer_capacity: crate::buffer::DEFAULT_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// `true` when no backend is configured and streams must simulate.
    pub fn is_preview(&self) -> bool {
        self.server_url.is_none()
    }
}
