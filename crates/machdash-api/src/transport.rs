// Shared transport configuration for building reqwest::Client instances.
//
// The client keeps two HTTP clients: one with a short timeout for the
// fast poll loop and catalog fetches, and one with a long timeout for
// the distribution long-poll. Both are built from this config.

use std::time::Duration;

use crate::error::Error;

/// Transport tuning for the telemetry backend.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for catalog fetches, history backfill, and poll ticks.
    pub timeout: Duration,
    /// Timeout for the distribution long-poll (held-open requests).
    pub long_poll_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            long_poll_timeout: Duration::from_secs(45),
        }
    }
}

impl TransportConfig {
    /// Build the short-timeout `reqwest::Client`.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        build(self.timeout)
    }

    /// Build the long-poll `reqwest::Client`.
    pub fn build_long_poll_client(&self) -> Result<reqwest::Client, Error> {
        build(self.long_poll_timeout)
    }
}

fn build(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("machdash/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::InvalidEndpoint(format!("failed to build HTTP client: {e}")))
}
