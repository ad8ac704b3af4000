// ── Metric identity ──
//
// MetricId is the foundation of stable metric identity. Backend metrics
// derive their id deterministically from (machine_id, metric_key), so a
// full cache wipe and reload resolves the same backend metric to the
// same id. Locally authored metrics get a random id at creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for derived metric ids. Fixed forever: changing it would
/// break identity for every cached backend metric.
const METRIC_NAMESPACE: Uuid = Uuid::from_u128(0x8f2c_41d6_9b3a_4e07_a5c1_d820_6f94_37b2);

/// Canonical identifier for a metric.
///
/// Either freshly generated ([`random`](Self::random), local metrics) or
/// deterministically derived from durable backend keys
/// ([`derived`](Self::derived), backend metrics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(Uuid);

impl MetricId {
    /// A fresh random id for a locally authored metric.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The stable id for a backend metric.
    ///
    /// UUID v5 (name-based, 128-bit) over `"{machine_id}:{metric_key}"`
    /// in a fixed namespace: pure, deterministic across processes and
    /// cache rebuilds, and collision-resistant for any realistic key
    /// space.
    pub fn derived(machine_id: &str, metric_key: &str) -> Self {
        let name = format!("{machine_id}:{metric_key}");
        Self(Uuid::new_v5(&METRIC_NAMESPACE, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MetricId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for MetricId {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}
