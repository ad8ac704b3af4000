// Wire types for the telemetry backend.
//
// Field names match the backend's JSON exactly; no renames needed.
// Conversion into domain types happens in machdash-core.

use serde::{Deserialize, Serialize};

/// One machine from `GET /machines`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDto {
    pub machine_id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    pub status: String,
}

/// One metric definition from `GET /metrics`.
///
/// The catalog is machine-independent: the same `metric_key` describes
/// the metric on every machine that reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefDto {
    pub metric_key: String,
    pub display_name: String,
    pub unit: String,
}

/// One latest-reading row from `GET /latest?machine_id=`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestReadingDto {
    pub machine_id: String,
    pub metric_key: String,
    /// Milliseconds since epoch.
    pub ts_ms: i64,
    pub value: f64,
}

/// One history point from `GET /history`. Returned in ascending
/// timestamp order by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReadingPointDto {
    /// Milliseconds since epoch.
    pub ts_ms: i64,
    pub value: f64,
}

/// Server-computed zone distribution from the optional long-poll
/// endpoint `GET /metrics/{id}/distribution`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DistributionDto {
    pub good: u64,
    pub okay: u64,
    pub bad: u64,
    #[serde(default)]
    pub window_seconds: Option<u64>,
}
