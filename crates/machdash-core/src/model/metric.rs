// ── Metric domain type ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::metric_id::MetricId;

/// Icon category for a metric, mapped exhaustively to display names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconKind {
    Gauge,
    Thermometer,
    Vibration,
}

impl IconKind {
    /// Stable storage/wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Thermometer => "thermometer",
            Self::Vibration => "vibration",
        }
    }

    /// Human-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Gauge => "Gauge",
            Self::Thermometer => "Thermometer",
            Self::Vibration => "Vibration",
        }
    }
}

impl Default for IconKind {
    fn default() -> Self {
        Self::Gauge
    }
}

impl fmt::Display for IconKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IconKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(Self::Gauge),
            "thermometer" => Ok(Self::Thermometer),
            "vibration" => Ok(Self::Vibration),
            other => Err(format!("unknown icon kind: {other}")),
        }
    }
}

/// A numeric range bound for one zone.
///
/// The inverted sentinel (`min > max`) marks an open-ended range: for
/// the bad range it means "value <= max" (unbounded below), for the
/// good range "value >= min" (unbounded above). Call sites use
/// [`is_inverted`](Self::is_inverted) instead of comparing raw fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub min: f64,
    pub max: f64,
}

impl MetricRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `true` when the min/max sentinel is inverted, i.e. the range is
    /// open-ended (interpretation depends on which zone it bounds).
    pub fn is_inverted(&self) -> bool {
        self.min > self.max
    }

    /// Closed-interval membership. Meaningless for inverted ranges;
    /// the classifier handles those explicitly.
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// A machine metric: identity, display attributes, zone ranges, and the
/// last known value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: MetricId,
    /// Owning machine (backend-assigned string id).
    pub machine_id: String,
    /// Backend key (e.g. `"temperature"`). For local metrics this is a
    /// locally chosen unique key.
    pub metric_key: String,
    pub name: String,
    pub unit: String,
    pub icon: IconKind,
    pub good_range: MetricRange,
    pub okay_range: MetricRange,
    pub bad_range: MetricRange,
    /// Inactive metrics have no running poll stream.
    pub is_active: bool,
    /// Last known value, updated on every poll tick.
    pub current_value: f64,
    /// User-authored metrics never expire and are never overwritten by
    /// a backend refresh.
    pub is_local_only: bool,
}

impl Metric {
    /// Build a backend-sourced metric from catalog data, with the
    /// stable derived id and default ranges pending configuration.
    pub fn from_backend(
        machine_id: impl Into<String>,
        metric_key: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        let machine_id = machine_id.into();
        let metric_key = metric_key.into();
        Self {
            id: MetricId::derived(&machine_id, &metric_key),
            machine_id,
            metric_key,
            name: name.into(),
            unit: unit.into(),
            icon: IconKind::Gauge,
            good_range: MetricRange::new(0.0, 50.0),
            okay_range: MetricRange::new(50.0, 75.0),
            bad_range: MetricRange::new(75.0, 100.0),
            is_active: true,
            current_value: 0.0,
            is_local_only: false,
        }
    }
}
