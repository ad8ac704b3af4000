// ── Distribution aggregation ──
//
// Turns a window of raw values into zone counts. A remote aggregate,
// when the backend supplies one, replaces the local computation
// entirely — precedence is handled by the coordinator, not here.

use crate::classify::classify;
use crate::model::{MetricRange, ZoneDistribution};

/// Compute the zone distribution of `values`.
///
/// An empty window classifies the single `fallback` value (the metric's
/// last known value) instead, so a distribution is always produced and
/// percentage math never divides by zero.
pub fn distribution(
    values: &[f64],
    fallback: f64,
    good: MetricRange,
    okay: MetricRange,
    bad: MetricRange,
) -> ZoneDistribution {
    let mut dist = ZoneDistribution::default();

    if values.is_empty() {
        dist.record(classify(fallback, good, okay, bad));
        return dist;
    }

    for &value in values {
        dist.record(classify(value, good, okay, bad));
    }
    dist
}
