// ── Zone classification ──
//
// Pure mapping from a value plus per-metric range configuration to a
// health zone. Evaluation order is authoritative: Bad, then Good, then
// Okay, then the permissive Okay default. Ranges may overlap by
// configuration, and the order decides precedence when they do.

use crate::model::{Metric, MetricRange, Zone};

/// Classify `value` against the three zone ranges.
///
/// Open-ended forms use the inverted min/max sentinel:
/// - bad range with `min > max` means "bad iff value <= max"
///   (unbounded below);
/// - good range with `max < min` means "good iff value >= min"
///   (unbounded above).
///
/// The okay range is always closed; an inverted okay range is treated
/// as absent. Values covered by no range fall back to `Okay`.
pub fn classify(value: f64, good: MetricRange, okay: MetricRange, bad: MetricRange) -> Zone {
    // Bad wins every overlap.
    if bad.is_inverted() {
        if value <= bad.max {
            return Zone::Bad;
        }
    } else if bad.contains(value) {
        return Zone::Bad;
    }

    if good.is_inverted() {
        if value >= good.min {
            return Zone::Good;
        }
    } else if good.contains(value) {
        return Zone::Good;
    }

    if !okay.is_inverted() && okay.contains(value) {
        return Zone::Okay;
    }

    // Uncovered values land in the middle zone, not the bad one.
    Zone::Okay
}

/// Classify against a metric's configured ranges.
pub fn classify_metric(metric: &Metric, value: f64) -> Zone {
    classify(value, metric.good_range, metric.okay_range, metric.bad_range)
}
