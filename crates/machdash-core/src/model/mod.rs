// ── Domain model ──
//
// Canonical in-memory representations of machines, metrics, readings,
// and zone classifications. All value types here are cheap to clone and
// carry no shared mutable state; whichever component produced a value
// owns it.

pub mod machine;
pub mod metric;
pub mod metric_id;
pub mod reading;
pub mod zone;

// ── Re-exports ──────────────────────────────────────────────────────
// Flat access: `use machdash_core::model::*` gives you everything.

pub use machine::Machine;
pub use metric::{IconKind, Metric, MetricRange};
pub use metric_id::MetricId;
pub use reading::Reading;
pub use zone::{Zone, ZoneDistribution};
