// ── Reading value type ──

use serde::{Deserialize, Serialize};

use machdash_api::ReadingPointDto;

/// A single timestamped sample for one metric.
///
/// Ephemeral: readings live only in the in-memory buffer and are never
/// persisted. History is re-fetched from the backend on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Milliseconds since epoch.
    pub ts: i64,
    pub value: f64,
}

impl Reading {
    pub fn new(ts: i64, value: f64) -> Self {
        Self { ts, value }
    }
}

impl From<ReadingPointDto> for Reading {
    fn from(dto: ReadingPointDto) -> Self {
        Self { ts: dto.ts_ms, value: dto.value }
    }
}
