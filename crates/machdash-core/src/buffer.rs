// ── Bounded reading buffer ──
//
// Time-ordered, deduplicating sample storage for one metric stream.
// Owned exclusively by that stream's task; never shared mutably.

use std::collections::VecDeque;

use crate::model::Reading;

/// Default retained sample count — enough for a rolling chart window at
/// one sample per second.
pub const DEFAULT_CAPACITY: usize = 600;

/// Append-only sequence of readings, bounded to a maximum count.
///
/// Appends must carry a timestamp strictly greater than the last stored
/// one; anything else is dropped. This single rule gives both ordering
/// and dedup: poll ticks that return the same reading twice are no-ops,
/// and out-of-order backfill points cannot corrupt the window. Beyond
/// capacity, the oldest entries are evicted FIFO.
#[derive(Debug, Clone)]
pub struct ReadingBuffer {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl ReadingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            readings: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append one reading. Returns `true` if it was stored, `false` if
    /// rejected for a non-increasing timestamp.
    pub fn push(&mut self, reading: Reading) -> bool {
        if let Some(last) = self.readings.back() {
            if reading.ts <= last.ts {
                return false;
            }
        }
        self.readings.push_back(reading);
        while self.readings.len() > self.capacity {
            self.readings.pop_front();
        }
        true
    }

    /// Append a batch of history points (ascending order expected; the
    /// monotonic rule silently drops anything else). Returns the number
    /// stored.
    pub fn extend_history(&mut self, points: impl IntoIterator<Item = Reading>) -> usize {
        points.into_iter().filter(|&p| self.push(p)).count()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-to-newest iteration.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// All values, oldest to newest.
    pub fn values(&self) -> Vec<f64> {
        self.readings.iter().map(|r| r.value).collect()
    }

    /// Most recent value, or `default` when empty.
    pub fn latest(&self, default: f64) -> f64 {
        self.readings.back().map_or(default, |r| r.value)
    }

    /// Smallest value in the window, or `default` when empty.
    pub fn min(&self, default: f64) -> f64 {
        self.readings
            .iter()
            .map(|r| r.value)
            .reduce(f64::min)
            .unwrap_or(default)
    }

    /// Largest value in the window, or `default` when empty.
    pub fn max(&self, default: f64) -> f64 {
        self.readings
            .iter()
            .map(|r| r.value)
            .reduce(f64::max)
            .unwrap_or(default)
    }

    /// Arithmetic mean, or `default` when empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self, default: f64) -> f64 {
        if self.readings.is_empty() {
            return default;
        }
        let sum: f64 = self.readings.iter().map(|r| r.value).sum();
        sum / self.readings.len() as f64
    }
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
