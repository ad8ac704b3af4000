// ── Health zones and zone distributions ──

use std::fmt;

use serde::{Deserialize, Serialize};

use machdash_api::DistributionDto;

/// Health classification of a single metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Good,
    Okay,
    Bad,
}

impl Zone {
    /// Display label. Explicit exhaustive mapping — no reflection or
    /// string derivation.
    pub fn label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Okay => "Okay",
            Self::Bad => "Bad",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Counts of good/okay/bad samples across a reading window.
///
/// Produced either locally from a `ReadingBuffer` or by the backend's
/// distribution endpoint. The two sources are never merged: when a
/// remote aggregate exists for a metric it replaces local computation
/// wholesale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDistribution {
    pub good: u64,
    pub okay: u64,
    pub bad: u64,
}

impl ZoneDistribution {
    pub fn total(&self) -> u64 {
        self.good + self.okay + self.bad
    }

    /// Count for one zone.
    pub fn count(&self, zone: Zone) -> u64 {
        match zone {
            Zone::Good => self.good,
            Zone::Okay => self.okay,
            Zone::Bad => self.bad,
        }
    }

    /// Rounded whole-number percentage for one zone. An empty
    /// distribution reports 0% for every zone rather than dividing by
    /// zero.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percentage(&self, zone: Zone) -> u8 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        (100.0 * self.count(zone) as f64 / total as f64).round() as u8
    }

    /// Record one more sample in `zone`.
    pub fn record(&mut self, zone: Zone) {
        match zone {
            Zone::Good => self.good += 1,
            Zone::Okay => self.okay += 1,
            Zone::Bad => self.bad += 1,
        }
    }
}

impl From<DistributionDto> for ZoneDistribution {
    fn from(dto: DistributionDto) -> Self {
        Self {
            good: dto.good,
            okay: dto.okay,
            bad: dto.bad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_distribution_has_zero_percentages() {
        let dist = ZoneDistribution::default();
        assert_eq!(dist.percentage(Zone::Good), 0);
        assert_eq!(dist.percentage(Zone::Okay), 0);
        assert_eq!(dist.percentage(Zone::Bad), 0);
    }

    #[test]
    fn percentages_round_to_nearest() {
        let dist = ZoneDistribution { good: 2, okay: 1, bad: 0 };
        assert_eq!(dist.percentage(Zone::Good), 67);
        assert_eq!(dist.percentage(Zone::Okay), 33);
        assert_eq!(dist.percentage(Zone::Bad), 0);
    }

    #[test]
    fn from_dto_drops_window_metadata() {
        let dto = DistributionDto { good: 4, okay: 2, bad: 1, window_seconds: Some(600) };
        let dist = ZoneDistribution::from(dto);
        assert_eq!(dist.total(), 7);
        assert_eq!(dist.count(Zone::Bad), 1);
    }
}
