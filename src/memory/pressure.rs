//! Memory pressure tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::config::TierThresholds;
use crate::resources::MemoryReading;

/// Memory pressure, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureTier {
    Low,
    Moderate,
    High,
    Critical,
    Emergency,
}

impl PressureTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PressureTier::Low => "low",
            PressureTier::Moderate => "moderate",
            PressureTier::High => "high",
            PressureTier::Critical => "critical",
            PressureTier::Emergency => "emergency",
        }
    }

    /// Numeric level for gauges: 0 (Low) through 4 (Emergency).
    pub fn level(self) -> u8 {
        match self {
            PressureTier::Low => 0,
            PressureTier::Moderate => 1,
            PressureTier::High => 2,
            PressureTier::Critical => 3,
            PressureTier::Emergency => 4,
        }
    }

    /// Low and Moderate need no intervention.
    pub fn is_relieved(self) -> bool {
        self <= PressureTier::Moderate
    }
}

impl fmt::Display for PressureTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TierThresholds {
    /// Each breakpoint is inclusive: usage equal to `high` is High.
    pub fn classify(&self, usage_percent: f64) -> PressureTier {
        if usage_percent >= self.emergency {
            PressureTier::Emergency
        } else if usage_percent >= self.critical {
            PressureTier::Critical
        } else if usage_percent >= self.high {
            PressureTier::High
        } else if usage_percent >= self.moderate {
            PressureTier::Moderate
        } else {
            PressureTier::Low
        }
    }
}

/// A classified memory reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub usage_percent: f64,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub tier: PressureTier,
    pub timestamp: SystemTime,
}

impl MemoryStatus {
    pub fn from_reading(reading: MemoryReading, thresholds: &TierThresholds) -> Self {
        Self {
            usage_percent: reading.usage_percent,
            total_bytes: reading.total_bytes,
            available_bytes: reading.available_bytes,
            used_bytes: reading.used_bytes,
            tier: thresholds.classify(reading.usage_percent),
            timestamp: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        let thresholds = TierThresholds::default();
        assert_eq!(thresholds.classify(10.0), PressureTier::Low);
        assert_eq!(thresholds.classify(74.9), PressureTier::Low);
        assert_eq!(thresholds.classify(75.0), PressureTier::Moderate);
        assert_eq!(thresholds.classify(85.0), PressureTier::High);
        assert_eq!(thresholds.classify(96.0), PressureTier::Critical);
        assert_eq!(thresholds.classify(98.0), PressureTier::Emergency);
        assert_eq!(thresholds.classify(100.0), PressureTier::Emergency);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(PressureTier::Low < PressureTier::Emergency);
        assert!(PressureTier::Moderate.is_relieved());
        assert!(!PressureTier::High.is_relieved());
        assert_eq!(PressureTier::Critical.level(), 3);
    }

    #[test]
    fn test_status_from_reading() {
        let reading = MemoryReading::from_bytes(1000, 100, 900);
        let status = MemoryStatus::from_reading(reading, &TierThresholds::default());
        assert_eq!(status.tier, PressureTier::High);
        assert_eq!(status.used_bytes, 900);
    }
}
