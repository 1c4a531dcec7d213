//! Immutable resource readings.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub const MB: u64 = 1024 * 1024;

/// One reading of host CPU, memory, GPU and load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_mb: u64,
    pub gpu_percent: Option<f64>,
    pub gpu_memory_free_mb: Option<u64>,
    pub load_average: f64,
    pub process_count: usize,
    pub timestamp: SystemTime,
}

impl ResourceSnapshot {
    /// A quiet host: useful as a baseline when building readings by hand.
    pub fn idle() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_available_mb: 16 * 1024,
            gpu_percent: None,
            gpu_memory_free_mb: None,
            load_average: 0.0,
            process_count: 0,
            timestamp: SystemTime::now(),
        }
    }
}

/// Memory-only reading, cheaper to take than a full snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
}

impl MemoryReading {
    pub fn from_bytes(total_bytes: u64, available_bytes: u64, used_bytes: u64) -> Self {
        let usage_percent = if total_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / total_bytes as f64 * 100.0
        };
        Self {
            total_bytes,
            available_bytes,
            used_bytes,
            usage_percent,
        }
    }

    /// Reconstruct byte counts from the percentage and available MB of a snapshot.
    pub fn from_snapshot(snapshot: &ResourceSnapshot) -> Self {
        let available_bytes = snapshot.memory_available_mb.saturating_mul(MB);
        let free_ratio = 1.0 - snapshot.memory_percent / 100.0;
        let total_bytes = if free_ratio > 0.0 {
            (available_bytes as f64 / free_ratio) as u64
        } else {
            available_bytes
        };
        Self {
            total_bytes,
            available_bytes,
            used_bytes: total_bytes.saturating_sub(available_bytes),
            usage_percent: snapshot.memory_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_from_snapshot() {
        let snapshot = ResourceSnapshot {
            memory_percent: 75.0,
            memory_available_mb: 1024,
            ..ResourceSnapshot::idle()
        };
        let reading = MemoryReading::from_snapshot(&snapshot);
        assert_eq!(reading.available_bytes, 1024 * MB);
        assert_eq!(reading.total_bytes, 4096 * MB);
        assert_eq!(reading.used_bytes, 3072 * MB);
        assert_eq!(reading.usage_percent, 75.0);
    }

    #[test]
    fn test_reading_from_bytes() {
        let reading = MemoryReading::from_bytes(1000, 250, 750);
        assert_eq!(reading.usage_percent, 75.0);
        assert_eq!(MemoryReading::from_bytes(0, 0, 0).usage_percent, 0.0);
    }
}
