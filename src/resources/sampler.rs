//! Resource samplers.
//!
//! # Responsibilities
//! - Read CPU, memory, load and process count from the host
//! - Optionally merge a GPU reading from an attached probe
//!
//! # Design Decisions
//! - `sysinfo` computes CPU usage as a delta between refreshes, so one
//!   long-lived `System` is kept; the very first CPU reading after
//!   construction may be 0
//! - CPU is refreshed at most once per `MINIMUM_CPU_UPDATE_INTERVAL`;
//!   closer refreshes reuse the last reading
//! - Only the full `sample` enumerates processes. `sample_quick` is for the
//!   admission hot path and reports the last known process count
//! - Sampling never fails: missing GPU data is `None`, not an error

use std::sync::{Mutex, PoisonError};
use std::time::{Instant, SystemTime};
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::resources::snapshot::{MemoryReading, ResourceSnapshot, MB};

/// Source of host resource readings.
pub trait ResourceSampler: Send + Sync {
    /// Take a fresh full reading.
    fn sample(&self) -> ResourceSnapshot;

    /// Take a cheap CPU and memory reading for per-request decisions.
    ///
    /// Fields other than CPU and memory may be stale.
    fn sample_quick(&self) -> ResourceSnapshot {
        self.sample()
    }

    /// Take a fresh memory-only reading.
    fn sample_memory(&self) -> MemoryReading {
        MemoryReading::from_snapshot(&self.sample())
    }
}

/// A single GPU reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuReading {
    pub usage_percent: f64,
    pub free_memory_mb: u64,
}

/// Vendor-specific GPU metrics source.
pub trait GpuProbe: Send + Sync {
    fn read(&self) -> Option<GpuReading>;
}

struct HostState {
    system: System,
    cpu_refreshed_at: Instant,
    process_count: usize,
}

impl HostState {
    fn refresh_cpu(&mut self) {
        if self.cpu_refreshed_at.elapsed() >= MINIMUM_CPU_UPDATE_INTERVAL {
            self.system.refresh_cpu();
            self.cpu_refreshed_at = Instant::now();
        }
    }

    fn memory(&self) -> MemoryReading {
        MemoryReading::from_bytes(
            self.system.total_memory(),
            self.system.available_memory(),
            self.system.used_memory(),
        )
    }
}

/// Sampler backed by `sysinfo`.
pub struct SystemSampler {
    state: Mutex<HostState>,
    gpu: Option<Box<dyn GpuProbe>>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            state: Mutex::new(HostState {
                system,
                cpu_refreshed_at: Instant::now(),
                process_count: 0,
            }),
            gpu: None,
        }
    }

    /// Attach a GPU probe whose readings fill the snapshot's GPU fields.
    pub fn with_gpu_probe(mut self, probe: Box<dyn GpuProbe>) -> Self {
        self.gpu = Some(probe);
        self
    }

    fn snapshot(&self, state: &HostState) -> ResourceSnapshot {
        let memory = state.memory();
        let gpu = self.gpu.as_ref().and_then(|probe| probe.read());

        ResourceSnapshot {
            cpu_percent: f64::from(state.system.global_cpu_info().cpu_usage()),
            memory_percent: memory.usage_percent,
            memory_available_mb: memory.available_bytes / MB,
            gpu_percent: gpu.map(|g| g.usage_percent),
            gpu_memory_free_mb: gpu.map(|g| g.free_memory_mb),
            load_average: System::load_average().one,
            process_count: state.process_count,
            timestamp: SystemTime::now(),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&self) -> ResourceSnapshot {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refresh_cpu();
        state.system.refresh_memory();
        state.system.refresh_processes();
        state.process_count = state.system.processes().len();
        self.snapshot(&state)
    }

    fn sample_quick(&self) -> ResourceSnapshot {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refresh_cpu();
        state.system.refresh_memory();
        self.snapshot(&state)
    }

    fn sample_memory(&self) -> MemoryReading {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.system.refresh_memory();
        state.memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedGpu;

    impl GpuProbe for FixedGpu {
        fn read(&self) -> Option<GpuReading> {
            Some(GpuReading {
                usage_percent: 42.0,
                free_memory_mb: 2048,
            })
        }
    }

    #[test]
    fn test_system_sample_is_sane() {
        let sampler = SystemSampler::new();
        let snapshot = sampler.sample();
        assert!(snapshot.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&snapshot.memory_percent));
        assert!(snapshot.gpu_percent.is_none());

        let memory = sampler.sample_memory();
        assert!(memory.used_bytes <= memory.total_bytes);
    }

    #[test]
    fn test_quick_sample_skips_process_scan() {
        let sampler = SystemSampler::new();
        assert_eq!(sampler.sample_quick().process_count, 0);

        let full = sampler.sample();
        assert!(full.process_count > 0);

        let quick = sampler.sample_quick();
        assert_eq!(quick.process_count, full.process_count);
        assert!((0.0..=100.0).contains(&quick.memory_percent));
    }

    #[test]
    fn test_gpu_probe_fills_snapshot() {
        let sampler = SystemSampler::new().with_gpu_probe(Box::new(FixedGpu));
        let snapshot = sampler.sample();
        assert_eq!(snapshot.gpu_percent, Some(42.0));
        assert_eq!(snapshot.gpu_memory_free_mb, Some(2048));
    }
}
