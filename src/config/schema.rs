//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.
//! The numeric defaults are policy, not measurement; every one of them can be
//! overridden from the config file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::recovery::models::ModelCapability;

/// Root configuration for the admission and recovery guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Per-request ceilings and host pressure thresholds.
    pub limits: ResourceLimits,

    /// Background rebalancing loop settings.
    pub rebalance: RebalanceConfig,

    /// Memory pressure tiers and reclamation settings.
    pub memory: MemoryConfig,

    /// Recovery strategy settings and the model capability table.
    pub recovery: RecoveryConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Admission policy: per-request ceilings and host thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum CPU percentage granted to a single request.
    pub max_cpu_per_request: f64,

    /// Maximum memory (MB) granted to a single request.
    pub max_memory_per_request_mb: u64,

    /// Maximum GPU percentage granted to a single request.
    pub max_gpu_per_request: f64,

    /// Maximum number of simultaneously active allocations.
    pub max_concurrent_allocations: usize,

    /// Host CPU percentage above which the system is considered busy.
    pub cpu_warning: f64,

    /// Host CPU percentage above which only High/Urgent requests are admitted.
    pub cpu_critical: f64,

    /// Host memory percentage above which the system is considered busy.
    pub memory_warning: f64,

    /// Host memory percentage above which only High/Urgent requests are admitted.
    pub memory_critical: f64,

    /// Host GPU percentage above which the GPU is considered busy.
    pub gpu_warning: Option<f64>,

    /// Host GPU percentage above which GPU requests are denied.
    pub gpu_critical: Option<f64>,

    /// Fraction by which observed usage may exceed the grant before it is reported.
    pub usage_tolerance: f64,
}

impl ResourceLimits {
    /// Upper bound on the sum of granted CPU across active allocations.
    pub fn global_cpu_ceiling(&self) -> f64 {
        self.max_cpu_per_request * self.max_concurrent_allocations as f64
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_per_request: 5.0,
            max_memory_per_request_mb: 500,
            max_gpu_per_request: 50.0,
            max_concurrent_allocations: 10,
            cpu_warning: 70.0,
            cpu_critical: 85.0,
            memory_warning: 75.0,
            memory_critical: 90.0,
            gpu_warning: Some(80.0),
            gpu_critical: Some(95.0),
            usage_tolerance: 0.2,
        }
    }
}

/// Background rebalancing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Tick interval in seconds.
    pub interval_secs: u64,

    /// Multiplier applied to a victim's grant under critical pressure.
    pub shrink_factor: f64,

    /// Maximum allocations whose CPU is shrunk per tick.
    pub max_cpu_victims: usize,

    /// Maximum allocations whose memory is shrunk per tick.
    pub max_memory_victims: usize,

    /// Allocations at or below this memory grant (MB) are never shrunk.
    pub min_reducible_memory_mb: u64,

    /// Host CPU percentage below which High/Urgent grants may grow.
    pub cpu_abundant_below: f64,

    /// Host memory percentage below which constrained grants may grow.
    pub memory_abundant_below: f64,

    /// Multiplier applied when growing a CPU grant.
    pub cpu_grow_factor: f64,

    /// Multiplier applied when growing a memory grant.
    pub memory_grow_factor: f64,

    /// Maximum allocations whose memory is grown per tick.
    pub max_memory_grows: usize,

    /// Number of resource samples kept in the history ring.
    pub history_capacity: usize,
}

impl RebalanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            shrink_factor: 0.8,
            max_cpu_victims: 3,
            max_memory_victims: 2,
            min_reducible_memory_mb: 100,
            cpu_abundant_below: 30.0,
            memory_abundant_below: 50.0,
            cpu_grow_factor: 1.2,
            memory_grow_factor: 1.3,
            max_memory_grows: 2,
            history_capacity: 100,
        }
    }
}

/// Memory usage percentages at which each pressure tier starts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TierThresholds {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
    pub emergency: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            moderate: 75.0,
            high: 85.0,
            critical: 95.0,
            emergency: 98.0,
        }
    }
}

/// Memory pressure monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Tier breakpoints (usage percentage).
    pub thresholds: TierThresholds,

    /// Number of memory samples kept in the history ring.
    pub history_capacity: usize,

    /// Samples kept after an emergency cleanup truncates the history.
    pub emergency_history_keep: usize,

    /// Watch loop interval in seconds.
    pub watch_interval_secs: u64,

    /// Run the optimization chain from the watch loop when pressure is High or worse.
    pub proactive: bool,

    /// Batch size multiplier signalled by batch-shrink.
    pub batch_size_factor: f64,

    /// Context window cap (tokens) signalled by context-truncate.
    pub context_token_cap: usize,
}

impl MemoryConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            thresholds: TierThresholds::default(),
            history_capacity: 100,
            emergency_history_keep: 10,
            watch_interval_secs: 5,
            proactive: false,
            batch_size_factor: 0.5,
            context_token_cap: 2048,
        }
    }
}

/// Recovery orchestrator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Upper bound (seconds) on a single retry delay.
    pub max_backoff_secs: u64,

    /// Add up to 10% jitter to retry delays.
    pub backoff_jitter: bool,

    /// Retry budget for error contexts that do not set their own.
    pub default_max_attempts: u32,

    /// Minimum similarity for a cached response to be served.
    pub similarity_floor: f64,

    /// Token budget used by the reduced-complexity path.
    pub reduced_max_tokens: u32,

    /// Models the fallback strategy may route to, in preference order.
    pub models: Vec<ModelCapability>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: 30,
            backoff_jitter: false,
            default_max_attempts: 3,
            similarity_floor: 0.7,
            reduced_max_tokens: 256,
            models: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(config.limits.max_cpu_per_request, 5.0);
        assert_eq!(config.limits.max_concurrent_allocations, 10);
        assert_eq!(config.rebalance.interval(), Duration::from_secs(5));
        assert_eq!(config.memory.thresholds.emergency, 98.0);
        assert!(config.recovery.models.is_empty());
    }

    #[test]
    fn test_partial_override() {
        let config: GuardConfig = toml::from_str(
            r#"
            [limits]
            max_cpu_per_request = 10.0
            max_concurrent_allocations = 4

            [[recovery.models]]
            id = "small-text"
            modalities = ["text"]
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.global_cpu_ceiling(), 40.0);
        // untouched fields keep their defaults
        assert_eq!(config.limits.cpu_critical, 85.0);
        assert_eq!(config.recovery.models.len(), 1);
        assert_eq!(config.recovery.models[0].id, "small-text");
    }
}
