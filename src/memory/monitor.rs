//! Memory pressure monitor.
//!
//! # Responsibilities
//! - Classify memory readings into pressure tiers and keep a bounded history
//! - Run the optimization chain for the current tier on exhaustion
//! - Produce a degraded response when optimization could not relieve pressure
//! - Optionally watch memory in the background and act before requests fail
//!
//! # Design Decisions
//! - Actions that only change generation settings free nothing immediately,
//!   so they report an estimate and zero actual bytes
//! - Freed bytes are measured as the drop in used memory around an action,
//!   or the handles' own report if that is larger
//! - Success is judged on a fresh sample taken after the chain finishes

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::MemoryConfig;
use crate::memory::handles::{CacheHandle, HandleRegistry, HandleToken, ModelHandle};
use crate::memory::optimization::{
    trim_allocator, GenerationHints, MemoryOptimization, OptimizationStrategy,
};
use crate::memory::pressure::{MemoryStatus, PressureTier};
use crate::observability::metrics;
use crate::resources::{ResourceSampler, SampleHistory, MB};
use crate::text;

const SUMMARY_CHARS: usize = 100;
const BATCH_SHRINK_ESTIMATE: u64 = 50 * MB;

/// Outcome of `handle_exhaustion`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryRecoveryResult {
    /// True iff the final sample is Low or Moderate.
    pub success: bool,
    pub memory_freed: u64,
    pub optimizations: Vec<MemoryOptimization>,
    pub final_status: MemoryStatus,
    pub recovery_time: Duration,
    /// Degraded text to serve when pressure could not be relieved.
    pub fallback_response: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub current: Option<MemoryStatus>,
    pub total_recoveries: u64,
    pub successful_recoveries: u64,
    pub total_bytes_freed: u64,
    pub average_recovery_ms: f64,
    pub registered_caches: usize,
    pub registered_models: usize,
    pub history_len: usize,
    pub hints: GenerationHints,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    bytes_freed: u64,
    recovery_time: Duration,
}

pub struct MemoryPressureMonitor {
    config: MemoryConfig,
    sampler: Arc<dyn ResourceSampler>,
    handles: HandleRegistry,
    history: SampleHistory<MemoryStatus>,
    hints: Mutex<GenerationHints>,
    counters: Mutex<Counters>,
}

impl MemoryPressureMonitor {
    /// Create a monitor with no registered handles and relaxed hints.
    pub fn new(config: MemoryConfig, sampler: Arc<dyn ResourceSampler>) -> Self {
        let history = SampleHistory::new(config.history_capacity);
        Self {
            config,
            sampler,
            handles: HandleRegistry::new(),
            history,
            hints: Mutex::new(GenerationHints::default()),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Read and classify current memory usage. Appends to history.
    pub fn sample(&self) -> MemoryStatus {
        let reading = self.sampler.sample_memory();
        let status = MemoryStatus::from_reading(reading, &self.config.thresholds);
        self.history.push(status.clone());
        metrics::record_memory_status(status.usage_percent, status.tier.level());
        status
    }

    /// Sample, and reset generation hints if pressure has cleared.
    pub fn refresh(&self) -> MemoryStatus {
        let status = self.sample();
        if status.tier.is_relieved() {
            let mut hints = self.hints.lock().unwrap_or_else(PoisonError::into_inner);
            if !hints.is_relaxed() {
                *hints = GenerationHints::default();
                tracing::info!(
                    usage = format!("{:.1}%", status.usage_percent),
                    "Memory pressure cleared, generation hints reset"
                );
            }
        }
        status
    }

    /// Get the degraded-generation settings currently in force.
    pub fn generation_hints(&self) -> GenerationHints {
        *self.hints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recent memory statuses, oldest first.
    pub fn history(&self) -> Vec<MemoryStatus> {
        self.history.snapshot()
    }

    /// Register a cache to clear under pressure.
    pub fn register_cache_handle(&self, handle: Arc<dyn CacheHandle>) -> HandleToken {
        self.handles.register_cache(handle)
    }

    /// Register a model to unload under pressure.
    pub fn register_model_handle(&self, handle: Arc<dyn ModelHandle>) -> HandleToken {
        self.handles.register_model(handle)
    }

    /// Drop a registration. Returns false if the token was unknown.
    pub fn unregister(&self, token: HandleToken) -> bool {
        self.handles.unregister(token)
    }

    /// Free memory for a query that ran out of it.
    ///
    /// `status` is the reading that triggered the call, if the caller has one;
    /// otherwise a fresh sample is taken.
    pub fn handle_exhaustion(&self, query: &str, status: Option<MemoryStatus>) -> MemoryRecoveryResult {
        let start = Instant::now();
        let status = status.unwrap_or_else(|| self.sample());

        tracing::warn!(
            usage = format!("{:.1}%", status.usage_percent),
            tier = %status.tier,
            "Handling memory exhaustion"
        );

        let optimizations = self.run_chain(status.tier, query);
        let memory_freed = optimizations
            .iter()
            .filter(|o| o.success)
            .fold(0u64, |acc, o| acc.saturating_add(o.actual_bytes));

        let final_status = self.sample();
        let success = final_status.tier.is_relieved();
        let fallback_response = (!success).then(|| constrained_response(query, final_status.tier));
        let recovery_time = start.elapsed();

        {
            let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
            counters.total += 1;
            if success {
                counters.successful += 1;
            }
            counters.bytes_freed = counters.bytes_freed.saturating_add(memory_freed);
            counters.recovery_time += recovery_time;
        }

        if success {
            tracing::info!(
                freed_mb = memory_freed / MB,
                actions = optimizations.len(),
                final_tier = %final_status.tier,
                elapsed_ms = recovery_time.as_millis() as u64,
                "Memory pressure relieved"
            );
        } else {
            tracing::warn!(
                freed_mb = memory_freed / MB,
                actions = optimizations.len(),
                final_tier = %final_status.tier,
                "Memory pressure persists, serving constrained response"
            );
        }

        MemoryRecoveryResult {
            success,
            memory_freed,
            optimizations,
            final_status,
            recovery_time,
            fallback_response,
        }
    }

    /// Run the chain for an already-observed tier without a query.
    ///
    /// Used by the watch loop when acting proactively.
    pub fn relieve(&self, tier: PressureTier) -> Vec<MemoryOptimization> {
        self.run_chain(tier, "")
    }

    fn run_chain(&self, tier: PressureTier, query: &str) -> Vec<MemoryOptimization> {
        let mut applied = Vec::new();

        for &strategy in OptimizationStrategy::chain_for(tier) {
            let optimization = self.apply(strategy, query);
            metrics::record_optimization(
                strategy.as_str(),
                optimization.success,
                optimization.actual_bytes,
            );
            tracing::debug!(
                strategy = strategy.as_str(),
                success = optimization.success,
                freed_bytes = optimization.actual_bytes,
                "{}",
                optimization.description
            );

            let succeeded = optimization.success;
            applied.push(optimization);

            if succeeded && self.sample().tier.is_relieved() {
                break;
            }
        }

        applied
    }

    fn apply(&self, strategy: OptimizationStrategy, query: &str) -> MemoryOptimization {
        let start = Instant::now();
        let query_bytes = query.len() as u64;

        let (description, estimated_bytes, actual_bytes, success) = match strategy {
            OptimizationStrategy::GarbageCollect => {
                let before = self.used_bytes();
                let released = trim_allocator();
                let freed = before.saturating_sub(self.used_bytes());
                let description = if released {
                    "Allocator returned free pages to the OS".to_string()
                } else {
                    "Allocator had no free pages to return".to_string()
                };
                (description, 0, freed, true)
            }
            OptimizationStrategy::CacheCleanup => {
                let before = self.used_bytes();
                let outcome = self.handles.clear_caches();
                let freed = before.saturating_sub(self.used_bytes()).max(outcome.bytes);
                let description = format!(
                    "Cleared {} caches ({} failed)",
                    outcome.succeeded, outcome.failed
                );
                (description, outcome.bytes, freed, !outcome.is_failure())
            }
            OptimizationStrategy::ModelUnload => {
                let before = self.used_bytes();
                let outcome = self.handles.unload_models(false);
                let freed = before.saturating_sub(self.used_bytes()).max(outcome.bytes);
                let description = format!(
                    "Unloaded {} idle models ({} active kept, {} failed)",
                    outcome.succeeded, outcome.skipped, outcome.failed
                );
                (description, outcome.bytes, freed, !outcome.is_failure())
            }
            OptimizationStrategy::ResponseSimplify => {
                self.update_hints(|hints| hints.simplified_responses = true);
                (
                    "Simplified responses enabled".to_string(),
                    query_bytes.saturating_mul(10),
                    0,
                    true,
                )
            }
            OptimizationStrategy::BatchShrink => {
                let factor = self.config.batch_size_factor;
                self.update_hints(|hints| hints.batch_size_factor = factor);
                (
                    format!("Batch size scaled by {factor}"),
                    BATCH_SHRINK_ESTIMATE,
                    0,
                    true,
                )
            }
            OptimizationStrategy::ContextTruncate => {
                let cap = self.config.context_token_cap;
                self.update_hints(|hints| hints.context_token_cap = Some(cap));
                (
                    format!("Context window capped at {cap} tokens"),
                    query_bytes.saturating_mul(5),
                    0,
                    true,
                )
            }
            OptimizationStrategy::EmergencyCleanup => self.emergency_cleanup(),
        };

        MemoryOptimization {
            strategy,
            description,
            estimated_bytes,
            actual_bytes,
            priority: strategy.priority(),
            success,
            elapsed: start.elapsed(),
        }
    }

    fn emergency_cleanup(&self) -> (String, u64, u64, bool) {
        let before = self.used_bytes();

        trim_allocator();
        let caches = self.handles.clear_caches();
        let models = self.handles.unload_models(true);
        self.handles.clear();
        self.history.retain_latest(self.config.emergency_history_keep);

        let batch_size_factor = self.config.batch_size_factor;
        let context_token_cap = self.config.context_token_cap;
        self.update_hints(|hints| {
            *hints = GenerationHints {
                simplified_responses: true,
                batch_size_factor,
                context_token_cap: Some(context_token_cap),
            }
        });
        trim_allocator();

        let reported = caches.bytes.saturating_add(models.bytes);
        let freed = before.saturating_sub(self.used_bytes()).max(reported);
        let description = format!(
            "Emergency cleanup: {} caches cleared, {} models unloaded, {} handle failures",
            caches.succeeded,
            models.succeeded,
            caches.failed + models.failed
        );

        tracing::error!(freed_mb = freed / MB, "Emergency memory cleanup performed");
        (description, reported, freed, true)
    }

    fn used_bytes(&self) -> u64 {
        self.sampler.sample_memory().used_bytes
    }

    fn update_hints(&self, f: impl FnOnce(&mut GenerationHints)) {
        let mut hints = self.hints.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *hints);
    }

    /// Recovery counters plus the current registrations and hints.
    pub fn stats(&self) -> MemoryStats {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let average_recovery_ms = if counters.total == 0 {
            0.0
        } else {
            counters.recovery_time.as_secs_f64() * 1000.0 / counters.total as f64
        };

        MemoryStats {
            current: self.history.latest(),
            total_recoveries: counters.total,
            successful_recoveries: counters.successful,
            total_bytes_freed: counters.bytes_freed,
            average_recovery_ms,
            registered_caches: self.handles.cache_count(),
            registered_models: self.handles.model_count(),
            history_len: self.history.len(),
            hints: self.generation_hints(),
        }
    }
}

/// Degraded text for a tier that optimization could not bring down.
pub fn constrained_response(query: &str, tier: PressureTier) -> String {
    match tier {
        PressureTier::Emergency => "System memory is critically low. Please wait a moment \
            while resources are freed and try your request again."
            .to_string(),
        PressureTier::Critical => "Due to system memory limits, only a brief response is \
            possible right now. Please try splitting your request into smaller parts."
            .to_string(),
        _ => format!(
            "Memory is constrained, so this is a simplified response. \
             The essential information: {}",
            text::summarize(query, SUMMARY_CHARS)
        ),
    }
}

/// Background memory watch.
pub struct MemoryWatch {
    monitor: Arc<MemoryPressureMonitor>,
    interval: Duration,
    proactive: bool,
}

impl MemoryWatch {
    /// With `proactive`, High or worse readings trigger relief without a query.
    pub fn new(monitor: Arc<MemoryPressureMonitor>, interval: Duration, proactive: bool) -> Self {
        Self {
            monitor,
            interval,
            proactive,
        }
    }

    /// Sample every interval until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            proactive = self.proactive,
            "Memory watch starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Memory watch received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn tick(&self) {
        let monitor = self.monitor.clone();
        let proactive = self.proactive;

        let result = tokio::task::spawn_blocking(move || {
            let status = monitor.refresh();
            if proactive && status.tier >= PressureTier::High {
                tracing::warn!(
                    usage = format!("{:.1}%", status.usage_percent),
                    tier = %status.tier,
                    "Memory pressure high, optimizing proactively"
                );
                monitor.relieve(status.tier);
            }
        })
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "Memory watch tick failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{MemoryReading, ResourceSnapshot};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Reports a fixed usage percentage out of 1000 bytes.
    struct Gauge(AtomicU64);

    impl ResourceSampler for Gauge {
        fn sample(&self) -> ResourceSnapshot {
            ResourceSnapshot::idle()
        }

        fn sample_memory(&self) -> MemoryReading {
            let used = self.0.load(Ordering::SeqCst);
            MemoryReading::from_bytes(1000, 1000 - used, used)
        }
    }

    fn monitor(used: u64) -> MemoryPressureMonitor {
        MemoryPressureMonitor::new(MemoryConfig::default(), Arc::new(Gauge(AtomicU64::new(used))))
    }

    #[test]
    fn test_sample_appends_history() {
        let monitor = monitor(500);
        let status = monitor.sample();
        assert_eq!(status.tier, PressureTier::Low);
        assert_eq!(monitor.history().len(), 1);
    }

    #[test]
    fn test_low_tier_applies_nothing() {
        let monitor = monitor(100);
        let result = monitor.handle_exhaustion("hello", None);
        assert!(result.success);
        assert!(result.optimizations.is_empty());
        assert!(result.fallback_response.is_none());
    }

    #[test]
    fn test_high_tier_sets_hints_and_falls_back() {
        let monitor = monitor(900);
        let result = monitor.handle_exhaustion("what is the capital of France", None);
        assert!(!result.success);
        assert_eq!(result.optimizations.len(), 4);
        let fallback = result.fallback_response.unwrap_or_default();
        assert!(fallback.contains("capital of France"));

        let hints = monitor.generation_hints();
        assert!(hints.simplified_responses);
        assert_eq!(hints.batch_size_factor, 0.5);
        assert_eq!(hints.context_token_cap, None);
    }

    #[test]
    fn test_refresh_resets_hints_once_relieved() {
        let sampler = Arc::new(Gauge(AtomicU64::new(900)));
        let monitor = MemoryPressureMonitor::new(MemoryConfig::default(), sampler.clone());
        monitor.handle_exhaustion("q", None);
        assert!(!monitor.generation_hints().is_relaxed());

        monitor.refresh();
        assert!(!monitor.generation_hints().is_relaxed());

        sampler.0.store(300, Ordering::SeqCst);
        monitor.refresh();
        assert!(monitor.generation_hints().is_relaxed());
    }

    #[test]
    fn test_constrained_response_per_tier() {
        let long_query = "x".repeat(300);
        let high = constrained_response(&long_query, PressureTier::High);
        assert!(high.ends_with("..."));
        assert!(high.len() < 300);
        assert!(constrained_response("q", PressureTier::Emergency).contains("critically low"));
        assert!(constrained_response("q", PressureTier::Critical).contains("brief response"));
    }

    #[test]
    fn test_stats_track_recoveries() {
        let monitor = monitor(900);
        monitor.handle_exhaustion("q", None);
        let stats = monitor.stats();
        assert_eq!(stats.total_recoveries, 1);
        assert_eq!(stats.successful_recoveries, 0);
        assert!(stats.current.is_some());
    }
}
