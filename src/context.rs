//! Process-wide guard context.
//!
//! # Responsibilities
//! - Build the admission controller, memory monitor and recovery
//!   orchestrator from one configuration
//! - Run the rebalancer and memory watch in the background
//! - Expose the operations the request pipeline calls
//!
//! # Design Decisions
//! - Built once at startup and shared by `Arc`; there are no globals
//! - Collaborators default to the host sampler, an offline backend and the
//!   configured model table, so the guard runs without an inference stack
//! - `build` validates the configuration, so a hand-built `GuardConfig` gets
//!   the same checks as one loaded from disk

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::admission::{
    AdmissionController, AdmissionDecision, AdmissionStats, AllocationId, ObservedUsage,
    Rebalancer, ResourceRequest, UsageReport,
};
use crate::config::{validate_config, ConfigError, GuardConfig};
use crate::lifecycle::Shutdown;
use crate::memory::{
    CacheHandle, HandleToken, MemoryPressureMonitor, MemoryRecoveryResult, MemoryStats,
    MemoryStatus, MemoryWatch, ModelHandle,
};
use crate::recovery::{
    ErrorContext, InferenceBackend, ModelRegistry, OfflineBackend, RecoveryOrchestrator,
    RecoveryResult, RecoveryStats, ResponseCache, StaticModelRegistry,
};
use crate::resources::{ResourceSampler, SystemSampler};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Combined statistics of the three components.
#[derive(Debug, Clone, Serialize)]
pub struct GuardStats {
    pub admission: AdmissionStats,
    pub memory: MemoryStats,
    pub recovery: RecoveryStats,
}

/// Builder for [`GuardContext`]. Unset collaborators get defaults.
pub struct GuardContextBuilder {
    config: GuardConfig,
    sampler: Option<Arc<dyn ResourceSampler>>,
    backend: Option<Arc<dyn InferenceBackend>>,
    registry: Option<Arc<dyn ModelRegistry>>,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl GuardContextBuilder {
    /// Host sampler shared by admission and the memory monitor.
    pub fn sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Inference backend used by recovery strategies.
    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Model registry consulted for fallback models.
    pub fn registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Response cache for the cache-fallback strategy.
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate the configuration and wire the components together.
    pub fn build(self) -> Result<GuardContext, ConfigError> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Validation)?;

        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(SystemSampler::new()));
        let backend = self.backend.unwrap_or_else(|| Arc::new(OfflineBackend));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(StaticModelRegistry::new(config.recovery.models.clone())));

        let admission = Arc::new(AdmissionController::new(
            config.limits.clone(),
            config.rebalance.clone(),
            sampler.clone(),
        ));
        let memory = Arc::new(MemoryPressureMonitor::new(config.memory.clone(), sampler));

        let mut recovery = RecoveryOrchestrator::new(config.recovery.clone(), backend, registry)
            .with_memory_monitor(memory.clone());
        if let Some(cache) = self.cache {
            recovery = recovery.with_cache(cache);
        }

        Ok(GuardContext {
            config,
            admission,
            memory,
            recovery: Arc::new(recovery),
            shutdown: Shutdown::new(),
        })
    }
}

/// Process-lifetime owner of the admission controller, memory monitor and
/// recovery orchestrator.
pub struct GuardContext {
    config: GuardConfig,
    admission: Arc<AdmissionController>,
    memory: Arc<MemoryPressureMonitor>,
    recovery: Arc<RecoveryOrchestrator>,
    shutdown: Shutdown,
}

impl GuardContext {
    /// Start building a context from `config`.
    pub fn builder(config: GuardConfig) -> GuardContextBuilder {
        GuardContextBuilder {
            config,
            sampler: None,
            backend: None,
            registry: None,
            cache: None,
        }
    }

    /// The validated configuration this context was built from.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Get the admission controller.
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Get the memory pressure monitor.
    pub fn memory(&self) -> &Arc<MemoryPressureMonitor> {
        &self.memory
    }

    /// Get the recovery orchestrator.
    pub fn recovery(&self) -> &Arc<RecoveryOrchestrator> {
        &self.recovery
    }

    /// Spawn the rebalancer and memory watch. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        if self.shutdown.task_count() > 0 {
            tracing::warn!("Guard background tasks already running");
            return;
        }

        let rebalancer = Rebalancer::new(self.admission.clone(), self.config.rebalance.interval());
        self.shutdown.spawn("rebalancer", |rx| rebalancer.run(rx));

        let watch = MemoryWatch::new(
            self.memory.clone(),
            self.config.memory.watch_interval(),
            self.config.memory.proactive,
        );
        self.shutdown.spawn("memory-watch", |rx| watch.run(rx));

        tracing::info!("Guard background tasks started");
    }

    /// Stop the background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        let stopped = self.shutdown.drain(DRAIN_TIMEOUT).await;
        tracing::info!(stopped, "Guard background tasks stopped");
    }

    /// Admit or deny a request. See [`AdmissionController::allocate`].
    pub fn allocate(&self, request: ResourceRequest) -> AdmissionDecision {
        self.admission.allocate(request)
    }

    /// Return an allocation. Unknown ids are a no-op returning false.
    pub fn release(&self, id: &AllocationId) -> bool {
        self.admission.release(id)
    }

    /// Record observed usage for an allocation.
    pub fn report_usage(&self, id: &AllocationId, observed: ObservedUsage) -> UsageReport {
        self.admission.report_usage(id, observed)
    }

    /// Run the optimization chain for the current (or given) memory status.
    ///
    /// Blocks while sampling and calling cleanup handles; async callers should
    /// use `spawn_blocking`.
    pub fn handle_memory_exhaustion(
        &self,
        query: &str,
        status: Option<MemoryStatus>,
    ) -> MemoryRecoveryResult {
        self.memory.handle_exhaustion(query, status)
    }

    /// Recover from a failed operation. Always yields a response.
    pub async fn handle_error(&self, context: ErrorContext) -> RecoveryResult {
        self.recovery.handle(context).await
    }

    /// Register a cache the memory monitor may clear under pressure.
    pub fn register_cache_handle(&self, handle: Arc<dyn CacheHandle>) -> HandleToken {
        self.memory.register_cache_handle(handle)
    }

    /// Register a model the memory monitor may unload under pressure.
    pub fn register_model_handle(&self, handle: Arc<dyn ModelHandle>) -> HandleToken {
        self.memory.register_model_handle(handle)
    }

    /// Drop a registration. Returns false if the token was already gone.
    pub fn unregister_handle(&self, token: HandleToken) -> bool {
        self.memory.unregister(token)
    }

    /// Snapshot of every component's statistics.
    pub fn stats(&self) -> GuardStats {
        GuardStats {
            admission: self.admission.stats(),
            memory: self.memory.stats(),
            recovery: self.recovery.stats(),
        }
    }
}
