//! Recovery orchestrator.
//!
//! # Responsibilities
//! - Walk the strategy plan for a failure kind until one produces a response
//! - Fall back to a canned emergency response when every strategy fails
//! - Keep per-strategy statistics
//!
//! # Design Decisions
//! - A strategy succeeds only with a non-empty response
//! - Degradation levels: 0 full answer, 1 alternative source, 2 reduced or
//!   partial answer, 3-4 truncated synthesis, 5 canned text
//! - Memory-related failures ask the memory monitor for relief before the
//!   reduced-complexity retry

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::RecoveryConfig;
use crate::memory::{MemoryPressureMonitor, PressureTier};
use crate::observability::metrics;
use crate::recovery::backend::{BackendError, GenerationParams, InferenceBackend, ResponseCache};
use crate::recovery::backoff::retry_delay;
use crate::recovery::error::{ErrorContext, ErrorKind};
use crate::recovery::models::ModelRegistry;
use crate::recovery::responses;
use crate::recovery::strategy::RecoveryStrategy;
use crate::text;

const EMERGENCY_LEVEL: u8 = 5;

/// Outcome of `RecoveryOrchestrator::handle`. Always carries a response.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub response: Option<String>,
    pub strategy: Option<RecoveryStrategy>,
    pub fallback_model: Option<String>,
    /// 0 (full answer) to 5 (canned emergency text).
    pub degradation_level: u8,
    pub elapsed: Duration,
    /// Last strategy failure when only the emergency floor was left.
    pub error: Option<String>,
    /// Retries consumed, including those spent before recovery started.
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryStats {
    pub handled: u64,
    pub emergency_fallbacks: u64,
    pub recovered_by: BTreeMap<&'static str, u64>,
    pub failed_by: BTreeMap<&'static str, u64>,
}

#[derive(Debug, Error)]
enum StrategyError {
    #[error("no compatible fallback model")]
    NoFallbackModel,

    #[error("no response cache configured")]
    NoCache,

    #[error("no cached response above similarity {0}")]
    CacheMiss(f64),

    #[error("no partial response to deliver")]
    NoPartialResponse,

    #[error("retry budget exhausted after {0} attempts")]
    AttemptsExhausted(u32),

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("nothing left to degrade")]
    NothingToDegrade,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

struct Recovered {
    response: String,
    degradation_level: u8,
    fallback_model: Option<String>,
}

impl Recovered {
    fn new(response: String, degradation_level: u8) -> Self {
        Self {
            response,
            degradation_level,
            fallback_model: None,
        }
    }
}

/// Turns a failed operation into the best response still available.
pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    backend: Arc<dyn InferenceBackend>,
    registry: Arc<dyn ModelRegistry>,
    cache: Option<Arc<dyn ResponseCache>>,
    memory: Option<Arc<MemoryPressureMonitor>>,
    stats: Mutex<RecoveryStats>,
}

impl RecoveryOrchestrator {
    /// Create an orchestrator with no cache and no memory monitor.
    pub fn new(
        config: RecoveryConfig,
        backend: Arc<dyn InferenceBackend>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        Self {
            config,
            backend,
            registry,
            cache: None,
            memory: None,
            stats: Mutex::new(RecoveryStats::default()),
        }
    }

    /// Enable the cache-fallback strategy.
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Relieve memory before reduced retries and follow the monitor's hints.
    pub fn with_memory_monitor(mut self, monitor: Arc<MemoryPressureMonitor>) -> Self {
        self.memory = Some(monitor);
        self
    }

    /// Recover from a failed operation. Never fails.
    pub async fn handle(&self, mut context: ErrorContext) -> RecoveryResult {
        let start = Instant::now();
        let kind = context.kind;
        let plan = RecoveryStrategy::plan_for(kind);

        tracing::warn!(
            kind = kind.as_str(),
            error = %context.error,
            model = context.model_id.as_deref().unwrap_or("-"),
            strategies = plan.len(),
            "Recovering from failure"
        );

        let mut last_error = None;
        for &strategy in plan {
            match self.attempt(strategy, &mut context).await {
                Ok(recovered) if !recovered.response.trim().is_empty() => {
                    let elapsed = start.elapsed();
                    self.record(kind, strategy, recovered.degradation_level, elapsed);
                    tracing::info!(
                        kind = kind.as_str(),
                        strategy = strategy.as_str(),
                        level = recovered.degradation_level,
                        fallback_model = recovered.fallback_model.as_deref().unwrap_or("-"),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Recovered"
                    );
                    return RecoveryResult {
                        success: true,
                        response: Some(recovered.response),
                        strategy: Some(strategy),
                        fallback_model: recovered.fallback_model,
                        degradation_level: recovered.degradation_level,
                        elapsed,
                        error: None,
                        attempts: context.attempt_count,
                    };
                }
                Ok(_) => {
                    self.record_failure(strategy);
                    tracing::debug!(
                        strategy = strategy.as_str(),
                        "Strategy produced empty response"
                    );
                    last_error = Some(StrategyError::EmptyResponse.to_string());
                }
                Err(e) => {
                    self.record_failure(strategy);
                    tracing::debug!(strategy = strategy.as_str(), error = %e, "Strategy failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let elapsed = start.elapsed();
        self.record(kind, RecoveryStrategy::EmergencyResponse, EMERGENCY_LEVEL, elapsed);
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.emergency_fallbacks += 1;
        }
        tracing::error!(
            kind = kind.as_str(),
            last_error = last_error.as_deref().unwrap_or("-"),
            "All recovery strategies failed, serving emergency response"
        );

        RecoveryResult {
            success: true,
            response: Some(responses::emergency_response(
                kind,
                context.partial_response.as_deref(),
            )),
            strategy: Some(RecoveryStrategy::EmergencyResponse),
            fallback_model: None,
            degradation_level: EMERGENCY_LEVEL,
            elapsed,
            error: last_error,
            attempts: context.attempt_count,
        }
    }

    /// Get a copy of the per-strategy counters.
    pub fn stats(&self) -> RecoveryStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn attempt(
        &self,
        strategy: RecoveryStrategy,
        context: &mut ErrorContext,
    ) -> Result<Recovered, StrategyError> {
        match strategy {
            RecoveryStrategy::FallbackModel => self.fallback_model(context).await,
            RecoveryStrategy::ReduceComplexity => self.reduce_complexity(context).await,
            RecoveryStrategy::CacheFallback => self.cache_fallback(context).await,
            RecoveryStrategy::PartialResponse => Self::partial_response(context),
            RecoveryStrategy::GracefulDegradation => self.graceful_degradation(context).await,
            RecoveryStrategy::RetryWithBackoff => self.retry_with_backoff(context).await,
            RecoveryStrategy::EmergencyResponse => Ok(Recovered::new(
                responses::emergency_response(context.kind, context.partial_response.as_deref()),
                EMERGENCY_LEVEL,
            )),
        }
    }

    /// `base`, tightened by the memory monitor's hints while pressure lasts.
    fn generation_params(&self, base: GenerationParams) -> GenerationParams {
        match &self.memory {
            Some(monitor) => base.constrained_by(&monitor.generation_hints()),
            None => base,
        }
    }

    async fn fallback_model(&self, context: &ErrorContext) -> Result<Recovered, StrategyError> {
        let failed = context.model_id.as_deref();
        let candidates: Vec<String> = self
            .registry
            .compatible_models(&context.modalities)
            .await
            .into_iter()
            .filter(|id| Some(id.as_str()) != failed)
            .collect();

        let params = self.generation_params(GenerationParams::normal());
        let mut last_error = StrategyError::NoFallbackModel;
        for candidate in candidates {
            match self
                .backend
                .execute(Some(candidate.as_str()), &context.query, &params)
                .await
            {
                Ok(response) if !response.trim().is_empty() => {
                    return Ok(Recovered {
                        response,
                        degradation_level: 1,
                        fallback_model: Some(candidate),
                    });
                }
                Ok(_) => last_error = StrategyError::EmptyResponse,
                Err(e) => {
                    tracing::debug!(model = %candidate, error = %e, "Fallback model failed");
                    last_error = e.into();
                }
            }
        }
        Err(last_error)
    }

    async fn reduce_complexity(&self, context: &ErrorContext) -> Result<Recovered, StrategyError> {
        if context.kind.is_memory_related() {
            self.relieve_memory(&context.query).await;
        }

        let query = responses::simplify_query(&context.query);
        let reduced = GenerationParams::reduced(self.config.reduced_max_tokens);
        let params = self.generation_params(reduced);
        let response = self
            .backend
            .execute(context.model_id.as_deref(), &query, &params)
            .await?;
        Ok(Recovered::new(response, 2))
    }

    async fn relieve_memory(&self, query: &str) {
        let Some(monitor) = self.memory.clone() else {
            return;
        };
        let query = query.to_string();
        match tokio::task::spawn_blocking(move || monitor.handle_exhaustion(&query, None)).await {
            Ok(result) => tracing::debug!(
                relieved = result.success,
                freed_bytes = result.memory_freed,
                "Memory relief before reduced retry"
            ),
            Err(e) => tracing::error!(error = %e, "Memory relief task failed"),
        }
    }

    async fn cache_fallback(&self, context: &ErrorContext) -> Result<Recovered, StrategyError> {
        let cache = self.cache.as_ref().ok_or(StrategyError::NoCache)?;
        let floor = self.config.similarity_floor;

        match cache.lookup(&context.query).await {
            Some(hit) if hit.similarity >= floor => Ok(Recovered::new(hit.response, 1)),
            _ => Err(StrategyError::CacheMiss(floor)),
        }
    }

    fn partial_response(context: &ErrorContext) -> Result<Recovered, StrategyError> {
        context
            .partial_response
            .as_deref()
            .and_then(|partial| responses::deliver_partial(partial, context.kind))
            .map(|response| Recovered::new(response, 2))
            .ok_or(StrategyError::NoPartialResponse)
    }

    async fn graceful_degradation(
        &self,
        context: &ErrorContext,
    ) -> Result<Recovered, StrategyError> {
        let level = self.degradation_level(context.kind).await;
        let query = responses::simplify_query(&context.query);
        let params =
            self.generation_params(GenerationParams::reduced(self.config.reduced_max_tokens));

        let body = match self
            .backend
            .execute(context.model_id.as_deref(), &query, &params)
            .await
        {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) | Err(_) => context
                .partial_response
                .as_deref()
                .map(text::complete_sentences)
                .filter(|partial| !partial.is_empty())
                .ok_or(StrategyError::NothingToDegrade)?,
        };

        Ok(Recovered::new(responses::degrade(&body, level), level))
    }

    /// 2 or 3 by failure kind, raised by current memory pressure, at most 4.
    async fn degradation_level(&self, kind: ErrorKind) -> u8 {
        let base: u8 = if kind.is_memory_related() { 3 } else { 2 };

        let tier = match self.memory.clone() {
            Some(monitor) => tokio::task::spawn_blocking(move || monitor.sample().tier)
                .await
                .unwrap_or(PressureTier::Low),
            None => PressureTier::Low,
        };
        let pressure: u8 = match tier {
            PressureTier::Low | PressureTier::Moderate => 0,
            PressureTier::High => 1,
            PressureTier::Critical | PressureTier::Emergency => 2,
        };

        (base + pressure).min(EMERGENCY_LEVEL - 1)
    }

    async fn retry_with_backoff(
        &self,
        context: &mut ErrorContext,
    ) -> Result<Recovered, StrategyError> {
        let max_attempts = context
            .max_attempts
            .unwrap_or(self.config.default_max_attempts);
        let max_delay = Duration::from_secs(self.config.max_backoff_secs);
        let params = self.generation_params(GenerationParams::normal());

        let mut last_error = StrategyError::AttemptsExhausted(context.attempt_count);
        while context.attempt_count < max_attempts {
            let delay = retry_delay(context.attempt_count, max_delay, self.config.backoff_jitter);
            tracing::debug!(
                attempt = context.attempt_count + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );
            tokio::time::sleep(delay).await;
            context.attempt_count += 1;

            match self
                .backend
                .execute(context.model_id.as_deref(), &context.query, &params)
                .await
            {
                Ok(response) if !response.trim().is_empty() => {
                    return Ok(Recovered::new(response, 0));
                }
                Ok(_) => last_error = StrategyError::EmptyResponse,
                Err(e) => last_error = e.into(),
            }
        }

        tracing::debug!(error = %last_error, "Retry budget spent");
        Err(StrategyError::AttemptsExhausted(context.attempt_count))
    }

    /// Count a handled failure and the strategy that answered it.
    fn record(&self, kind: ErrorKind, strategy: RecoveryStrategy, level: u8, elapsed: Duration) {
        metrics::record_recovery(kind.as_str(), strategy.as_str(), level, elapsed);
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.handled += 1;
        *stats.recovered_by.entry(strategy.as_str()).or_default() += 1;
    }

    fn record_failure(&self, strategy: RecoveryStrategy) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        *stats.failed_by.entry(strategy.as_str()).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::backend::OfflineBackend;
    use crate::recovery::models::StaticModelRegistry;

    fn offline() -> RecoveryOrchestrator {
        RecoveryOrchestrator::new(
            RecoveryConfig::default(),
            Arc::new(OfflineBackend),
            Arc::new(StaticModelRegistry::default()),
        )
    }

    #[tokio::test]
    async fn test_unavailable_model_without_fallbacks_is_emergency() {
        let orchestrator = offline();
        let result = orchestrator
            .handle(ErrorContext::new(ErrorKind::ModelUnavailable, "gone", "hello").with_model("m1"))
            .await;

        assert!(result.success);
        assert_eq!(result.degradation_level, 5);
        assert_eq!(result.strategy, Some(RecoveryStrategy::EmergencyResponse));
        assert!(result.response.is_some());
    }

    #[tokio::test]
    async fn test_streaming_partial_is_delivered() {
        let orchestrator = offline();
        let context = ErrorContext::new(ErrorKind::StreamingInterruption, "reset", "q")
            .with_partial_response("Paris is the capital. It has");
        let result = orchestrator.handle(context).await;

        assert_eq!(result.strategy, Some(RecoveryStrategy::PartialResponse));
        assert_eq!(result.degradation_level, 2);
        let response = result.response.unwrap_or_default();
        assert!(response.starts_with("Paris is the capital."));
        assert!(!response.contains("It has"));

        let stats = orchestrator.stats();
        assert_eq!(stats.recovered_by.get("partial_response"), Some(&1));
        assert_eq!(stats.recovered_by.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_plan_counts_emergency_fallback() {
        let orchestrator = offline();
        let result = orchestrator
            .handle(ErrorContext::new(ErrorKind::ConnectionFailure, "refused", "q"))
            .await;

        assert_eq!(result.degradation_level, 5);
        assert_eq!(result.attempts, 3);
        assert!(result.error.is_some());

        let stats = orchestrator.stats();
        assert_eq!(stats.handled, 1);
        assert_eq!(stats.emergency_fallbacks, 1);
        assert_eq!(stats.failed_by.get("retry_with_backoff"), Some(&1));
        assert_eq!(stats.recovered_by.get("emergency_response"), Some(&1));
    }
}
