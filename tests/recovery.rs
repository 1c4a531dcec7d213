//! Recovery orchestrator: strategy plans against fake collaborators.

use std::io;
use std::sync::Arc;

use serve_guard::config::{MemoryConfig, RecoveryConfig};
use serve_guard::memory::MemoryPressureMonitor;
use serve_guard::recovery::{
    CachedResponse, ErrorContext, ErrorKind, GenerationParams, InferenceBackend, Modality,
    ModelCapability, RecoveryOrchestrator, RecoveryStrategy, StaticModelRegistry,
};

mod common;
use common::{FakeBackend, FakeCache, ScriptedHost};

fn registry(models: Vec<ModelCapability>) -> Arc<StaticModelRegistry> {
    Arc::new(StaticModelRegistry::new(models))
}

fn orchestrator(backend: Arc<FakeBackend>, registry: Arc<StaticModelRegistry>) -> RecoveryOrchestrator {
    RecoveryOrchestrator::new(RecoveryConfig::default(), backend, registry)
}

const ALL_KINDS: [ErrorKind; 9] = [
    ErrorKind::ModelUnavailable,
    ErrorKind::ModelTimeout,
    ErrorKind::RoutingError,
    ErrorKind::MemoryExhaustion,
    ErrorKind::StreamingInterruption,
    ErrorKind::PerformanceDegradation,
    ErrorKind::ResourceConstraint,
    ErrorKind::ConnectionFailure,
    ErrorKind::ReasoningFailure,
];

#[tokio::test]
async fn test_unavailable_without_fallbacks_gets_emergency_text() {
    let orchestrator = orchestrator(Arc::new(FakeBackend::new()), registry(Vec::new()));

    let result = orchestrator
        .handle(ErrorContext::new(ErrorKind::ModelUnavailable, "model gone", "hi").with_model("m1"))
        .await;

    assert!(result.success);
    assert_eq!(result.degradation_level, 5);
    assert_eq!(result.strategy, Some(RecoveryStrategy::EmergencyResponse));
    assert!(!result.response.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_fallback_model_skips_the_failed_one() {
    let backend = Arc::new(FakeBackend::new().answering("m1", "from m1").answering("m2", "from m2"));
    let orchestrator = orchestrator(
        backend.clone(),
        registry(vec![
            ModelCapability::new("m1", [Modality::Text]),
            ModelCapability::new("vision", [Modality::Image]),
            ModelCapability::new("m2", [Modality::Text]),
        ]),
    );

    let result = orchestrator
        .handle(ErrorContext::new(ErrorKind::ModelUnavailable, "down", "hi").with_model("m1"))
        .await;

    assert_eq!(result.strategy, Some(RecoveryStrategy::FallbackModel));
    assert_eq!(result.fallback_model.as_deref(), Some("m2"));
    assert_eq!(result.response.as_deref(), Some("from m2"));
    assert_eq!(result.degradation_level, 1);

    let tried: Vec<Option<String>> = backend.calls().into_iter().map(|(model, _, _)| model).collect();
    assert_eq!(tried, vec![Some("m2".to_string())]);
}

#[tokio::test]
async fn test_streaming_interruption_delivers_partial() {
    let orchestrator = orchestrator(Arc::new(FakeBackend::new()), registry(Vec::new()));
    let context = ErrorContext::new(ErrorKind::StreamingInterruption, "socket reset", "q")
        .with_partial_response("Tokio is an async runtime. It provides tim");

    let result = orchestrator.handle(context).await;

    assert!(result.success);
    assert_eq!(result.strategy, Some(RecoveryStrategy::PartialResponse));
    assert_eq!(result.degradation_level, 2);
    let response = result.response.unwrap_or_default();
    assert!(response.starts_with("Tokio is an async runtime."));
    assert!(response.contains('['));
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_backoff_counts_attempts() {
    let backend = Arc::new(FakeBackend::new().default_answer("second time lucky").failing_first(1));
    let orchestrator = orchestrator(backend.clone(), registry(Vec::new()));

    let start = tokio::time::Instant::now();
    let result = orchestrator
        .handle(ErrorContext::new(ErrorKind::ModelTimeout, "deadline", "q"))
        .await;

    assert_eq!(result.strategy, Some(RecoveryStrategy::RetryWithBackoff));
    assert_eq!(result.degradation_level, 0);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.response.as_deref(), Some("second time lucky"));
    // 1s before the first retry, 2s before the second.
    assert!(start.elapsed() >= std::time::Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_retry_respects_spent_budget() {
    let backend = Arc::new(FakeBackend::new().default_answer("never reached"));
    let orchestrator = orchestrator(backend.clone(), registry(Vec::new()));

    let context = ErrorContext::new(ErrorKind::ConnectionFailure, "refused", "q").with_attempts(2, 2);
    let result = orchestrator.handle(context).await;

    assert_eq!(result.degradation_level, 5);
    assert_eq!(result.attempts, 2);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_cache_fallback_honors_similarity_floor() {
    let close = RecoveryOrchestrator::new(
        RecoveryConfig::default(),
        Arc::new(FakeBackend::new()),
        registry(Vec::new()),
    )
    .with_cache(Arc::new(FakeCache {
        hit: Some(CachedResponse {
            response: "cached answer".into(),
            similarity: 0.92,
        }),
    }));
    let result = close
        .handle(ErrorContext::new(ErrorKind::RoutingError, "no route", "q"))
        .await;
    assert_eq!(result.strategy, Some(RecoveryStrategy::CacheFallback));
    assert_eq!(result.degradation_level, 1);

    let distant = RecoveryOrchestrator::new(
        RecoveryConfig::default(),
        Arc::new(FakeBackend::new()),
        registry(Vec::new()),
    )
    .with_cache(Arc::new(FakeCache {
        hit: Some(CachedResponse {
            response: "unrelated".into(),
            similarity: 0.4,
        }),
    }));
    let result = distant
        .handle(ErrorContext::new(ErrorKind::RoutingError, "no route", "q"))
        .await;
    assert_eq!(result.degradation_level, 5);
}

#[tokio::test]
async fn test_memory_exhaustion_relieves_then_reduces() {
    let host = ScriptedHost::new(10.0, 90.0);
    let monitor = Arc::new(MemoryPressureMonitor::new(MemoryConfig::default(), host.clone()));
    let backend = Arc::new(FakeBackend::new().default_answer("short answer"));
    let orchestrator = orchestrator(backend.clone(), registry(Vec::new()))
        .with_memory_monitor(monitor.clone());

    let result = orchestrator
        .handle(ErrorContext::new(
            ErrorKind::MemoryExhaustion,
            "CUDA out of memory",
            "Write a detailed, comprehensive history of Rome",
        ))
        .await;

    assert_eq!(result.strategy, Some(RecoveryStrategy::ReduceComplexity));
    assert_eq!(result.degradation_level, 2);
    assert_eq!(monitor.stats().total_recoveries, 1);

    let calls = backend.calls();
    let (_, query, params) = &calls[0];
    assert_eq!(query, "Write a history of Rome");
    assert!(params.simplified);
    assert_eq!(params.max_tokens, Some(256));
}

#[tokio::test]
async fn test_fallback_model_honors_memory_hints() {
    // 96% is Critical: relief sets simplified responses and a context cap.
    let host = ScriptedHost::new(10.0, 96.0);
    let monitor = Arc::new(MemoryPressureMonitor::new(MemoryConfig::default(), host.clone()));
    let backend = Arc::new(FakeBackend::new().answering("m2", "from m2"));
    let orchestrator = orchestrator(
        backend.clone(),
        registry(vec![ModelCapability::new("m2", [Modality::Text])]),
    )
    .with_memory_monitor(monitor.clone());

    let result = orchestrator
        .handle(ErrorContext::new(ErrorKind::MemoryExhaustion, "oom", "summarize this").with_model("m1"))
        .await;

    assert_eq!(result.strategy, Some(RecoveryStrategy::FallbackModel));
    let hints = monitor.generation_hints();
    assert!(hints.simplified_responses);
    assert_eq!(hints.context_token_cap, Some(MemoryConfig::default().context_token_cap));

    let calls = backend.calls();
    let (model, _, params) = calls.last().expect("fallback call");
    assert_eq!(model.as_deref(), Some("m2"));
    assert!(params.simplified);
    assert_eq!(
        params.max_tokens,
        Some(MemoryConfig::default().context_token_cap as u32)
    );
}

#[tokio::test]
async fn test_relaxed_hints_leave_params_untouched() {
    let host = ScriptedHost::new(10.0, 40.0);
    let monitor = Arc::new(MemoryPressureMonitor::new(MemoryConfig::default(), host));
    let backend = Arc::new(FakeBackend::new().answering("m2", "from m2"));
    let orchestrator = orchestrator(
        backend.clone(),
        registry(vec![ModelCapability::new("m2", [Modality::Text])]),
    )
    .with_memory_monitor(monitor);

    let result = orchestrator
        .handle(ErrorContext::new(ErrorKind::ModelUnavailable, "down", "hi").with_model("m1"))
        .await;

    assert_eq!(result.strategy, Some(RecoveryStrategy::FallbackModel));
    assert_eq!(backend.calls()[0].2, GenerationParams::normal());
}

#[tokio::test]
async fn test_graceful_degradation_scales_with_memory_pressure() {
    let host = ScriptedHost::new(10.0, 96.0);
    let monitor = Arc::new(MemoryPressureMonitor::new(MemoryConfig::default(), host.clone()));
    let orchestrator = orchestrator(Arc::new(FakeBackend::new()), registry(Vec::new()))
        .with_memory_monitor(monitor);

    let partial = "The empire grew over centuries. Trade flourished across the sea. \
        Roads connected distant provinces. Legions guarded the frontier. Then came the";
    let result = orchestrator
        .handle(
            ErrorContext::new(ErrorKind::MemoryExhaustion, "oom", "history of Rome")
                .with_partial_response(partial),
        )
        .await;

    assert_eq!(result.strategy, Some(RecoveryStrategy::GracefulDegradation));
    assert_eq!(result.degradation_level, 4);
    let response = result.response.unwrap_or_default();
    assert!(response.starts_with("The empire"));
    assert!(response.len() < partial.len() / 2);
}

#[tokio::test]
async fn test_empty_backend_output_is_not_success() {
    let backend = Arc::new(FakeBackend::new().answering("m2", "   "));
    let orchestrator = orchestrator(
        backend,
        registry(vec![ModelCapability::new("m2", [Modality::Text])]),
    );

    let result = orchestrator
        .handle(ErrorContext::new(ErrorKind::ModelUnavailable, "down", "hi").with_model("m1"))
        .await;

    assert_ne!(result.strategy, Some(RecoveryStrategy::FallbackModel));
    assert_eq!(result.degradation_level, 5);
}

#[tokio::test(start_paused = true)]
async fn test_every_kind_resolves_to_a_response() {
    let orchestrator = orchestrator(Arc::new(FakeBackend::new()), registry(Vec::new()));

    for kind in ALL_KINDS {
        let result = orchestrator
            .handle(ErrorContext::new(kind, "failure", "q").with_attempts(0, 1))
            .await;
        assert!(result.success, "{kind} did not recover");
        assert!(
            result.response.as_deref().is_some_and(|r| !r.trim().is_empty()),
            "{kind} produced an empty response"
        );
    }

    assert_eq!(orchestrator.stats().handled, ALL_KINDS.len() as u64);
}

#[tokio::test]
async fn test_context_from_untyped_error() {
    let err = io::Error::new(io::ErrorKind::TimedOut, "upstream slow");
    let context = ErrorContext::from_error(&err, "q");
    assert_eq!(context.kind, ErrorKind::ModelTimeout);
    assert_eq!(context.error, "upstream slow");

    // The default backend-free path still yields text.
    let backend: Arc<dyn InferenceBackend> = Arc::new(serve_guard::recovery::OfflineBackend);
    let orchestrator = RecoveryOrchestrator::new(RecoveryConfig::default(), backend, registry(Vec::new()));
    let result = orchestrator
        .handle(ErrorContext::from_error(&err, "q").with_attempts(3, 3))
        .await;
    assert!(result.response.is_some());
}
