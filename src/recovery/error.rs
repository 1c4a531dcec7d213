//! Failure descriptions handed to the orchestrator.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::io;

use crate::recovery::backend::BackendError;
use crate::recovery::models::Modality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelUnavailable,
    ModelTimeout,
    RoutingError,
    MemoryExhaustion,
    StreamingInterruption,
    PerformanceDegradation,
    ResourceConstraint,
    ConnectionFailure,
    ReasoningFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::ModelTimeout => "model_timeout",
            ErrorKind::RoutingError => "routing_error",
            ErrorKind::MemoryExhaustion => "memory_exhaustion",
            ErrorKind::StreamingInterruption => "streaming_interruption",
            ErrorKind::PerformanceDegradation => "performance_degradation",
            ErrorKind::ResourceConstraint => "resource_constraint",
            ErrorKind::ConnectionFailure => "connection_failure",
            ErrorKind::ReasoningFailure => "reasoning_failure",
        }
    }

    /// Kinds where freeing memory may help.
    pub fn is_memory_related(self) -> bool {
        matches!(self, ErrorKind::MemoryExhaustion | ErrorKind::ResourceConstraint)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed operation, as seen by the orchestrator.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    /// Rendered originating error.
    pub error: String,
    pub query: String,
    pub model_id: Option<String>,
    pub modalities: Vec<Modality>,
    /// Retries already spent. Only the retry strategy advances this.
    pub attempt_count: u32,
    /// Retry budget; the orchestrator's configured default when unset.
    pub max_attempts: Option<u32>,
    /// Output produced before the failure, if any.
    pub partial_response: Option<String>,
}

impl ErrorContext {
    pub fn new(kind: ErrorKind, error: impl fmt::Display, query: impl Into<String>) -> Self {
        Self {
            kind,
            error: error.to_string(),
            query: query.into(),
            model_id: None,
            modalities: vec![Modality::Text],
            attempt_count: 0,
            max_attempts: None,
            partial_response: None,
        }
    }

    /// Build a context for an unclassified error.
    pub fn from_error(error: &(dyn Error + 'static), query: impl Into<String>) -> Self {
        Self::new(classify_error(error), error, query)
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_modalities(mut self, modalities: impl Into<Vec<Modality>>) -> Self {
        self.modalities = modalities.into();
        self
    }

    pub fn with_partial_response(mut self, partial: impl Into<String>) -> Self {
        self.partial_response = Some(partial.into());
        self
    }

    pub fn with_attempts(mut self, attempt_count: u32, max_attempts: u32) -> Self {
        self.attempt_count = attempt_count;
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Classify an error by type, walking its source chain, then by message.
pub fn classify_error(error: &(dyn Error + 'static)) -> ErrorKind {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(kind) = classify_typed(err) {
            return kind;
        }
        current = err.source();
    }
    classify_message(&error.to_string())
}

fn classify_typed(error: &(dyn Error + 'static)) -> Option<ErrorKind> {
    if let Some(backend) = error.downcast_ref::<BackendError>() {
        return match backend {
            BackendError::Unavailable(_) => Some(ErrorKind::ModelUnavailable),
            BackendError::Timeout => Some(ErrorKind::ModelTimeout),
            BackendError::OutOfMemory(_) => Some(ErrorKind::MemoryExhaustion),
            BackendError::Interrupted(_) => Some(ErrorKind::StreamingInterruption),
            BackendError::Connection(_) => Some(ErrorKind::ConnectionFailure),
            BackendError::Other(_) => None,
        };
    }

    if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Some(ErrorKind::ModelTimeout);
    }

    if let Some(io_error) = error.downcast_ref::<io::Error>() {
        return match io_error.kind() {
            io::ErrorKind::TimedOut => Some(ErrorKind::ModelTimeout),
            io::ErrorKind::OutOfMemory => Some(ErrorKind::MemoryExhaustion),
            io::ErrorKind::UnexpectedEof => Some(ErrorKind::StreamingInterruption),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => Some(ErrorKind::ConnectionFailure),
            _ => None,
        };
    }

    None
}

/// Keyword heuristics over an error message. Unknown failures are
/// treated as performance degradation.
pub fn classify_message(message: &str) -> ErrorKind {
    let message = message.to_lowercase();
    let has = |needle: &str| message.contains(needle);

    if has("model") && (has("unavailable") || has("not found") || has("not loaded")) {
        ErrorKind::ModelUnavailable
    } else if has("timeout") || has("timed out") {
        ErrorKind::ModelTimeout
    } else if has("memory") || has("oom") {
        ErrorKind::MemoryExhaustion
    } else if has("stream") || has("interrupt") {
        ErrorKind::StreamingInterruption
    } else if has("connection") || has("network") {
        ErrorKind::ConnectionFailure
    } else if has("routing") || has("no route") {
        ErrorKind::RoutingError
    } else if has("quota") || has("capacity") || has("resource") {
        ErrorKind::ResourceConstraint
    } else if has("reasoning") {
        ErrorKind::ReasoningFailure
    } else {
        ErrorKind::PerformanceDegradation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classify_message_keywords() {
        assert_eq!(classify_message("Model llama not found"), ErrorKind::ModelUnavailable);
        assert_eq!(classify_message("request timed out"), ErrorKind::ModelTimeout);
        assert_eq!(classify_message("CUDA OOM"), ErrorKind::MemoryExhaustion);
        assert_eq!(classify_message("stream closed early"), ErrorKind::StreamingInterruption);
        assert_eq!(classify_message("network unreachable"), ErrorKind::ConnectionFailure);
        assert_eq!(classify_message("GPU quota exceeded"), ErrorKind::ResourceConstraint);
        assert_eq!(classify_message("something odd"), ErrorKind::PerformanceDegradation);
    }

    #[test]
    fn test_classify_io_errors_by_kind() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "peer went away");
        assert_eq!(classify_error(&err), ErrorKind::ConnectionFailure);

        let err = io::Error::new(io::ErrorKind::Other, "allocation: out of memory");
        assert_eq!(classify_error(&err), ErrorKind::MemoryExhaustion);
    }

    #[test]
    fn test_classify_backend_error() {
        let err = BackendError::Unavailable("m1".into());
        assert_eq!(classify_error(&err), ErrorKind::ModelUnavailable);
    }

    #[tokio::test]
    async fn test_classify_elapsed() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(classify_error(&elapsed), ErrorKind::ModelTimeout);
    }

    #[test]
    fn test_context_builders() {
        let ctx = ErrorContext::new(ErrorKind::ModelTimeout, "slow", "q")
            .with_model("m1")
            .with_modalities([Modality::Text, Modality::Image])
            .with_attempts(1, 4);
        assert_eq!(ctx.model_id.as_deref(), Some("m1"));
        assert_eq!(ctx.modalities.len(), 2);
        assert_eq!(ctx.max_attempts, Some(4));
        assert!(ctx.partial_response.is_none());
    }
}
