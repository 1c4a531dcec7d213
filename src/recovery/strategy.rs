//! Recovery strategies and the per-kind strategy table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::recovery::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    FallbackModel,
    ReduceComplexity,
    CacheFallback,
    PartialResponse,
    GracefulDegradation,
    RetryWithBackoff,
    EmergencyResponse,
}

impl RecoveryStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::FallbackModel => "fallback_model",
            RecoveryStrategy::ReduceComplexity => "reduce_complexity",
            RecoveryStrategy::CacheFallback => "cache_fallback",
            RecoveryStrategy::PartialResponse => "partial_response",
            RecoveryStrategy::GracefulDegradation => "graceful_degradation",
            RecoveryStrategy::RetryWithBackoff => "retry_with_backoff",
            RecoveryStrategy::EmergencyResponse => "emergency_response",
        }
    }

    /// Ordered strategies to try for a failure kind.
    pub fn plan_for(kind: ErrorKind) -> &'static [RecoveryStrategy] {
        use RecoveryStrategy::*;

        match kind {
            ErrorKind::ModelUnavailable => &[FallbackModel, CacheFallback, EmergencyResponse],
            ErrorKind::ModelTimeout => &[RetryWithBackoff, FallbackModel, CacheFallback],
            ErrorKind::RoutingError => &[FallbackModel, CacheFallback],
            ErrorKind::MemoryExhaustion => &[ReduceComplexity, FallbackModel, GracefulDegradation],
            ErrorKind::StreamingInterruption => &[PartialResponse, RetryWithBackoff, CacheFallback],
            ErrorKind::PerformanceDegradation => {
                &[ReduceComplexity, CacheFallback, GracefulDegradation]
            }
            ErrorKind::ResourceConstraint => &[ReduceComplexity, GracefulDegradation],
            ErrorKind::ConnectionFailure => &[RetryWithBackoff, CacheFallback],
            ErrorKind::ReasoningFailure => &[ReduceComplexity, FallbackModel, CacheFallback],
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
