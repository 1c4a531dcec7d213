//! Inference backend and response cache seams.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::memory::GenerationHints;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("model {0} is unavailable")]
    Unavailable(String),

    #[error("generation timed out")]
    Timeout,

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("stream interrupted: {0}")]
    Interrupted(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

/// Generation settings passed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub max_tokens: Option<u32>,
    /// Ask for a short, plain answer.
    pub simplified: bool,
}

impl GenerationParams {
    pub fn normal() -> Self {
        Self {
            max_tokens: None,
            simplified: false,
        }
    }

    pub fn reduced(max_tokens: u32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            simplified: true,
        }
    }

    /// Tighten these params with the memory monitor's active hints.
    ///
    /// Never loosens: the smaller token cap wins and `simplified` stays set.
    pub fn constrained_by(self, hints: &GenerationHints) -> Self {
        let cap = hints
            .context_token_cap
            .map(|cap| u32::try_from(cap).unwrap_or(u32::MAX));
        let max_tokens = match (self.max_tokens, cap) {
            (Some(own), Some(cap)) => Some(own.min(cap)),
            (own, cap) => own.or(cap),
        };
        Self {
            max_tokens,
            simplified: self.simplified || hints.simplified_responses,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::normal()
    }
}

/// Runs a query against a model.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// `model_id` of `None` means the backend's default model.
    async fn execute(
        &self,
        model_id: Option<&str>,
        query: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub response: String,
    /// Similarity of the cached query to the looked-up one, 0.0 to 1.0.
    pub similarity: f64,
}

/// Semantic response cache.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn lookup(&self, query: &str) -> Option<CachedResponse>;
}

/// Backend that has no models; every call fails with `Unavailable`.
///
/// Recovery then falls through to cached and canned responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBackend;

#[async_trait]
impl InferenceBackend for OfflineBackend {
    async fn execute(
        &self,
        model_id: Option<&str>,
        _query: &str,
        _params: &GenerationParams,
    ) -> Result<String, BackendError> {
        Err(BackendError::Unavailable(
            model_id.unwrap_or("default").to_string(),
        ))
    }
}
