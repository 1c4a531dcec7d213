//! Registered cleanup targets.
//!
//! # Responsibilities
//! - Hold caches and models that can give memory back on request
//! - Sweep them during cache-cleanup, model-unload and emergency cleanup
//!
//! # Design Decisions
//! - The registry owns an `Arc` per registration and hands back a
//!   `HandleToken`; owners call `unregister` when they tear down
//! - Sweeps snapshot the handles before calling into them, so a handle may
//!   unregister itself (or others) from inside `clear`/`unload`
//! - A panicking handle counts as a failed one

use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("handle is busy: {0}")]
    Busy(String),

    #[error("cleanup failed: {0}")]
    Failed(String),
}

/// A cache that can drop its contents.
pub trait CacheHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Drop cached entries, returning an estimate of the bytes released.
    fn clear(&self) -> Result<u64, HandleError>;
}

/// A loaded model that can be unloaded.
pub trait ModelHandle: Send + Sync {
    fn model_id(&self) -> &str;

    /// Models serving a request are skipped by ordinary model-unload.
    fn is_active(&self) -> bool {
        false
    }

    /// Release the model's weights, returning an estimate of the bytes released.
    fn unload(&self) -> Result<u64, HandleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleToken(u64);

/// Totals from one sweep over registered handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes: u64,
}

impl SweepOutcome {
    /// Only a sweep where every attempted handle failed counts as a failure.
    pub fn is_failure(&self) -> bool {
        self.failed > 0 && self.succeeded == 0
    }

    fn record(&mut self, label: &str, result: Option<Result<u64, HandleError>>) {
        match result {
            Some(Ok(bytes)) => {
                self.succeeded += 1;
                self.bytes = self.bytes.saturating_add(bytes);
            }
            Some(Err(e)) => {
                self.failed += 1;
                tracing::warn!(handle = %label, error = %e, "Cleanup handle failed");
            }
            None => {
                self.failed += 1;
                tracing::error!(handle = %label, "Cleanup handle panicked");
            }
        }
    }
}

#[derive(Default)]
pub struct HandleRegistry {
    next_token: AtomicU64,
    caches: DashMap<HandleToken, Arc<dyn CacheHandle>>,
    models: DashMap<HandleToken, Arc<dyn ModelHandle>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_token(&self) -> HandleToken {
        HandleToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register_cache(&self, handle: Arc<dyn CacheHandle>) -> HandleToken {
        let token = self.issue_token();
        tracing::debug!(cache = %handle.name(), token = token.0, "Cache handle registered");
        self.caches.insert(token, handle);
        token
    }

    pub fn register_model(&self, handle: Arc<dyn ModelHandle>) -> HandleToken {
        let token = self.issue_token();
        tracing::debug!(model = %handle.model_id(), token = token.0, "Model handle registered");
        self.models.insert(token, handle);
        token
    }

    /// Returns false if the token was never issued or already removed.
    pub fn unregister(&self, token: HandleToken) -> bool {
        self.caches.remove(&token).is_some() || self.models.remove(&token).is_some()
    }

    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn clear_caches(&self) -> SweepOutcome {
        let caches: Vec<Arc<dyn CacheHandle>> =
            self.caches.iter().map(|entry| entry.value().clone()).collect();

        let mut outcome = SweepOutcome::default();
        for cache in caches {
            let result = panic::catch_unwind(AssertUnwindSafe(|| cache.clear())).ok();
            outcome.record(cache.name(), result);
        }
        outcome
    }

    /// Unload registered models. Active models are skipped unless `include_active`.
    pub fn unload_models(&self, include_active: bool) -> SweepOutcome {
        let models: Vec<Arc<dyn ModelHandle>> =
            self.models.iter().map(|entry| entry.value().clone()).collect();

        let mut outcome = SweepOutcome::default();
        for model in models {
            if !include_active && model.is_active() {
                outcome.skipped += 1;
                continue;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| model.unload())).ok();
            outcome.record(model.model_id(), result);
        }
        outcome
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.caches.clear();
        self.models.clear();
    }
}
