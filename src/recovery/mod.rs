//! Failure recovery.
//!
//! # Data Flow
//! ```text
//! caller failure
//!     → error.rs (ErrorContext; classify when the caller has no kind)
//!     → strategy.rs (ordered strategies for the kind)
//!     → orchestrator.rs (run strategies in order, first non-empty response wins)
//!         ├─ backend.rs   (InferenceBackend / ResponseCache seams)
//!         ├─ models.rs    (compatible fallback models)
//!         ├─ backoff.rs   (retry delays)
//!         └─ responses.rs (notices, canned texts, query simplification)
//!     → RecoveryResult (always carries a response)
//! ```
//!
//! # Design Decisions
//! - Strategies run sequentially; later ones depend on what earlier ones
//!   learned (e.g. a consumed retry budget)
//! - Strategy failures stay inside the orchestrator; the emergency text is
//!   the floor

pub mod backend;
pub mod backoff;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod responses;
pub mod strategy;

pub use backend::{
    BackendError, CachedResponse, GenerationParams, InferenceBackend, OfflineBackend, ResponseCache,
};
pub use error::{classify_error, classify_message, ErrorContext, ErrorKind};
pub use models::{Modality, ModelCapability, ModelRegistry, StaticModelRegistry};
pub use orchestrator::{RecoveryOrchestrator, RecoveryResult, RecoveryStats};
pub use strategy::RecoveryStrategy;
