//! Resource guard for model-serving pipelines.
//!
//! Admission control, memory pressure relief and failure recovery for a
//! single serving process.

pub mod admission;
pub mod config;
pub mod context;
pub mod lifecycle;
pub mod memory;
pub mod observability;
pub mod recovery;
pub mod resources;
pub mod text;

pub use config::GuardConfig;
pub use context::{GuardContext, GuardContextBuilder, GuardStats};
