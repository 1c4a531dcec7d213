//! Memory pressure subsystem.
//!
//! # Data Flow
//! ```text
//! Sample (monitor.rs):
//!     sampler.sample_memory()
//!     → pressure.rs (classify into Low/Moderate/High/Critical/Emergency)
//!     → bounded history
//!
//! Exhaustion (monitor.rs):
//!     tier → optimization.rs (ordered chain for the tier)
//!     → each action: allocator trim / handles.rs sweep / generation hints
//!     → re-sample after every success, stop once Low/Moderate
//!     → degraded text when pressure is still High or worse
//! ```
//!
//! # Design Decisions
//! - Cleanup-capable objects are registered explicitly and addressed by token;
//!   owners unregister them before dropping the underlying object
//! - A failing action is recorded and the chain moves on
//! - Cheaper-generation hints stay set until a sample reports Low/Moderate

pub mod handles;
pub mod monitor;
pub mod optimization;
pub mod pressure;

pub use handles::{
    CacheHandle, HandleError, HandleRegistry, HandleToken, ModelHandle, SweepOutcome,
};
pub use monitor::{MemoryPressureMonitor, MemoryRecoveryResult, MemoryStats, MemoryWatch};
pub use optimization::{GenerationHints, MemoryOptimization, OptimizationStrategy};
pub use pressure::{MemoryStatus, PressureTier};
