//! Host resource sampling.
//!
//! # Data Flow
//! ```text
//! sysinfo / GPU probe
//!     → sampler.rs (ResourceSampler: one fresh reading per call)
//!     → snapshot.rs (ResourceSnapshot / MemoryReading, immutable)
//!     → history.rs (bounded ring of recent samples)
//!     → admission controller and memory pressure monitor
//! ```
//!
//! # Design Decisions
//! - Samplers are traits so tests can script host conditions
//! - Snapshots are values; nothing mutates a reading after it is taken
//! - History rings are append-only and drop their oldest entry when full

pub mod history;
pub mod sampler;
pub mod snapshot;

pub use history::SampleHistory;
pub use sampler::{GpuProbe, GpuReading, ResourceSampler, SystemSampler};
pub use snapshot::{MemoryReading, ResourceSnapshot, MB};
