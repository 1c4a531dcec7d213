//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     ResourceRequest
//!     → controller.rs (sample host, check ceilings/thresholds/concurrency)
//!     → Granted(ResourceAllocation) | Denied(DenialReason)
//!     → caller runs the work, then release() / report_usage()
//!
//! Background (rebalance.rs):
//!     Periodic timer
//!     → sample host
//!     → shrink low-priority grants under critical pressure
//!     → grow High/Urgent grants when resources are abundant
//!     → expire allocations past their deadline
//! ```
//!
//! # Design Decisions
//! - `allocate` never waits: a denial is immediate backpressure for the caller
//! - One lock guards the allocation table; every mutation happens under it
//! - The rebalancer is the only component that expires allocations

pub mod controller;
pub mod rebalance;
pub mod types;

pub use controller::{AdmissionController, AdmissionStats};
pub use rebalance::Rebalancer;
pub use types::{
    AdmissionDecision, AllocationId, AllocationStatus, DenialReason, ObservedUsage, Priority,
    RebalanceReport, ResourceAllocation, ResourceRequest, UsageReport,
};
