//! Background task lifecycle.
//!
//! # Data Flow
//! ```text
//! Start (shutdown.rs):
//!     spawn(name, task) → task subscribes to the shutdown broadcast
//!
//! Stop (shutdown.rs):
//!     trigger → every task leaves its select loop → drain awaits handles
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → caller triggers shutdown
//! ```
//!
//! # Design Decisions
//! - One broadcast channel for all loops; a task that misses the signal is
//!   aborted once the drain deadline passes

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_termination;
