//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Admission, memory and recovery components produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → Log aggregation (stdout, text or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every decision (grant, deny, preempt, recover)
//! - Metric calls are no-ops until a recorder is installed, so the library
//!   never forces an exporter on its host process

pub mod logging;
pub mod metrics;
