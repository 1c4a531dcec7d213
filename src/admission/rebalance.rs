//! Background rebalancing loop.
//!
//! # Responsibilities
//! - Periodically sample host resources
//! - Shrink, grow and expire allocations via `AdmissionController::rebalance_tick`
//!
//! # Design Decisions
//! - Sole authority for expiring allocations: an unreleased allocation is
//!   reclaimed within one tick after its deadline
//! - Sampling can block briefly (process enumeration), so each tick runs on
//!   the blocking pool

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::admission::controller::AdmissionController;

/// Periodic driver for `AdmissionController::rebalance_tick`.
pub struct Rebalancer {
    controller: Arc<AdmissionController>,
    interval: Duration,
}

impl Rebalancer {
    /// Create a rebalancer ticking every `interval`.
    pub fn new(controller: Arc<AdmissionController>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Rebalancer starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rebalancer received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn tick(&self) {
        let controller = self.controller.clone();
        match tokio::task::spawn_blocking(move || controller.rebalance_tick()).await {
            Ok(report) if !report.is_empty() => {
                tracing::debug!(
                    expired = report.expired.len(),
                    shrunk_cpu = report.shrunk_cpu.len(),
                    shrunk_memory = report.shrunk_memory.len(),
                    grown_cpu = report.grown_cpu.len(),
                    grown_memory = report.grown_memory.len(),
                    "Rebalance tick applied changes"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Rebalance tick failed");
            }
        }
    }
}
