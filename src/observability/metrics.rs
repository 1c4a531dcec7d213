//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_admission_total` (counter): decisions by outcome and priority
//! - `guard_preemptions_total` (counter): allocations evicted by higher priority work
//! - `guard_active_allocations` (gauge): current allocation table size
//! - `guard_granted_cpu_percent` (gauge): sum of granted CPU across active allocations
//! - `guard_usage_overruns_total` (counter): usage reports above the grant, by resource
//! - `guard_rebalance_actions_total` (counter): shrink/grow/expire actions
//! - `guard_memory_usage_percent` (gauge) and `guard_memory_pressure_tier` (gauge 0-4)
//! - `guard_memory_optimizations_total` (counter): by strategy and result
//! - `guard_memory_freed_bytes_total` (counter)
//! - `guard_recoveries_total` (counter): by error kind, strategy and degradation level
//! - `guard_recovery_duration_seconds` (histogram)

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_admission(outcome: &'static str, priority: &'static str) {
    ::metrics::counter!("guard_admission_total", "outcome" => outcome, "priority" => priority)
        .increment(1);
}

pub fn record_preemption(victim_priority: &'static str) {
    ::metrics::counter!("guard_preemptions_total", "victim_priority" => victim_priority)
        .increment(1);
}

pub fn record_allocation_table(active: usize, granted_cpu: f64) {
    ::metrics::gauge!("guard_active_allocations").set(active as f64);
    ::metrics::gauge!("guard_granted_cpu_percent").set(granted_cpu);
}

pub fn record_usage_overrun(resource: &'static str) {
    ::metrics::counter!("guard_usage_overruns_total", "resource" => resource).increment(1);
}

pub fn record_rebalance(action: &'static str, count: usize) {
    if count > 0 {
        ::metrics::counter!("guard_rebalance_actions_total", "action" => action)
            .increment(count as u64);
    }
}

pub fn record_memory_status(usage_percent: f64, tier_level: u8) {
    ::metrics::gauge!("guard_memory_usage_percent").set(usage_percent);
    ::metrics::gauge!("guard_memory_pressure_tier").set(f64::from(tier_level));
}

pub fn record_optimization(strategy: &'static str, success: bool, freed_bytes: u64) {
    let result = if success { "success" } else { "failure" };
    ::metrics::counter!("guard_memory_optimizations_total", "strategy" => strategy, "result" => result)
        .increment(1);
    if freed_bytes > 0 {
        ::metrics::counter!("guard_memory_freed_bytes_total").increment(freed_bytes);
    }
}

pub fn record_recovery(
    kind: &'static str,
    strategy: &'static str,
    degradation_level: u8,
    elapsed: Duration,
) {
    ::metrics::counter!(
        "guard_recoveries_total",
        "kind" => kind,
        "strategy" => strategy,
        "level" => degradation_level.to_string()
    )
    .increment(1);
    ::metrics::histogram!("guard_recovery_duration_seconds", "kind" => kind)
        .record(elapsed.as_secs_f64());
}
