//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ceilings > 0, factors in range)
//! - Check ordering of thresholds (warning < critical, tiers ascending)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::GuardConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let limits = &config.limits;
    if limits.max_cpu_per_request <= 0.0 || limits.max_cpu_per_request > 100.0 {
        errors.push(ValidationError::new(
            "limits.max_cpu_per_request",
            "must be in (0, 100]",
        ));
    }
    if limits.max_memory_per_request_mb == 0 {
        errors.push(ValidationError::new(
            "limits.max_memory_per_request_mb",
            "must be greater than zero",
        ));
    }
    if limits.max_gpu_per_request <= 0.0 || limits.max_gpu_per_request > 100.0 {
        errors.push(ValidationError::new(
            "limits.max_gpu_per_request",
            "must be in (0, 100]",
        ));
    }
    if limits.max_concurrent_allocations == 0 {
        errors.push(ValidationError::new(
            "limits.max_concurrent_allocations",
            "must be greater than zero",
        ));
    }
    if limits.cpu_warning >= limits.cpu_critical {
        errors.push(ValidationError::new(
            "limits.cpu_warning",
            format!(
                "warning ({}) must be below critical ({})",
                limits.cpu_warning, limits.cpu_critical
            ),
        ));
    }
    if limits.memory_warning >= limits.memory_critical {
        errors.push(ValidationError::new(
            "limits.memory_warning",
            format!(
                "warning ({}) must be below critical ({})",
                limits.memory_warning, limits.memory_critical
            ),
        ));
    }
    if let (Some(warning), Some(critical)) = (limits.gpu_warning, limits.gpu_critical) {
        if warning >= critical {
            errors.push(ValidationError::new(
                "limits.gpu_warning",
                format!("warning ({warning}) must be below critical ({critical})"),
            ));
        }
    }
    if limits.usage_tolerance < 0.0 {
        errors.push(ValidationError::new(
            "limits.usage_tolerance",
            "must not be negative",
        ));
    }

    let rebalance = &config.rebalance;
    if rebalance.interval_secs == 0 {
        errors.push(ValidationError::new(
            "rebalance.interval_secs",
            "must be greater than zero",
        ));
    }
    if !(rebalance.shrink_factor > 0.0 && rebalance.shrink_factor < 1.0) {
        errors.push(ValidationError::new(
            "rebalance.shrink_factor",
            "must be in (0, 1)",
        ));
    }
    if rebalance.cpu_grow_factor < 1.0 || rebalance.memory_grow_factor < 1.0 {
        errors.push(ValidationError::new(
            "rebalance.grow_factor",
            "grow factors must be at least 1.0",
        ));
    }
    if rebalance.history_capacity == 0 {
        errors.push(ValidationError::new(
            "rebalance.history_capacity",
            "must be greater than zero",
        ));
    }

    let memory = &config.memory;
    let t = memory.thresholds;
    if !(t.moderate < t.high && t.high < t.critical && t.critical < t.emergency) {
        errors.push(ValidationError::new(
            "memory.thresholds",
            "tier breakpoints must be strictly ascending",
        ));
    }
    if t.emergency > 100.0 || t.moderate <= 0.0 {
        errors.push(ValidationError::new(
            "memory.thresholds",
            "tier breakpoints must lie in (0, 100]",
        ));
    }
    if memory.history_capacity == 0 {
        errors.push(ValidationError::new(
            "memory.history_capacity",
            "must be greater than zero",
        ));
    }
    if memory.watch_interval_secs == 0 {
        errors.push(ValidationError::new(
            "memory.watch_interval_secs",
            "must be greater than zero",
        ));
    }
    if !(memory.batch_size_factor > 0.0 && memory.batch_size_factor <= 1.0) {
        errors.push(ValidationError::new(
            "memory.batch_size_factor",
            "must be in (0, 1]",
        ));
    }

    let recovery = &config.recovery;
    if !(0.0..=1.0).contains(&recovery.similarity_floor) {
        errors.push(ValidationError::new(
            "recovery.similarity_floor",
            "must be in [0, 1]",
        ));
    }
    if recovery.max_backoff_secs == 0 {
        errors.push(ValidationError::new(
            "recovery.max_backoff_secs",
            "must be greater than zero",
        ));
    }
    for model in &recovery.models {
        if model.id.trim().is_empty() {
            errors.push(ValidationError::new(
                "recovery.models",
                "model id must not be empty",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
