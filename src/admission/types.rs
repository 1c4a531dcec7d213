//! Admission data model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Request priority; variants are ordered from least to most important.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// High and Urgent requests may pass critical-pressure gates.
    pub fn is_elevated(self) -> bool {
        self >= Priority::High
    }
}

/// Opaque allocation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocationId(Uuid);

impl AllocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc-{}", self.0)
    }
}

/// What a caller asks for before dispatching work.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub request_id: String,
    pub query_id: String,
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub gpu_percent: Option<f64>,
    pub timeout: Duration,
    pub priority: Priority,
    pub created_at: SystemTime,
    pub metadata: HashMap<String, String>,
}

impl ResourceRequest {
    pub fn new(
        query_id: impl Into<String>,
        cpu_percent: f64,
        memory_mb: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            request_id: format!("req-{}", Uuid::new_v4()),
            query_id: query_id.into(),
            cpu_percent,
            memory_mb,
            gpu_percent: None,
            timeout,
            priority: Priority::Normal,
            created_at: SystemTime::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_gpu(mut self, gpu_percent: f64) -> Self {
        self.gpu_percent = Some(gpu_percent);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// CPU and memory must be positive, timeout non-zero, GPU (if any) positive.
    pub fn is_well_formed(&self) -> bool {
        self.cpu_percent.is_finite()
            && self.cpu_percent > 0.0
            && self.memory_mb > 0
            && !self.timeout.is_zero()
            && self.gpu_percent.map_or(true, |g| g.is_finite() && g > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Allocated,
    Pending,
    Denied,
    Released,
    Expired,
}

/// Usage observed by the caller while running inside an envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedUsage {
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<u64>,
    pub gpu_percent: Option<f64>,
}

impl ObservedUsage {
    /// Overwrite the fields present in `other`, keep the rest.
    pub fn merge(&mut self, other: ObservedUsage) {
        if other.cpu_percent.is_some() {
            self.cpu_percent = other.cpu_percent;
        }
        if other.memory_mb.is_some() {
            self.memory_mb = other.memory_mb;
        }
        if other.gpu_percent.is_some() {
            self.gpu_percent = other.gpu_percent;
        }
    }
}

/// A granted resource envelope.
///
/// Granted amounts may be lower than requested. Owned by the controller's
/// allocation table; callers receive clones.
#[derive(Debug, Clone)]
pub struct ResourceAllocation {
    pub id: AllocationId,
    pub request: ResourceRequest,
    pub granted_cpu: f64,
    pub granted_memory_mb: u64,
    pub granted_gpu: Option<f64>,
    pub status: AllocationStatus,
    pub granted_at: Instant,
    pub expires_at: Instant,
    pub actual_usage: ObservedUsage,
}

impl ResourceAllocation {
    pub fn priority(&self) -> Priority {
        self.request.priority
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DenialReason {
    #[error("malformed request: cpu, memory and timeout must be positive")]
    InvalidRequest,

    #[error("global CPU ceiling reached: {granted:.1}% granted + {requested:.1}% requested > {ceiling:.1}%")]
    GlobalCpuCeiling {
        granted: f64,
        requested: f64,
        ceiling: f64,
    },

    #[error("host CPU at {cpu:.1}% is above the critical threshold")]
    CpuCritical { cpu: f64 },

    #[error("requested {requested_mb} MB but only {available_mb} MB available")]
    InsufficientMemory { requested_mb: u64, available_mb: u64 },

    #[error("host memory at {memory:.1}% is above the critical threshold")]
    MemoryCritical { memory: f64 },

    #[error("host GPU at {gpu:.1}% is above the critical threshold")]
    GpuCritical { gpu: f64 },

    #[error("{active} allocations active and no lower-priority allocation to preempt (lowest: {lowest:?})")]
    ConcurrencyLimit { active: usize, lowest: Priority },
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::InvalidRequest => "invalid_request",
            DenialReason::GlobalCpuCeiling { .. } => "global_cpu_ceiling",
            DenialReason::CpuCritical { .. } => "cpu_critical",
            DenialReason::InsufficientMemory { .. } => "insufficient_memory",
            DenialReason::MemoryCritical { .. } => "memory_critical",
            DenialReason::GpuCritical { .. } => "gpu_critical",
            DenialReason::ConcurrencyLimit { .. } => "concurrency_limit",
        }
    }
}

/// Outcome of an admission attempt. A denial is backpressure, not an error.
#[derive(Debug, Clone)]
pub enum AdmissionDecision {
    Granted {
        allocation: ResourceAllocation,
        /// Lower-priority allocation evicted to make room, if any.
        preempted: Option<AllocationId>,
    },
    Denied(DenialReason),
}

impl AdmissionDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AdmissionDecision::Granted { .. })
    }

    pub fn allocation(&self) -> Option<&ResourceAllocation> {
        match self {
            AdmissionDecision::Granted { allocation, .. } => Some(allocation),
            AdmissionDecision::Denied(_) => None,
        }
    }

    pub fn into_allocation(self) -> Option<ResourceAllocation> {
        match self {
            AdmissionDecision::Granted { allocation, .. } => Some(allocation),
            AdmissionDecision::Denied(_) => None,
        }
    }

    pub fn denial(&self) -> Option<&DenialReason> {
        match self {
            AdmissionDecision::Granted { .. } => None,
            AdmissionDecision::Denied(reason) => Some(reason),
        }
    }
}

/// Result of a usage report, for the caller's telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageReport {
    /// The allocation is not (or no longer) in the table.
    Unknown,
    WithinEnvelope,
    Exceeded { cpu: bool, memory: bool },
}

/// What one rebalancing tick changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceReport {
    pub shrunk_cpu: Vec<AllocationId>,
    pub shrunk_memory: Vec<AllocationId>,
    pub grown_cpu: Vec<AllocationId>,
    pub grown_memory: Vec<AllocationId>,
    pub expired: Vec<AllocationId>,
}

impl RebalanceReport {
    pub fn is_empty(&self) -> bool {
        self.shrunk_cpu.is_empty()
            && self.shrunk_memory.is_empty()
            && self.grown_cpu.is_empty()
            && self.grown_memory.is_empty()
            && self.expired.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::High < Priority::Urgent);
        assert!(Priority::High.is_elevated());
        assert!(!Priority::Normal.is_elevated());
    }

    #[test]
    fn test_well_formed_request() {
        let ok = ResourceRequest::new("q1", 5.0, 100, Duration::from_secs(10));
        assert!(ok.is_well_formed());

        let mut bad = ok.clone();
        bad.cpu_percent = 0.0;
        assert!(!bad.is_well_formed());

        let mut bad = ok.clone();
        bad.timeout = Duration::ZERO;
        assert!(!bad.is_well_formed());

        assert!(!ok.with_gpu(-1.0).is_well_formed());
    }

    #[test]
    fn test_usage_merge_keeps_missing_fields() {
        let mut usage = ObservedUsage {
            cpu_percent: Some(3.0),
            memory_mb: Some(100),
            gpu_percent: None,
        };
        usage.merge(ObservedUsage {
            memory_mb: Some(250),
            ..Default::default()
        });
        assert_eq!(usage.cpu_percent, Some(3.0));
        assert_eq!(usage.memory_mb, Some(250));
    }
}
