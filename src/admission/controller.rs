//! Admission controller.
//!
//! # Responsibilities
//! - Grant or deny bounded resource envelopes per request
//! - Enforce the global CPU ceiling, host thresholds and concurrency limit
//! - Preempt the lowest-priority allocation for strictly higher priority work
//! - Track observed usage and rebalance grants as host pressure changes

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use crate::admission::types::{
    AdmissionDecision, AllocationId, AllocationStatus, DenialReason, ObservedUsage, Priority,
    RebalanceReport, ResourceAllocation, ResourceRequest, UsageReport,
};
use crate::config::{RebalanceConfig, ResourceLimits};
use crate::observability::metrics;
use crate::resources::{ResourceSampler, ResourceSnapshot, SampleHistory};

type AllocationTable = HashMap<AllocationId, ResourceAllocation>;

/// Point-in-time view of the controller, for dashboards and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub resources: ResourceSnapshot,
    pub active_allocations: usize,
    pub total_granted_cpu: f64,
    pub total_granted_memory_mb: u64,
    pub by_priority: BTreeMap<Priority, usize>,
    pub limits: ResourceLimits,
}

/// Grants bounded resource envelopes and keeps the allocation table.
pub struct AdmissionController {
    limits: ResourceLimits,
    rebalance: RebalanceConfig,
    sampler: Arc<dyn ResourceSampler>,
    table: Mutex<AllocationTable>,
    history: SampleHistory<ResourceSnapshot>,
}

impl AdmissionController {
    /// Create a controller with an empty allocation table.
    pub fn new(
        limits: ResourceLimits,
        rebalance: RebalanceConfig,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Self {
        let history = SampleHistory::new(rebalance.history_capacity);
        Self {
            limits,
            rebalance,
            sampler,
            table: Mutex::new(HashMap::new()),
            history,
        }
    }

    /// Get the per-request and host limits in force.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    fn lock_table(&self) -> MutexGuard<'_, AllocationTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sample(&self) -> ResourceSnapshot {
        let snapshot = self.sampler.sample();
        self.history.push(snapshot.clone());
        snapshot
    }

    /// Decide whether `request` may run now. Never blocks on capacity.
    pub fn allocate(&self, request: ResourceRequest) -> AdmissionDecision {
        let priority = request.priority;

        if !request.is_well_formed() {
            return self.deny(&request, DenialReason::InvalidRequest);
        }

        // A deadline past the clock's range is rejected before the table is touched.
        let now = Instant::now();
        let Some(expires_at) = now.checked_add(request.timeout) else {
            return self.deny(&request, DenialReason::InvalidRequest);
        };

        let snapshot = self.sampler.sample_quick();
        let mut table = self.lock_table();

        let preempt = match self.check(&table, &request, &snapshot) {
            Ok(preempt) => preempt,
            Err(reason) => {
                drop(table);
                return self.deny(&request, reason);
            }
        };

        let granted_memory_mb = request
            .memory_mb
            .min(self.limits.max_memory_per_request_mb)
            .min(snapshot.memory_available_mb / 2);
        if granted_memory_mb == 0 {
            drop(table);
            let reason = DenialReason::InsufficientMemory {
                requested_mb: request.memory_mb,
                available_mb: snapshot.memory_available_mb,
            };
            return self.deny(&request, reason);
        }

        let granted_gpu = match (request.gpu_percent, snapshot.gpu_percent) {
            (Some(requested), Some(_)) => Some(requested.min(self.limits.max_gpu_per_request)),
            _ => None,
        };

        if let Some(victim_id) = preempt {
            if let Some(mut victim) = table.remove(&victim_id) {
                victim.status = AllocationStatus::Released;
                tracing::warn!(
                    allocation = %victim.id,
                    query_id = %victim.request.query_id,
                    victim_priority = victim.priority().as_str(),
                    preempted_by = priority.as_str(),
                    "Allocation preempted by higher priority request"
                );
                metrics::record_preemption(victim.priority().as_str());
            }
        }

        let allocation = ResourceAllocation {
            id: AllocationId::new(),
            granted_cpu: request.cpu_percent.min(self.limits.max_cpu_per_request),
            granted_memory_mb,
            granted_gpu,
            status: AllocationStatus::Allocated,
            granted_at: now,
            expires_at,
            actual_usage: ObservedUsage::default(),
            request,
        };

        table.insert(allocation.id, allocation.clone());
        metrics::record_allocation_table(table.len(), total_cpu(&table));
        drop(table);

        tracing::info!(
            allocation = %allocation.id,
            query_id = %allocation.request.query_id,
            priority = priority.as_str(),
            cpu = allocation.granted_cpu,
            memory_mb = allocation.granted_memory_mb,
            gpu = ?allocation.granted_gpu,
            "Resources allocated"
        );
        metrics::record_admission("granted", priority.as_str());

        AdmissionDecision::Granted {
            allocation,
            preempted: preempt,
        }
    }

    /// Run the admission checks against the locked table.
    ///
    /// Returns the allocation to preempt, if the table is full and the request
    /// outranks its lowest-priority entry.
    fn check(
        &self,
        table: &AllocationTable,
        request: &ResourceRequest,
        snapshot: &ResourceSnapshot,
    ) -> Result<Option<AllocationId>, DenialReason> {
        let limits = &self.limits;

        // Oldest allocation among the lowest priority loses the tie.
        let preempt = if table.len() >= limits.max_concurrent_allocations {
            let lowest = table
                .values()
                .min_by(|a, b| {
                    a.priority()
                        .cmp(&b.priority())
                        .then(a.granted_at.cmp(&b.granted_at))
                })
                .map(|a| (a.id, a.priority()));
            match lowest {
                Some((id, lowest)) if request.priority > lowest => Some(id),
                Some((_, lowest)) => {
                    return Err(DenialReason::ConcurrencyLimit {
                        active: table.len(),
                        lowest,
                    })
                }
                None => None,
            }
        } else {
            None
        };

        // The ceiling is measured against the table as it will look after preemption.
        let granted: f64 = table
            .values()
            .filter(|a| Some(a.id) != preempt)
            .map(|a| a.granted_cpu)
            .sum();
        let ceiling = limits.global_cpu_ceiling();
        if granted + request.cpu_percent > ceiling && snapshot.cpu_percent >= limits.cpu_warning {
            return Err(DenialReason::GlobalCpuCeiling {
                granted,
                requested: request.cpu_percent,
                ceiling,
            });
        }

        if snapshot.cpu_percent > limits.cpu_critical && !request.priority.is_elevated() {
            return Err(DenialReason::CpuCritical {
                cpu: snapshot.cpu_percent,
            });
        }

        if request.memory_mb > snapshot.memory_available_mb {
            return Err(DenialReason::InsufficientMemory {
                requested_mb: request.memory_mb,
                available_mb: snapshot.memory_available_mb,
            });
        }

        if snapshot.memory_percent > limits.memory_critical && !request.priority.is_elevated() {
            return Err(DenialReason::MemoryCritical {
                memory: snapshot.memory_percent,
            });
        }

        if let (Some(_), Some(gpu), Some(critical)) =
            (request.gpu_percent, snapshot.gpu_percent, limits.gpu_critical)
        {
            if gpu > critical {
                return Err(DenialReason::GpuCritical { gpu });
            }
        }

        Ok(preempt)
    }

    fn deny(&self, request: &ResourceRequest, reason: DenialReason) -> AdmissionDecision {
        tracing::warn!(
            query_id = %request.query_id,
            priority = request.priority.as_str(),
            reason = reason.as_str(),
            detail = %reason,
            "Resource allocation denied"
        );
        metrics::record_admission(reason.as_str(), request.priority.as_str());
        AdmissionDecision::Denied(reason)
    }

    /// Remove an allocation. Unknown or already-released ids are a logged no-op.
    pub fn release(&self, id: &AllocationId) -> bool {
        let mut table = self.lock_table();
        match table.remove(id) {
            Some(mut allocation) => {
                allocation.status = AllocationStatus::Released;
                metrics::record_allocation_table(table.len(), total_cpu(&table));
                drop(table);
                tracing::info!(
                    allocation = %id,
                    query_id = %allocation.request.query_id,
                    "Resources released"
                );
                true
            }
            None => {
                drop(table);
                tracing::warn!(allocation = %id, "Allocation not found for release");
                false
            }
        }
    }

    /// Record usage observed by the caller and flag overruns beyond tolerance.
    pub fn report_usage(&self, id: &AllocationId, observed: ObservedUsage) -> UsageReport {
        let mut table = self.lock_table();
        let Some(allocation) = table.get_mut(id) else {
            tracing::debug!(allocation = %id, "Usage reported for unknown allocation");
            return UsageReport::Unknown;
        };

        allocation.actual_usage.merge(observed);
        let factor = 1.0 + self.limits.usage_tolerance;
        let cpu = observed
            .cpu_percent
            .is_some_and(|cpu| cpu > allocation.granted_cpu * factor);
        let memory = observed
            .memory_mb
            .is_some_and(|mem| mem as f64 > allocation.granted_memory_mb as f64 * factor);
        let granted_cpu = allocation.granted_cpu;
        let granted_memory_mb = allocation.granted_memory_mb;
        drop(table);

        if cpu {
            tracing::warn!(
                allocation = %id,
                granted = granted_cpu,
                observed = ?observed.cpu_percent,
                "CPU usage exceeded allocation"
            );
            metrics::record_usage_overrun("cpu");
        }
        if memory {
            tracing::warn!(
                allocation = %id,
                granted_mb = granted_memory_mb,
                observed_mb = ?observed.memory_mb,
                "Memory usage exceeded allocation"
            );
            metrics::record_usage_overrun("memory");
        }

        if cpu || memory {
            UsageReport::Exceeded { cpu, memory }
        } else {
            UsageReport::WithinEnvelope
        }
    }

    /// One rebalancing pass: sample, expire, then shrink or grow grants.
    pub fn rebalance_tick(&self) -> RebalanceReport {
        let snapshot = self.sample();
        self.rebalance_with(&snapshot)
    }

    fn rebalance_with(&self, snapshot: &ResourceSnapshot) -> RebalanceReport {
        let limits = &self.limits;
        let policy = &self.rebalance;
        let now = Instant::now();
        let mut report = RebalanceReport::default();
        let mut table = self.lock_table();

        table.retain(|id, allocation| {
            if allocation.is_expired_at(now) {
                allocation.status = AllocationStatus::Expired;
                report.expired.push(*id);
                false
            } else {
                true
            }
        });

        // Lowest priority first, oldest first within a priority.
        let mut by_priority: Vec<(Priority, Instant, AllocationId)> = table
            .values()
            .map(|a| (a.priority(), a.granted_at, a.id))
            .collect();
        by_priority.sort();

        if snapshot.cpu_percent > limits.cpu_critical {
            let victims: Vec<AllocationId> = by_priority
                .iter()
                .take(policy.max_cpu_victims)
                .map(|(_, _, id)| *id)
                .collect();
            for id in victims {
                if let Some(allocation) = table.get_mut(&id) {
                    allocation.granted_cpu *= policy.shrink_factor;
                    report.shrunk_cpu.push(id);
                }
            }
        } else if snapshot.cpu_percent < policy.cpu_abundant_below {
            for (priority, _, id) in by_priority.iter().rev() {
                if !priority.is_elevated() {
                    continue;
                }
                if let Some(allocation) = table.get_mut(id) {
                    let target = allocation
                        .request
                        .cpu_percent
                        .min(limits.max_cpu_per_request);
                    if allocation.granted_cpu < target {
                        allocation.granted_cpu =
                            (allocation.granted_cpu * policy.cpu_grow_factor).min(target);
                        report.grown_cpu.push(*id);
                    }
                }
            }
        }

        if snapshot.memory_percent > limits.memory_critical {
            let mut shrunk = 0;
            for (_, _, id) in &by_priority {
                if shrunk == policy.max_memory_victims {
                    break;
                }
                if let Some(allocation) = table.get_mut(id) {
                    if allocation.granted_memory_mb > policy.min_reducible_memory_mb {
                        allocation.granted_memory_mb =
                            (allocation.granted_memory_mb as f64 * policy.shrink_factor) as u64;
                        report.shrunk_memory.push(*id);
                        shrunk += 1;
                    }
                }
            }
        } else if snapshot.memory_percent < policy.memory_abundant_below {
            let mut grown = 0;
            for (priority, _, id) in by_priority.iter().rev() {
                if grown == policy.max_memory_grows || !priority.is_elevated() {
                    break;
                }
                if let Some(allocation) = table.get_mut(id) {
                    let target = allocation
                        .request
                        .memory_mb
                        .min(limits.max_memory_per_request_mb)
                        .min(snapshot.memory_available_mb / 2);
                    if allocation.granted_memory_mb < target {
                        let grown_mb =
                            (allocation.granted_memory_mb as f64 * policy.memory_grow_factor) as u64;
                        allocation.granted_memory_mb =
                            grown_mb.max(allocation.granted_memory_mb + 1).min(target);
                        report.grown_memory.push(*id);
                        grown += 1;
                    }
                }
            }
        }

        metrics::record_allocation_table(table.len(), total_cpu(&table));
        drop(table);

        metrics::record_rebalance("expire", report.expired.len());
        metrics::record_rebalance("shrink_cpu", report.shrunk_cpu.len());
        metrics::record_rebalance("shrink_memory", report.shrunk_memory.len());
        metrics::record_rebalance("grow_cpu", report.grown_cpu.len());
        metrics::record_rebalance("grow_memory", report.grown_memory.len());

        if snapshot.cpu_percent > limits.cpu_critical {
            tracing::warn!(
                cpu = snapshot.cpu_percent,
                shrunk = report.shrunk_cpu.len(),
                "Critical CPU usage"
            );
        } else if snapshot.cpu_percent > limits.cpu_warning {
            tracing::info!(cpu = snapshot.cpu_percent, "High CPU usage");
        }
        if snapshot.memory_percent > limits.memory_critical {
            tracing::warn!(
                memory = snapshot.memory_percent,
                shrunk = report.shrunk_memory.len(),
                "Critical memory usage"
            );
        } else if snapshot.memory_percent > limits.memory_warning {
            tracing::info!(memory = snapshot.memory_percent, "High memory usage");
        }
        if !report.expired.is_empty() {
            tracing::info!(count = report.expired.len(), "Cleaned up expired allocations");
        }

        report
    }

    /// Get a copy of a live allocation.
    pub fn get(&self, id: &AllocationId) -> Option<ResourceAllocation> {
        self.lock_table().get(id).cloned()
    }

    /// Check whether an allocation is still in the table.
    pub fn is_active(&self, id: &AllocationId) -> bool {
        self.lock_table().contains_key(id)
    }

    /// Get the number of live allocations.
    pub fn active_count(&self) -> usize {
        self.lock_table().len()
    }

    /// Sum of granted CPU percentage across live allocations.
    pub fn total_granted_cpu(&self) -> f64 {
        total_cpu(&self.lock_table())
    }

    /// Recent full host samples taken by the rebalancer and `stats`, oldest first.
    pub fn history(&self) -> Vec<ResourceSnapshot> {
        self.history.snapshot()
    }

    /// Take a full host sample and summarize the table.
    pub fn stats(&self) -> AdmissionStats {
        let resources = self.sample();
        let table = self.lock_table();

        let mut by_priority = BTreeMap::new();
        for allocation in table.values() {
            *by_priority.entry(allocation.priority()).or_insert(0) += 1;
        }

        AdmissionStats {
            resources,
            active_allocations: table.len(),
            total_granted_cpu: total_cpu(&table),
            total_granted_memory_mb: table.values().map(|a| a.granted_memory_mb).sum(),
            by_priority,
            limits: self.limits.clone(),
        }
    }
}

fn total_cpu(table: &AllocationTable) -> f64 {
    table.values().map(|a| a.granted_cpu).sum()
}
