//! Optimization actions and per-tier chains.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::memory::pressure::PressureTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    GarbageCollect,
    CacheCleanup,
    ModelUnload,
    ResponseSimplify,
    BatchShrink,
    ContextTruncate,
    EmergencyCleanup,
}

impl OptimizationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationStrategy::GarbageCollect => "garbage_collect",
            OptimizationStrategy::CacheCleanup => "cache_cleanup",
            OptimizationStrategy::ModelUnload => "model_unload",
            OptimizationStrategy::ResponseSimplify => "response_simplify",
            OptimizationStrategy::BatchShrink => "batch_shrink",
            OptimizationStrategy::ContextTruncate => "context_truncate",
            OptimizationStrategy::EmergencyCleanup => "emergency_cleanup",
        }
    }

    /// Lower runs earlier within a chain.
    pub fn priority(self) -> u8 {
        match self {
            OptimizationStrategy::GarbageCollect | OptimizationStrategy::EmergencyCleanup => 1,
            OptimizationStrategy::CacheCleanup => 2,
            OptimizationStrategy::ModelUnload => 3,
            OptimizationStrategy::ResponseSimplify => 4,
            OptimizationStrategy::BatchShrink => 5,
            OptimizationStrategy::ContextTruncate => 6,
        }
    }

    /// Ordered actions for a tier. Low needs nothing.
    pub fn chain_for(tier: PressureTier) -> &'static [OptimizationStrategy] {
        use OptimizationStrategy::*;

        match tier {
            PressureTier::Low => &[],
            PressureTier::Moderate => &[GarbageCollect, CacheCleanup],
            PressureTier::High => &[GarbageCollect, CacheCleanup, ResponseSimplify, BatchShrink],
            PressureTier::Critical => &[
                GarbageCollect,
                CacheCleanup,
                ModelUnload,
                ResponseSimplify,
                ContextTruncate,
            ],
            PressureTier::Emergency => &[EmergencyCleanup],
        }
    }
}

/// Record of one applied action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryOptimization {
    pub strategy: OptimizationStrategy,
    pub description: String,
    pub estimated_bytes: u64,
    pub actual_bytes: u64,
    pub priority: u8,
    pub success: bool,
    pub elapsed: Duration,
}

/// Signals to the generation layer to produce cheaper output.
///
/// Set by response-simplify, batch-shrink and context-truncate; reset once
/// a sample reports Low or Moderate pressure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationHints {
    pub simplified_responses: bool,
    pub batch_size_factor: f64,
    pub context_token_cap: Option<usize>,
}

impl GenerationHints {
    pub fn is_relaxed(&self) -> bool {
        *self == Self::default()
    }
}

impl Default for GenerationHints {
    fn default() -> Self {
        Self {
            simplified_responses: false,
            batch_size_factor: 1.0,
            context_token_cap: None,
        }
    }
}

/// Ask the allocator to return free pages to the OS.
///
/// Returns true if memory was released.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn trim_allocator() -> bool {
    // SAFETY: malloc_trim only walks glibc's own arenas and has no
    // preconditions beyond glibc being the active allocator.
    unsafe { libc::malloc_trim(0) != 0 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn trim_allocator() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chains_per_tier() {
        assert!(OptimizationStrategy::chain_for(PressureTier::Low).is_empty());
        assert_eq!(
            OptimizationStrategy::chain_for(PressureTier::Emergency),
            &[OptimizationStrategy::EmergencyCleanup]
        );
        assert_eq!(OptimizationStrategy::chain_for(PressureTier::High).len(), 4);
        assert!(OptimizationStrategy::chain_for(PressureTier::Critical)
            .contains(&OptimizationStrategy::ModelUnload));
        assert!(!OptimizationStrategy::chain_for(PressureTier::High)
            .contains(&OptimizationStrategy::ModelUnload));
    }

    #[test]
    fn test_chains_follow_priority() {
        for tier in [PressureTier::Moderate, PressureTier::High, PressureTier::Critical] {
            let chain = OptimizationStrategy::chain_for(tier);
            assert!(chain.windows(2).all(|w| w[0].priority() <= w[1].priority()));
        }
    }

    #[test]
    fn test_default_hints_are_relaxed() {
        let mut hints = GenerationHints::default();
        assert!(hints.is_relaxed());
        hints.simplified_responses = true;
        assert!(!hints.is_relaxed());
    }

    #[test]
    fn test_trim_allocator_does_not_panic() {
        let _ = trim_allocator();
    }
}
