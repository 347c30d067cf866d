//! Compiler configuration.
//!
//! Configuration is plain data carried by the
//! [`CompilationContext`](crate::context::CompilationContext); nothing is
//! read from globals or the environment.

use std::time::Duration;

use crate::schedule::ScheduleStrategy;

// =============================================================================
// Canonicalizer Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalizerConfig {
    /// Apply simplification rules. When off only value numbering runs.
    pub simplify: bool,

    /// Replace nodes by structurally identical ones.
    pub gvn: bool,

    /// How many fixed nodes a rule may walk up the control chain looking for
    /// a dominating condition.
    pub max_dominator_walk: usize,
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        Self {
            simplify: true,
            gvn: true,
            max_dominator_walk: 32,
        }
    }
}

impl CanonicalizerConfig {
    /// Value numbering only.
    pub fn gvn_only() -> Self {
        Self {
            simplify: false,
            ..Self::default()
        }
    }
}

// =============================================================================
// Compiler Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Verify graph invariants after every phase.
    pub verify_graphs: bool,

    /// Compress the graph when fewer than this percentage of ids are live.
    pub graph_compression_threshold: u8,

    pub canonicalizer: CanonicalizerConfig,

    pub schedule_strategy: ScheduleStrategy,

    /// Wall-clock budget for one compilation; `None` disables the alarm.
    pub compilation_budget: Option<Duration>,

    /// Worklist pops between alarm checks.
    pub alarm_poll_interval: usize,

    /// Maximum rounds of the phase suite before giving up on a fixed point.
    pub max_phase_iterations: usize,

    /// Hand the graph to the dump hook after every phase, not only on failure.
    pub dump_phases: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            verify_graphs: cfg!(debug_assertions),
            graph_compression_threshold: 70,
            canonicalizer: CanonicalizerConfig::default(),
            schedule_strategy: ScheduleStrategy::LatestOutOfLoops,
            compilation_budget: None,
            alarm_poll_interval: 256,
            max_phase_iterations: 5,
            dump_phases: false,
        }
    }
}

impl CompilerConfig {
    /// Fewest rounds, no verification.
    pub fn minimal() -> Self {
        Self {
            verify_graphs: false,
            max_phase_iterations: 2,
            ..Self::default()
        }
    }

    /// More rounds and a looser dominator walk.
    pub fn full() -> Self {
        Self {
            max_phase_iterations: 10,
            canonicalizer: CanonicalizerConfig {
                max_dominator_walk: 128,
                ..CanonicalizerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Always verify, poll the alarm often.
    pub fn for_testing() -> Self {
        Self {
            verify_graphs: true,
            alarm_poll_interval: 1,
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.compilation_budget = Some(budget);
        self
    }

    pub fn with_strategy(mut self, strategy: ScheduleStrategy) -> Self {
        self.schedule_strategy = strategy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CompilerConfig::default();
        assert_eq!(config.graph_compression_threshold, 70);
        assert_eq!(config.schedule_strategy, ScheduleStrategy::LatestOutOfLoops);
        assert!(config.canonicalizer.simplify);
        assert!(config.compilation_budget.is_none());
    }

    #[test]
    fn test_config_variants() {
        assert!(!CompilerConfig::minimal().verify_graphs);
        assert!(CompilerConfig::for_testing().verify_graphs);
        assert!(CompilerConfig::full().max_phase_iterations > CompilerConfig::default().max_phase_iterations);
        assert!(!CanonicalizerConfig::gvn_only().simplify);
        let c = CompilerConfig::default()
            .with_budget(Duration::from_millis(3))
            .with_strategy(ScheduleStrategy::Earliest);
        assert_eq!(c.compilation_budget, Some(Duration::from_millis(3)));
        assert_eq!(c.schedule_strategy, ScheduleStrategy::Earliest);
    }
}
