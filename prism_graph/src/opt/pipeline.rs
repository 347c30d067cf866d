//! Phase suite.
//!
//! Runs a list of phases over a graph until none of them reports a change,
//! with a bounded number of rounds and per-phase statistics.
//!
//! # Checkpoints
//!
//! Between two phases the suite
//!
//! 1. polls the compilation alarm,
//! 2. verifies the graph when `verify_graphs` is set,
//! 3. hands the graph to the dump hook when `dump_phases` is set,
//! 4. compresses the graph once enough ids are dead.
//!
//! A failing phase has the graph dumped with a failure scope before its
//! error is returned.

use std::time::{Duration, Instant};

use tracing::{debug, info_span, warn};

use super::canonicalize::Canonicalizer;
use super::dce::DeadCodeElimination;
use super::guards::GuardLowering;
use super::gvn::GlobalValueNumbering;
use super::Phase;
use crate::context::CompilationContext;
use crate::dump::DumpScope;
use crate::error::{CompileResult, InPhase};
use crate::ir::graph::Graph;

const VERIFY: &str = "verify";

// =============================================================================
// Phase Entry
// =============================================================================

/// A registered phase in the suite.
struct PhaseEntry {
    phase: Box<dyn Phase>,
    /// Rerun in every round; one-shot phases only run in the first.
    repeat: bool,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PhaseEntry {
    fn new<P: Phase + 'static>(phase: P, repeat: bool) -> Self {
        Self {
            phase: Box::new(phase),
            repeat,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Phase Suite
// =============================================================================

/// An ordered list of phases run to a fixed point.
#[derive(Default)]
pub struct PhaseSuite {
    phases: Vec<PhaseEntry>,
}

impl PhaseSuite {
    /// An empty suite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalize, value number and clean up, then lower guards and clean
    /// up once more.
    pub fn standard() -> Self {
        let mut suite = Self::new();
        suite.register(Canonicalizer::new());
        suite.register(GlobalValueNumbering::new());
        suite.register(DeadCodeElimination::new());
        suite.register_once(GuardLowering::new());
        suite.register(Canonicalizer::new());
        suite
    }

    /// Register a phase that runs in every round.
    pub fn register<P: Phase + 'static>(&mut self, phase: P) -> &mut Self {
        self.phases.push(PhaseEntry::new(phase, true));
        self
    }

    /// Register a phase that runs in the first round only.
    pub fn register_once<P: Phase + 'static>(&mut self, phase: P) -> &mut Self {
        self.phases.push(PhaseEntry::new(phase, false));
        self
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Run every phase until a round makes no change, or
    /// `max_phase_iterations` rounds have run.
    pub fn run(&mut self, graph: &mut Graph, ctx: &CompilationContext) -> CompileResult<SuiteStats> {
        let start = Instant::now();
        let mut stats = SuiteStats {
            initial_size: graph.node_count(),
            ..SuiteStats::default()
        };
        let max_rounds = ctx.config().max_phase_iterations.max(1);

        for round in 0..max_rounds {
            stats.rounds = round + 1;
            let mut round_changed = false;

            for entry in &mut self.phases {
                if round > 0 && !entry.repeat {
                    continue;
                }
                let name = entry.phase.name();
                ctx.check_alarm(name)?;

                let _span = info_span!("phase", name, round).entered();
                let before = graph.node_count();
                let started = Instant::now();
                let result = entry.phase.run(graph, ctx);
                entry.time += started.elapsed();
                entry.runs += 1;

                let changed = match result {
                    Ok(changed) => changed,
                    Err(err) => {
                        warn!(phase = name, error = %err, "phase failed");
                        ctx.dump(graph, DumpScope::Failure { phase: name, error: &err });
                        return Err(err);
                    }
                };
                debug!(
                    phase = name,
                    changed,
                    before,
                    after = graph.node_count(),
                    "phase finished"
                );
                if changed {
                    entry.changes += 1;
                    round_changed = true;
                }
                Self::checkpoint(graph, ctx, name)?;
            }

            if !round_changed {
                break;
            }
        }

        stats.total_time = start.elapsed();
        stats.final_size = graph.node_count();
        Ok(stats)
    }

    fn checkpoint(graph: &mut Graph, ctx: &CompilationContext, phase: &'static str) -> CompileResult<()> {
        if ctx.config().verify_graphs
            && let Err(err) = graph.verify().in_phase(VERIFY)
        {
            warn!(phase, error = %err, "graph verification failed");
            ctx.dump(graph, DumpScope::Failure { phase, error: &err });
            return Err(err);
        }
        ctx.dump_phase(graph, phase);
        if let Some(_remap) = graph.maybe_compress(ctx.config().graph_compression_threshold) {
            debug!(phase, nodes = graph.node_count(), "graph compressed");
        }
        Ok(())
    }

    /// Per-phase statistics in registration order.
    pub fn phase_stats(&self) -> Vec<PhaseStat> {
        self.phases
            .iter()
            .map(|e| PhaseStat {
                name: e.phase.name(),
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }
}

impl std::fmt::Debug for PhaseSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.phases.iter().map(|e| e.phase.name()))
            .finish()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics of a single phase.
#[derive(Debug, Clone)]
pub struct PhaseStat {
    pub name: &'static str,
    /// Number of times run.
    pub runs: usize,
    /// Number of runs that changed the graph.
    pub changes: usize,
    pub time: Duration,
}

/// Statistics of one suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteStats {
    pub rounds: usize,
    pub total_time: Duration,
    pub initial_size: usize,
    pub final_size: usize,
}

impl SuiteStats {
    /// Final size relative to the initial size.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
