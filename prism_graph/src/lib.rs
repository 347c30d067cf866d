//! Sea-of-nodes graph engine for the Prism optimizing tier.
//!
//! - [`ir`]: the graph, its builder, CFG, encoded form and verification
//! - [`opt`]: canonicalization, value numbering, dead code elimination,
//!   guard lowering and the phase suite that drives them
//! - [`schedule`]: placement of floating nodes into ordered basic blocks
//!
//! [`compile`] runs the standard pipeline on a graph and returns its
//! schedule.

pub mod config;
pub mod context;
pub mod dump;
pub mod error;
pub mod ir;
pub mod meta;
pub mod opt;
pub mod schedule;

use tracing::{info, info_span, warn};

pub use config::{CanonicalizerConfig, CompilerConfig};
pub use context::{CompilationAlarm, CompilationContext};
pub use dump::{CollectingDump, DumpHook, DumpScope, TracingDump};
pub use error::{CompileError, CompileResult, GraphError, GraphResult};
pub use ir::cfg::{BasicBlock, BlockId, ControlFlowGraph, Loop};
pub use ir::compare::graphs_equivalent;
pub use ir::encode::{EncodedGraph, decode, encode};
pub use ir::{Graph, Node, NodeId, Operator, Stamp};
pub use meta::{MetaAccess, MetaTable};
pub use opt::{Phase, PhaseSuite, SuiteStats};
pub use schedule::{ScheduleResult, ScheduleStrategy, schedule};

/// The outcome of [`compile`].
#[derive(Debug, Clone)]
pub struct Compiled {
    pub cfg: ControlFlowGraph,
    pub schedule: ScheduleResult,
    pub stats: SuiteStats,
}

/// Optimize `graph` in place with [`PhaseSuite::standard`], then build its
/// CFG and schedule it with the configured strategy.
pub fn compile(graph: &mut Graph, ctx: &CompilationContext) -> CompileResult<Compiled> {
    let _span = info_span!("compile", nodes = graph.node_count()).entered();

    let stats = PhaseSuite::standard().run(graph, ctx)?;
    let strategy = ctx.config().schedule_strategy;
    let lowered = ControlFlowGraph::compute(graph, ctx)
        .and_then(|cfg| schedule(graph, &cfg, strategy, ctx).map(|schedule| (cfg, schedule)));
    let (cfg, schedule) = match lowered {
        Ok(result) => result,
        Err(err) => {
            warn!(error = %err, "scheduling failed");
            ctx.dump(graph, DumpScope::Failure { phase: "schedule", error: &err });
            return Err(err);
        }
    };
    if ctx.config().verify_graphs {
        schedule.verify(graph, &cfg)?;
    }

    info!(
        rounds = stats.rounds,
        nodes = graph.node_count(),
        blocks = cfg.len(),
        elapsed = ?ctx.alarm().elapsed(),
        "compiled graph"
    );
    Ok(Compiled {
        cfg,
        schedule,
        stats,
    })
}
