//! Scheduling: from a sea of nodes to ordered basic blocks.
//!
//! Fixed nodes already sit in the blocks of the [`ControlFlowGraph`]. The
//! scheduler assigns every floating node a block between its earliest and
//! latest legal position (see [`ScheduleStrategy`]) and then orders the
//! nodes of each block so that every input precedes its users.
//!
//! Floating reads carry an anti-dependency on later writes: a read of a
//! location never moves past a write or call that may overwrite it.

mod memory;
mod order;
mod placement;

use std::fmt;

use tracing::{debug, debug_span};

use crate::context::CompilationContext;
use crate::error::{CompileError, CompileResult};
use crate::ir::arena::SecondaryMap;
use crate::ir::cfg::{BlockId, ControlFlowGraph};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};

const PHASE: &str = "schedule";

// =============================================================================
// Strategy
// =============================================================================

/// Where a floating node goes between its earliest and latest block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleStrategy {
    /// As early as the inputs allow.
    Earliest,
    /// As late as the usages allow.
    Latest,
    /// Late, but out of as many loops as possible.
    LatestOutOfLoops,
}

impl ScheduleStrategy {
    pub const fn name(self) -> &'static str {
        match self {
            ScheduleStrategy::Earliest => "earliest",
            ScheduleStrategy::Latest => "latest",
            ScheduleStrategy::LatestOutOfLoops => "latest-out-of-loops",
        }
    }
}

impl fmt::Display for ScheduleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Schedule Result
// =============================================================================

/// Every live node assigned to a block, with the nodes of each block in
/// execution order.
#[derive(Debug, Clone)]
pub struct ScheduleResult {
    strategy: ScheduleStrategy,
    node_to_block: SecondaryMap<Node, BlockId>,
    blocks: Vec<Vec<NodeId>>,
}

impl ScheduleResult {
    pub fn strategy(&self) -> ScheduleStrategy {
        self.strategy
    }

    /// The block of `node`, or `None` for a node that was not scheduled.
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.node_to_block.get(node).copied().filter(|b| b.is_valid())
    }

    /// The nodes of `block` in order.
    pub fn nodes_in(&self, block: BlockId) -> &[NodeId] {
        self.blocks
            .get(block.as_usize())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of scheduled nodes.
    pub fn node_count(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    /// Check that every live node is scheduled and that every input is
    /// available where it is used: earlier in the same block or in a
    /// dominating block. A phi input must be available at the end of the
    /// matching merge predecessor.
    pub fn verify(&self, graph: &Graph, cfg: &ControlFlowGraph) -> CompileResult<()> {
        let mut position: SecondaryMap<Node, usize> = SecondaryMap::with_capacity(graph.id_bound());
        for nodes in &self.blocks {
            for (i, &node) in nodes.iter().enumerate() {
                position.set(node, i);
            }
        }

        for (id, node) in graph.iter() {
            let Some(block) = self.block_of(id) else {
                return Err(schedule_error(id, "node is not scheduled"));
            };
            if node.op.is_merge() {
                continue;
            }
            let is_phi = node.op.is_phi();
            for (index, input) in node.inputs().iter().enumerate() {
                let Some(input_block) = self.block_of(input) else {
                    return Err(schedule_error(input, "input is not scheduled"));
                };
                let available = if is_phi {
                    if index == 0 {
                        continue;
                    }
                    cfg.block(block)
                        .predecessors
                        .get(index - 1)
                        .is_some_and(|&pred| cfg.dominates(input_block, pred))
                } else if input_block == block {
                    position[input] < position[id]
                } else {
                    cfg.dominates(input_block, block)
                };
                if !available {
                    return Err(schedule_error(
                        id,
                        format!("input {input} in block {input_block} is not available in block {block}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn schedule_error(node: NodeId, message: impl Into<String>) -> CompileError {
    CompileError::Schedule {
        node,
        message: message.into(),
    }
}

/// Schedule `graph` over `cfg`.
pub fn schedule(
    graph: &Graph,
    cfg: &ControlFlowGraph,
    strategy: ScheduleStrategy,
    ctx: &CompilationContext,
) -> CompileResult<ScheduleResult> {
    ctx.check_alarm(PHASE)?;
    let _span = debug_span!("schedule", %strategy).entered();

    let node_to_block = placement::Placement::new(graph, cfg, ctx.meta()).run(strategy)?;
    ctx.check_alarm(PHASE)?;
    let blocks = order::order_blocks(graph, cfg, &node_to_block, ctx)?;

    let result = ScheduleResult {
        strategy,
        node_to_block,
        blocks,
    };
    debug!(
        blocks = cfg.len(),
        nodes = result.node_count(),
        "schedule finished"
    );
    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================
