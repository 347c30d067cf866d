//! Dead Code Elimination (DCE) phase.
//!
//! DCE removes nodes that are not used by any live computation.
//! A node is live if:
//!
//! 1. It is a fixed node reachable from the start node through control edges
//! 2. It is a parameter, or a guard anchored at a live fixed node
//! 3. It is used by another live node
//!
//! # Algorithm
//!
//! 1. Walk the control flow forward from the start node
//! 2. Detach merge predecessors that were not reached, with their phi inputs
//! 3. Propagate liveness backwards through inputs
//! 4. Unlink every dead node, then remove it

use tracing::debug;

use super::Phase;
use super::canonicalize::kill::detach_merge_input;
use crate::context::CompilationContext;
use crate::error::{CompileResult, InPhase};
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::Operator;

const PHASE: &str = "dce";

// =============================================================================
// DCE Phase
// =============================================================================

/// Dead Code Elimination phase.
#[derive(Debug, Default)]
pub struct DeadCodeElimination {
    removed: usize,
    detached: usize,
}

impl DeadCodeElimination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes removed by the last run.
    pub fn removed(&self) -> usize {
        self.removed
    }

    /// Merge predecessors detached by the last run.
    pub fn detached(&self) -> usize {
        self.detached
    }

    fn reachable_fixed(graph: &Graph) -> (BitSet, Vec<NodeId>) {
        let mut seen = BitSet::with_capacity(graph.id_bound());
        let mut order = Vec::new();
        let mut stack = vec![graph.start()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.as_usize()) {
                continue;
            }
            order.push(node);
            stack.extend(graph.control_successors(node));
        }
        (seen, order)
    }

    fn detach_unreachable_predecessors(
        &mut self,
        graph: &mut Graph,
        reachable: &BitSet,
        fixed: &[NodeId],
    ) -> CompileResult<()> {
        for &merge in fixed {
            if !graph.op(merge).is_merge() {
                continue;
            }
            let dead: Vec<usize> = graph
                .inputs(merge)
                .enumerate()
                .filter(|(_, pred)| !reachable.contains(pred.as_usize()))
                .map(|(i, _)| i)
                .collect();
            for index in dead.into_iter().rev() {
                detach_merge_input(graph, merge, index).in_phase(PHASE)?;
                self.detached += 1;
            }
        }
        Ok(())
    }

    fn mark_live(graph: &Graph, reachable: &BitSet, fixed: &[NodeId]) -> BitSet {
        let mut live = BitSet::with_capacity(graph.id_bound());
        let mut worklist: Vec<NodeId> = fixed.to_vec();
        for (id, node) in graph.iter() {
            let root = match node.op {
                Operator::Parameter(_) => true,
                Operator::Guard { .. } => node
                    .input(1)
                    .is_some_and(|anchor| reachable.contains(anchor.as_usize())),
                _ => false,
            };
            if root {
                worklist.push(id);
            }
        }

        while let Some(id) = worklist.pop() {
            if !live.insert(id.as_usize()) {
                continue;
            }
            for input in graph.inputs(id) {
                // Unreachable fixed nodes stay dead; a live user keeps them
                // referenced and their removal reports the broken edge.
                let is_dead_fixed =
                    graph.node(input).is_fixed() && !reachable.contains(input.as_usize());
                if !is_dead_fixed && !live.contains(input.as_usize()) {
                    worklist.push(input);
                }
            }
        }
        live
    }
}

impl Phase for DeadCodeElimination {
    fn name(&self) -> &'static str {
        PHASE
    }

    fn run(&mut self, graph: &mut Graph, _ctx: &CompilationContext) -> CompileResult<bool> {
        self.removed = 0;
        self.detached = 0;

        // Phase 1: Reachable control flow
        let (reachable, fixed) = Self::reachable_fixed(graph);
        self.detach_unreachable_predecessors(graph, &reachable, &fixed)?;

        // Phase 2: Propagate liveness backwards through inputs
        let live = Self::mark_live(graph, &reachable, &fixed);

        // Phase 3: Collect dead nodes
        let dead: Vec<NodeId> = graph
            .ids()
            .filter(|id| !live.contains(id.as_usize()))
            .collect();

        // Phase 4: Unlink, then kill
        for &id in &dead {
            graph.clear_inputs(id).in_phase(PHASE)?;
        }
        for &id in &dead {
            graph.kill(id).in_phase(PHASE)?;
        }
        self.removed = dead.len();

        debug!(
            phase = PHASE,
            removed = self.removed,
            detached = self.detached,
            nodes = graph.node_count(),
            "dead code eliminated"
        );
        Ok(self.removed > 0 || self.detached > 0)
    }
}

// =============================================================================
// Tests
// =============================================================================
