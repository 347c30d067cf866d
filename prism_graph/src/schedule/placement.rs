//! Block placement of floating nodes.
//!
//! Fixed nodes stay in their CFG block, phis sit in their merge's block and
//! parameters in the entry block. Every other node floats between two
//! bounds on one dominator chain:
//!
//! - **earliest**: the deepest block among the blocks of its inputs
//! - **latest**: the dominator LCA of the blocks of its usages
//!
//! Earliest bounds are computed inputs-first and latest placements
//! usages-first over one topological order of the floating nodes.

use tracing::trace;

use super::ScheduleStrategy;
use super::memory::{BlockKills, ReadAccess, read_access};
use crate::error::{CompileError, CompileResult};
use crate::ir::arena::SecondaryMap;
use crate::ir::cfg::{BlockId, ControlFlowGraph};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::Operator;
use crate::meta::MetaAccess;

fn schedule_error(node: NodeId, message: impl Into<String>) -> CompileError {
    CompileError::Schedule {
        node,
        message: message.into(),
    }
}

/// Nodes whose block follows from the CFG alone.
fn is_pinned(op: &Operator) -> bool {
    op.is_fixed() || op.is_phi() || matches!(op, Operator::Parameter(_))
}

pub(super) struct Placement<'a> {
    graph: &'a Graph,
    cfg: &'a ControlFlowGraph,
    meta: &'a dyn MetaAccess,
    kills: BlockKills<'a>,
    pub(super) block: SecondaryMap<Node, BlockId>,
    earliest: SecondaryMap<Node, BlockId>,
}

impl<'a> Placement<'a> {
    pub fn new(graph: &'a Graph, cfg: &'a ControlFlowGraph, meta: &'a dyn MetaAccess) -> Self {
        Placement {
            graph,
            cfg,
            meta,
            kills: BlockKills::new(graph, cfg),
            block: SecondaryMap::with_capacity(graph.id_bound()),
            earliest: SecondaryMap::with_capacity(graph.id_bound()),
        }
    }

    /// Place every live node.
    pub fn run(mut self, strategy: ScheduleStrategy) -> CompileResult<SecondaryMap<Node, BlockId>> {
        self.pin()?;
        let order = self.floating_order()?;
        for &node in &order {
            let earliest = self.compute_earliest(node);
            self.earliest.set(node, earliest);
        }
        match strategy {
            ScheduleStrategy::Earliest => {
                for &node in &order {
                    let earliest = self.earliest[node];
                    let access = read_access(self.graph, self.meta, node);
                    if !self.allowed(access, earliest) {
                        return Err(schedule_error(
                            node,
                            "read is overwritten before its earliest block",
                        ));
                    }
                    self.block.set(node, earliest);
                }
            }
            ScheduleStrategy::Latest | ScheduleStrategy::LatestOutOfLoops => {
                for &node in order.iter().rev() {
                    let block = self.choose_late(node, strategy)?;
                    self.block.set(node, block);
                }
            }
        }
        Ok(self.block)
    }

    // =========================================================================
    // Pinned Nodes
    // =========================================================================

    fn pin(&mut self) -> CompileResult<()> {
        for (id, node) in self.graph.iter() {
            let block = match node.op {
                op if op.is_fixed() => self.cfg.block_of(id),
                op if op.is_phi() => node.input(0).and_then(|merge| self.cfg.block_of(merge)),
                Operator::Parameter(_) => Some(self.cfg.entry()),
                _ => continue,
            };
            let block = block.ok_or_else(|| schedule_error(id, "pinned node outside the control flow"))?;
            self.block.set(id, block);
        }
        Ok(())
    }

    /// Floating nodes with every floating input before its users.
    fn floating_order(&self) -> CompileResult<Vec<NodeId>> {
        const UNSEEN: u8 = 0;
        const ACTIVE: u8 = 1;
        const DONE: u8 = 2;

        let graph = self.graph;
        let mut state: SecondaryMap<Node, u8> = SecondaryMap::with_capacity(graph.id_bound());
        let mut order = Vec::new();

        for root in graph.ids() {
            if is_pinned(&graph.op(root)) || state[root] != UNSEEN {
                continue;
            }
            let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
            state.set(root, ACTIVE);
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let input = graph.input(node, top.1);
                top.1 += 1;
                match input {
                    Some(input) if is_pinned(&graph.op(input)) => {}
                    Some(input) => match state[input] {
                        UNSEEN => {
                            state.set(input, ACTIVE);
                            stack.push((input, 0));
                        }
                        ACTIVE => {
                            return Err(schedule_error(input, "cycle among floating nodes"));
                        }
                        _ => {}
                    },
                    None => {
                        state.set(node, DONE);
                        order.push(node);
                        stack.pop();
                    }
                }
            }
        }
        Ok(order)
    }

    // =========================================================================
    // Bounds
    // =========================================================================

    fn input_block(&self, input: NodeId) -> BlockId {
        if is_pinned(&self.graph.op(input)) {
            self.block[input]
        } else {
            self.earliest[input]
        }
    }

    fn compute_earliest(&self, node: NodeId) -> BlockId {
        self.graph
            .inputs(node)
            .map(|input| self.input_block(input))
            .max_by_key(|&b| self.cfg.dom_depth(b))
            .unwrap_or_else(|| self.cfg.entry())
    }

    /// Dominator LCA of the usage blocks, or `None` for an unused node.
    ///
    /// A phi input is used at the end of the matching merge predecessor.
    fn compute_latest(&self, node: NodeId) -> CompileResult<Option<BlockId>> {
        let mut lca: Option<BlockId> = None;
        for usage in self.graph.usages(node) {
            let user = usage.user;
            let block = if self.graph.op(user).is_phi() {
                let merge_block = self.block[user];
                let pred = usage
                    .position()
                    .checked_sub(1)
                    .and_then(|i| self.cfg.block(merge_block).predecessors.get(i).copied());
                pred.ok_or_else(|| schedule_error(user, "phi input without a merge predecessor"))?
            } else {
                self.block[user]
            };
            lca = Some(match lca {
                Some(current) => self.cfg.common_dominator(current, block),
                None => block,
            });
        }
        Ok(lca)
    }

    fn choose_late(&self, node: NodeId, strategy: ScheduleStrategy) -> CompileResult<BlockId> {
        let earliest = self.earliest[node];
        let Some(latest) = self.compute_latest(node)? else {
            return Ok(earliest);
        };
        if !self.cfg.dominates(earliest, latest) {
            return Err(schedule_error(
                node,
                format!("earliest block {earliest} does not dominate latest block {latest}"),
            ));
        }
        let access = read_access(self.graph, self.meta, node);

        // Candidates from the latest block up the dominator chain.
        let mut best: Option<BlockId> = None;
        let mut current = latest;
        loop {
            if self.allowed(access, current) {
                match strategy {
                    ScheduleStrategy::LatestOutOfLoops => {
                        // Ties keep the deeper block.
                        let depth = self.cfg.loop_depth(current);
                        if best.is_none_or(|b| depth < self.cfg.loop_depth(b)) {
                            best = Some(current);
                        }
                    }
                    _ => {
                        best = Some(current);
                        break;
                    }
                }
            }
            if current == earliest {
                break;
            }
            match self.cfg.idom(current) {
                Some(idom) => current = idom,
                None => break,
            }
        }
        let block = best.ok_or_else(|| {
            schedule_error(node, "no block between earliest and latest avoids a memory kill")
        })?;
        if block != latest {
            trace!(node = %node, from = %latest, to = %block, "hoisted");
        }
        Ok(block)
    }

    fn allowed(&self, access: Option<ReadAccess>, block: BlockId) -> bool {
        access.is_none_or(|a| self.kills.can_read_in(a, block))
    }
}
