//! Node order inside a block.
//!
//! Each block lists its begin node, its phis, then its fixed nodes in
//! control order with every floating node emitted right before its first
//! in-block user. Floating nodes without an in-block user go right before a
//! terminating branch or sink. Reads are emitted before the first kill of
//! an overlapping location that follows their memory state.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::PHASE;
use super::memory::read_access;
use crate::context::CompilationContext;
use crate::error::{CompileError, CompileResult};
use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::cfg::{BlockId, ControlFlowGraph};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};

/// Order the nodes of every block; `placement` maps every live node to its
/// block.
pub(super) fn order_blocks(
    graph: &Graph,
    cfg: &ControlFlowGraph,
    placement: &SecondaryMap<Node, BlockId>,
    ctx: &CompilationContext,
) -> CompileResult<Vec<Vec<NodeId>>> {
    let meta = ctx.meta();
    let mut phis: Vec<Vec<NodeId>> = vec![Vec::new(); cfg.len()];
    let mut floating: Vec<Vec<NodeId>> = vec![Vec::new(); cfg.len()];
    for (id, node) in graph.iter() {
        if node.is_fixed() {
            continue;
        }
        let block = placement[id].as_usize();
        if node.op.is_phi() {
            phis[block].push(id);
        } else {
            floating[block].push(id);
        }
    }

    let mut emitter = Emitter::new(graph, placement);
    let mut result = Vec::with_capacity(cfg.len());
    for (id, block) in cfg.iter() {
        ctx.check_alarm(PHASE)?;
        emitter.block = id;
        emitter.out = Vec::with_capacity(block.nodes.len() + floating[id.as_usize()].len());

        let (begin, rest) = block.nodes.split_first().ok_or_else(|| CompileError::Schedule {
            node: graph.start(),
            message: format!("block {id} is empty"),
        })?;
        emitter.push(*begin);
        for &phi in &phis[id.as_usize()] {
            emitter.push(phi);
        }

        let terminator = rest
            .last()
            .copied()
            .filter(|&n| graph.op(n).is_block_end());
        let body = match terminator {
            Some(_) => &rest[..rest.len() - 1],
            None => rest,
        };
        for &fixed in body {
            if let Some(location) = graph.op(fixed).killed_location() {
                // Reads observing memory from before this kill go first.
                for &node in &floating[id.as_usize()] {
                    let Some(access) = read_access(graph, meta, node) else {
                        continue;
                    };
                    if emitter.is_emitted(node)
                        || !access.location.overlaps(location)
                        || !emitter.is_available(access.memory)
                    {
                        continue;
                    }
                    if !emitter.is_ready(node) {
                        return Err(CompileError::Schedule {
                            node,
                            message: format!("read cannot be ordered before kill {fixed}"),
                        });
                    }
                    emitter.emit(node)?;
                }
            }
            emitter.emit(fixed)?;
        }
        for &node in &floating[id.as_usize()] {
            emitter.emit(node)?;
        }
        if let Some(terminator) = terminator {
            emitter.emit(terminator)?;
        }
        result.push(std::mem::take(&mut emitter.out));
    }
    Ok(result)
}

struct Emitter<'a> {
    graph: &'a Graph,
    placement: &'a SecondaryMap<Node, BlockId>,
    emitted: BitSet,
    block: BlockId,
    out: Vec<NodeId>,
    /// Nodes known to be emittable; stays true for the rest of the block.
    ready: BitSet,
    /// Generation in which a node was found blocked by a pending fixed
    /// input. Emitting a fixed node starts a new generation.
    blocked: SecondaryMap<Node, u32>,
    generation: u32,
}

impl<'a> Emitter<'a> {
    fn new(graph: &'a Graph, placement: &'a SecondaryMap<Node, BlockId>) -> Self {
        Emitter {
            graph,
            placement,
            emitted: BitSet::with_capacity(graph.id_bound()),
            block: BlockId::INVALID,
            out: Vec::new(),
            ready: BitSet::with_capacity(graph.id_bound()),
            blocked: SecondaryMap::with_capacity(graph.id_bound()),
            generation: 1,
        }
    }

    fn push(&mut self, node: NodeId) {
        self.emitted.insert(node.as_usize());
        self.out.push(node);
        if self.graph.node(node).is_fixed() {
            self.generation += 1;
        }
    }

    fn is_emitted(&self, node: NodeId) -> bool {
        self.emitted.contains(node.as_usize())
    }

    fn in_block(&self, node: NodeId) -> bool {
        self.placement[node] == self.block
    }

    /// Whether `node` is already available at the current position.
    fn is_available(&self, node: NodeId) -> bool {
        self.is_emitted(node) || !self.in_block(node)
    }

    /// In-block inputs of `node` that still have to be emitted, by id.
    fn pending_inputs(&self, node: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut inputs: SmallVec<[NodeId; 4]> = self
            .graph
            .inputs(node)
            .filter(|&input| !self.is_available(input))
            .collect();
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }

    fn readiness(&self, node: NodeId) -> Option<bool> {
        if self.is_available(node) || self.ready.contains(node.as_usize()) {
            Some(true)
        } else if self.blocked.get(node).copied() == Some(self.generation) {
            Some(false)
        } else {
            None
        }
    }

    /// Whether `node` can be emitted without passing a later fixed node.
    fn is_ready(&mut self, node: NodeId) -> bool {
        let mut visiting = FxHashSet::default();
        let mut stack: Vec<(NodeId, bool)> = vec![(node, false)];
        while let Some((current, expanded)) = stack.pop() {
            if self.readiness(current).is_some() {
                continue;
            }
            let pending = self.pending_inputs(current);
            if !expanded {
                visiting.insert(current);
                stack.push((current, true));
                for &input in &pending {
                    if !self.graph.node(input).is_fixed()
                        && !visiting.contains(&input)
                        && self.readiness(input).is_none()
                    {
                        stack.push((input, false));
                    }
                }
                continue;
            }
            let ready = pending.iter().all(|&input| {
                !self.graph.node(input).is_fixed() && self.readiness(input) == Some(true)
            });
            if ready {
                self.ready.insert(current.as_usize());
            } else {
                self.blocked[current] = self.generation;
            }
        }
        self.readiness(node) == Some(true)
    }

    /// Emit the pending floating inputs of `node` in id order, each with its
    /// own inputs first, then `node`.
    fn emit(&mut self, node: NodeId) -> CompileResult<()> {
        let mut stack: Vec<(NodeId, bool)> = vec![(node, false)];
        while let Some((current, expanded)) = stack.pop() {
            if self.is_emitted(current) {
                continue;
            }
            // Phis are emitted at the top of the block; their inputs flow in
            // from predecessors.
            if expanded || self.graph.op(current).is_phi() {
                self.push(current);
                continue;
            }
            stack.push((current, true));
            for input in self.pending_inputs(current).into_iter().rev() {
                if self.graph.node(input).is_fixed() {
                    return Err(CompileError::Schedule {
                        node: current,
                        message: format!("input {input} is scheduled after its use"),
                    });
                }
                stack.push((input, false));
            }
        }
        Ok(())
    }
}
