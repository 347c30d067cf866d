//! Control flow graph over the fixed nodes of a sea-of-nodes graph.
//!
//! The graph keeps control flow implicit in its fixed-node edges. Scheduling
//! and loop-aware placement need it explicit:
//! - **Blocks**: maximal runs of fixed nodes, numbered in reverse postorder
//! - **Dominator tree**: immediate dominators plus depth and pre-order ranges
//!   so that a dominance query is two comparisons
//! - **Loops**: natural loops from `LoopEnd -> Loop` back edges, with nesting,
//!   exits and preheaders
//!
//! Construction is deterministic: successors are visited in `[IfTrue,
//! IfFalse]` order and merge predecessors in merge input order.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use super::arena::{BitSet, Id, SecondaryMap};
use super::graph::Graph;
use super::node::{Node, NodeId};
use super::operators::ControlOp;
use crate::context::CompilationContext;
use crate::error::{CompileError, CompileResult, GraphError};

const PHASE: &str = "cfg";

// =============================================================================
// Basic Block
// =============================================================================

#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Fixed nodes in control order; the first is the block's begin node.
    pub nodes: Vec<NodeId>,
    /// For a merge block, in merge input order.
    pub predecessors: SmallVec<[BlockId; 2]>,
    pub successors: SmallVec<[BlockId; 2]>,
    /// Innermost loop containing this block.
    pub loop_index: Option<usize>,
    /// Number of loops containing this block (0 = not in a loop).
    pub loop_depth: u32,
}

impl BasicBlock {
    #[inline]
    pub fn begin(&self) -> NodeId {
        self.nodes[0]
    }

    /// The last fixed node of the block.
    #[inline]
    pub fn end(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }
}

pub type BlockId = Id<BasicBlock>;

// =============================================================================
// Loop
// =============================================================================

/// A natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    /// Blocks ending in a `LoopEnd` of this loop.
    pub back_edges: Vec<BlockId>,
    /// All blocks of the loop including nested loops, in block order.
    pub body: Vec<BlockId>,
    members: BitSet,
    /// Blocks outside the loop reached directly from inside it.
    pub exits: Vec<BlockId>,
    /// The forward predecessor of the header.
    pub preheader: BlockId,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// 1 = outermost.
    pub depth: u32,
}

impl Loop {
    #[inline]
    pub fn contains(&self, block: BlockId) -> bool {
        self.members.contains(block.as_usize())
    }
}

// =============================================================================
// Control Flow Graph
// =============================================================================

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    node_to_block: SecondaryMap<Node, BlockId>,
    idom: Vec<Option<BlockId>>,
    dom_children: Vec<SmallVec<[BlockId; 2]>>,
    dom_depth: Vec<u32>,
    /// Pre-order number in the dominator tree.
    dom_pre: Vec<u32>,
    /// Largest pre-order number in the subtree.
    dom_last: Vec<u32>,
    loops: Vec<Loop>,
}

impl ControlFlowGraph {
    /// Build the CFG, dominator tree and loop forest of `graph`.
    pub fn compute(graph: &Graph, ctx: &CompilationContext) -> CompileResult<Self> {
        ctx.check_alarm(PHASE)?;
        let (blocks, node_to_block) = discover_blocks(graph)?;
        let n = blocks.len();
        let mut cfg = ControlFlowGraph {
            blocks,
            node_to_block,
            idom: vec![None; n],
            dom_children: vec![SmallVec::new(); n],
            dom_depth: vec![0; n],
            dom_pre: vec![0; n],
            dom_last: vec![0; n],
            loops: Vec::new(),
        };
        cfg.compute_dominators();
        cfg.compute_loops(graph)?;
        debug!(
            blocks = cfg.blocks.len(),
            loops = cfg.loops.len(),
            "computed control flow graph"
        );
        Ok(cfg)
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    #[inline]
    pub fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.as_usize()]
    }

    /// Block ids in reverse postorder, which is also id order.
    pub fn rpo(&self) -> impl DoubleEndedIterator<Item = BlockId> + ExactSizeIterator {
        (0..self.blocks.len() as u32).map(BlockId::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId::new(i as u32), b))
    }

    /// The block of a fixed node.
    #[inline]
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.node_to_block.get(node).copied().filter(|b| b.is_valid())
    }

    // =========================================================================
    // Dominators
    // =========================================================================

    fn compute_dominators(&mut self) {
        let n = self.blocks.len();
        if n == 0 {
            return;
        }
        let entry = self.entry();
        self.idom[0] = Some(entry);

        // Cooper-Harvey-Kennedy. Block ids are RPO numbers, so a dominator
        // always has a smaller id than the blocks it dominates.
        let mut changed = true;
        while changed {
            changed = false;
            for b in 1..n {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &self.blocks[b].predecessors {
                    if self.idom[pred.as_usize()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => self.intersect(pred, current),
                    });
                }
                if new_idom.is_some() && self.idom[b] != new_idom {
                    self.idom[b] = new_idom;
                    changed = true;
                }
            }
        }
        self.idom[0] = None;

        for b in 1..n {
            if let Some(parent) = self.idom[b] {
                self.dom_children[parent.as_usize()].push(BlockId::new(b as u32));
            }
        }

        // Pre-order numbering and depths, iteratively.
        let mut counter = 0u32;
        let mut stack: Vec<(BlockId, bool)> = vec![(entry, false)];
        while let Some((block, finished)) = stack.pop() {
            let b = block.as_usize();
            if finished {
                self.dom_last[b] = counter - 1;
                continue;
            }
            self.dom_pre[b] = counter;
            counter += 1;
            stack.push((block, true));
            for &child in self.dom_children[b].iter().rev() {
                self.dom_depth[child.as_usize()] = self.dom_depth[b] + 1;
                stack.push((child, false));
            }
        }
    }

    fn intersect(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        while a != b {
            while a > b {
                a = self.idom[a.as_usize()].unwrap_or(BlockId::new(0));
            }
            while b > a {
                b = self.idom[b.as_usize()].unwrap_or(BlockId::new(0));
            }
        }
        a
    }

    /// Immediate dominator; `None` for the entry block.
    #[inline]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.as_usize()]
    }

    pub fn dom_children(&self, block: BlockId) -> &[BlockId] {
        &self.dom_children[block.as_usize()]
    }

    #[inline]
    pub fn dom_depth(&self, block: BlockId) -> u32 {
        self.dom_depth[block.as_usize()]
    }

    /// Whether `a` dominates `b`. Every block dominates itself.
    #[inline]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let (a, b) = (a.as_usize(), b.as_usize());
        self.dom_pre[a] <= self.dom_pre[b] && self.dom_pre[b] <= self.dom_last[a]
    }

    #[inline]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Nearest common dominator of `a` and `b`.
    pub fn common_dominator(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        while self.dom_depth(a) > self.dom_depth(b) {
            a = self.idom(a).unwrap_or(a);
        }
        while self.dom_depth(b) > self.dom_depth(a) {
            b = self.idom(b).unwrap_or(b);
        }
        while a != b {
            match (self.idom(a), self.idom(b)) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                _ => return self.entry(),
            }
        }
        a
    }

    // =========================================================================
    // Loops
    // =========================================================================

    fn compute_loops(&mut self, graph: &Graph) -> CompileResult<()> {
        let n = self.blocks.len();
        let mut header_to_loop: FxHashMap<BlockId, usize> = FxHashMap::default();

        for (index, block) in self.blocks.iter().enumerate() {
            let source = BlockId::new(index as u32);
            let is_loop_end = graph.op(block.end()).is(ControlOp::LoopEnd);
            for &target in &block.successors {
                let retreating = target <= source;
                if !retreating && !is_loop_end {
                    continue;
                }
                let header_is_loop = graph.op(self.block(target).begin()).is(ControlOp::Loop);
                if !(is_loop_end && header_is_loop && self.dominates(target, source)) {
                    return Err(CompileError::bailout(format!(
                        "irreducible control flow: edge {} -> {}",
                        block.end(),
                        self.block(target).begin()
                    )));
                }
                let loop_index = match header_to_loop.get(&target) {
                    Some(&index) => index,
                    None => {
                        let preheader = self.forward_entry(graph, target)?;
                        self.loops.push(Loop {
                            header: target,
                            back_edges: Vec::new(),
                            body: Vec::new(),
                            members: BitSet::with_capacity(n),
                            exits: Vec::new(),
                            preheader,
                            parent: None,
                            children: Vec::new(),
                            depth: 1,
                        });
                        header_to_loop.insert(target, self.loops.len() - 1);
                        self.loops.len() - 1
                    }
                };
                self.loops[loop_index].back_edges.push(source);
            }
        }

        // Bodies by reverse reachability from the back edges.
        for lp in &mut self.loops {
            lp.members.insert(lp.header.as_usize());
            let mut worklist: Vec<BlockId> = lp.back_edges.clone();
            while let Some(block) = worklist.pop() {
                if lp.members.insert(block.as_usize()) {
                    worklist.extend(self.blocks[block.as_usize()].predecessors.iter().copied());
                }
            }
            lp.body = lp.members.iter().map(|b| BlockId::new(b as u32)).collect();
            for &block in &lp.body {
                for &succ in &self.blocks[block.as_usize()].successors {
                    if !lp.members.contains(succ.as_usize()) && !lp.exits.contains(&succ) {
                        lp.exits.push(succ);
                    }
                }
            }
        }

        // Nesting: the parent is the smallest other loop containing the header.
        for i in 0..self.loops.len() {
            let header = self.loops[i].header;
            let parent = (0..self.loops.len())
                .filter(|&j| j != i && self.loops[j].contains(header))
                .min_by_key(|&j| self.loops[j].body.len());
            if let Some(parent) = parent {
                self.loops[i].parent = Some(parent);
                self.loops[parent].children.push(i);
            }
        }
        for i in 0..self.loops.len() {
            let mut depth = 1;
            let mut current = self.loops[i].parent;
            while let Some(parent) = current {
                depth += 1;
                current = self.loops[parent].parent;
            }
            self.loops[i].depth = depth;
        }

        for (index, block) in self.blocks.iter_mut().enumerate() {
            let id = BlockId::new(index as u32);
            let innermost = self
                .loops
                .iter()
                .enumerate()
                .filter(|(_, lp)| lp.contains(id))
                .max_by_key(|(_, lp)| lp.depth);
            if let Some((loop_index, lp)) = innermost {
                block.loop_index = Some(loop_index);
                block.loop_depth = lp.depth;
            }
        }
        Ok(())
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    #[inline]
    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.blocks[block.as_usize()].loop_depth
    }

    /// Innermost loop containing `block`.
    pub fn loop_of(&self, block: BlockId) -> Option<&Loop> {
        self.blocks[block.as_usize()]
            .loop_index
            .map(|i| &self.loops[i])
    }

    /// The one predecessor of a loop header not reached through a back edge.
    fn forward_entry(&self, graph: &Graph, header: BlockId) -> CompileResult<BlockId> {
        let mut forward = self
            .block(header)
            .predecessors
            .iter()
            .copied()
            .filter(|&pred| !graph.op(self.block(pred).end()).is(ControlOp::LoopEnd));
        match (forward.next(), forward.next()) {
            (Some(entry), None) => Ok(entry),
            _ => Err(structural(
                self.block(header).begin(),
                "loop header needs exactly one forward predecessor",
            )),
        }
    }
}

// =============================================================================
// Block Discovery
// =============================================================================

fn structural(node: NodeId, message: impl Into<String>) -> CompileError {
    CompileError::structural(
        PHASE,
        GraphError::Malformed {
            node,
            message: message.into(),
        },
    )
}

/// Successor begin nodes of the fixed node ending a block.
fn block_successors(graph: &Graph, end: NodeId) -> CompileResult<SmallVec<[NodeId; 2]>> {
    let succs = graph.control_successors(end);
    match graph.op(end).control() {
        Some(ControlOp::If) => {
            if succs.len() != 2 {
                return Err(structural(end, "branch without both projections"));
            }
            Ok(succs)
        }
        Some(ControlOp::Return | ControlOp::Deopt) => Ok(SmallVec::new()),
        _ if succs.len() == 1 => Ok(succs),
        _ => Err(structural(end, "control flow ends without a terminal node")),
    }
}

/// Walk the fixed nodes reachable from start, returning blocks in reverse
/// postorder and the block of every fixed node.
fn discover_blocks(graph: &Graph) -> CompileResult<(Vec<BasicBlock>, SecondaryMap<Node, BlockId>)> {
    struct Pending {
        nodes: Vec<NodeId>,
        successors: SmallVec<[NodeId; 2]>,
    }

    let mut pending: Vec<Pending> = Vec::new();
    let mut begin_index: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut worklist = vec![graph.start()];
    begin_index.insert(graph.start(), 0);
    let mut has_sink = false;

    while let Some(begin) = worklist.pop() {
        let mut nodes = vec![begin];
        let mut current = begin;
        let successors = loop {
            if graph.op(current).is_block_end() {
                has_sink |= graph.op(current).is_sink();
                break block_successors(graph, current)?;
            }
            let next = block_successors(graph, current)?[0];
            if graph.op(next).is_block_begin() {
                break SmallVec::from_slice(&[next]);
            }
            nodes.push(next);
            current = next;
        };
        for &succ in &successors {
            if !begin_index.contains_key(&succ) {
                begin_index.insert(succ, begin_index.len());
                worklist.push(succ);
            }
        }
        let index = begin_index[&begin];
        if pending.len() <= index {
            pending.resize_with(index + 1, || Pending {
                nodes: Vec::new(),
                successors: SmallVec::new(),
            });
        }
        pending[index] = Pending { nodes, successors };
    }
    if !has_sink {
        return Err(structural(graph.start(), "graph has no terminal node"));
    }

    // Reverse postorder over discovery indices.
    let mut postorder = Vec::with_capacity(pending.len());
    let mut visited = BitSet::with_capacity(pending.len());
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    visited.insert(0);
    while let Some((block, next_succ)) = stack.pop() {
        if let Some(&succ) = pending[block].successors.get(next_succ) {
            stack.push((block, next_succ + 1));
            let s = begin_index[&succ];
            if visited.insert(s) {
                stack.push((s, 0));
            }
        } else {
            postorder.push(block);
        }
    }
    let mut rpo_number = vec![0u32; pending.len()];
    for (rpo, &block) in postorder.iter().rev().enumerate() {
        rpo_number[block] = rpo as u32;
    }

    let mut node_to_block: SecondaryMap<Node, BlockId> = SecondaryMap::with_capacity(graph.id_bound());
    let mut blocks: Vec<Option<BasicBlock>> = (0..pending.len()).map(|_| None).collect();
    for (index, p) in pending.into_iter().enumerate() {
        let id = BlockId::new(rpo_number[index]);
        for &node in &p.nodes {
            node_to_block.set(node, id);
        }
        let successors = p
            .successors
            .iter()
            .map(|s| BlockId::new(rpo_number[begin_index[s]]))
            .collect();
        blocks[id.as_usize()] = Some(BasicBlock {
            nodes: p.nodes,
            predecessors: SmallVec::new(),
            successors,
            loop_index: None,
            loop_depth: 0,
        });
    }
    let mut blocks: Vec<BasicBlock> = blocks.into_iter().flatten().collect();

    for (id, node) in graph.iter() {
        let placed = node_to_block.get(id).is_some_and(|b| b.is_valid());
        if node.is_fixed() && !placed {
            return Err(structural(id, format!("unreachable fixed node {}", node.op)));
        }
    }

    // Predecessors: merge input order for merges, the control input otherwise.
    for index in 0..blocks.len() {
        let begin = blocks[index].begin();
        let preds: SmallVec<[BlockId; 2]> = if graph.op(begin).is_merge() {
            graph
                .inputs(begin)
                .map(|end| node_to_block[end])
                .collect()
        } else {
            graph
                .node(begin)
                .control()
                .map(|pred| node_to_block[pred])
                .into_iter()
                .collect()
        };
        blocks[index].predecessors = preds;
    }
    Ok((blocks, node_to_block))
}

// =============================================================================
// Tests
// =============================================================================
