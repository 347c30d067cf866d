//! Memory anti-dependencies.
//!
//! A floating read names the memory state it observes. It may move down the
//! dominator tree only while no write or call that overwrites an overlapping
//! location can execute between that memory state and the read.

use smallvec::SmallVec;

use crate::ir::arena::BitSet;
use crate::ir::cfg::{BlockId, ControlFlowGraph};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{LocationIdentity, Operator};
use crate::meta::MetaAccess;

/// A floating read whose placement is constrained by later kills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ReadAccess {
    pub location: LocationIdentity,
    pub memory: NodeId,
}

/// The constrained access performed by `node`, if any.
///
/// Reads of immutable locations are unconstrained. A metadata failure is
/// treated as a mutable location.
pub(super) fn read_access(graph: &Graph, meta: &dyn MetaAccess, node: NodeId) -> Option<ReadAccess> {
    let Operator::Read(location) = graph.op(node) else {
        return None;
    };
    if meta.is_immutable(location).unwrap_or(false) {
        return None;
    }
    let memory = graph.input(node, 1)?;
    Some(ReadAccess { location, memory })
}

/// Kill summary of every block.
pub(super) struct BlockKills<'a> {
    graph: &'a Graph,
    cfg: &'a ControlFlowGraph,
    /// `(position in block, killed location)` in block order.
    kills: Vec<SmallVec<[(usize, LocationIdentity); 2]>>,
}

impl<'a> BlockKills<'a> {
    pub fn new(graph: &'a Graph, cfg: &'a ControlFlowGraph) -> Self {
        let kills = cfg
            .iter()
            .map(|(_, block)| {
                block
                    .nodes
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &n)| graph.op(n).killed_location().map(|loc| (i, loc)))
                    .collect()
            })
            .collect();
        BlockKills { graph, cfg, kills }
    }

    /// Whether `block` overwrites `location` after position `after`.
    pub fn kills_after(&self, block: BlockId, location: LocationIdentity, after: Option<usize>) -> bool {
        self.kills[block.as_usize()]
            .iter()
            .any(|&(pos, loc)| after.is_none_or(|a| pos > a) && loc.overlaps(location))
    }

    /// Block and in-block position of a memory state. Phis and the start
    /// node sit at the top of their block.
    pub fn memory_position(&self, memory: NodeId) -> (BlockId, usize) {
        let anchor = if self.graph.op(memory).is_phi() {
            self.graph.input(memory, 0).unwrap_or(memory)
        } else {
            memory
        };
        let Some(block) = self.cfg.block_of(anchor) else {
            return (self.cfg.entry(), 0);
        };
        let position = self
            .cfg
            .block(block)
            .nodes
            .iter()
            .position(|&n| n == memory)
            .unwrap_or(0);
        (block, position)
    }

    /// Whether a read of `access` may be placed in `block`, ordered before
    /// the block's own kills.
    ///
    /// Every path from the memory state to the top of `block` must be free
    /// of overlapping kills. Walking predecessors backwards from `block`
    /// until the memory state's block covers loops around `block` too.
    pub fn can_read_in(&self, access: ReadAccess, block: BlockId) -> bool {
        let (memory_block, memory_pos) = self.memory_position(access.memory);
        if block == memory_block {
            return true;
        }
        let mut seen = BitSet::with_capacity(self.cfg.len());
        let mut stack: Vec<BlockId> = self.cfg.block(block).predecessors.to_vec();
        while let Some(b) = stack.pop() {
            if !seen.insert(b.as_usize()) {
                continue;
            }
            if b == memory_block {
                if self.kills_after(b, access.location, Some(memory_pos)) {
                    return false;
                }
                continue;
            }
            if self.kills_after(b, access.location, None) {
                return false;
            }
            stack.extend(self.cfg.block(b).predecessors.iter().copied());
        }
        true
    }
}
