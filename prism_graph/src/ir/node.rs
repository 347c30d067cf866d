//! IR node definitions.
//!
//! A node is an operator, an ordered list of input edges and a stamp. The
//! reverse direction (who consumes a node, and at which input position) is
//! owned by the [`Graph`](super::graph::Graph), which keeps both directions
//! in sync. Node inputs are therefore read-only outside the graph module.
//!
//! # Fixed vs floating
//!
//! - **Fixed nodes** (control, writes, calls, divisions) sit in the control
//!   flow and name their control predecessor as input 0.
//! - **Floating nodes** (arithmetic, logic, reads, phis, guards) are placed
//!   by the scheduler, constrained only by their inputs and usages.

use smallvec::SmallVec;

use super::arena::Id;
use super::operators::{InputType, Operator};
use super::stamp::Stamp;

/// Unique identifier for a node in its graph.
pub type NodeId = Id<Node>;

// =============================================================================
// Input List
// =============================================================================

/// Number of inputs stored inline before spilling to the heap.
const INLINE_INPUTS: usize = 4;

/// Ordered input edges of one node.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct InputList(SmallVec<[NodeId; INLINE_INPUTS]>);

impl InputList {
    #[inline]
    pub fn new() -> Self {
        InputList(SmallVec::new())
    }

    pub fn from_slice(ids: &[NodeId]) -> Self {
        InputList(SmallVec::from_slice(ids))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied()
    }

    #[inline]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = NodeId> + ExactSizeIterator + '_ {
        self.0.iter().copied()
    }

    pub(crate) fn set(&mut self, index: usize, id: NodeId) {
        self.0[index] = id;
    }

    pub(crate) fn push(&mut self, id: NodeId) {
        self.0.push(id);
    }

    pub(crate) fn remove(&mut self, index: usize) -> NodeId {
        self.0.remove(index)
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }
}

impl std::fmt::Debug for InputList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a InputList {
    type Item = NodeId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, NodeId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

// =============================================================================
// Usages
// =============================================================================

/// One reverse edge: `user.inputs[index]` refers to the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Usage {
    pub user: NodeId,
    pub index: u32,
}

impl Usage {
    #[inline]
    pub fn new(user: NodeId, index: usize) -> Self {
        Usage {
            user,
            index: index as u32,
        }
    }

    #[inline]
    pub fn position(self) -> usize {
        self.index as usize
    }
}

/// Usage set of one node, in insertion order.
pub type UsageList = SmallVec<[Usage; 4]>;

// =============================================================================
// Node
// =============================================================================

#[derive(Clone, PartialEq, Eq)]
pub struct Node {
    pub op: Operator,
    inputs: InputList,
    pub stamp: Stamp,
}

impl Node {
    /// A detached node. Its stamp is inferred on insertion when the operator
    /// allows; otherwise `stamp` is kept.
    pub fn new(op: Operator, inputs: &[NodeId], stamp: Stamp) -> Self {
        Node {
            op,
            inputs: InputList::from_slice(inputs),
            stamp,
        }
    }

    /// A detached node whose stamp will be derived from its inputs.
    pub fn derived(op: Operator, inputs: &[NodeId]) -> Self {
        Self::new(op, inputs, Stamp::Void)
    }

    #[inline]
    pub fn inputs(&self) -> &InputList {
        &self.inputs
    }

    #[inline]
    pub(crate) fn inputs_mut(&mut self) -> &mut InputList {
        &mut self.inputs
    }

    #[inline]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index)
    }

    /// Control predecessor of a single-predecessor fixed node.
    #[inline]
    pub fn control(&self) -> Option<NodeId> {
        if self.op.is_fixed() && !self.op.is_merge() {
            self.inputs.get(0)
        } else {
            None
        }
    }

    /// Inputs with their positions and edge types.
    pub fn typed_inputs(&self) -> impl Iterator<Item = (usize, InputType, NodeId)> + '_ {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, id)| (i, self.op.input_type(i), id))
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.op.is_fixed()
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self.op {
            Operator::Constant(super::operators::Constant::Int(v)) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_logic(&self) -> Option<bool> {
        match self.op {
            Operator::LogicConstant(b) => Some(b),
            _ => None,
        }
    }

    /// Whether `other` would be interchangeable with `self` under value numbering.
    pub fn value_equals(&self, other: &Node) -> bool {
        if self.op != other.op || !self.op.is_value_numberable() {
            return false;
        }
        if self.op.stamp_is_data() && self.stamp != other.stamp {
            return false;
        }
        if self.inputs == other.inputs {
            return true;
        }
        self.op.is_commutative()
            && self.inputs.len() == 2
            && other.inputs.len() == 2
            && self.inputs.get(0) == other.inputs.get(1)
            && self.inputs.get(1) == other.inputs.get(0)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs)?;
        }
        write!(f, " : {:?}", self.stamp)
    }
}

// =============================================================================
// Graph Flags
// =============================================================================

bitflags::bitflags! {
    /// Features present in a graph, set as nodes are added.
    ///
    /// The flags are sticky: removing the last node of a kind leaves the
    /// flag set, so a clear flag is a guarantee and a set flag only a hint.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct GraphFlags: u8 {
        const FLOATING_READS = 0b0000_0001;
        const FLOATING_GUARDS = 0b0000_0010;
        const LOOPS = 0b0000_0100;
        const CALLS = 0b0000_1000;
    }
}

impl GraphFlags {
    pub fn for_operator(op: &Operator) -> GraphFlags {
        use super::operators::ControlOp;
        match op {
            Operator::Read(_) => GraphFlags::FLOATING_READS,
            Operator::Guard { .. } => GraphFlags::FLOATING_GUARDS,
            Operator::Control(ControlOp::Loop) => GraphFlags::LOOPS,
            Operator::Call(_) => GraphFlags::CALLS,
            _ => GraphFlags::empty(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
