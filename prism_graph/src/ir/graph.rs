//! Sea-of-nodes graph structure.
//!
//! The graph provides:
//! - **Arena storage**: nodes addressed by [`NodeId`], tombstoned on removal
//! - **Def-use bookkeeping**: every input edge has a `(user, position)` entry
//!   in the usage set of its target, maintained by every mutation primitive
//! - **Value numbering**: [`Graph::add_or_unique`] reuses an existing
//!   structurally identical floating node instead of inserting a new one
//! - **Change tracking**: marks, an optional node event log, and compression
//!
//! Mutation goes through `&mut Graph`, so a replacement like
//! [`Graph::replace_at_usages`] is never observed half done.
//!
//! Iterating usages while mutating them is not supported by the borrow
//! checker; take a snapshot first ([`Graph::usages_snapshot`]).

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::arena::{Arena, SecondaryMap};
use super::node::{GraphFlags, InputList, Node, NodeId, Usage, UsageList};
use super::operators::{ControlOp, InputType, Operator};
use super::stamp::Stamp;
use crate::error::{GraphError, GraphResult};
use crate::meta::TypeId;

// =============================================================================
// Graph-wide State
// =============================================================================

/// How far guards have been lowered. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GuardsStage {
    /// Guards float and may be moved by the scheduler.
    FloatingGuards,
    /// Guards have been turned into fixed branches to deopts.
    FixedDeopts,
    /// Deopts have their interpreter state assigned; no new deopts may appear.
    AfterFsa,
}

impl GuardsStage {
    #[inline]
    pub fn allows_floating_guards(self) -> bool {
        self == GuardsStage::FloatingGuards
    }

    #[inline]
    pub fn are_deopts_fixed(self) -> bool {
        self >= GuardsStage::FixedDeopts
    }

    pub const fn name(self) -> &'static str {
        match self {
            GuardsStage::FloatingGuards => "FloatingGuards",
            GuardsStage::FixedDeopts => "FixedDeopts",
            GuardsStage::AfterFsa => "AfterFsa",
        }
    }
}

/// Whether optimizations may rely on facts that class loading can invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowAssumptions {
    Yes,
    No,
}

/// A fact the compiled code depends on; the runtime must invalidate the code
/// if it stops holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Assumption {
    /// The type has no subclasses.
    LeafType(TypeId),
}

/// A change notification recorded while event tracking is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEvent {
    Added(NodeId),
    InputChanged(NodeId),
    /// The node lost its last usage.
    ZeroUsages(NodeId),
    /// A fixed node lost a usage and is still used.
    UsageRemoved(NodeId),
    Removed(NodeId),
}

impl NodeEvent {
    #[inline]
    pub fn node(self) -> NodeId {
        match self {
            NodeEvent::Added(n)
            | NodeEvent::InputChanged(n)
            | NodeEvent::ZeroUsages(n)
            | NodeEvent::UsageRemoved(n)
            | NodeEvent::Removed(n) => n,
        }
    }
}

/// A position in the id sequence; nodes added later have ids at or after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    index: u32,
    epoch: u32,
}

// =============================================================================
// Graph Structure
// =============================================================================

#[derive(Clone)]
pub struct Graph {
    nodes: Arena<Node>,
    usages: SecondaryMap<Node, UsageList>,
    start: NodeId,
    /// Value-numbered nodes without inputs, keyed by operator.
    leaf_cache: FxHashMap<Operator, NodeId>,
    flags: GraphFlags,
    guards_stage: GuardsStage,
    allow_assumptions: AllowAssumptions,
    assumptions: Vec<Assumption>,
    events: Option<Vec<NodeEvent>>,
    /// Bumped by every compression; marks from older epochs are stale.
    epoch: u32,
    edge_modifications: u64,
}

impl Graph {
    /// A graph holding only its start node.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(node_capacity: usize) -> Self {
        let mut nodes = Arena::with_capacity(node_capacity);
        let start = nodes.alloc(Node::new(
            Operator::Control(ControlOp::Start),
            &[],
            Stamp::Memory,
        ));
        let mut usages = SecondaryMap::with_capacity(node_capacity);
        usages.resize(1);
        Graph {
            nodes,
            usages,
            start,
            leaf_cache: FxHashMap::default(),
            flags: GraphFlags::empty(),
            guards_stage: GuardsStage::FloatingGuards,
            allow_assumptions: AllowAssumptions::Yes,
            assumptions: Vec::new(),
            events: None,
            epoch: 0,
            edge_modifications: 0,
        }
    }

    /// Control entry and initial memory state.
    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    /// The node behind `id`. Panics if the node has been removed.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn try_node(&self, id: NodeId) -> GraphResult<&Node> {
        self.nodes.get(id).ok_or(GraphError::DeadNode(id))
    }

    #[inline]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> Operator {
        self.nodes[id].op
    }

    #[inline]
    pub fn stamp(&self, id: NodeId) -> Stamp {
        self.nodes[id].stamp
    }

    /// Number of live nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// One past the largest id ever allocated; size side tables with this.
    #[inline]
    pub fn id_bound(&self) -> usize {
        self.nodes.capacity_bound()
    }

    /// Live nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.ids()
    }

    #[inline]
    pub fn flags(&self) -> GraphFlags {
        self.flags
    }

    /// Edge mutations performed so far. Unchanged value means unchanged edges.
    #[inline]
    pub fn edge_modifications(&self) -> u64 {
        self.edge_modifications
    }

    // =========================================================================
    // Edges
    // =========================================================================

    /// Inputs of `id` in position order. Calling again restarts the sequence.
    #[inline]
    pub fn inputs(&self, id: NodeId) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.nodes[id].inputs().iter()
    }

    #[inline]
    pub fn input(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.input(index))
    }

    pub fn inputs_snapshot(&self, id: NodeId) -> InputList {
        self.nodes[id].inputs().clone()
    }

    /// Usage set of `id` in insertion order.
    #[inline]
    pub fn usages(&self, id: NodeId) -> &[Usage] {
        self.usages.get(id).map_or(&[], |u| u.as_slice())
    }

    /// A point-in-time copy of the usage set, safe to iterate while mutating.
    pub fn usages_snapshot(&self, id: NodeId) -> UsageList {
        self.usages.get(id).cloned().unwrap_or_default()
    }

    #[inline]
    pub fn usage_count(&self, id: NodeId) -> usize {
        self.usages(id).len()
    }

    #[inline]
    pub fn has_usages(&self, id: NodeId) -> bool {
        !self.usages(id).is_empty()
    }

    /// Distinct users of `id`, in first-use order.
    pub fn users(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut users: SmallVec<[NodeId; 4]> = SmallVec::new();
        for usage in self.usages(id) {
            if !users.contains(&usage.user) {
                users.push(usage.user);
            }
        }
        users
    }

    /// The edge type of the usage `usage`.
    #[inline]
    pub fn usage_type(&self, usage: Usage) -> InputType {
        self.nodes[usage.user].op.input_type(usage.position())
    }

    /// Fixed nodes that name `id` as their control predecessor.
    ///
    /// For an `If` these are its projections in `[IfTrue, IfFalse]` order;
    /// for a `LoopEnd` it is the loop header.
    pub fn control_successors(&self, id: NodeId) -> SmallVec<[NodeId; 2]> {
        let mut succs: SmallVec<[NodeId; 2]> = self
            .usages(id)
            .iter()
            .filter(|u| self.nodes[u.user].is_fixed() && self.usage_type(**u) == InputType::Control)
            .map(|u| u.user)
            .collect();
        if self.op(id).is(ControlOp::If) {
            succs.sort_by_key(|s| !self.op(*s).is(ControlOp::IfTrue));
        }
        succs
    }

    /// The unique control successor of a straight-line fixed node.
    pub fn single_successor(&self, id: NodeId) -> Option<NodeId> {
        match self.control_successors(id).as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// The projection of `if_node` for the given branch direction.
    pub fn if_successor(&self, if_node: NodeId, branch: bool) -> Option<NodeId> {
        let wanted = if branch {
            ControlOp::IfTrue
        } else {
            ControlOp::IfFalse
        };
        self.usages(if_node)
            .iter()
            .map(|u| u.user)
            .find(|s| self.op(*s).is(wanted))
    }

    /// Phis (value and memory) attached to `merge`.
    pub fn phis(&self, merge: NodeId) -> SmallVec<[NodeId; 4]> {
        self.usages(merge)
            .iter()
            .filter(|u| u.index == 0 && self.op(u.user).is_phi())
            .map(|u| u.user)
            .collect()
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Insert `node` without value numbering.
    pub fn add(&mut self, mut node: Node) -> GraphResult<NodeId> {
        let id = self.nodes.next_id();
        for (index, input) in node.inputs().iter().enumerate() {
            if !self.is_alive(input) {
                return Err(GraphError::DanglingInput {
                    node: id,
                    index,
                    input,
                });
            }
        }
        self.refresh_stamp(&mut node);
        self.flags |= GraphFlags::for_operator(&node.op);
        let leaf = node.inputs().is_empty() && node.op.is_value_numberable();
        let op = node.op;
        let inputs = node.inputs().clone();

        let id = self.nodes.alloc(node);
        self.usages.resize(self.nodes.capacity_bound());
        for (index, input) in inputs.iter().enumerate() {
            self.usages[input].push(Usage::new(id, index));
        }
        if leaf {
            self.leaf_cache.entry(op).or_insert(id);
        }
        self.edge_modifications += 1;
        self.notify(NodeEvent::Added(id));
        trace!(node = %id, op = %op, "added node");
        Ok(id)
    }

    /// Insert `node`, or return an existing node it is value-equal to.
    pub fn add_or_unique(&mut self, mut node: Node) -> GraphResult<NodeId> {
        if node.op.is_value_numberable() {
            self.refresh_stamp(&mut node);
            if let Some(existing) = self.find_duplicate(&node, None) {
                return Ok(existing);
            }
        }
        self.add(node)
    }

    /// A live node other than `exclude` that is value-equal to `node`.
    ///
    /// Nodes without inputs are found through the leaf cache; otherwise the
    /// usages of the least-used input are scanned.
    pub fn find_duplicate(&self, node: &Node, exclude: Option<NodeId>) -> Option<NodeId> {
        if !node.op.is_value_numberable() {
            return None;
        }
        if node.inputs().is_empty() {
            return self
                .leaf_cache
                .get(&node.op)
                .copied()
                .filter(|id| Some(*id) != exclude)
                .filter(|id| self.get(*id).is_some_and(|n| n.value_equals(node)));
        }
        let pivot = node.inputs().iter().min_by_key(|i| self.usage_count(*i))?;
        self.usages(pivot)
            .iter()
            .map(|u| u.user)
            .filter(|user| Some(*user) != exclude)
            .find(|user| self.nodes[*user].value_equals(node))
    }

    fn refresh_stamp(&self, node: &mut Node) {
        let input_stamps: SmallVec<[Stamp; 4]> = node
            .inputs()
            .iter()
            .map(|i| self.nodes.get(i).map_or(Stamp::Empty, |n| n.stamp))
            .collect();
        if let Some(stamp) = node.op.infer_stamp(&input_stamps) {
            node.stamp = stamp;
        }
    }

    // =========================================================================
    // Edge Mutation
    // =========================================================================

    fn link(&mut self, input: NodeId, user: NodeId, index: usize) {
        self.usages[input].push(Usage::new(user, index));
    }

    fn unlink(&mut self, input: NodeId, user: NodeId, index: usize) {
        let wanted = Usage::new(user, index);
        let Some(list) = self.usages.get_mut(input) else {
            return;
        };
        if let Some(pos) = list.iter().position(|u| *u == wanted) {
            list.remove(pos);
            if list.is_empty() {
                self.notify(NodeEvent::ZeroUsages(input));
            } else if self.nodes.get(input).is_some_and(Node::is_fixed) {
                self.notify(NodeEvent::UsageRemoved(input));
            }
        }
    }

    fn check_alive(&self, id: NodeId) -> GraphResult<()> {
        if self.is_alive(id) {
            Ok(())
        } else {
            Err(GraphError::DeadNode(id))
        }
    }

    /// Point input `index` of `id` at `new`.
    pub fn set_input(&mut self, id: NodeId, index: usize, new: NodeId) -> GraphResult<()> {
        self.check_alive(new)?;
        let old = self
            .try_node(id)?
            .input(index)
            .ok_or_else(|| GraphError::Malformed {
                node: id,
                message: format!("no input at position {index}"),
            })?;
        if old == new {
            return Ok(());
        }
        self.nodes[id].inputs_mut().set(index, new);
        self.link(new, id, index);
        self.unlink(old, id, index);
        self.edge_modifications += 1;
        self.notify(NodeEvent::InputChanged(id));
        Ok(())
    }

    /// Add a trailing input (merge predecessors, phi values).
    pub fn append_input(&mut self, id: NodeId, input: NodeId) -> GraphResult<()> {
        self.check_alive(input)?;
        let index = self.try_node(id)?.inputs().len();
        self.nodes[id].inputs_mut().push(input);
        self.link(input, id, index);
        self.edge_modifications += 1;
        self.notify(NodeEvent::InputChanged(id));
        Ok(())
    }

    /// Remove input `index`, shifting later inputs down by one.
    pub fn remove_input(&mut self, id: NodeId, index: usize) -> GraphResult<NodeId> {
        let len = self.try_node(id)?.inputs().len();
        if index >= len {
            return Err(GraphError::Malformed {
                node: id,
                message: format!("no input at position {index}"),
            });
        }
        let shifted: SmallVec<[NodeId; 8]> = self.nodes[id].inputs().iter().skip(index).collect();
        for (offset, input) in shifted.iter().enumerate() {
            self.unlink(*input, id, index + offset);
        }
        let removed = self.nodes[id].inputs_mut().remove(index);
        for (offset, input) in shifted.iter().skip(1).enumerate() {
            self.link(*input, id, index + offset);
        }
        self.edge_modifications += 1;
        self.notify(NodeEvent::InputChanged(id));
        Ok(removed)
    }

    /// Drop every input edge of `id`.
    pub fn clear_inputs(&mut self, id: NodeId) -> GraphResult<()> {
        let inputs = self.try_node(id)?.inputs().clone();
        for (index, input) in inputs.iter().enumerate() {
            self.unlink(input, id, index);
        }
        self.nodes[id].inputs_mut().clear();
        self.edge_modifications += 1;
        Ok(())
    }

    /// Rewrite every usage of `old` to refer to `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) -> GraphResult<()> {
        self.replace_at_usages_where(old, new, |_, _| true)
    }

    /// Rewrite the usages of `old` selected by `filter` to refer to `new`.
    pub fn replace_at_usages_where(
        &mut self,
        old: NodeId,
        new: NodeId,
        filter: impl Fn(&Graph, Usage) -> bool,
    ) -> GraphResult<()> {
        self.check_alive(old)?;
        self.check_alive(new)?;
        if old == new {
            return Ok(());
        }
        let moved: UsageList = self
            .usages(old)
            .iter()
            .copied()
            .filter(|u| filter(self, *u))
            .collect();
        if moved.is_empty() {
            return Ok(());
        }
        for usage in &moved {
            self.nodes[usage.user].inputs_mut().set(usage.position(), new);
            self.usages[new].push(*usage);
        }
        self.usages[old].retain(|u| !moved.contains(u));
        if self.usages[old].is_empty() {
            self.notify(NodeEvent::ZeroUsages(old));
        }
        for usage in &moved {
            self.notify(NodeEvent::InputChanged(usage.user));
        }
        self.edge_modifications += 1;
        trace!(old = %old, new = %new, count = moved.len(), "replaced usages");
        Ok(())
    }

    /// Change the operator of a node in place, keeping its edges.
    ///
    /// Restricted to operator changes that keep the node's edge types, such
    /// as flipping an `If` projection.
    pub(crate) fn set_operator(&mut self, id: NodeId, op: Operator) -> GraphResult<()> {
        let node = self.try_node(id)?;
        if node.op.is_fixed() != op.is_fixed() || !op.arity().accepts(node.inputs().len()) {
            return Err(GraphError::Malformed {
                node: id,
                message: format!("cannot change {} into {op}", node.op),
            });
        }
        if node.inputs().is_empty() && self.leaf_cache.get(&node.op) == Some(&id) {
            let old = node.op;
            self.leaf_cache.remove(&old);
        }
        self.nodes[id].op = op;
        self.notify(NodeEvent::InputChanged(id));
        Ok(())
    }

    /// Re-derive the stamp of `id`; keeps it unless the new one is more precise.
    pub fn infer_stamp(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let mut candidate = node.clone();
        self.refresh_stamp(&mut candidate);
        if candidate.stamp.improves(node.stamp) {
            self.nodes[id].stamp = candidate.stamp;
            self.notify(NodeEvent::InputChanged(id));
            true
        } else {
            false
        }
    }

    pub fn set_stamp(&mut self, id: NodeId, stamp: Stamp) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.stamp = stamp;
        }
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove `id` if nothing uses it. Returns whether it was removed.
    pub fn remove_if_unused(&mut self, id: NodeId) -> bool {
        if !self.is_alive(id) || self.has_usages(id) || id == self.start {
            return false;
        }
        self.kill(id).is_ok()
    }

    /// Remove `id`. Fails if it is still used.
    pub fn kill(&mut self, id: NodeId) -> GraphResult<()> {
        self.check_alive(id)?;
        let count = self.usage_count(id);
        if count > 0 {
            return Err(GraphError::NodeStillUsed { node: id, count });
        }
        self.clear_inputs(id)?;
        let node = self.nodes.remove(id).ok_or(GraphError::DeadNode(id))?;
        if self.leaf_cache.get(&node.op) == Some(&id) {
            self.leaf_cache.remove(&node.op);
        }
        self.usages[id].clear();
        self.notify(NodeEvent::Removed(id));
        trace!(node = %id, op = %node.op, "killed node");
        Ok(())
    }

    /// Remove `id`, then every input left without usages that
    /// [`Operator::is_removable_when_unused`] allows to go. Returns the
    /// number of nodes removed.
    pub fn kill_with_unused_floating_inputs(&mut self, id: NodeId) -> GraphResult<usize> {
        let mut inputs: Vec<NodeId> = self.try_node(id)?.inputs().iter().collect();
        self.kill(id)?;
        let mut removed = 1;
        while let Some(input) = inputs.pop() {
            let dead = self
                .get(input)
                .is_some_and(|n| n.op.is_removable_when_unused() && self.usages(input).is_empty());
            if dead {
                inputs.extend(self.nodes[input].inputs().iter());
                self.kill(input)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Unlink a straight-line fixed node from the control flow and replace
    /// its value with `value`.
    ///
    /// Control and anchor usages move to the node's control predecessor;
    /// all other usages move to `value`.
    pub fn replace_fixed_with_floating(&mut self, fixed: NodeId, value: NodeId) -> GraphResult<()> {
        let pred = self.fixed_predecessor(fixed)?;
        self.replace_at_usages_where(fixed, pred, |g, u| {
            matches!(g.usage_type(u), InputType::Control | InputType::Anchor)
        })?;
        self.replace_at_usages(fixed, value)?;
        self.kill_with_unused_floating_inputs(fixed)?;
        Ok(())
    }

    /// Unlink a straight-line fixed node whose value is unused.
    pub fn remove_fixed(&mut self, fixed: NodeId) -> GraphResult<()> {
        let pred = self.fixed_predecessor(fixed)?;
        self.replace_at_usages_where(fixed, pred, |g, u| {
            matches!(g.usage_type(u), InputType::Control | InputType::Anchor)
        })?;
        self.kill_with_unused_floating_inputs(fixed)?;
        Ok(())
    }

    fn fixed_predecessor(&self, fixed: NodeId) -> GraphResult<NodeId> {
        let node = self.try_node(fixed)?;
        let straight_line = node.is_fixed()
            && !node.op.is_block_begin()
            && !node.op.is_block_end();
        match node.control() {
            Some(pred) if straight_line => Ok(pred),
            _ => Err(GraphError::Malformed {
                node: fixed,
                message: format!("{} is not a straight-line fixed node", node.op),
            }),
        }
    }

    // =========================================================================
    // Graph-wide State
    // =========================================================================

    #[inline]
    pub fn guards_stage(&self) -> GuardsStage {
        self.guards_stage
    }

    pub fn set_guards_stage(&mut self, stage: GuardsStage) -> GraphResult<()> {
        if stage < self.guards_stage {
            return Err(GraphError::StageTransition {
                from: self.guards_stage.name(),
                to: stage.name(),
            });
        }
        self.guards_stage = stage;
        Ok(())
    }

    #[inline]
    pub fn allow_assumptions(&self) -> AllowAssumptions {
        self.allow_assumptions
    }

    pub fn set_allow_assumptions(&mut self, allow: AllowAssumptions) {
        self.allow_assumptions = allow;
    }

    /// Record `assumption` if assumptions are allowed; returns whether it was.
    pub fn record_assumption(&mut self, assumption: Assumption) -> bool {
        if self.allow_assumptions == AllowAssumptions::No {
            return false;
        }
        if !self.assumptions.contains(&assumption) {
            debug!(?assumption, "recorded assumption");
            self.assumptions.push(assumption);
        }
        true
    }

    pub fn assumptions(&self) -> &[Assumption] {
        &self.assumptions
    }

    // =========================================================================
    // Change Tracking
    // =========================================================================

    pub fn mark(&self) -> Mark {
        Mark {
            index: self.nodes.next_id().index(),
            epoch: self.epoch,
        }
    }

    /// Live nodes added since `mark`. Empty if the graph was compressed since.
    pub fn new_nodes(&self, mark: Mark) -> impl Iterator<Item = NodeId> + '_ {
        let from = if mark.epoch == self.epoch {
            mark.index
        } else {
            u32::MAX
        };
        self.ids().filter(move |id| id.index() >= from)
    }

    /// Start recording [`NodeEvent`]s.
    pub fn track_events(&mut self) {
        self.events.get_or_insert_with(Vec::new);
    }

    pub fn stop_tracking_events(&mut self) {
        self.events = None;
    }

    /// Take the events recorded so far.
    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        self.events.as_mut().map(std::mem::take).unwrap_or_default()
    }

    #[inline]
    fn notify(&mut self, event: NodeEvent) {
        if let Some(events) = self.events.as_mut() {
            events.push(event);
        }
    }

    // =========================================================================
    // Compression
    // =========================================================================

    /// Percentage of allocated ids that are still live.
    pub fn live_percentage(&self) -> usize {
        self.node_count() * 100 / self.id_bound().max(1)
    }

    /// Compress if the live percentage is below `threshold`.
    pub fn maybe_compress(&mut self, threshold: u8) -> Option<SecondaryMap<Node, NodeId>> {
        if self.live_percentage() >= usize::from(threshold) {
            return None;
        }
        Some(self.compress())
    }

    /// Renumber live nodes densely. Every id held outside the graph is
    /// invalidated; the returned map translates old ids to new ones.
    pub fn compress(&mut self) -> SecondaryMap<Node, NodeId> {
        let before = self.id_bound();
        let remap = self.nodes.compact();
        let translate = |id: NodeId| remap.get(id).copied().unwrap_or(NodeId::INVALID);

        let ids: Vec<NodeId> = self.nodes.ids().collect();
        let mut usages: SecondaryMap<Node, UsageList> = SecondaryMap::with_capacity(ids.len());
        for &id in &ids {
            let node = &mut self.nodes[id];
            let renamed: SmallVec<[NodeId; 8]> = node.inputs().iter().map(translate).collect();
            for (index, input) in renamed.iter().enumerate() {
                node.inputs_mut().set(index, *input);
                usages[*input].push(Usage::new(id, index));
            }
        }
        self.usages = usages;
        self.start = translate(self.start);
        for id in self.leaf_cache.values_mut() {
            *id = translate(*id);
        }
        self.events = self.events.as_ref().map(|_| Vec::new());
        self.epoch += 1;
        self.edge_modifications += 1;
        debug!(before, after = self.id_bound(), "compressed graph");
        remap
    }

    /// Check the structural invariants; see [`super::verify`].
    pub fn verify(&self) -> GraphResult<()> {
        super::verify::verify_graph(self)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} nodes, {:?}) {{", self.node_count(), self.guards_stage)?;
        for (id, node) in self.iter() {
            writeln!(f, "  {id:?}: {node:?}")?;
        }
        write!(f, "}}")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{ArithOp, CmpOp, Constant, DeoptReason};

    fn constant(g: &mut Graph, v: i64) -> NodeId {
        g.add_or_unique(Node::derived(Operator::Constant(Constant::Int(v)), &[]))
            .unwrap()
    }

    fn param(g: &mut Graph, i: u16) -> NodeId {
        g.add(Node::new(Operator::Parameter(i), &[], Stamp::INT)).unwrap()
    }

    fn add(g: &mut Graph, a: NodeId, b: NodeId) -> NodeId {
        g.add(Node::derived(Operator::Arith(ArithOp::Add), &[a, b]))
            .unwrap()
    }

    #[test]
    fn test_new_graph() {
        let g = Graph::new();
        assert_eq!(g.node_count(), 1);
        assert!(g.op(g.start()).is(ControlOp::Start));
        assert_eq!(g.stamp(g.start()), Stamp::Memory);
        g.verify().unwrap();
    }

    #[test]
    fn test_add_registers_usages() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        let sum = add(&mut g, a, a);
        assert_eq!(
            g.usages(a),
            &[Usage::new(sum, 0), Usage::new(sum, 1)]
        );
        assert_eq!(g.users(a).as_slice(), &[sum]);
        g.verify().unwrap();
    }

    #[test]
    fn test_add_rejects_dead_input() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        g.kill(a).unwrap();
        let err = g
            .add(Node::derived(Operator::Unary(crate::ir::operators::UnaryOp::Neg), &[a]))
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingInput { input, .. } if input == a));
    }

    #[test]
    fn test_stamp_inferred_on_add() {
        let mut g = Graph::new();
        let two = constant(&mut g, 2);
        let three = constant(&mut g, 3);
        let sum = add(&mut g, two, three);
        assert_eq!(g.stamp(sum), Stamp::int_constant(5));
    }

    #[test]
    fn test_add_or_unique_leaf_and_inner() {
        let mut g = Graph::new();
        let c1 = constant(&mut g, 7);
        let c2 = constant(&mut g, 7);
        assert_eq!(c1, c2);

        let a = param(&mut g, 0);
        let x = g
            .add_or_unique(Node::derived(Operator::Arith(ArithOp::Add), &[a, c1]))
            .unwrap();
        let y = g
            .add_or_unique(Node::derived(Operator::Arith(ArithOp::Add), &[c1, a]))
            .unwrap();
        assert_eq!(x, y);

        let s1 = g
            .add_or_unique(Node::derived(Operator::Arith(ArithOp::Sub), &[a, c1]))
            .unwrap();
        let s2 = g
            .add_or_unique(Node::derived(Operator::Arith(ArithOp::Sub), &[c1, a]))
            .unwrap();
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_parameters_never_unique() {
        let mut g = Graph::new();
        let p1 = g.add_or_unique(Node::new(Operator::Parameter(0), &[], Stamp::INT)).unwrap();
        let p2 = g.add_or_unique(Node::new(Operator::Parameter(0), &[], Stamp::INT)).unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_set_input_moves_usage() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        let b = param(&mut g, 1);
        let sum = add(&mut g, a, a);
        g.set_input(sum, 1, b).unwrap();
        assert_eq!(g.usages(a), &[Usage::new(sum, 0)]);
        assert_eq!(g.usages(b), &[Usage::new(sum, 1)]);
        g.verify().unwrap();
    }

    #[test]
    fn test_remove_input_renumbers() {
        let mut g = Graph::new();
        let region = g
            .add(Node::derived(Operator::Control(ControlOp::Region), &[g.start()]))
            .unwrap();
        let values: Vec<_> = (0..3).map(|i| param(&mut g, i)).collect();
        let phi = g
            .add(Node::derived(Operator::Phi, &[region, values[0], values[1], values[2]]))
            .unwrap();
        assert_eq!(g.remove_input(phi, 2).unwrap(), values[1]);
        assert_eq!(g.usages(values[2]), &[Usage::new(phi, 2)]);
        assert!(g.usages(values[1]).is_empty());
        assert_eq!(g.node(phi).inputs().as_slice(), &[region, values[0], values[2]]);
    }

    #[test]
    fn test_replace_at_usages() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        let b = param(&mut g, 1);
        let s1 = add(&mut g, a, b);
        let s2 = add(&mut g, b, a);
        g.replace_at_usages(a, b).unwrap();
        assert!(!g.has_usages(a));
        assert_eq!(g.usage_count(b), 4);
        assert_eq!(g.node(s1).inputs().as_slice(), &[b, b]);
        assert_eq!(g.node(s2).inputs().as_slice(), &[b, b]);
        g.verify().unwrap();
    }

    #[test]
    fn test_kill_with_usages_is_error() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        let _sum = add(&mut g, a, a);
        assert_eq!(
            g.kill(a),
            Err(GraphError::NodeStillUsed { node: a, count: 2 })
        );
        assert!(!g.remove_if_unused(a));
        assert!(g.is_alive(a));
    }

    #[test]
    fn test_kill_with_unused_floating_inputs() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        let one = constant(&mut g, 1);
        let sum = add(&mut g, a, one);
        let neg = g
            .add(Node::derived(Operator::Unary(crate::ir::operators::UnaryOp::Neg), &[sum]))
            .unwrap();
        assert_eq!(g.kill_with_unused_floating_inputs(neg).unwrap(), 3);
        assert!(!g.is_alive(sum));
        assert!(!g.is_alive(one));
        assert!(g.is_alive(a));
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn test_kill_cascade_keeps_guards() {
        let mut g = Graph::new();
        let start = g.start();
        let a = param(&mut g, 0);
        let ten = constant(&mut g, 10);
        let cond = g
            .add(Node::derived(Operator::Compare(CmpOp::Lt), &[a, ten]))
            .unwrap();
        let guard = g
            .add(Node::derived(
                Operator::Guard {
                    reason: DeoptReason::BoundsCheck,
                    negated: false,
                },
                &[cond, start],
            ))
            .unwrap();
        let pi = g
            .add(Node::new(Operator::Pi, &[a, guard], Stamp::int_range(i64::MIN, 9)))
            .unwrap();

        assert_eq!(g.kill_with_unused_floating_inputs(pi).unwrap(), 1);
        assert!(g.is_alive(guard));
        assert!(g.is_alive(cond));
        assert!(g.is_alive(a));
        g.verify().unwrap();
    }

    #[test]
    fn test_replace_fixed_with_floating() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        let b = param(&mut g, 1);
        let div = g
            .add(Node::derived(
                Operator::Div(crate::ir::operators::DivOp::Div),
                &[g.start(), a, b],
            ))
            .unwrap();
        let ret = g
            .add(Node::derived(Operator::Control(ControlOp::Return), &[div, div]))
            .unwrap();
        g.replace_fixed_with_floating(div, a).unwrap();
        assert_eq!(g.node(ret).inputs().as_slice(), &[g.start(), a]);
        assert!(!g.is_alive(div));
        assert!(!g.is_alive(b));
        g.verify().unwrap();
    }

    #[test]
    fn test_control_successors_order() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        let zero = constant(&mut g, 0);
        let cond = g
            .add(Node::derived(Operator::Compare(CmpOp::Eq), &[a, zero]))
            .unwrap();
        let iff = g
            .add(Node::derived(Operator::Control(ControlOp::If), &[g.start(), cond]))
            .unwrap();
        let f = g
            .add(Node::derived(Operator::Control(ControlOp::IfFalse), &[iff]))
            .unwrap();
        let t = g
            .add(Node::derived(Operator::Control(ControlOp::IfTrue), &[iff]))
            .unwrap();
        assert_eq!(g.control_successors(iff).as_slice(), &[t, f]);
        assert_eq!(g.if_successor(iff, false), Some(f));
        assert_eq!(g.single_successor(g.start()), Some(iff));
    }

    #[test]
    fn test_mark_and_new_nodes() {
        let mut g = Graph::new();
        param(&mut g, 0);
        let mark = g.mark();
        let b = param(&mut g, 1);
        let c = constant(&mut g, 3);
        assert_eq!(g.new_nodes(mark).collect::<Vec<_>>(), vec![b, c]);
    }

    #[test]
    fn test_events() {
        let mut g = Graph::new();
        let a = param(&mut g, 0);
        g.track_events();
        let sum = add(&mut g, a, a);
        g.kill(sum).unwrap();
        let events = g.drain_events();
        assert_eq!(
            events,
            vec![
                NodeEvent::Added(sum),
                NodeEvent::ZeroUsages(a),
                NodeEvent::Removed(sum),
            ]
        );
        g.stop_tracking_events();
        param(&mut g, 1);
        assert!(g.drain_events().is_empty());
    }

    #[test]
    fn test_compress() {
        let mut g = Graph::new();
        let dead: Vec<_> = (0..6).map(|i| param(&mut g, i)).collect();
        let a = param(&mut g, 10);
        let one = constant(&mut g, 1);
        let sum = add(&mut g, a, one);
        for d in dead {
            g.kill(d).unwrap();
        }
        assert!(g.maybe_compress(30).is_none());
        let remap = g.maybe_compress(70).unwrap();
        assert_eq!(g.id_bound(), g.node_count());
        let sum = remap[sum];
        let one = remap[one];
        assert_eq!(g.node(sum).inputs().as_slice(), &[remap[a], one]);
        assert_eq!(constant(&mut g, 1), one);
        g.verify().unwrap();
    }

    #[test]
    fn test_guards_stage_monotone() {
        let mut g = Graph::new();
        assert!(g.guards_stage().allows_floating_guards());
        g.set_guards_stage(GuardsStage::FixedDeopts).unwrap();
        assert!(g.guards_stage().are_deopts_fixed());
        assert!(g.set_guards_stage(GuardsStage::FloatingGuards).is_err());
    }

    #[test]
    fn test_assumptions() {
        let mut g = Graph::new();
        assert!(g.record_assumption(Assumption::LeafType(TypeId(1))));
        assert!(g.record_assumption(Assumption::LeafType(TypeId(1))));
        assert_eq!(g.assumptions().len(), 1);
        g.set_allow_assumptions(AllowAssumptions::No);
        assert!(!g.record_assumption(Assumption::LeafType(TypeId(2))));
    }
}
