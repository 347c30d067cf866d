//! Control flow construction: branches, merges, loops and sinks.
//!
//! Paths are explicit. A branch is entered with [`ControlBuilder::begin`],
//! left with [`ControlBuilder::end_path`], and the captured [`PathEnd`]s are
//! joined with [`ControlBuilder::merge`]. Memory states that differ between
//! joined paths are merged by a `MemoryPhi`.

use super::GraphBuilder;
use crate::error::CompileError;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::{ControlOp, DeoptReason, LocationIdentity, Operator};
use crate::ir::stamp::Stamp;

/// A two-way branch whose projections have not all been entered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub if_node: NodeId,
    memory: NodeId,
}

/// The state at the end of a path, ready to be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEnd {
    control: NodeId,
    memory: NodeId,
}

impl PathEnd {
    pub fn control(&self) -> NodeId {
        self.control
    }
}

/// An open loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopScope {
    pub header: NodeId,
    memory_phi: NodeId,
}

pub trait ControlBuilder {
    /// End the current block with an `If` on `condition`.
    fn branch(&mut self, condition: NodeId) -> Branch;

    /// Continue on the projection of `branch` for direction `taken`.
    fn begin(&mut self, branch: &Branch, taken: bool) -> NodeId;

    /// Close the current path for a later merge.
    fn end_path(&mut self) -> PathEnd;

    /// Join `paths` in a new `Region` and continue after it.
    fn merge(&mut self, paths: &[PathEnd]) -> NodeId;

    /// A value phi at `merge` with one value per merge predecessor.
    fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> NodeId;

    /// Open a loop whose forward entry is the current path.
    fn loop_begin(&mut self) -> LoopScope;

    /// A loop phi with its entry value; back values are given to `loop_end`.
    fn loop_phi(&mut self, scope: &LoopScope, initial: NodeId) -> NodeId;

    /// Close the current path as a back edge of `scope`, supplying the back
    /// value of each loop phi.
    fn loop_end(&mut self, scope: &LoopScope, back_values: &[(NodeId, NodeId)]) -> NodeId;

    fn return_value(&mut self, value: Option<NodeId>) -> NodeId;

    fn deopt(&mut self) -> NodeId;

    /// A floating guard anchored at the current control position.
    fn guard(&mut self, condition: NodeId, reason: DeoptReason, negated: bool) -> NodeId;

    /// Narrow `value` to `stamp` below `anchor`.
    fn pi(&mut self, value: NodeId, stamp: Stamp, anchor: NodeId) -> NodeId;
}

impl GraphBuilder {
    fn close_path(&mut self) {
        self.state.control = NodeId::INVALID;
    }

    fn require_open(&mut self, what: &str) -> bool {
        if self.is_reachable() {
            return true;
        }
        self.fail(CompileError::bailout(format!("{what} on a closed path")));
        false
    }
}

impl ControlBuilder for GraphBuilder {
    fn branch(&mut self, condition: NodeId) -> Branch {
        let memory = self.state.memory;
        let if_node = self.append_fixed(Operator::Control(ControlOp::If), &[condition], Stamp::Void);
        self.close_path();
        Branch { if_node, memory }
    }

    fn begin(&mut self, branch: &Branch, taken: bool) -> NodeId {
        if !branch.if_node.is_valid() {
            return NodeId::INVALID;
        }
        if self.graph.if_successor(branch.if_node, taken).is_some() {
            self.fail(CompileError::bailout(format!(
                "branch {} entered twice in direction {taken}",
                branch.if_node
            )));
            return NodeId::INVALID;
        }
        let op = if taken { ControlOp::IfTrue } else { ControlOp::IfFalse };
        let result = self
            .graph
            .add(Node::derived(Operator::Control(op), &[branch.if_node]));
        let begin = self.record(result);
        self.state.control = begin;
        self.state.memory = branch.memory;
        begin
    }

    fn end_path(&mut self) -> PathEnd {
        let end = PathEnd {
            control: self.state.control,
            memory: self.state.memory,
        };
        self.close_path();
        end
    }

    fn merge(&mut self, paths: &[PathEnd]) -> NodeId {
        if paths.is_empty() || paths.iter().any(|p| !p.control.is_valid()) {
            self.fail(CompileError::bailout("merge of a closed path"));
            return NodeId::INVALID;
        }
        let controls: Vec<NodeId> = paths.iter().map(|p| p.control).collect();
        let result = self
            .graph
            .add(Node::derived(Operator::Control(ControlOp::Region), &controls));
        let region = self.record(result);
        if !region.is_valid() {
            return region;
        }

        let first = paths[0].memory;
        self.state.memory = if paths.iter().all(|p| p.memory == first) {
            first
        } else {
            let mut inputs = Vec::with_capacity(paths.len() + 1);
            inputs.push(region);
            inputs.extend(paths.iter().map(|p| p.memory));
            let result = self.graph.add(Node::derived(
                Operator::MemoryPhi(LocationIdentity::Any),
                &inputs,
            ));
            self.record(result)
        };
        self.state.control = region;
        region
    }

    fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> NodeId {
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(merge);
        inputs.extend_from_slice(values);
        let result = self.graph.add(Node::derived(Operator::Phi, &inputs));
        self.record(result)
    }

    fn loop_begin(&mut self) -> LoopScope {
        if !self.require_open("loop entry") {
            return LoopScope {
                header: NodeId::INVALID,
                memory_phi: NodeId::INVALID,
            };
        }
        let result = self.graph.add(Node::derived(
            Operator::Control(ControlOp::Loop),
            &[self.state.control],
        ));
        let header = self.record(result);
        let result = self.graph.add(Node::derived(
            Operator::MemoryPhi(LocationIdentity::Any),
            &[header, self.state.memory],
        ));
        let memory_phi = self.record(result);
        self.state.control = header;
        self.state.memory = memory_phi;
        LoopScope { header, memory_phi }
    }

    fn loop_phi(&mut self, scope: &LoopScope, initial: NodeId) -> NodeId {
        let phi = self.phi(scope.header, &[initial]);
        if phi.is_valid() {
            // Until the back values are known only the kind of value is.
            let widened = match self.graph.stamp(phi) {
                Stamp::Int(_) => Stamp::INT,
                Stamp::Object(_) => Stamp::OBJECT,
                other => other,
            };
            self.graph.set_stamp(phi, widened);
        }
        phi
    }

    fn loop_end(&mut self, scope: &LoopScope, back_values: &[(NodeId, NodeId)]) -> NodeId {
        if !self.require_open("loop back edge") || !scope.header.is_valid() {
            return NodeId::INVALID;
        }
        let end = self.append_fixed(Operator::Control(ControlOp::LoopEnd), &[], Stamp::Void);
        if !end.is_valid() {
            return end;
        }
        let result = self.graph.append_input(scope.header, end);
        self.record(result.map(|()| end));

        for phi in self.graph.phis(scope.header) {
            let back = if phi == scope.memory_phi {
                Some(self.state.memory)
            } else {
                back_values.iter().find(|(p, _)| *p == phi).map(|(_, v)| *v)
            };
            let Some(back) = back else {
                self.fail(CompileError::bailout(format!(
                    "loop phi {phi} has no back value"
                )));
                continue;
            };
            let result = self.graph.append_input(phi, back);
            self.record(result.map(|()| phi));
            if phi != scope.memory_phi {
                let stamps: Vec<Stamp> = self
                    .graph
                    .inputs(phi)
                    .skip(1)
                    .map(|v| self.graph.stamp(v))
                    .collect();
                if let Some(stamp) = stamps.into_iter().try_fold(Stamp::Empty, |a, s| a.meet(s)) {
                    self.graph.set_stamp(phi, stamp);
                }
            }
        }
        self.close_path();
        end
    }

    fn return_value(&mut self, value: Option<NodeId>) -> NodeId {
        let values: &[NodeId] = match &value {
            Some(v) => std::slice::from_ref(v),
            None => &[],
        };
        let ret = self.append_fixed(Operator::Control(ControlOp::Return), values, Stamp::Void);
        self.close_path();
        ret
    }

    fn deopt(&mut self) -> NodeId {
        let deopt = self.append_fixed(Operator::Control(ControlOp::Deopt), &[], Stamp::Void);
        self.close_path();
        deopt
    }

    fn guard(&mut self, condition: NodeId, reason: DeoptReason, negated: bool) -> NodeId {
        if !self.require_open("guard") {
            return NodeId::INVALID;
        }
        let anchor = self.state.control;
        let result = self.graph.add(Node::derived(
            Operator::Guard { reason, negated },
            &[condition, anchor],
        ));
        self.record(result)
    }

    fn pi(&mut self, value: NodeId, stamp: Stamp, anchor: NodeId) -> NodeId {
        self.append(Node::new(Operator::Pi, &[value, anchor], stamp))
    }
}
