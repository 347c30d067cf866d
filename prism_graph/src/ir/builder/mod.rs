//! IR graph builder.
//!
//! The builder is the construction API used by front ends and tests. It
//! tracks the current control position and memory state, wires fixed nodes
//! into the control chain, merges memory states at regions and loops with
//! memory phis, and value numbers floating nodes on insertion unless told
//! otherwise.
//!
//! Operations are infallible at the call site: the first error is kept and
//! returned by [`GraphBuilder::finish`], and the failing operation yields
//! `NodeId::INVALID`.

use std::sync::Arc;

use tracing::warn;

use crate::error::{CompileError, CompileResult, GraphError};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::Operator;
use crate::ir::stamp::Stamp;
use crate::meta::MetaAccess;

pub mod arithmetic;
pub mod control;
pub mod memory;


pub use arithmetic::ArithmeticBuilder;
pub use control::{Branch, ControlBuilder, LoopScope, PathEnd};
pub use memory::MemoryBuilder;

// =============================================================================
// Frame State
// =============================================================================

/// Where construction currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameState {
    /// Last fixed node on the current path; `INVALID` after a path ends.
    pub(crate) control: NodeId,
    /// Current memory state.
    pub(crate) memory: NodeId,
}

// =============================================================================
// Graph Builder
// =============================================================================

pub struct GraphBuilder {
    pub(crate) graph: Graph,
    pub(crate) state: FrameState,
    parameters: Vec<NodeId>,
    pub(crate) meta: Option<Arc<dyn MetaAccess>>,
    value_numbering: bool,
    error: Option<CompileError>,
}

impl GraphBuilder {
    /// A builder for a method taking `num_parameters` integer parameters.
    pub fn new(num_parameters: usize) -> Self {
        Self::with_parameters(&vec![Stamp::INT; num_parameters])
    }

    /// A builder whose parameters have the given stamps.
    pub fn with_parameters(stamps: &[Stamp]) -> Self {
        let mut graph = Graph::new();
        let start = graph.start();
        let mut parameters = Vec::with_capacity(stamps.len());
        let mut error = None;
        for (i, stamp) in stamps.iter().enumerate() {
            match graph.add(Node::new(Operator::Parameter(i as u16), &[], *stamp)) {
                Ok(id) => parameters.push(id),
                Err(e) => {
                    error.get_or_insert(CompileError::structural("graph builder", e));
                }
            }
        }
        GraphBuilder {
            graph,
            state: FrameState {
                control: start,
                memory: start,
            },
            parameters,
            meta: None,
            value_numbering: true,
            error,
        }
    }

    /// Use `meta` to resolve field accesses.
    pub fn with_meta(mut self, meta: Arc<dyn MetaAccess>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Insert every floating node as a fresh node, even if an identical one
    /// already exists.
    pub fn without_value_numbering(mut self) -> Self {
        self.value_numbering = false;
        self
    }

    /// The constructed graph, or the first error encountered.
    pub fn finish(self) -> CompileResult<Graph> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.graph),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    // =========================================================================
    // State Management
    // =========================================================================

    pub fn parameter(&self, index: usize) -> Option<NodeId> {
        self.parameters.get(index).copied()
    }

    /// The current control position.
    pub fn control(&self) -> NodeId {
        self.state.control
    }

    /// The current memory state.
    pub fn memory(&self) -> NodeId {
        self.state.memory
    }

    /// Whether the current path is still open.
    pub fn is_reachable(&self) -> bool {
        self.state.control.is_valid()
    }

    pub fn error(&self) -> Option<&CompileError> {
        self.error.as_ref()
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Insert a floating node, value numbering it if enabled.
    pub(crate) fn append(&mut self, node: Node) -> NodeId {
        let result = if self.value_numbering {
            self.graph.add_or_unique(node)
        } else {
            self.graph.add(node)
        };
        self.record(result)
    }

    /// Insert a fixed node after the current control position and make it
    /// the new control position.
    pub(crate) fn append_fixed(&mut self, op: Operator, values: &[NodeId], stamp: Stamp) -> NodeId {
        if !self.is_reachable() {
            self.fail(CompileError::bailout(format!("{op} appended to a closed path")));
            return NodeId::INVALID;
        }
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(self.state.control);
        inputs.extend_from_slice(values);
        let result = self.graph.add(Node::new(op, &inputs, stamp));
        let id = self.record(result);
        if id.is_valid() {
            self.state.control = id;
        }
        id
    }

    pub(crate) fn record(&mut self, result: Result<NodeId, GraphError>) -> NodeId {
        match result {
            Ok(id) => id,
            Err(e) => {
                self.fail(CompileError::structural("graph builder", e));
                NodeId::INVALID
            }
        }
    }

    pub(crate) fn fail(&mut self, err: CompileError) {
        if self.error.is_none() {
            warn!(error = %err, "graph construction failed");
            self.error = Some(err);
        }
    }
}
