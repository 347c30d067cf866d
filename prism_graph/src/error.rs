//! Error types.
//!
//! [`GraphError`] covers structural invariant violations detected by graph
//! primitives and verification; they are always fatal for the compilation
//! unit. [`CompileError`] is the outcome of a compilation and classifies
//! failures so that the driver can decide between reporting, falling back to
//! the interpreter (bailout) and retrying later (timeout).

use std::time::Duration;

use thiserror::Error;

use crate::ir::node::NodeId;
use crate::meta::MetaError;

// =============================================================================
// Graph Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {0} is not alive")]
    DeadNode(NodeId),

    #[error("node {node} still has {count} usages")]
    NodeStillUsed { node: NodeId, count: usize },

    #[error("input {index} of node {node} refers to dead node {input}")]
    DanglingInput {
        node: NodeId,
        index: usize,
        input: NodeId,
    },

    #[error("edge {node}[{index}] -> {input} has no matching usage")]
    MissingUsage {
        node: NodeId,
        index: usize,
        input: NodeId,
    },

    #[error("usage {user}[{index}] of {node} has no matching input edge")]
    StaleUsage {
        node: NodeId,
        user: NodeId,
        index: usize,
    },

    #[error("input {index} of {node} expects {expected}, found {input} ({found})")]
    InputTypeMismatch {
        node: NodeId,
        index: usize,
        input: NodeId,
        expected: &'static str,
        found: String,
    },

    #[error("malformed node {node}: {message}")]
    Malformed { node: NodeId, message: String },

    #[error("cannot move guards stage from {from} to {to}")]
    StageTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("corrupt encoded graph at byte {offset}: {message}")]
    Decode { offset: usize, message: String },
}

pub type GraphResult<T> = Result<T, GraphError>;

// =============================================================================
// Compile Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A structural invariant was violated. Indicates a compiler bug.
    #[error("structural invariant violated during {phase}: {source}")]
    Structural {
        phase: &'static str,
        #[source]
        source: GraphError,
    },

    /// A simplification rule failed on one node.
    #[error("simplification of {node} ({op}) failed during {phase}: {message}")]
    SimplificationFailed {
        phase: &'static str,
        node: NodeId,
        op: String,
        message: String,
    },

    /// The compiler gave up on an unsupported pattern; the caller falls back
    /// to interpretation.
    #[error("bailout: {0}")]
    Bailout(String),

    /// The compilation alarm fired. The same unit may be retried later.
    #[error("compilation exceeded its budget of {budget:?} during {phase}")]
    Timeout {
        phase: &'static str,
        budget: Duration,
    },

    /// No valid schedule exists for the graph.
    #[error("cannot schedule {node}: {message}")]
    Schedule { node: NodeId, message: String },
}

impl CompileError {
    pub fn structural(phase: &'static str, source: GraphError) -> Self {
        CompileError::Structural { phase, source }
    }

    pub fn simplification(
        phase: &'static str,
        node: NodeId,
        op: impl ToString,
        source: &MetaError,
    ) -> Self {
        CompileError::SimplificationFailed {
            phase,
            node,
            op: op.to_string(),
            message: source.to_string(),
        }
    }

    pub fn bailout(reason: impl Into<String>) -> Self {
        CompileError::Bailout(reason.into())
    }

    #[inline]
    pub fn is_bailout(&self) -> bool {
        matches!(self, CompileError::Bailout(_))
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompileError::Timeout { .. })
    }

    /// Errors that indicate a bug in the compiler rather than a limitation.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CompileError::Structural { .. }
                | CompileError::SimplificationFailed { .. }
                | CompileError::Schedule { .. }
        )
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Attach a phase name to a graph-level result.
pub trait InPhase<T> {
    fn in_phase(self, phase: &'static str) -> CompileResult<T>;
}

impl<T> InPhase<T> for GraphResult<T> {
    #[inline]
    fn in_phase(self, phase: &'static str) -> CompileResult<T> {
        self.map_err(|source| CompileError::structural(phase, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_classification() {
        let timeout = CompileError::Timeout {
            phase: "canonicalizer",
            budget: Duration::from_millis(5),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_fatal());

        let bailout = CompileError::bailout("irreducible loop");
        assert!(bailout.is_bailout());
        assert!(!bailout.is_retryable());

        let structural: CompileResult<()> =
            Err(GraphError::DeadNode(NodeId::new(3))).in_phase("gvn");
        let err = structural.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "structural invariant violated during gvn: node #3 is not alive"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_simplification_message() {
        let err = CompileError::simplification(
            "canonicalizer",
            NodeId::new(7),
            "InstanceOf(2)",
            &MetaError::UnknownType(crate::meta::TypeId(2)),
        );
        assert!(err.is_fatal());
        assert!(err.to_string().contains("#7"));
        assert!(err.to_string().contains("unknown type"));
    }
}
