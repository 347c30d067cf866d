//! Graph phases.
//!
//! - **Canonicalizer**: local rewrites, constant folding and control flow
//!   simplification driven by a worklist
//! - **GVN**: the canonicalizer restricted to value numbering
//! - **DCE**: removes unreachable control flow and unused values
//! - **Guard lowering**: turns floating guards into explicit deoptimizing
//!   branches
//!
//! [`PhaseSuite`] runs a list of phases to a fixed point.

pub mod canonicalize;
pub mod dce;
pub mod guards;
pub mod gvn;
pub mod pipeline;

pub use canonicalize::{Canonical, Canonicalizer, CanonicalizerStats};
pub use dce::DeadCodeElimination;
pub use guards::GuardLowering;
pub use gvn::GlobalValueNumbering;
pub use pipeline::{PhaseStat, PhaseSuite, SuiteStats};

use crate::context::CompilationContext;
use crate::error::CompileResult;
use crate::ir::graph::Graph;

// =============================================================================
// Phase Trait
// =============================================================================

/// A single transformation of the graph.
pub trait Phase {
    /// The name of this phase, used in logs, errors and dumps.
    fn name(&self) -> &'static str;

    /// Run the phase on the graph.
    /// Returns true if the graph was modified.
    fn run(&mut self, graph: &mut Graph, ctx: &CompilationContext) -> CompileResult<bool>;
}
