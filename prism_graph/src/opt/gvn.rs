//! Global Value Numbering (GVN) phase.
//!
//! GVN eliminates redundant computations by replacing every floating node
//! with a structurally identical one already in the graph: same operator and
//! payload, same inputs (commutative inputs in normalized order).
//!
//! The graph keeps no value table. A lookup scans the usages of the node's
//! least used input, or the leaf cache for nodes without inputs, so the phase
//! is the canonicalizer with its simplification rules switched off.

use super::Phase;
use super::canonicalize::Canonicalizer;
use crate::config::CanonicalizerConfig;
use crate::context::CompilationContext;
use crate::error::CompileResult;
use crate::ir::graph::Graph;

const PHASE: &str = "gvn";

/// Global Value Numbering phase.
#[derive(Debug)]
pub struct GlobalValueNumbering {
    inner: Canonicalizer,
}

impl GlobalValueNumbering {
    pub fn new() -> Self {
        GlobalValueNumbering {
            inner: Canonicalizer::with_config(CanonicalizerConfig::gvn_only()).named(PHASE),
        }
    }

    /// Number of nodes replaced by a duplicate over every run.
    pub fn deduplicated(&self) -> usize {
        self.inner.stats().value_numbered
    }
}

impl Default for GlobalValueNumbering {
    fn default() -> Self {
        Self::new()
    }
}

impl Phase for GlobalValueNumbering {
    fn name(&self) -> &'static str {
        PHASE
    }

    fn run(&mut self, graph: &mut Graph, ctx: &CompilationContext) -> CompileResult<bool> {
        self.inner.apply(graph, ctx)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, MemoryBuilder};
    use crate::ir::operators::{ArithOp, LocationIdentity, Operator};
    use crate::ir::stamp::Stamp;

    fn run(graph: &mut Graph) -> GlobalValueNumbering {
        let ctx = CompilationContext::for_testing();
        let mut gvn = GlobalValueNumbering::new();
        gvn.run(graph, &ctx).unwrap();
        graph.verify().unwrap();
        gvn
    }

    #[test]
    fn test_gvn_deduplicates_arithmetic() {
        let mut b = GraphBuilder::new(2).without_value_numbering();
        let p0 = b.parameter(0).unwrap();
        let p1 = b.parameter(1).unwrap();
        let sum1 = b.int_add(p0, p1);
        let sum2 = b.int_add(p0, p1);
        let product = b.int_mul(sum1, sum2);
        b.return_value(Some(product));
        let mut g = b.finish().unwrap();

        let gvn = run(&mut g);
        assert_eq!(gvn.deduplicated(), 1);
        let adds = g
            .iter()
            .filter(|(_, n)| n.op == Operator::Arith(ArithOp::Add))
            .count();
        assert_eq!(adds, 1);
    }

    #[test]
    fn test_gvn_merges_usage_counts() {
        let mut b = GraphBuilder::new(1).without_value_numbering();
        let x = b.parameter(0).unwrap();
        let c1 = b.const_int(7);
        let c2 = b.const_int(7);
        let a = b.int_add(x, c1);
        let s = b.int_sub(a, c2);
        let m = b.int_mul(s, c2);
        b.return_value(Some(m));
        let mut g = b.finish().unwrap();

        run(&mut g);
        let survivor = if g.is_alive(c1) { c1 } else { c2 };
        assert!(!(g.is_alive(c1) && g.is_alive(c2)));
        assert_eq!(g.usage_count(survivor), 3);
    }

    #[test]
    fn test_gvn_preserves_different() {
        let mut b = GraphBuilder::new(2).without_value_numbering();
        let p0 = b.parameter(0).unwrap();
        let p1 = b.parameter(1).unwrap();
        let sum = b.int_add(p0, p1);
        let diff = b.int_sub(p0, p1);
        let product = b.int_mul(sum, diff);
        b.return_value(Some(product));
        let mut g = b.finish().unwrap();

        let ctx = CompilationContext::for_testing();
        let mut gvn = GlobalValueNumbering::new();
        assert!(!gvn.run(&mut g, &ctx).unwrap());
        assert!(g.is_alive(sum));
        assert!(g.is_alive(diff));
    }

    #[test]
    fn test_gvn_keeps_reads_of_different_memory() {
        let slot = LocationIdentity::Named(1);
        let mut b = GraphBuilder::with_parameters(&[Stamp::OBJECT, Stamp::INT])
            .without_value_numbering();
        let p = b.parameter(0).unwrap();
        let v = b.parameter(1).unwrap();
        let before = b.read(slot, p, Stamp::INT);
        b.write(slot, p, v);
        let after = b.read(slot, p, Stamp::INT);
        let sum = b.int_add(before, after);
        b.return_value(Some(sum));
        let mut g = b.finish().unwrap();

        run(&mut g);
        assert!(g.is_alive(before));
        assert!(g.is_alive(after));
    }
}
