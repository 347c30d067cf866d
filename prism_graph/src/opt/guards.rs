//! Guard lowering.
//!
//! A floating guard `Guard(condition, anchor)` only states that execution
//! past its anchor deoptimizes unless the condition holds (or fails, for a
//! negated guard). This phase makes the check explicit:
//!
//! ```text
//!   anchor -> next              anchor -> If(condition)
//!                       =>                 |-- pass -> next
//!                                          `-- fail -> Deopt
//! ```
//!
//! Nodes anchored on the guard are re-anchored on the passing projection.
//! Several guards on the same anchor are chained in id order. Afterwards
//! the graph moves to [`GuardsStage::FixedDeopts`].

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::Phase;
use crate::context::CompilationContext;
use crate::error::{CompileResult, GraphError, InPhase};
use crate::ir::graph::{Graph, GuardsStage};
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::{ControlOp, InputType, Operator};

const PHASE: &str = "guard-lowering";

#[derive(Debug, Default)]
pub struct GuardLowering {
    lowered: usize,
}

impl GuardLowering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guards lowered by the last run.
    pub fn lowered(&self) -> usize {
        self.lowered
    }

    /// Replace `guard` by a branch after `point`; returns the passing
    /// projection.
    fn lower(graph: &mut Graph, guard: NodeId, point: NodeId) -> CompileResult<NodeId> {
        let Operator::Guard { negated, reason } = graph.op(guard) else {
            return Ok(point);
        };
        let condition = graph
            .input(guard, 0)
            .ok_or_else(|| GraphError::Malformed {
                node: guard,
                message: "guard without condition".into(),
            })
            .in_phase(PHASE)?;

        let iff = graph
            .add(Node::derived(Operator::Control(ControlOp::If), &[point, condition]))
            .in_phase(PHASE)?;
        let on_true = graph
            .add(Node::derived(Operator::Control(ControlOp::IfTrue), &[iff]))
            .in_phase(PHASE)?;
        let on_false = graph
            .add(Node::derived(Operator::Control(ControlOp::IfFalse), &[iff]))
            .in_phase(PHASE)?;
        // The guard passes when the condition differs from `negated`.
        let (pass, fail) = if negated {
            (on_false, on_true)
        } else {
            (on_true, on_false)
        };
        graph
            .add(Node::derived(Operator::Control(ControlOp::Deopt), &[fail]))
            .in_phase(PHASE)?;

        // The old successor of `point` now follows the passing projection.
        graph
            .replace_at_usages_where(point, pass, |g, u| {
                u.user != iff && g.usage_type(u) == InputType::Control
            })
            .in_phase(PHASE)?;
        graph.replace_at_usages(guard, pass).in_phase(PHASE)?;
        graph.kill(guard).in_phase(PHASE)?;
        trace!(guard = %guard, ?reason, branch = %iff, "lowered guard");
        Ok(pass)
    }
}

impl Phase for GuardLowering {
    fn name(&self) -> &'static str {
        PHASE
    }

    fn run(&mut self, graph: &mut Graph, _ctx: &CompilationContext) -> CompileResult<bool> {
        self.lowered = 0;
        if !graph.guards_stage().allows_floating_guards() {
            return Ok(false);
        }

        let guards: Vec<NodeId> = graph
            .iter()
            .filter(|(_, n)| n.op.is_guard())
            .map(|(id, _)| id)
            .collect();
        // Insertion point per anchor, so that guards on one anchor stay in order.
        let mut tails: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        for guard in guards {
            let Some(anchor) = graph.input(guard, 1) else {
                continue;
            };
            let point = tails.get(&anchor).copied().unwrap_or(anchor);
            let pass = Self::lower(graph, guard, point)?;
            tails.insert(anchor, pass);
            self.lowered += 1;
        }

        graph
            .set_guards_stage(GuardsStage::FixedDeopts)
            .in_phase(PHASE)?;
        debug!(phase = PHASE, lowered = self.lowered, "guards lowered");
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};
    use crate::ir::operators::DeoptReason;
    use crate::ir::stamp::Stamp;

    fn lower(graph: &mut Graph) -> GuardLowering {
        let ctx = CompilationContext::for_testing();
        let mut phase = GuardLowering::new();
        assert!(phase.run(graph, &ctx).unwrap());
        graph.verify().unwrap();
        phase
    }

    fn count(graph: &Graph, op: ControlOp) -> usize {
        graph.iter().filter(|(_, n)| n.op.is(op)).count()
    }

    #[test]
    fn test_guard_becomes_branch() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let c = b.int_lt(x, zero);
        let guard = b.guard(c, DeoptReason::BoundsCheck, false);
        let ret = b.return_value(Some(x));
        let mut g = b.finish().unwrap();

        let phase = lower(&mut g);
        assert_eq!(phase.lowered(), 1);
        assert!(!g.is_alive(guard));
        assert_eq!(g.guards_stage(), GuardsStage::FixedDeopts);
        assert_eq!(count(&g, ControlOp::Deopt), 1);

        let iff = g.single_successor(g.start()).unwrap();
        assert!(g.op(iff).is(ControlOp::If));
        assert_eq!(g.input(iff, 1), Some(c));
        let pass = g.if_successor(iff, true).unwrap();
        assert_eq!(g.input(ret, 0), Some(pass));
        let fail = g.if_successor(iff, false).unwrap();
        assert!(g.op(g.single_successor(fail).unwrap()).is(ControlOp::Deopt));
    }

    #[test]
    fn test_negated_guard_deopts_on_true() {
        let mut b = GraphBuilder::with_parameters(&[Stamp::OBJECT]);
        let p = b.parameter(0).unwrap();
        let c = b.is_null(p);
        b.guard(c, DeoptReason::NullCheck, true);
        let ret = b.return_value(None);
        let mut g = b.finish().unwrap();

        lower(&mut g);
        let iff = g.single_successor(g.start()).unwrap();
        let on_true = g.if_successor(iff, true).unwrap();
        let on_false = g.if_successor(iff, false).unwrap();
        assert!(g.op(g.single_successor(on_true).unwrap()).is(ControlOp::Deopt));
        assert_eq!(g.input(ret, 0), Some(on_false));
    }

    #[test]
    fn test_guards_on_one_anchor_keep_order() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let ten = b.const_int(10);
        let low = b.int_lt(x, zero);
        let high = b.int_lt(ten, x);
        b.guard(low, DeoptReason::BoundsCheck, true);
        b.guard(high, DeoptReason::BoundsCheck, true);
        b.return_value(Some(x));
        let mut g = b.finish().unwrap();

        let phase = lower(&mut g);
        assert_eq!(phase.lowered(), 2);
        let first = g.single_successor(g.start()).unwrap();
        assert_eq!(g.input(first, 1), Some(low));
        let pass = g.if_successor(first, false).unwrap();
        let second = g.single_successor(pass).unwrap();
        assert_eq!(g.input(second, 1), Some(high));
        assert_eq!(count(&g, ControlOp::Deopt), 2);
    }

    #[test]
    fn test_pi_moves_to_passing_branch() {
        let mut b = GraphBuilder::with_parameters(&[Stamp::OBJECT]);
        let p = b.parameter(0).unwrap();
        let c = b.is_null(p);
        let guard = b.guard(c, DeoptReason::NullCheck, true);
        let narrowed = b.pi(p, Stamp::OBJECT, guard);
        b.return_value(Some(narrowed));
        let mut g = b.finish().unwrap();

        lower(&mut g);
        let iff = g.single_successor(g.start()).unwrap();
        assert_eq!(g.input(narrowed, 1), g.if_successor(iff, false));
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut b = GraphBuilder::new(0);
        b.return_value(None);
        let mut g = b.finish().unwrap();

        let ctx = CompilationContext::for_testing();
        let mut phase = GuardLowering::new();
        assert!(phase.run(&mut g, &ctx).unwrap());
        assert!(!phase.run(&mut g, &ctx).unwrap());
    }
}
