//! Simplifications of fixed nodes that may restructure the control flow.
//!
//! Unlike the floating rules these mutate the graph directly: a folded `If`
//! takes its dead projection with it, a merge with one predecessor is
//! bypassed, and small diamonds collapse into `Conditional` values.

use tracing::trace;

use super::PHASE;
use super::kill::kill_cfg;
use super::rules::RuleEnv;
use crate::error::{CompileResult, GraphResult, InPhase};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::{Constant, ControlOp, DivOp, InputType, Operator};

/// Simplify the fixed node `id`. Returns whether the graph changed.
pub(super) fn simplify(
    graph: &mut Graph,
    id: NodeId,
    env: &RuleEnv<'_>,
    max_dominator_walk: usize,
) -> CompileResult<bool> {
    match graph.op(id) {
        Operator::Control(ControlOp::If) => simplify_if(graph, id, env, max_dominator_walk),
        Operator::Control(ControlOp::Region | ControlOp::Loop) => simplify_merge(graph, id),
        Operator::Div(op) => simplify_div(graph, id, op, env),
        Operator::NewInstance(_) => {
            let unused = graph.usages(id).iter().all(|u| {
                matches!(graph.usage_type(*u), InputType::Control | InputType::Anchor)
            });
            if unused {
                graph.remove_fixed(id).in_phase(PHASE)?;
            }
            Ok(unused)
        }
        _ => Ok(false),
    }
}

// =============================================================================
// Branches
// =============================================================================

fn simplify_if(
    graph: &mut Graph,
    id: NodeId,
    env: &RuleEnv<'_>,
    max_dominator_walk: usize,
) -> CompileResult<bool> {
    let Some(condition) = graph.input(id, 1) else {
        return Ok(false);
    };

    if let Some(value) = graph.node(condition).as_logic() {
        fold_if(graph, id, value).in_phase(PHASE)?;
        return Ok(true);
    }

    if graph.op(condition) == Operator::LogicNot
        && let Some(inner) = graph.input(condition, 0)
    {
        graph.set_input(id, 1, inner).in_phase(PHASE)?;
        for projection in graph.control_successors(id) {
            let flipped = if graph.op(projection).is(ControlOp::IfTrue) {
                ControlOp::IfFalse
            } else {
                ControlOp::IfTrue
            };
            graph
                .set_operator(projection, Operator::Control(flipped))
                .in_phase(PHASE)?;
        }
        trace!(node = %id, "swapped branch of negated condition");
        return Ok(true);
    }

    if let Some(value) = dominating_condition(graph, id, condition, max_dominator_walk) {
        trace!(node = %id, value, "branch decided by dominating branch");
        fold_if(graph, id, value).in_phase(PHASE)?;
        return Ok(true);
    }

    if merge_returns(graph, id, condition, env)? {
        return Ok(true);
    }
    merge_diamond(graph, id, condition, env)
}

/// Replace `iff` by its projection for direction `keep` and kill the other.
fn fold_if(graph: &mut Graph, iff: NodeId, keep: bool) -> GraphResult<()> {
    let pred = graph.try_node(iff)?.control().unwrap_or(NodeId::INVALID);
    if let Some(dead) = graph.if_successor(iff, !keep) {
        kill_cfg(graph, dead)?;
    }
    if let Some(kept) = graph.if_successor(iff, keep) {
        graph.replace_at_usages(kept, pred)?;
        graph.kill(kept)?;
    }
    graph.kill_with_unused_floating_inputs(iff)?;
    Ok(())
}

/// The direction in which `condition` is known to have gone on the way to
/// `iff`, found by walking up the control chain.
fn dominating_condition(
    graph: &Graph,
    iff: NodeId,
    condition: NodeId,
    max_steps: usize,
) -> Option<bool> {
    let mut cursor = graph.input(iff, 0)?;
    for _ in 0..max_steps {
        let node = graph.node(cursor);
        cursor = match node.op.control() {
            Some(dir @ (ControlOp::IfTrue | ControlOp::IfFalse)) => {
                let parent = node.input(0)?;
                if graph.input(parent, 1) == Some(condition) {
                    return Some(dir == ControlOp::IfTrue);
                }
                graph.input(parent, 0)?
            }
            // The forward entry dominates the whole loop.
            Some(ControlOp::Loop) => node.input(0)?,
            Some(ControlOp::Start | ControlOp::Region) => return None,
            _ => node.control()?,
        };
    }
    None
}

/// Both projections of `iff`, each used only by its single successor.
fn bare_projections(graph: &Graph, iff: NodeId) -> Option<[(NodeId, NodeId); 2]> {
    let mut out = [(NodeId::INVALID, NodeId::INVALID); 2];
    for (slot, direction) in out.iter_mut().zip([true, false]) {
        let projection = graph.if_successor(iff, direction)?;
        if graph.usage_count(projection) != 1 {
            return None;
        }
        let succ = graph.usages(projection).first()?.user;
        if !graph.node(succ).is_fixed() {
            return None;
        }
        *slot = (projection, succ);
    }
    Some(out)
}

/// `if (c) return a; else return b;` becomes `return c ? a : b;`.
fn merge_returns(
    graph: &mut Graph,
    iff: NodeId,
    condition: NodeId,
    env: &RuleEnv<'_>,
) -> CompileResult<bool> {
    let Some([(t, ret_t), (f, ret_f)]) = bare_projections(graph, iff) else {
        return Ok(false);
    };
    let is_return = |n: NodeId| graph.op(n).is(ControlOp::Return);
    if !is_return(ret_t) || !is_return(ret_f) {
        return Ok(false);
    }
    let value = match (graph.input(ret_t, 1), graph.input(ret_f, 1)) {
        (Some(a), Some(b)) => Some(env.unique(
            graph,
            Node::derived(Operator::Conditional, &[condition, a, b]),
        )?),
        (None, None) => None,
        _ => return Ok(false),
    };
    let Some(pred) = graph.node(iff).control() else {
        return Ok(false);
    };

    for node in [ret_t, ret_f, t, f] {
        graph.kill(node).in_phase(PHASE)?;
    }
    graph.kill_with_unused_floating_inputs(iff).in_phase(PHASE)?;
    let mut inputs = vec![pred];
    inputs.extend(value);
    graph
        .add(Node::derived(Operator::Control(ControlOp::Return), &inputs))
        .in_phase(PHASE)?;
    trace!(node = %iff, "merged returns into a conditional");
    Ok(true)
}

/// An `If` whose projections lead straight into a two-way `Region` is
/// replaced by `Conditional` values for the region's phis.
fn merge_diamond(
    graph: &mut Graph,
    iff: NodeId,
    condition: NodeId,
    env: &RuleEnv<'_>,
) -> CompileResult<bool> {
    let Some([(t, region), (f, other)]) = bare_projections(graph, iff) else {
        return Ok(false);
    };
    if region != other
        || !graph.op(region).is(ControlOp::Region)
        || graph.node(region).inputs().len() != 2
    {
        return Ok(false);
    }
    let Some(pred) = graph.node(iff).control() else {
        return Ok(false);
    };
    // Phi input positions of the true and false paths.
    let (ti, fi) = if graph.input(region, 0) == Some(t) {
        (1, 2)
    } else {
        (2, 1)
    };

    let phis = graph.phis(region);
    let memory_differs = phis.iter().any(|&phi| {
        matches!(graph.op(phi), Operator::MemoryPhi(_)) && graph.input(phi, 1) != graph.input(phi, 2)
    });
    if memory_differs {
        return Ok(false);
    }

    for phi in phis {
        let (Some(vt), Some(vf)) = (graph.input(phi, ti), graph.input(phi, fi)) else {
            continue;
        };
        let replacement = if vt == vf || matches!(graph.op(phi), Operator::MemoryPhi(_)) {
            vt
        } else {
            env.unique(graph, Node::derived(Operator::Conditional, &[condition, vt, vf]))?
        };
        graph.replace_at_usages(phi, replacement).in_phase(PHASE)?;
        graph.kill_with_unused_floating_inputs(phi).in_phase(PHASE)?;
    }
    graph.replace_at_usages(region, pred).in_phase(PHASE)?;
    for node in [region, t, f] {
        graph.kill(node).in_phase(PHASE)?;
    }
    graph.kill_with_unused_floating_inputs(iff).in_phase(PHASE)?;
    trace!(node = %iff, "collapsed diamond into conditionals");
    Ok(true)
}

// =============================================================================
// Merges
// =============================================================================

/// A region with one predecessor, or a loop without back edges, is bypassed.
fn simplify_merge(graph: &mut Graph, id: NodeId) -> CompileResult<bool> {
    let node = graph.node(id);
    if node.inputs().len() != 1 {
        return Ok(false);
    }
    let Some(pred) = node.input(0) else {
        return Ok(false);
    };
    for phi in graph.phis(id) {
        let Some(value) = graph.input(phi, 1) else {
            continue;
        };
        graph.replace_at_usages(phi, value).in_phase(PHASE)?;
        graph.kill_with_unused_floating_inputs(phi).in_phase(PHASE)?;
    }
    graph.replace_at_usages(id, pred).in_phase(PHASE)?;
    graph.kill(id).in_phase(PHASE)?;
    trace!(node = %id, "removed single-predecessor merge");
    Ok(true)
}

// =============================================================================
// Division
// =============================================================================

fn simplify_div(graph: &mut Graph, id: NodeId, op: DivOp, env: &RuleEnv<'_>) -> CompileResult<bool> {
    let (Some(x), Some(y)) = (graph.input(id, 1), graph.input(id, 2)) else {
        return Ok(false);
    };
    let folded = match (graph.node(x).as_int(), graph.node(y).as_int()) {
        (Some(a), Some(b)) => op.fold(a, b),
        _ => None,
    };
    let replacement = match (folded, graph.node(y).as_int()) {
        (Some(v), _) => env.unique(
            graph,
            Node::derived(Operator::Constant(Constant::Int(v)), &[]),
        )?,
        (None, Some(1)) if op == DivOp::Div => x,
        _ => return Ok(false),
    };
    graph
        .replace_fixed_with_floating(id, replacement)
        .in_phase(PHASE)?;
    Ok(true)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, MemoryBuilder};
    use crate::meta::{MetaTable, TypeId};

    fn run(g: &mut Graph, id: NodeId) -> bool {
        let meta = MetaTable::new();
        let env = RuleEnv { meta: &meta, gvn: true };
        simplify(g, id, &env, 32).unwrap()
    }

    #[test]
    fn test_fold_constant_branch() {
        let mut b = GraphBuilder::new(0);
        let c = b.logic_const(false);
        let br = b.branch(c);
        let t = b.begin(&br, true);
        let one = b.const_int(1);
        b.return_value(Some(one));
        b.begin(&br, false);
        let two = b.const_int(2);
        let ret = b.return_value(Some(two));
        let mut g = b.finish().unwrap();

        assert!(run(&mut g, br.if_node));
        assert!(!g.is_alive(br.if_node));
        assert!(!g.is_alive(t));
        assert_eq!(g.input(ret, 0), Some(g.start()));
        g.verify().unwrap();
    }

    #[test]
    fn test_negated_condition_swaps_projections() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let c = b.int_lt(x, zero);
        let nc = b.logic_not(c);
        let br = b.branch(nc);
        let t = b.begin(&br, true);
        b.deopt();
        let f = b.begin(&br, false);
        b.return_value(Some(x));
        let mut g = b.finish().unwrap();

        assert!(run(&mut g, br.if_node));
        assert_eq!(g.input(br.if_node, 1), Some(c));
        assert!(g.op(t).is(ControlOp::IfFalse));
        assert!(g.op(f).is(ControlOp::IfTrue));
    }

    #[test]
    fn test_dominated_branch_folds() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let c = b.int_eq(x, zero);
        let outer = b.branch(c);
        b.begin(&outer, true);
        let inner = b.branch(c);
        b.begin(&inner, true);
        let one = b.const_int(1);
        let ret_one = b.return_value(Some(one));
        b.begin(&inner, false);
        b.deopt();
        b.begin(&outer, false);
        b.return_value(Some(zero));
        let mut g = b.finish().unwrap();

        assert!(run(&mut g, inner.if_node));
        assert!(!g.is_alive(inner.if_node));
        let outer_true = g.if_successor(outer.if_node, true).unwrap();
        assert_eq!(g.input(ret_one, 0), Some(outer_true));
        g.verify().unwrap();
    }

    #[test]
    fn test_return_diamond_becomes_conditional() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let c = b.int_eq(x, zero);
        let br = b.branch(c);
        b.begin(&br, true);
        b.return_value(Some(one));
        b.begin(&br, false);
        b.return_value(Some(zero));
        let mut g = b.finish().unwrap();

        assert!(run(&mut g, br.if_node));
        let ret = g.single_successor(g.start()).unwrap();
        assert!(g.op(ret).is(ControlOp::Return));
        let value = g.input(ret, 1).unwrap();
        assert_eq!(g.op(value), Operator::Conditional);
        assert_eq!(g.inputs(value).collect::<Vec<_>>(), vec![c, one, zero]);
        g.verify().unwrap();
    }

    #[test]
    fn test_diamond_into_region() {
        let mut b = GraphBuilder::new(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let c = b.int_lt(x, y);
        let br = b.branch(c);
        b.begin(&br, true);
        let l = b.end_path();
        b.begin(&br, false);
        let r = b.end_path();
        let m = b.merge(&[l, r]);
        let phi = b.phi(m, &[x, y]);
        let ret = b.return_value(Some(phi));
        let mut g = b.finish().unwrap();

        assert!(run(&mut g, br.if_node));
        assert!(!g.is_alive(m));
        assert_eq!(g.input(ret, 0), Some(g.start()));
        let value = g.input(ret, 1).unwrap();
        assert_eq!(g.op(value), Operator::Conditional);
        assert_eq!(g.inputs(value).collect::<Vec<_>>(), vec![c, x, y]);
        g.verify().unwrap();
    }

    #[test]
    fn test_diamond_with_writes_kept() {
        let mut b = GraphBuilder::new(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let c = b.int_lt(x, y);
        let br = b.branch(c);
        b.begin(&br, true);
        b.write(crate::ir::operators::LocationIdentity::Named(0), x, y);
        let l = b.end_path();
        b.begin(&br, false);
        let r = b.end_path();
        b.merge(&[l, r]);
        b.return_value(None);
        let mut g = b.finish().unwrap();

        assert!(!run(&mut g, br.if_node));
    }

    #[test]
    fn test_single_input_region_removed() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let path = b.end_path();
        let m = b.merge(&[path]);
        let phi = b.phi(m, &[x]);
        let ret = b.return_value(Some(phi));
        let mut g = b.finish().unwrap();

        assert!(run(&mut g, m));
        assert!(!g.is_alive(m));
        assert!(!g.is_alive(phi));
        assert_eq!(g.inputs(ret).collect::<Vec<_>>(), vec![g.start(), x]);
    }

    #[test]
    fn test_division_folding() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let seven = b.const_int(7);
        let two = b.const_int(2);
        let one = b.const_int(1);
        let zero = b.const_int(0);
        let q = b.int_div(seven, two);
        let id = b.int_div(x, one);
        let trap = b.int_div(x, zero);
        let s = b.int_add(q, id);
        let s = b.int_add(s, trap);
        b.return_value(Some(s));
        let mut g = b.finish().unwrap();

        assert!(run(&mut g, q));
        assert!(run(&mut g, id));
        assert!(!run(&mut g, trap));
        assert!(!g.is_alive(q));
        assert!(!g.is_alive(id));
        assert_eq!(g.input(trap, 0), Some(g.start()));
        g.verify().unwrap();
    }

    #[test]
    fn test_unused_allocation_removed() {
        let mut b = GraphBuilder::new(0);
        let obj = b.new_instance(TypeId(1));
        let ret = b.return_value(None);
        let mut g = b.finish().unwrap();

        assert!(run(&mut g, obj));
        assert_eq!(g.input(ret, 0), Some(g.start()));
    }
}
