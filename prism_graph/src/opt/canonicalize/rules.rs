//! Local simplification rules for floating nodes.
//!
//! Each rule looks only at the node, its inputs and their stamps, and returns
//! the node's canonical form. Rules never mutate existing nodes; helper nodes
//! a rewrite needs are inserted through [`RuleEnv::unique`].

use tracing::trace;

use crate::error::{CompileError, CompileResult, InPhase};
use crate::ir::graph::{Assumption, Graph};
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::{
    ArithOp, CmpOp, Constant, DeoptReason, LocationIdentity, Operator, UnaryOp,
};
use crate::meta::{MetaAccess, MetaError, TypeId};

use super::PHASE;

/// The outcome of asking a node for its canonical form.
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    Unchanged,
    /// Replace the node by an existing one.
    Existing(NodeId),
    /// Replace the node by a new node, value numbered on insertion.
    New(Node),
    /// Remove the node; only valid for nodes without usages.
    Delete,
}

/// What a rule may consult besides the graph.
pub(super) struct RuleEnv<'a> {
    pub meta: &'a dyn MetaAccess,
    pub gvn: bool,
}

impl RuleEnv<'_> {
    pub fn unique(&self, graph: &mut Graph, node: Node) -> CompileResult<NodeId> {
        let result = if self.gvn {
            graph.add_or_unique(node)
        } else {
            graph.add(node)
        };
        result.in_phase(PHASE)
    }
}

pub(super) fn canonical(graph: &mut Graph, id: NodeId, env: &RuleEnv<'_>) -> CompileResult<Canonical> {
    let node = graph.node(id);
    let op = node.op;
    let inputs = node.inputs().clone();
    let input = |i: usize| inputs.get(i).unwrap_or(NodeId::INVALID);

    // A value whose stamp pins it to one integer is that integer.
    if let Some(v) = node.stamp.as_int_constant()
        && !matches!(op, Operator::Constant(_))
    {
        return Ok(Canonical::New(Node::derived(
            Operator::Constant(Constant::Int(v)),
            &[],
        )));
    }

    let result = match op {
        Operator::Arith(aop) => arith(graph, env, aop, input(0), input(1))?,
        Operator::Unary(uop) => unary(graph, uop, input(0)),
        Operator::Compare(cop) => compare(graph, env, cop, input(0), input(1))?,
        Operator::LogicNot => logic_not(graph, input(0)),
        Operator::Conditional => conditional(graph, input(0), input(1), input(2)),
        Operator::IsNull => is_null(graph, input(0)),
        Operator::InstanceOf(ty) => instance_of(graph, env, id, ty, input(0))?,
        Operator::Phi | Operator::MemoryPhi(_) => phi(graph, id),
        Operator::Pi => pi(graph, id, input(0)),
        Operator::Read(loc) => read(graph, env, id, loc, input(0), input(1))?,
        Operator::Guard { reason, negated } => {
            guard(graph, id, reason, negated, input(0), input(1))
        }
        _ => Canonical::Unchanged,
    };
    if result != Canonical::Unchanged {
        trace!(node = %id, op = %op, ?result, "canonicalized");
    }
    Ok(result)
}

// =============================================================================
// Helpers
// =============================================================================

#[inline]
fn int(graph: &Graph, id: NodeId) -> Option<i64> {
    graph.node(id).as_int()
}

#[inline]
fn logic(graph: &Graph, id: NodeId) -> Option<bool> {
    graph.node(id).as_logic()
}

fn int_constant(v: i64) -> Canonical {
    Canonical::New(Node::derived(Operator::Constant(Constant::Int(v)), &[]))
}

fn logic_constant(b: bool) -> Canonical {
    Canonical::New(Node::derived(Operator::LogicConstant(b), &[]))
}

fn meta_failure(id: NodeId, op: Operator, err: &MetaError) -> CompileError {
    CompileError::simplification(PHASE, id, op, err)
}

// =============================================================================
// Arithmetic
// =============================================================================

fn arith(
    graph: &mut Graph,
    env: &RuleEnv<'_>,
    op: ArithOp,
    x: NodeId,
    y: NodeId,
) -> CompileResult<Canonical> {
    match (int(graph, x), int(graph, y)) {
        (Some(a), Some(b)) => return Ok(int_constant(op.fold(a, b))),
        (Some(_), None) if op.is_commutative() => {
            return Ok(Canonical::New(Node::derived(Operator::Arith(op), &[y, x])));
        }
        _ => {}
    }
    if let Some(b) = int(graph, y) {
        if op.identity() == Some(b) {
            return Ok(Canonical::Existing(x));
        }
        if op.absorbing() == Some(b) {
            return Ok(Canonical::Existing(y));
        }
        // (a + c1) + c2 => a + (c1 + c2)
        if op == ArithOp::Add
            && let Operator::Arith(ArithOp::Add) = graph.op(x)
            && let Some(c1) = graph.input(x, 1).and_then(|c| int(graph, c))
            && let Some(a) = graph.input(x, 0)
        {
            let sum = env.unique(
                graph,
                Node::derived(
                    Operator::Constant(Constant::Int(c1.wrapping_add(b))),
                    &[],
                ),
            )?;
            return Ok(Canonical::New(Node::derived(Operator::Arith(ArithOp::Add), &[a, sum])));
        }
    }
    if x == y {
        return Ok(match op {
            ArithOp::Sub | ArithOp::Xor => int_constant(0),
            ArithOp::And | ArithOp::Or => Canonical::Existing(x),
            _ => Canonical::Unchanged,
        });
    }
    Ok(Canonical::Unchanged)
}

fn unary(graph: &Graph, op: UnaryOp, x: NodeId) -> Canonical {
    if let Some(a) = int(graph, x) {
        return int_constant(op.fold(a));
    }
    match graph.op(x) {
        Operator::Unary(inner) if inner == op => match graph.input(x, 0) {
            Some(value) => Canonical::Existing(value),
            None => Canonical::Unchanged,
        },
        _ => Canonical::Unchanged,
    }
}

// =============================================================================
// Logic
// =============================================================================

fn compare(
    graph: &mut Graph,
    env: &RuleEnv<'_>,
    op: CmpOp,
    x: NodeId,
    y: NodeId,
) -> CompileResult<Canonical> {
    // Normalize onto Eq, Lt and Below.
    let normalized = match op {
        CmpOp::Gt => Some((CmpOp::Lt, y, x, false)),
        CmpOp::Ne => Some((CmpOp::Eq, x, y, true)),
        CmpOp::Ge => Some((CmpOp::Lt, x, y, true)),
        CmpOp::Le => Some((CmpOp::Lt, y, x, true)),
        _ => None,
    };
    if let Some((base, a, b, negate)) = normalized {
        let cmp = Node::derived(Operator::Compare(base), &[a, b]);
        if !negate {
            return Ok(Canonical::New(cmp));
        }
        let cmp = env.unique(graph, cmp)?;
        return Ok(Canonical::New(Node::derived(Operator::LogicNot, &[cmp])));
    }

    if x == y {
        return Ok(logic_constant(op == CmpOp::Eq));
    }
    if let (Some(a), Some(b)) = (int(graph, x), int(graph, y)) {
        return Ok(logic_constant(op.fold(a, b)));
    }
    let (sx, sy) = (graph.stamp(x), graph.stamp(y));
    if let (Some(a), Some(b)) = (sx.as_int(), sy.as_int())
        && let Some(result) = op.fold_stamps(a, b)
    {
        return Ok(logic_constant(result));
    }
    if op == CmpOp::Eq {
        if let (Some(a), Some(b)) = (sx.as_object(), sy.as_object())
            && ((a.always_null && b.non_null) || (a.non_null && b.always_null))
        {
            return Ok(logic_constant(false));
        }
        let null = Operator::Constant(Constant::Null);
        if graph.op(y) == null {
            return Ok(Canonical::New(Node::derived(Operator::IsNull, &[x])));
        }
        if graph.op(x) == null {
            return Ok(Canonical::New(Node::derived(Operator::IsNull, &[y])));
        }
        if int(graph, x).is_some() {
            return Ok(Canonical::New(Node::derived(Operator::Compare(op), &[y, x])));
        }
    }
    Ok(Canonical::Unchanged)
}

fn logic_not(graph: &Graph, c: NodeId) -> Canonical {
    if let Some(b) = logic(graph, c) {
        return logic_constant(!b);
    }
    if graph.op(c) == Operator::LogicNot
        && let Some(inner) = graph.input(c, 0)
    {
        return Canonical::Existing(inner);
    }
    Canonical::Unchanged
}

fn conditional(graph: &Graph, c: NodeId, t: NodeId, f: NodeId) -> Canonical {
    if let Some(b) = logic(graph, c) {
        return Canonical::Existing(if b { t } else { f });
    }
    if t == f {
        return Canonical::Existing(t);
    }
    if graph.op(c) == Operator::LogicNot
        && let Some(inner) = graph.input(c, 0)
    {
        return Canonical::New(Node::derived(Operator::Conditional, &[inner, f, t]));
    }
    Canonical::Unchanged
}

fn is_null(graph: &Graph, x: NodeId) -> Canonical {
    match graph.stamp(x).as_object() {
        Some(s) if s.always_null => logic_constant(true),
        Some(s) if s.non_null => logic_constant(false),
        _ => Canonical::Unchanged,
    }
}

fn instance_of(
    graph: &mut Graph,
    env: &RuleEnv<'_>,
    id: NodeId,
    ty: TypeId,
    x: NodeId,
) -> CompileResult<Canonical> {
    let op = Operator::InstanceOf(ty);
    let Some(stamp) = graph.stamp(x).as_object() else {
        return Ok(Canonical::Unchanged);
    };
    if stamp.always_null {
        return Ok(logic_constant(false));
    }
    let Some(known) = stamp.ty else {
        return Ok(Canonical::Unchanged);
    };
    let is_sub = env
        .meta
        .is_subtype(known, ty)
        .map_err(|e| meta_failure(id, op, &e))?;
    if is_sub && stamp.non_null {
        return Ok(logic_constant(true));
    }
    if is_sub {
        return Ok(Canonical::New(Node::derived(Operator::LogicNot, &[env.unique(
            graph,
            Node::derived(Operator::IsNull, &[x]),
        )?])));
    }

    // `known` is not a subtype of `ty`. The test can still succeed for a
    // subclass of `known` unless there is none.
    let exact = stamp.exact || {
        let leaf = env
            .meta
            .leaf_type(known)
            .map_err(|e| meta_failure(id, op, &e))?;
        leaf == Some(known) && graph.record_assumption(Assumption::LeafType(known))
    };
    let related = env
        .meta
        .is_subtype(ty, known)
        .map_err(|e| meta_failure(id, op, &e))?;
    if exact || !related {
        return Ok(logic_constant(false));
    }
    Ok(Canonical::Unchanged)
}

// =============================================================================
// Phis, Pi, Memory, Guards
// =============================================================================

/// A phi whose inputs are all one value (ignoring itself) is that value.
fn phi(graph: &Graph, id: NodeId) -> Canonical {
    let mut unique = None;
    for value in graph.inputs(id).skip(1) {
        if value == id || Some(value) == unique {
            continue;
        }
        if unique.is_some() {
            return Canonical::Unchanged;
        }
        unique = Some(value);
    }
    match unique {
        Some(value) => Canonical::Existing(value),
        None => Canonical::Unchanged,
    }
}

fn pi(graph: &Graph, id: NodeId, value: NodeId) -> Canonical {
    let narrowed = graph.stamp(id);
    let original = graph.stamp(value);
    if original.join(narrowed) == Some(original) {
        return Canonical::Existing(value);
    }
    // A pi of a pi narrows the inner value directly.
    if graph.op(value) == Operator::Pi
        && let Some(inner) = graph.input(value, 0)
        && let Some(anchor) = graph.input(id, 1)
        && let Some(joined) = graph.stamp(value).join(narrowed)
        && joined == narrowed
    {
        return Canonical::New(Node::new(Operator::Pi, &[inner, anchor], joined));
    }
    Canonical::Unchanged
}

fn read(
    graph: &Graph,
    env: &RuleEnv<'_>,
    id: NodeId,
    loc: LocationIdentity,
    address: NodeId,
    memory: NodeId,
) -> CompileResult<Canonical> {
    let op = Operator::Read(loc);
    // Store-to-load forwarding.
    if graph.op(memory) == Operator::Write(loc)
        && graph.input(memory, 1) == Some(address)
        && let Some(value) = graph.input(memory, 2)
    {
        return Ok(Canonical::Existing(value));
    }
    // Immutable locations of objects that exist on entry cannot change.
    let start = graph.start();
    if memory != start && matches!(graph.op(address), Operator::Parameter(_)) {
        let immutable = env
            .meta
            .is_immutable(loc)
            .map_err(|e| meta_failure(id, op, &e))?;
        if immutable {
            return Ok(Canonical::New(Node::new(op, &[address, start], graph.stamp(id))));
        }
    }
    Ok(Canonical::Unchanged)
}

fn guard(
    graph: &Graph,
    id: NodeId,
    reason: DeoptReason,
    negated: bool,
    condition: NodeId,
    anchor: NodeId,
) -> Canonical {
    if logic(graph, condition) == Some(!negated) && !graph.has_usages(id) {
        return Canonical::Delete;
    }
    if graph.op(condition) == Operator::LogicNot
        && let Some(inner) = graph.input(condition, 0)
    {
        return Canonical::New(Node::derived(
            Operator::Guard {
                reason,
                negated: !negated,
            },
            &[inner, anchor],
        ));
    }
    Canonical::Unchanged
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, MemoryBuilder};
    use crate::ir::stamp::{ObjectStamp, Stamp};
    use crate::meta::{FieldId, FieldInfo, FieldKind, MetaTable};

    fn env(meta: &MetaTable) -> RuleEnv<'_> {
        RuleEnv { meta, gvn: true }
    }

    fn run(g: &mut Graph, id: NodeId) -> Canonical {
        let meta = MetaTable::new();
        canonical(g, id, &env(&meta)).unwrap()
    }

    #[test]
    fn test_fold_and_identities() {
        let mut b = GraphBuilder::new(1).without_value_numbering();
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let add0 = b.int_add(x, zero);
        let mul1 = b.int_mul(x, one);
        let mul0 = b.int_mul(x, zero);
        let sub = b.int_sub(x, x);
        let left = b.int_add(one, x);
        let mut g = b.finish().unwrap();

        assert_eq!(run(&mut g, add0), Canonical::Existing(x));
        assert_eq!(run(&mut g, mul1), Canonical::Existing(x));
        // x * 0 has the constant stamp [0, 0].
        assert_eq!(run(&mut g, mul0), int_constant(0));
        assert_eq!(run(&mut g, sub), int_constant(0));
        assert_eq!(
            run(&mut g, left),
            Canonical::New(Node::derived(Operator::Arith(ArithOp::Add), &[x, one]))
        );
    }

    #[test]
    fn test_constant_stamp_becomes_constant() {
        let mut b = GraphBuilder::new(0);
        let two = b.const_int(2);
        let three = b.const_int(3);
        let sum = b.int_add(two, three);
        let mut g = b.finish().unwrap();
        assert_eq!(run(&mut g, sum), int_constant(5));
    }

    #[test]
    fn test_add_reassociation() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let c1 = b.const_int(1);
        let c2 = b.const_int(2);
        let inner = b.int_add(x, c1);
        let outer = b.int_add(inner, c2);
        let mut g = b.finish().unwrap();
        let Canonical::New(node) = run(&mut g, outer) else {
            panic!("expected a new node");
        };
        assert_eq!(node.input(0), Some(x));
        assert_eq!(g.node(node.input(1).unwrap()).as_int(), Some(3));
    }

    #[test]
    fn test_double_negation() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let n1 = b.int_neg(x);
        let n2 = b.int_neg(n1);
        let mut g = b.finish().unwrap();
        assert_eq!(run(&mut g, n2), Canonical::Existing(x));
    }

    #[test]
    fn test_compare_normalization() {
        let mut b = GraphBuilder::new(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let ne = b.compare(CmpOp::Ne, x, y);
        let gt = b.compare(CmpOp::Gt, x, y);
        let mut g = b.finish().unwrap();

        let Canonical::New(not) = run(&mut g, ne) else {
            panic!("expected LogicNot");
        };
        assert_eq!(not.op, Operator::LogicNot);
        let eq = not.input(0).unwrap();
        assert_eq!(g.op(eq), Operator::Compare(CmpOp::Eq));
        assert_eq!(
            run(&mut g, gt),
            Canonical::New(Node::derived(Operator::Compare(CmpOp::Lt), &[y, x]))
        );
    }

    #[test]
    fn test_compare_by_stamps() {
        let mut b = GraphBuilder::with_parameters(&[Stamp::int_range(0, 10), Stamp::int_range(20, 30)]);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let lt = b.int_lt(x, y);
        let same = b.int_eq(x, x);
        let mut g = b.finish().unwrap();
        assert_eq!(run(&mut g, lt), logic_constant(true));
        assert_eq!(run(&mut g, same), logic_constant(true));
    }

    #[test]
    fn test_logic_not_and_conditional() {
        let mut b = GraphBuilder::new(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let c = b.int_lt(x, y);
        let n1 = b.logic_not(c);
        let n2 = b.logic_not(n1);
        let t = b.logic_const(true);
        let nt = b.logic_not(t);
        let sel = b.conditional(n1, x, y);
        let same = b.conditional(c, x, x);
        let mut g = b.finish().unwrap();

        assert_eq!(run(&mut g, n2), Canonical::Existing(c));
        assert_eq!(run(&mut g, nt), logic_constant(false));
        assert_eq!(
            run(&mut g, sel),
            Canonical::New(Node::derived(Operator::Conditional, &[c, y, x]))
        );
        assert_eq!(run(&mut g, same), Canonical::Existing(x));
    }

    #[test]
    fn test_is_null_by_stamp() {
        let non_null = Stamp::Object(ObjectStamp {
            non_null: true,
            ..ObjectStamp::ANY
        });
        let mut b = GraphBuilder::with_parameters(&[non_null, Stamp::OBJECT]);
        let p0 = b.parameter(0).unwrap();
        let p1 = b.parameter(1).unwrap();
        let c0 = b.is_null(p0);
        let c1 = b.is_null(p1);
        let null = b.const_null();
        let eq = b.int_eq(p1, null);
        let mut g = b.finish().unwrap();
        assert_eq!(run(&mut g, c0), logic_constant(false));
        assert_eq!(run(&mut g, c1), Canonical::Unchanged);
        assert_eq!(
            run(&mut g, eq),
            Canonical::New(Node::derived(Operator::IsNull, &[p1]))
        );
    }

    #[test]
    fn test_instance_of() {
        let meta = MetaTable::new();
        let base = meta.define_type(TypeId(1), "Base", None, false);
        let leaf = meta.define_type(TypeId(2), "Leaf", Some(base), false);
        let other = meta.define_type(TypeId(3), "Other", None, false);

        let exact_leaf = Stamp::Object(ObjectStamp::exact_non_null(leaf));
        let declared_leaf = Stamp::Object(ObjectStamp::declared(leaf));
        let declared_base = Stamp::Object(ObjectStamp::declared(base));
        let mut b = GraphBuilder::with_parameters(&[exact_leaf, declared_leaf, declared_base]);
        let p0 = b.parameter(0).unwrap();
        let p1 = b.parameter(1).unwrap();
        let p2 = b.parameter(2).unwrap();
        let t0 = b.instance_of(p0, base);
        let t1 = b.instance_of(p1, other);
        let t2 = b.instance_of(p2, leaf);
        let mut g = b.finish().unwrap();
        let env = env(&meta);

        assert_eq!(canonical(&mut g, t0, &env).unwrap(), logic_constant(true));
        // Leaf has no subclasses: assumed exact, unrelated to Other.
        assert_eq!(canonical(&mut g, t1, &env).unwrap(), logic_constant(false));
        assert_eq!(g.assumptions(), &[Assumption::LeafType(leaf)]);
        // Base may be a Leaf.
        assert_eq!(canonical(&mut g, t2, &env).unwrap(), Canonical::Unchanged);
    }

    #[test]
    fn test_instance_of_unknown_type_fails() {
        let meta = MetaTable::new();
        let stamp = Stamp::Object(ObjectStamp::declared(TypeId(9)));
        let mut b = GraphBuilder::with_parameters(&[stamp]);
        let p = b.parameter(0).unwrap();
        let t = b.instance_of(p, TypeId(8));
        let mut g = b.finish().unwrap();
        let err = canonical(&mut g, t, &env(&meta)).unwrap_err();
        assert!(matches!(err, CompileError::SimplificationFailed { node, .. } if node == t));
    }

    #[test]
    fn test_read_forwarding_and_immutable() {
        let meta = MetaTable::new();
        let holder = meta.define_type(TypeId(1), "Box", None, true);
        let field = meta.define_field(FieldInfo {
            id: FieldId(0),
            holder,
            kind: FieldKind::Int,
            is_final: true,
        });
        let slot = LocationIdentity::Named(1);

        let mut b = GraphBuilder::with_parameters(&[Stamp::OBJECT, Stamp::INT])
            .with_meta(std::sync::Arc::new(MetaTable::new()));
        let obj = b.parameter(0).unwrap();
        let v = b.parameter(1).unwrap();
        b.write(slot, obj, v);
        let forwarded = b.read(slot, obj, Stamp::INT);
        let fin = b.read(LocationIdentity::Field(field), obj, Stamp::INT);
        let mut g = b.finish().unwrap();
        let env = env(&meta);

        assert_eq!(canonical(&mut g, forwarded, &env).unwrap(), Canonical::Existing(v));
        let Canonical::New(node) = canonical(&mut g, fin, &env).unwrap() else {
            panic!("expected re-anchored read");
        };
        assert_eq!(node.input(1), Some(g.start()));
    }

    #[test]
    fn test_phi_single_value() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let c = b.logic_const(true);
        let br = b.branch(c);
        b.begin(&br, true);
        let l = b.end_path();
        b.begin(&br, false);
        let r = b.end_path();
        let m = b.merge(&[l, r]);
        let phi = b.phi(m, &[x, x]);
        let mut g = b.finish().unwrap();
        assert_eq!(run(&mut g, phi), Canonical::Existing(x));
    }

    #[test]
    fn test_loop_phi_self_reference() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let scope = b.loop_begin();
        let phi = b.loop_phi(&scope, x);
        b.loop_end(&scope, &[(phi, phi)]);
        let mut g = b.finish().unwrap();
        assert_eq!(run(&mut g, phi), Canonical::Existing(x));
    }

    #[test]
    fn test_guard_rules() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let t = b.logic_const(true);
        let always = b.guard(t, DeoptReason::Speculation, false);
        let zero = b.const_int(0);
        let c = b.int_eq(x, zero);
        let nc = b.logic_not(c);
        let flipped = b.guard(nc, DeoptReason::BoundsCheck, false);
        let mut g = b.finish().unwrap();

        assert_eq!(run(&mut g, always), Canonical::Delete);
        let Canonical::New(node) = run(&mut g, flipped) else {
            panic!("expected flipped guard");
        };
        assert_eq!(
            node.op,
            Operator::Guard {
                reason: DeoptReason::BoundsCheck,
                negated: true
            }
        );
        assert_eq!(node.input(0), Some(c));
    }

    #[test]
    fn test_pi_redundant() {
        let non_null = Stamp::Object(ObjectStamp {
            non_null: true,
            ..ObjectStamp::ANY
        });
        let mut b = GraphBuilder::with_parameters(&[non_null]);
        let p = b.parameter(0).unwrap();
        let anchor = b.control();
        let pi = b.pi(p, non_null, anchor);
        let mut g = b.finish().unwrap();
        assert_eq!(run(&mut g, pi), Canonical::Existing(p));
    }
}
