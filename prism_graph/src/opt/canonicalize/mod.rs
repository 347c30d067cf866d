//! The canonicalizer: a worklist engine driving nodes to a fixed point.
//!
//! # Algorithm
//!
//! The worklist is seeded with every node (or a caller-provided subset) and
//! processed in FIFO order. For each popped node:
//!
//! 1. dead nodes are skipped; floating nodes without usages are removed
//!    together with inputs that become unused;
//! 2. a value-numberable node with a structural duplicate is replaced by it;
//! 3. the node's canonical form is requested from the floating rules, or the
//!    control simplifications for fixed nodes;
//! 4. the node's stamp is re-inferred, and its users are revisited if the
//!    stamp became more precise.
//!
//! Every graph mutation is reported through the graph's event log, and the
//! nodes named by drained events are pushed back onto the worklist. Rules
//! are locally terminating, so the engine reaches a fixed point.

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::{debug, debug_span};

use crate::config::CanonicalizerConfig;
use crate::context::CompilationContext;
use crate::error::{CompileResult, InPhase};
use crate::ir::arena::BitSet;
use crate::ir::graph::{Graph, Mark, NodeEvent};
use crate::ir::node::NodeId;
use crate::opt::Phase;

mod control;
pub(crate) mod kill;
mod rules;

pub use rules::Canonical;
use rules::RuleEnv;

pub(crate) const PHASE: &str = "canonicalizer";

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonicalizerStats {
    /// Worklist pops of live nodes.
    pub visited: usize,
    /// Unused floating nodes removed.
    pub dead_removed: usize,
    /// Nodes replaced by a structural duplicate.
    pub value_numbered: usize,
    /// Floating nodes replaced by their canonical form.
    pub rewritten: usize,
    /// Fixed nodes simplified, including control flow restructuring.
    pub control_simplified: usize,
    pub stamps_improved: usize,
}

impl CanonicalizerStats {
    pub fn total_changes(&self) -> usize {
        self.dead_removed
            + self.value_numbered
            + self.rewritten
            + self.control_simplified
            + self.stamps_improved
    }
}

// =============================================================================
// Worklist
// =============================================================================

/// FIFO queue holding each node at most once.
#[derive(Debug, Default)]
struct Worklist {
    queue: VecDeque<NodeId>,
    queued: BitSet,
}

impl Worklist {
    fn with_capacity(nodes: usize) -> Self {
        Worklist {
            queue: VecDeque::with_capacity(nodes),
            queued: BitSet::with_capacity(nodes),
        }
    }

    fn push(&mut self, id: NodeId) {
        if self.queued.insert(id.as_usize()) {
            self.queue.push_back(id);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(id.as_usize());
        Some(id)
    }
}

// =============================================================================
// Canonicalizer
// =============================================================================

/// Canonicalization phase.
///
/// Without an explicit configuration the one carried by the compilation
/// context is used.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    config: Option<CanonicalizerConfig>,
    stats: CanonicalizerStats,
    name: Option<&'static str>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CanonicalizerConfig) -> Self {
        Canonicalizer {
            config: Some(config),
            ..Self::default()
        }
    }

    /// Report under `name` instead of "canonicalizer".
    pub(crate) fn named(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Statistics accumulated over every run.
    #[inline]
    pub fn stats(&self) -> &CanonicalizerStats {
        &self.stats
    }

    /// Canonicalize the whole graph.
    pub fn apply(&mut self, graph: &mut Graph, ctx: &CompilationContext) -> CompileResult<bool> {
        let seeds: Vec<NodeId> = graph.ids().collect();
        self.apply_to(graph, ctx, seeds)
    }

    /// Canonicalize the nodes added since `mark`, and whatever their
    /// simplification affects.
    pub fn apply_since(
        &mut self,
        graph: &mut Graph,
        ctx: &CompilationContext,
        mark: Mark,
    ) -> CompileResult<bool> {
        let seeds: Vec<NodeId> = graph.new_nodes(mark).collect();
        self.apply_to(graph, ctx, seeds)
    }

    /// Canonicalize starting from `seeds`.
    pub fn apply_to(
        &mut self,
        graph: &mut Graph,
        ctx: &CompilationContext,
        seeds: impl IntoIterator<Item = NodeId>,
    ) -> CompileResult<bool> {
        let phase = self.name();
        let _span = debug_span!("phase", name = phase).entered();
        let config = self.config.unwrap_or(ctx.config().canonicalizer);
        let before = self.stats;
        let edges_before = graph.edge_modifications();

        graph.track_events();
        graph.drain_events();
        let mut worklist = Worklist::with_capacity(graph.id_bound());
        for id in seeds {
            worklist.push(id);
        }
        let result = self.drain(graph, ctx, &config, &mut worklist);
        graph.stop_tracking_events();
        result?;

        let changed = graph.edge_modifications() != edges_before
            || self.stats.total_changes() != before.total_changes();
        debug!(
            phase,
            nodes = graph.node_count(),
            visited = self.stats.visited - before.visited,
            changes = self.stats.total_changes() - before.total_changes(),
            "canonicalization finished"
        );
        Ok(changed)
    }

    fn drain(
        &mut self,
        graph: &mut Graph,
        ctx: &CompilationContext,
        config: &CanonicalizerConfig,
        worklist: &mut Worklist,
    ) -> CompileResult<()> {
        let env = RuleEnv {
            meta: ctx.meta(),
            gvn: config.gvn,
        };
        let poll = ctx.config().alarm_poll_interval.max(1);
        let mut pops = 0usize;

        while let Some(id) = worklist.pop() {
            pops += 1;
            if pops % poll == 0 {
                ctx.check_alarm(self.name())?;
            }
            if !graph.is_alive(id) {
                continue;
            }
            self.stats.visited += 1;
            self.process(graph, id, config, &env)?;

            if graph.infer_stamp(id) {
                self.stats.stamps_improved += 1;
                for user in graph.users(id) {
                    worklist.push(user);
                }
            }
            for event in graph.drain_events() {
                match event {
                    NodeEvent::Removed(_) => {}
                    _ => {
                        worklist.push(event.node());
                        push_control_neighbours(graph, worklist, event.node());
                    }
                }
            }
        }
        Ok(())
    }

    fn process(
        &mut self,
        graph: &mut Graph,
        id: NodeId,
        config: &CanonicalizerConfig,
        env: &RuleEnv<'_>,
    ) -> CompileResult<()> {
        let op = graph.op(id);
        if op.is_removable_when_unused() && !graph.has_usages(id) {
            self.stats.dead_removed += graph.kill_with_unused_floating_inputs(id).in_phase(PHASE)?;
            return Ok(());
        }

        if config.gvn
            && op.is_value_numberable()
            && let Some(duplicate) = graph.find_duplicate(graph.node(id), Some(id))
        {
            self.replace(graph, id, duplicate)?;
            self.stats.value_numbered += 1;
            return Ok(());
        }

        if !config.simplify {
            return Ok(());
        }
        if op.is_fixed() {
            if control::simplify(graph, id, env, config.max_dominator_walk)? {
                self.stats.control_simplified += 1;
            }
            return Ok(());
        }

        match rules::canonical(graph, id, env)? {
            Canonical::Unchanged => {}
            Canonical::Existing(other) => {
                self.replace(graph, id, other)?;
                self.stats.rewritten += 1;
            }
            Canonical::New(node) => {
                let other = env.unique(graph, node)?;
                if other != id {
                    self.replace(graph, id, other)?;
                    self.stats.rewritten += 1;
                }
            }
            Canonical::Delete => {
                if !graph.has_usages(id) {
                    graph.kill_with_unused_floating_inputs(id).in_phase(PHASE)?;
                    self.stats.rewritten += 1;
                }
            }
        }
        Ok(())
    }

    fn replace(&mut self, graph: &mut Graph, old: NodeId, new: NodeId) -> CompileResult<()> {
        if old == new {
            return Ok(());
        }
        graph.replace_at_usages(old, new).in_phase(PHASE)?;
        graph.kill_with_unused_floating_inputs(old).in_phase(PHASE)?;
        Ok(())
    }
}

/// A fixed node whose edges changed may complete a pattern rooted at one of
/// its control predecessors; when the predecessor is a projection, the
/// pattern is rooted at the owning `If`.
fn push_control_neighbours(graph: &Graph, worklist: &mut Worklist, id: NodeId) {
    let Some(node) = graph.get(id) else {
        return;
    };
    if !node.is_fixed() {
        return;
    }
    let preds: SmallVec<[NodeId; 2]> = if node.op.is_merge() {
        node.inputs().iter().collect()
    } else {
        node.control().into_iter().collect()
    };
    for pred in preds {
        worklist.push(pred);
        if let Some(pred) = graph.get(pred)
            && pred.op.is_projection()
            && let Some(iff) = pred.control()
        {
            worklist.push(iff);
        }
    }
}

impl Phase for Canonicalizer {
    fn name(&self) -> &'static str {
        self.name.unwrap_or(PHASE)
    }

    fn run(&mut self, graph: &mut Graph, ctx: &CompilationContext) -> CompileResult<bool> {
        self.apply(graph, ctx)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, MemoryBuilder};
    use crate::ir::node::Node;
    use crate::ir::operators::{CmpOp, Constant, ControlOp, DeoptReason, LocationIdentity, Operator};
    use crate::ir::stamp::Stamp;
    use crate::meta::MetaTable;
    use std::sync::Arc;
    use std::time::Duration;

    fn canonicalize(g: &mut Graph) -> Canonicalizer {
        let ctx = CompilationContext::for_testing();
        let mut canon = Canonicalizer::new();
        canon.apply(g, &ctx).unwrap();
        g.verify().unwrap();
        canon
    }

    fn returned_value(g: &Graph) -> NodeId {
        let ret = g
            .iter()
            .find(|(_, n)| n.op.is(ControlOp::Return))
            .map(|(id, _)| id)
            .unwrap();
        g.input(ret, 1).unwrap()
    }

    // =========================================================================
    // Engine
    // =========================================================================

    #[test]
    fn test_unused_nodes_removed() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let one = b.const_int(1);
        let unused = b.int_add(x, one);
        b.return_value(Some(x));
        let mut g = b.finish().unwrap();

        let canon = canonicalize(&mut g);
        assert!(!g.is_alive(unused));
        assert!(!g.is_alive(one));
        assert!(g.is_alive(x));
        assert!(canon.stats().dead_removed >= 2);
    }

    #[test]
    fn test_folding_chain() {
        let mut b = GraphBuilder::new(0);
        let two = b.const_int(2);
        let three = b.const_int(3);
        let five = b.int_add(two, three);
        let ten = b.int_mul(five, two);
        b.return_value(Some(ten));
        let mut g = b.finish().unwrap();

        canonicalize(&mut g);
        assert_eq!(g.node(returned_value(&g)).as_int(), Some(10));
    }

    #[test]
    fn test_gvn_merges_duplicates() {
        let mut b = GraphBuilder::new(2).without_value_numbering();
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let a1 = b.int_add(x, y);
        let a2 = b.int_add(y, x);
        let sum = b.int_mul(a1, a2);
        b.return_value(Some(sum));
        let mut g = b.finish().unwrap();

        let canon = canonicalize(&mut g);
        assert_eq!(canon.stats().value_numbered, 1);
        let survivor = if g.is_alive(a1) { a1 } else { a2 };
        assert!(!(g.is_alive(a1) && g.is_alive(a2)));
        assert_eq!(g.usage_count(survivor), 2);
    }

    #[test]
    fn test_gvn_only_mode_keeps_rules_off() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let add = b.int_add(x, zero);
        b.return_value(Some(add));
        let mut g = b.finish().unwrap();

        let ctx = CompilationContext::for_testing();
        let mut canon = Canonicalizer::with_config(CanonicalizerConfig::gvn_only());
        canon.apply(&mut g, &ctx).unwrap();
        assert!(g.is_alive(add));
        assert_eq!(returned_value(&g), add);
    }

    #[test]
    fn test_second_run_is_unchanged() {
        let mut b = GraphBuilder::new(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let c = b.compare(CmpOp::Ge, x, y);
        let br = b.branch(c);
        b.begin(&br, true);
        let l = b.end_path();
        b.begin(&br, false);
        let r = b.end_path();
        let m = b.merge(&[l, r]);
        let phi = b.phi(m, &[x, y]);
        b.return_value(Some(phi));
        let mut g = b.finish().unwrap();

        let ctx = CompilationContext::for_testing();
        let mut canon = Canonicalizer::new();
        assert!(canon.apply(&mut g, &ctx).unwrap());
        let count = g.node_count();
        assert!(!canon.apply(&mut g, &ctx).unwrap());
        assert_eq!(g.node_count(), count);
    }

    #[test]
    fn test_incremental_from_mark() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        b.return_value(Some(x));
        let mut g = b.finish().unwrap();

        let mark = g.mark();
        let zero = g
            .add(Node::derived(Operator::Constant(Constant::Int(0)), &[]))
            .unwrap();
        let ctx = CompilationContext::for_testing();
        let mut canon = Canonicalizer::new();
        assert!(canon.apply_since(&mut g, &ctx, mark).unwrap());
        assert!(!g.is_alive(zero));
    }

    #[test]
    fn test_alarm_interrupts() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        b.return_value(Some(x));
        let mut g = b.finish().unwrap();

        let config = CompilerConfig::for_testing().with_budget(Duration::ZERO);
        let ctx = CompilationContext::new(config, Arc::new(MetaTable::new()));
        let err = Canonicalizer::new().apply(&mut g, &ctx).unwrap_err();
        assert!(err.is_retryable());
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    /// `if (a == 0) { if (a == 0) return 1; } return 0;`
    fn nested_conditions() -> (Graph, [NodeId; 3]) {
        let mut b = GraphBuilder::new(1);
        let a = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let c = b.int_eq(a, zero);
        let outer = b.branch(c);
        b.begin(&outer, true);
        let c2 = b.int_eq(a, zero);
        let inner = b.branch(c2);
        b.begin(&inner, true);
        b.return_value(Some(one));
        b.begin(&inner, false);
        let fallthrough = b.end_path();
        b.begin(&outer, false);
        let skipped = b.end_path();
        b.merge(&[fallthrough, skipped]);
        b.return_value(Some(zero));
        (b.finish().unwrap(), [c, one, zero])
    }

    #[test]
    fn test_nested_identical_conditions() {
        let (mut g, [c, one, zero]) = nested_conditions();

        canonicalize(&mut g);
        let compares = g
            .iter()
            .filter(|(_, n)| matches!(n.op, Operator::Compare(_)))
            .count();
        assert_eq!(compares, 1);
        let value = returned_value(&g);
        assert_eq!(g.op(value), Operator::Conditional);
        assert_eq!(g.inputs(value).collect::<Vec<_>>(), vec![c, one, zero]);
        let ret = g.single_successor(g.start()).unwrap();
        assert!(g.op(ret).is(ControlOp::Return));
    }

    #[test]
    fn test_single_run_reaches_fixed_point() {
        let (mut g, _) = nested_conditions();
        let ctx = CompilationContext::for_testing();
        let mut canon = Canonicalizer::new();
        assert!(canon.apply(&mut g, &ctx).unwrap());
        let after_first = *canon.stats();
        let count = g.node_count();

        assert!(!canon.apply(&mut g, &ctx).unwrap());
        assert_eq!(canon.stats().total_changes(), after_first.total_changes());
        assert_eq!(g.node_count(), count);
    }

    #[test]
    fn test_nested_diamonds_collapse_in_one_run() {
        // r = x < y ? (y < z ? x : y) : z, written with branches
        let mut b = GraphBuilder::new(3);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let z = b.parameter(2).unwrap();
        let c1 = b.int_lt(x, y);
        let outer = b.branch(c1);
        b.begin(&outer, true);
        let c2 = b.int_lt(y, z);
        let inner = b.branch(c2);
        b.begin(&inner, true);
        let l = b.end_path();
        b.begin(&inner, false);
        let r = b.end_path();
        let m1 = b.merge(&[l, r]);
        let p1 = b.phi(m1, &[x, y]);
        let inner_done = b.end_path();
        b.begin(&outer, false);
        let skipped = b.end_path();
        let m2 = b.merge(&[inner_done, skipped]);
        let p2 = b.phi(m2, &[p1, z]);
        let ret = b.return_value(Some(p2));
        let mut g = b.finish().unwrap();

        let ctx = CompilationContext::for_testing();
        let mut canon = Canonicalizer::new();
        assert!(canon.apply(&mut g, &ctx).unwrap());
        g.verify().unwrap();
        assert_eq!(g.input(ret, 0), Some(g.start()));
        let value = g.input(ret, 1).unwrap();
        assert_eq!(g.op(value), Operator::Conditional);
        assert_eq!(g.input(value, 0), Some(c1));
        assert_eq!(g.input(value, 2), Some(z));
        let inner_value = g.input(value, 1).unwrap();
        assert_eq!(g.inputs(inner_value).collect::<Vec<_>>(), vec![c2, x, y]);
        assert!(g.iter().all(|(_, n)| !n.op.is_merge()));

        assert!(!canon.apply(&mut g, &ctx).unwrap());
    }

    // =========================================================================
    // Guards
    // =========================================================================

    #[test]
    fn test_guard_survives_removal_of_its_pi() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let ten = b.const_int(10);
        let c = b.int_lt(x, ten);
        let guard = b.guard(c, DeoptReason::BoundsCheck, false);
        let pi = b.pi(x, Stamp::int_range(i64::MIN, 9), guard);
        b.return_value(Some(x));
        let mut g = b.finish().unwrap();

        let canon = canonicalize(&mut g);
        assert!(!g.is_alive(pi));
        assert!(g.is_alive(guard));
        assert!(g.is_alive(c));
        assert_eq!(g.input(guard, 0), Some(c));
        assert_eq!(canon.stats().dead_removed, 1);
    }

    #[test]
    fn test_guard_kept_when_replaced_pi_cascades() {
        // The pi's only user folds away, leaving the pi dead mid-run.
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let c = b.int_lt(x, zero);
        let guard = b.guard(c, DeoptReason::BoundsCheck, true);
        let pi = b.pi(x, Stamp::int_range(0, i64::MAX), guard);
        let masked = b.int_mul(pi, zero);
        b.return_value(Some(masked));
        let mut g = b.finish().unwrap();

        canonicalize(&mut g);
        assert_eq!(g.node(returned_value(&g)).as_int(), Some(0));
        assert!(!g.is_alive(pi));
        assert!(g.is_alive(guard));
        assert_eq!(g.input(guard, 0), Some(c));
    }

    #[test]
    fn test_loop_without_back_edge_removed() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let scope = b.loop_begin();
        let phi = b.loop_phi(&scope, x);
        let zero = b.const_int(0);
        let c = b.int_lt(phi, zero);
        let br = b.branch(c);
        b.begin(&br, true);
        b.return_value(Some(phi));
        b.begin(&br, false);
        b.loop_end(&scope, &[(phi, phi)]);
        let mut g = b.finish().unwrap();

        // Make the back edge unreachable.
        let never = g
            .add(Node::derived(Operator::LogicConstant(true), &[]))
            .unwrap();
        g.set_input(br.if_node, 1, never).unwrap();

        canonicalize(&mut g);
        assert!(!g.is_alive(scope.header));
        assert!(!g.is_alive(phi));
        assert!(g.iter().all(|(_, n)| !n.op.is(ControlOp::Loop)));
        assert_eq!(returned_value(&g), x);
    }

    #[test]
    fn test_memory_phi_of_unchanged_memory_collapses() {
        let slot = LocationIdentity::Named(0);
        let mut b = GraphBuilder::with_parameters(&[Stamp::OBJECT, Stamp::INT]);
        let p = b.parameter(0).unwrap();
        let n = b.parameter(1).unwrap();
        let scope = b.loop_begin();
        let i = b.loop_phi(&scope, n);
        let v = b.read(slot, p, Stamp::INT);
        let zero = b.const_int(0);
        let c = b.int_lt(i, zero);
        let br = b.branch(c);
        b.begin(&br, true);
        b.return_value(Some(v));
        b.begin(&br, false);
        let one = b.const_int(1);
        let next = b.int_sub(i, one);
        b.loop_end(&scope, &[(i, next)]);
        let mut g = b.finish().unwrap();

        canonicalize(&mut g);
        assert_eq!(g.input(v, 1), Some(g.start()));
        assert!(g.iter().all(|(_, n)| !matches!(n.op, Operator::MemoryPhi(_))));
    }
}
