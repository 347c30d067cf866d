//! Removal of unreachable control flow.

use tracing::trace;

use crate::error::{GraphError, GraphResult};
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::ControlOp;

/// Remove input `index` of `merge` together with the matching input of each
/// of its phis.
pub(crate) fn detach_merge_input(graph: &mut Graph, merge: NodeId, index: usize) -> GraphResult<()> {
    for phi in graph.phis(merge) {
        graph.remove_input(phi, index + 1)?;
    }
    graph.remove_input(merge, index)?;
    Ok(())
}

/// Kill the control flow starting at the fixed node `dead` and everything
/// that only it keeps alive.
///
/// Merges reached from the dead region lose the corresponding predecessor
/// (and phi input); a merge left without predecessors, or a loop whose
/// forward entry dies, is dead too. Floating nodes depending on a dead fixed
/// node die with it. Returns the number of nodes removed.
pub(crate) fn kill_cfg(graph: &mut Graph, dead: NodeId) -> GraphResult<usize> {
    let mut dead_set = BitSet::with_capacity(graph.id_bound());
    let mut fixed = Vec::new();
    let mut work = vec![dead];

    while let Some(node) = work.pop() {
        if !graph.is_alive(node) || !dead_set.insert(node.as_usize()) {
            continue;
        }
        fixed.push(node);
        for succ in graph.control_successors(node) {
            if dead_set.contains(succ.as_usize()) {
                continue;
            }
            let op = graph.op(succ);
            if !op.is_merge() {
                work.push(succ);
                continue;
            }
            let positions: Vec<usize> = graph
                .inputs(succ)
                .enumerate()
                .filter(|(_, input)| *input == node)
                .map(|(i, _)| i)
                .collect();
            if op.is(ControlOp::Loop) && positions.first() == Some(&0) {
                work.push(succ);
                continue;
            }
            for index in positions.into_iter().rev() {
                detach_merge_input(graph, succ, index)?;
            }
            if graph.node(succ).inputs().is_empty() {
                work.push(succ);
            }
        }
    }

    // Floating nodes reachable through usages of dead nodes.
    let mut floating = Vec::new();
    let mut stack = fixed.clone();
    while let Some(node) = stack.pop() {
        for user in graph.users(node) {
            if !graph.node(user).is_fixed() && dead_set.insert(user.as_usize()) {
                floating.push(user);
                stack.push(user);
            }
        }
    }

    for &node in fixed.iter().chain(&floating) {
        graph.clear_inputs(node)?;
    }
    for &node in fixed.iter().chain(&floating) {
        let users = graph.usage_count(node);
        if users > 0 {
            return Err(GraphError::Malformed {
                node,
                message: format!("unreachable node still has {users} live usages"),
            });
        }
        graph.kill(node)?;
    }
    let removed = fixed.len() + floating.len();
    trace!(root = %dead, removed, "killed unreachable control flow");
    Ok(removed)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};

    #[test]
    fn test_kill_branch_detaches_merge() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let c = b.int_lt(x, zero);
        let br = b.branch(c);
        let t = b.begin(&br, true);
        let one = b.const_int(1);
        let dead_value = b.int_add(x, one);
        let l = b.end_path();
        b.begin(&br, false);
        let r = b.end_path();
        let m = b.merge(&[l, r]);
        let phi = b.phi(m, &[dead_value, x]);
        b.return_value(Some(phi));
        let mut g = b.finish().unwrap();

        kill_cfg(&mut g, t).unwrap();
        assert!(!g.is_alive(t));
        assert_eq!(g.node(m).inputs().len(), 1);
        assert_eq!(g.inputs(phi).collect::<Vec<_>>(), vec![m, x]);
        // The add only fed the removed phi input; it is unused but alive.
        assert!(g.is_alive(dead_value));
        assert!(!g.has_usages(dead_value));
        g.verify().unwrap();
    }

    #[test]
    fn test_kill_loop_entry_kills_loop() {
        let mut b = GraphBuilder::new(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let c = b.int_lt(x, zero);
        let br = b.branch(c);
        let t = b.begin(&br, true);
        let scope = b.loop_begin();
        let phi = b.loop_phi(&scope, x);
        let one = b.const_int(1);
        let next = b.int_add(phi, one);
        b.loop_end(&scope, &[(phi, next)]);
        b.begin(&br, false);
        b.return_value(None);
        let mut g = b.finish().unwrap();

        let removed = kill_cfg(&mut g, t).unwrap();
        assert!(removed >= 5);
        assert!(!g.is_alive(scope.header));
        assert!(!g.is_alive(phi));
        assert!(!g.is_alive(next));
        assert!(g.is_alive(x));
    }
}
