//! Structural graph equivalence.
//!
//! Two graphs are equivalent when a bijection between their live nodes maps
//! the start node to the start node and preserves operators, stamps and
//! every input edge in order. Node ids play no role.

use super::arena::SecondaryMap;
use super::graph::Graph;
use super::node::{Node, NodeId};

/// Whether `a` and `b` are isomorphic.
///
/// The bijection is grown from the start nodes along input edges and control
/// successors. Nodes not reached that way (unused floating nodes) are
/// matched pairwise in id order.
pub fn graphs_equivalent(a: &Graph, b: &Graph) -> bool {
    if a.node_count() != b.node_count() {
        return false;
    }
    let mut matcher = Matcher {
        a,
        b,
        a_to_b: SecondaryMap::with_capacity(a.id_bound()),
        b_to_a: SecondaryMap::with_capacity(b.id_bound()),
        worklist: Vec::new(),
    };
    if !matcher.pair(a.start(), b.start()) || !matcher.drain() {
        return false;
    }

    let ids_a: Vec<NodeId> = a.ids().collect();
    let ids_b: Vec<NodeId> = b.ids().collect();
    let (mut i, mut j) = (0, 0);
    loop {
        while i < ids_a.len() && matcher.a_to_b[ids_a[i]].is_valid() {
            i += 1;
        }
        while j < ids_b.len() && matcher.b_to_a[ids_b[j]].is_valid() {
            j += 1;
        }
        match (ids_a.get(i), ids_b.get(j)) {
            (None, None) => return true,
            (Some(&x), Some(&y)) => {
                if !matcher.pair(x, y) || !matcher.drain() {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

struct Matcher<'a> {
    a: &'a Graph,
    b: &'a Graph,
    a_to_b: SecondaryMap<Node, NodeId>,
    b_to_a: SecondaryMap<Node, NodeId>,
    worklist: Vec<(NodeId, NodeId)>,
}

impl Matcher<'_> {
    /// Record `x <-> y`; false if either side is already paired elsewhere.
    fn pair(&mut self, x: NodeId, y: NodeId) -> bool {
        let (mx, my) = (self.a_to_b[x], self.b_to_a[y]);
        if !mx.is_valid() && !my.is_valid() {
            self.a_to_b.set(x, y);
            self.b_to_a.set(y, x);
            self.worklist.push((x, y));
            return true;
        }
        mx == y && my == x
    }

    fn drain(&mut self) -> bool {
        while let Some((x, y)) = self.worklist.pop() {
            let (nx, ny) = (self.a.node(x), self.b.node(y));
            if nx.op != ny.op || nx.stamp != ny.stamp || nx.inputs().len() != ny.inputs().len() {
                return false;
            }
            for (ix, iy) in nx.inputs().iter().zip(ny.inputs().iter()) {
                if !self.pair(ix, iy) {
                    return false;
                }
            }
            if nx.is_fixed() {
                let sx = self.a.control_successors(x);
                let sy = self.b.control_successors(y);
                if sx.len() != sy.len() {
                    return false;
                }
                for (&cx, &cy) in sx.iter().zip(sy.iter()) {
                    if !self.pair(cx, cy) {
                        return false;
                    }
                }
            }
        }
        true
    }
}
