//! Structural verification of a graph.
//!
//! Checked invariants:
//! - every input edge has a matching usage entry and vice versa
//! - inputs refer to live nodes, in the number the operator allows
//! - every input points at a node of the kind its edge type requires
//! - straight-line fixed nodes have at most one control successor, and an
//!   `If` has at most one projection per direction
//! - phis have one value per merge predecessor
//! - floating guards exist only while the guards stage allows them
//!
//! Verification is gated by `CompilerConfig::verify_graphs`; it is linear in
//! the number of edges.

use rustc_hash::FxHashSet;

use super::graph::Graph;
use super::node::{NodeId, Usage};
use super::operators::{ControlOp, InputType, Operator};
use crate::error::{GraphError, GraphResult};

pub fn verify_graph(graph: &Graph) -> GraphResult<()> {
    for (id, node) in graph.iter() {
        if !node.op.arity().accepts(node.inputs().len()) {
            return Err(malformed(
                id,
                format!("{} cannot take {} inputs", node.op, node.inputs().len()),
            ));
        }
        for (index, ty, input) in node.typed_inputs() {
            if !graph.is_alive(input) {
                return Err(GraphError::DanglingInput {
                    node: id,
                    index,
                    input,
                });
            }
            if !graph.usages(input).contains(&Usage::new(id, index)) {
                return Err(GraphError::MissingUsage {
                    node: id,
                    index,
                    input,
                });
            }
            check_input_type(graph, id, index, ty, input)?;
        }
        verify_usages(graph, id)?;
        verify_node(graph, id)?;
    }
    Ok(())
}

fn verify_usages(graph: &Graph, id: NodeId) -> GraphResult<()> {
    let mut seen = FxHashSet::default();
    for usage in graph.usages(id) {
        let matches = graph
            .get(usage.user)
            .and_then(|user| user.input(usage.position()))
            == Some(id);
        if !matches || !seen.insert(*usage) {
            return Err(GraphError::StaleUsage {
                node: id,
                user: usage.user,
                index: usage.position(),
            });
        }
    }
    Ok(())
}

fn check_input_type(
    graph: &Graph,
    id: NodeId,
    index: usize,
    ty: InputType,
    input: NodeId,
) -> GraphResult<()> {
    let target = graph.node(input);
    let (ok, expected) = match ty {
        InputType::Control => (
            target.is_fixed() && !target.op.is_sink() && !target.op.is(ControlOp::LoopEnd),
            "a control predecessor",
        ),
        InputType::Value => (target.stamp.is_value(), "a value"),
        InputType::Condition => (target.op.is_logic(), "a condition"),
        InputType::Memory => (target.op.is_memory_state(), "a memory state"),
        InputType::Association => (target.op.is_merge(), "a merge"),
        InputType::Anchor => (target.is_fixed(), "a fixed anchor"),
    };
    // Only `Loop` may name a `LoopEnd` as control predecessor.
    let loop_back_edge = ty == InputType::Control
        && target.op.is(ControlOp::LoopEnd)
        && graph.op(id).is(ControlOp::Loop)
        && index > 0;
    // Only projections may follow an `If`.
    let bad_if_successor = ty == InputType::Control
        && target.op.is(ControlOp::If)
        && !matches!(
            graph.op(id),
            Operator::Control(ControlOp::IfTrue | ControlOp::IfFalse)
        );
    if (ok || loop_back_edge) && !bad_if_successor {
        return Ok(());
    }
    Err(GraphError::InputTypeMismatch {
        node: id,
        index,
        input,
        expected,
        found: target.op.to_string(),
    })
}

fn verify_node(graph: &Graph, id: NodeId) -> GraphResult<()> {
    let node = graph.node(id);
    match node.op {
        Operator::Control(ControlOp::If) => {
            let succs = graph.control_successors(id);
            let trues = succs
                .iter()
                .filter(|s| graph.op(**s).is(ControlOp::IfTrue))
                .count();
            if trues > 1 || succs.len() - trues > 1 {
                return Err(malformed(id, "branch has duplicate projections"));
            }
        }
        Operator::Control(ControlOp::Loop) => {
            for back in node.inputs().iter().skip(1) {
                if !graph.op(back).is(ControlOp::LoopEnd) {
                    return Err(malformed(id, format!("back edge {back} is not a LoopEnd")));
                }
            }
        }
        Operator::Phi | Operator::MemoryPhi(_) => {
            let merge = node.inputs().get(0).ok_or_else(|| malformed(id, "phi without merge"))?;
            let preds = graph.node(merge).inputs().len();
            if node.inputs().len() != preds + 1 {
                return Err(malformed(
                    id,
                    format!(
                        "phi has {} values for {preds} merge predecessors",
                        node.inputs().len() - 1
                    ),
                ));
            }
        }
        Operator::Guard { .. } if !graph.guards_stage().allows_floating_guards() => {
            return Err(malformed(
                id,
                format!("floating guard in stage {}", graph.guards_stage().name()),
            ));
        }
        op if op.is_fixed() && !op.is_block_end() => {
            if graph.control_successors(id).len() > 1 {
                return Err(malformed(id, "straight-line node has several successors"));
            }
        }
        _ => {}
    }
    Ok(())
}

fn malformed(node: NodeId, message: impl Into<String>) -> GraphError {
    GraphError::Malformed {
        node,
        message: message.into(),
    }
}
