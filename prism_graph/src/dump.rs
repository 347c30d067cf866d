//! Graph dumping for diagnostics.
//!
//! A [`DumpHook`] receives the graph by shared reference at phase
//! checkpoints and when a compilation fails. Hooks cannot mutate the graph.

use std::fmt::{self, Write as _};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::CompileError;
use crate::ir::graph::Graph;

/// Why a dump was taken.
#[derive(Debug, Clone, Copy)]
pub enum DumpScope<'a> {
    AfterPhase(&'static str),
    Failure {
        phase: &'static str,
        error: &'a CompileError,
    },
    Named(&'a str),
}

impl fmt::Display for DumpScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpScope::AfterPhase(phase) => write!(f, "after {phase}"),
            DumpScope::Failure { phase, error } => write!(f, "failure in {phase}: {error}"),
            DumpScope::Named(name) => f.write_str(name),
        }
    }
}

pub trait DumpHook: Send + Sync {
    fn dump(&self, graph: &Graph, scope: DumpScope<'_>);
}

/// Render `graph` as text, one node per line in id order.
pub fn format_graph(graph: &Graph) -> String {
    let mut out = String::with_capacity(graph.node_count() * 32);
    for (id, node) in graph.iter() {
        let _ = write!(out, "{id:>6} {}", node.op);
        if !node.inputs().is_empty() {
            out.push_str(" (");
            for (i, input) in node.inputs().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{input}");
            }
            out.push(')');
        }
        let _ = writeln!(out, " : {:?}", node.stamp);
    }
    out
}

// =============================================================================
// Hooks
// =============================================================================

/// Emits dumps as `tracing` debug events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDump;

impl DumpHook for TracingDump {
    fn dump(&self, graph: &Graph, scope: DumpScope<'_>) {
        debug!(scope = %scope, nodes = graph.node_count(), "graph dump\n{}", format_graph(graph));
    }
}

/// Keeps every dump in memory.
#[derive(Debug, Default)]
pub struct CollectingDump {
    dumps: Mutex<Vec<(String, String)>>,
}

impl CollectingDump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.dumps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dumps.lock().is_empty()
    }

    /// `(scope, text)` pairs in dump order.
    pub fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.dumps.lock())
    }
}

impl DumpHook for CollectingDump {
    fn dump(&self, graph: &Graph, scope: DumpScope<'_>) {
        self.dumps
            .lock()
            .push((scope.to_string(), format_graph(graph)));
    }
}
