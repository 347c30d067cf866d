//! Intermediate representation: the sea-of-nodes graph and its views.
//!
//! - [`graph`]: node storage and def-use bookkeeping
//! - [`builder`]: construction API
//! - [`cfg`]: basic blocks, dominators and loops over the fixed nodes
//! - [`encode`]: compact serialized form
//! - [`compare`]: structural equivalence of two graphs
//! - [`verify`]: structural invariant checks

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod compare;
pub mod encode;
pub mod graph;
pub mod node;
pub mod operators;
pub mod stamp;
pub mod verify;

pub use arena::{BitSet, Id, SecondaryMap};
pub use graph::{AllowAssumptions, Assumption, Graph, GuardsStage, Mark, NodeEvent};
pub use node::{GraphFlags, InputList, Node, NodeId, Usage};
pub use operators::{
    ArithOp, CallTarget, CmpOp, Constant, ControlOp, DeoptReason, DivOp, InputType,
    LocationIdentity, Operator, UnaryOp,
};
pub use stamp::{IntStamp, ObjectStamp, Stamp};
