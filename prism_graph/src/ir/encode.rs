//! Encoded graphs: a compact, self-contained snapshot of a graph.
//!
//! The byte stream starts with a header and is followed by one record per
//! live node. Operator payloads and stamps live in a deduplicated object
//! pool next to the bytes.
//!
//! ```text
//! header:  "PGE" version stage allow-assumptions
//!          assumption-count { type-pool-index }
//!          node-count
//! record:  tag payload-index stamp-index input-count { input-delta }
//! ```
//!
//! Integers are LEB128 varints. The payload index is biased by one so that
//! `0` means "no payload". Nodes are numbered in record order (the start
//! node is record 0) and every input is written as the zig-zag encoded
//! difference between the input's number and the node's own number, which
//! keeps the common backwards edge to a nearby node in one byte.
//!
//! Decoding reproduces node kinds, payloads, stamps and edge order; node ids
//! are renumbered densely in record order.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use super::arena::SecondaryMap;
use super::graph::{AllowAssumptions, Assumption, Graph, GuardsStage};
use super::node::{Node, NodeId};
use super::operators::{
    ArithOp, CallTarget, CmpOp, Constant, ControlOp, DeoptReason, DivOp, LocationIdentity,
    Operator, UnaryOp,
};
use super::stamp::Stamp;
use crate::error::{GraphError, GraphResult};
use crate::meta::TypeId;

const MAGIC: &[u8; 3] = b"PGE";
const VERSION: u8 = 1;

/// Opcode tags; the operator's payload goes to the pool.
mod tag {
    pub const CONSTANT: u8 = 0;
    pub const PARAMETER: u8 = 1;
    pub const ARITH: u8 = 2;
    pub const UNARY: u8 = 3;
    pub const CONDITIONAL: u8 = 4;
    pub const PI: u8 = 5;
    pub const LOGIC_CONSTANT: u8 = 6;
    pub const COMPARE: u8 = 7;
    pub const IS_NULL: u8 = 8;
    pub const INSTANCE_OF: u8 = 9;
    pub const LOGIC_NOT: u8 = 10;
    pub const PHI: u8 = 11;
    pub const MEMORY_PHI: u8 = 12;
    pub const READ: u8 = 13;
    pub const WRITE: u8 = 14;
    pub const NEW_INSTANCE: u8 = 15;
    pub const DIV: u8 = 16;
    pub const CALL: u8 = 17;
    pub const CONTROL: u8 = 18;
    pub const GUARD: u8 = 19;
}

// =============================================================================
// Object Pool
// =============================================================================

/// An entry of the object pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolObject {
    Constant(Constant),
    Parameter(u16),
    Arith(ArithOp),
    Unary(UnaryOp),
    Compare(CmpOp),
    Logic(bool),
    Type(TypeId),
    Location(LocationIdentity),
    Div(DivOp),
    Target(CallTarget),
    Control(ControlOp),
    Guard { reason: DeoptReason, negated: bool },
    Stamp(Stamp),
}

/// Split an operator into its opcode tag and pool payload.
fn split(op: Operator) -> (u8, Option<PoolObject>) {
    match op {
        Operator::Constant(c) => (tag::CONSTANT, Some(PoolObject::Constant(c))),
        Operator::Parameter(i) => (tag::PARAMETER, Some(PoolObject::Parameter(i))),
        Operator::Arith(a) => (tag::ARITH, Some(PoolObject::Arith(a))),
        Operator::Unary(u) => (tag::UNARY, Some(PoolObject::Unary(u))),
        Operator::Conditional => (tag::CONDITIONAL, None),
        Operator::Pi => (tag::PI, None),
        Operator::LogicConstant(v) => (tag::LOGIC_CONSTANT, Some(PoolObject::Logic(v))),
        Operator::Compare(c) => (tag::COMPARE, Some(PoolObject::Compare(c))),
        Operator::IsNull => (tag::IS_NULL, None),
        Operator::InstanceOf(t) => (tag::INSTANCE_OF, Some(PoolObject::Type(t))),
        Operator::LogicNot => (tag::LOGIC_NOT, None),
        Operator::Phi => (tag::PHI, None),
        Operator::MemoryPhi(l) => (tag::MEMORY_PHI, Some(PoolObject::Location(l))),
        Operator::Read(l) => (tag::READ, Some(PoolObject::Location(l))),
        Operator::Write(l) => (tag::WRITE, Some(PoolObject::Location(l))),
        Operator::NewInstance(t) => (tag::NEW_INSTANCE, Some(PoolObject::Type(t))),
        Operator::Div(d) => (tag::DIV, Some(PoolObject::Div(d))),
        Operator::Call(t) => (tag::CALL, Some(PoolObject::Target(t))),
        Operator::Control(c) => (tag::CONTROL, Some(PoolObject::Control(c))),
        Operator::Guard { reason, negated } => {
            (tag::GUARD, Some(PoolObject::Guard { reason, negated }))
        }
    }
}

/// Inverse of [`split`]; `None` if tag and payload do not fit together.
fn join(tag: u8, payload: Option<PoolObject>) -> Option<Operator> {
    use PoolObject as P;
    Some(match (tag, payload) {
        (tag::CONSTANT, Some(P::Constant(c))) => Operator::Constant(c),
        (tag::PARAMETER, Some(P::Parameter(i))) => Operator::Parameter(i),
        (tag::ARITH, Some(P::Arith(a))) => Operator::Arith(a),
        (tag::UNARY, Some(P::Unary(u))) => Operator::Unary(u),
        (tag::CONDITIONAL, None) => Operator::Conditional,
        (tag::PI, None) => Operator::Pi,
        (tag::LOGIC_CONSTANT, Some(P::Logic(v))) => Operator::LogicConstant(v),
        (tag::COMPARE, Some(P::Compare(c))) => Operator::Compare(c),
        (tag::IS_NULL, None) => Operator::IsNull,
        (tag::INSTANCE_OF, Some(P::Type(t))) => Operator::InstanceOf(t),
        (tag::LOGIC_NOT, None) => Operator::LogicNot,
        (tag::PHI, None) => Operator::Phi,
        (tag::MEMORY_PHI, Some(P::Location(l))) => Operator::MemoryPhi(l),
        (tag::READ, Some(P::Location(l))) => Operator::Read(l),
        (tag::WRITE, Some(P::Location(l))) => Operator::Write(l),
        (tag::NEW_INSTANCE, Some(P::Type(t))) => Operator::NewInstance(t),
        (tag::DIV, Some(P::Div(d))) => Operator::Div(d),
        (tag::CALL, Some(P::Target(t))) => Operator::Call(t),
        (tag::CONTROL, Some(P::Control(c))) => Operator::Control(c),
        (tag::GUARD, Some(P::Guard { reason, negated })) => Operator::Guard { reason, negated },
        _ => return None,
    })
}

fn stage_byte(stage: GuardsStage) -> u8 {
    match stage {
        GuardsStage::FloatingGuards => 0,
        GuardsStage::FixedDeopts => 1,
        GuardsStage::AfterFsa => 2,
    }
}

// =============================================================================
// Encoded Graph
// =============================================================================

/// A serialized graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedGraph {
    bytes: Vec<u8>,
    pool: Vec<PoolObject>,
}

impl EncodedGraph {
    /// Reassemble from stored parts; checked by [`decode`].
    pub fn from_parts(bytes: Vec<u8>, pool: Vec<PoolObject>) -> Self {
        EncodedGraph { bytes, pool }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pool(&self) -> &[PoolObject] {
        &self.pool
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<PoolObject>) {
        (self.bytes, self.pool)
    }
}

// =============================================================================
// Encoding
// =============================================================================

struct Writer {
    bytes: Vec<u8>,
    pool: Vec<PoolObject>,
    interned: FxHashMap<PoolObject, u32>,
}

impl Writer {
    fn byte(&mut self, b: u8) {
        self.bytes.push(b);
    }

    fn varint(&mut self, mut value: u64) {
        loop {
            let low = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(low);
                return;
            }
            self.bytes.push(low | 0x80);
        }
    }

    fn signed(&mut self, value: i64) {
        self.varint(((value << 1) ^ (value >> 63)) as u64);
    }

    fn intern(&mut self, object: PoolObject) -> u32 {
        if let Some(&index) = self.interned.get(&object) {
            return index;
        }
        let index = self.pool.len() as u32;
        self.pool.push(object);
        self.interned.insert(object, index);
        index
    }
}

/// Serialize the live nodes of `graph`.
pub fn encode(graph: &Graph) -> EncodedGraph {
    let start = graph.start();
    let order: Vec<NodeId> = std::iter::once(start)
        .chain(graph.ids().filter(|&id| id != start))
        .collect();
    let mut number: SecondaryMap<Node, u32> = SecondaryMap::with_capacity(graph.id_bound());
    for (i, &id) in order.iter().enumerate() {
        number.set(id, i as u32);
    }

    let mut w = Writer {
        bytes: Vec::with_capacity(order.len() * 4 + 16),
        pool: Vec::new(),
        interned: FxHashMap::default(),
    };
    w.bytes.extend_from_slice(MAGIC);
    w.byte(VERSION);
    w.byte(stage_byte(graph.guards_stage()));
    w.byte(u8::from(graph.allow_assumptions() == AllowAssumptions::Yes));
    w.varint(graph.assumptions().len() as u64);
    for &Assumption::LeafType(ty) in graph.assumptions() {
        let index = w.intern(PoolObject::Type(ty));
        w.varint(u64::from(index));
    }

    w.varint(order.len() as u64);
    for (i, &id) in order.iter().enumerate() {
        let node = graph.node(id);
        let (tag, payload) = split(node.op);
        w.byte(tag);
        let payload = payload.map_or(0, |p| u64::from(w.intern(p)) + 1);
        w.varint(payload);
        let stamp = w.intern(PoolObject::Stamp(node.stamp));
        w.varint(u64::from(stamp));
        w.varint(node.inputs().len() as u64);
        for input in node.inputs().iter() {
            w.signed(i64::from(number[input]) - i as i64);
        }
    }

    debug!(
        nodes = order.len(),
        bytes = w.bytes.len(),
        pool = w.pool.len(),
        "encoded graph"
    );
    EncodedGraph {
        bytes: w.bytes,
        pool: w.pool,
    }
}

// =============================================================================
// Decoding
// =============================================================================

struct Reader<'a> {
    bytes: &'a [u8],
    pool: &'a [PoolObject],
    pos: usize,
}

impl Reader<'_> {
    fn error(&self, message: impl Into<String>) -> GraphError {
        GraphError::Decode {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn byte(&mut self) -> GraphResult<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn varint(&mut self) -> GraphResult<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let b = self.byte()?;
            if shift == 63 && b > 1 {
                return Err(self.error("varint overflows 64 bits"));
            }
            result |= u64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(self.error("varint overflows 64 bits"));
            }
        }
    }

    fn signed(&mut self) -> GraphResult<i64> {
        let raw = self.varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    /// A count bounded by the bytes left, so corrupt input cannot request
    /// huge allocations.
    fn count(&mut self) -> GraphResult<usize> {
        let n = self.varint()?;
        usize::try_from(n)
            .ok()
            .filter(|&n| n <= self.remaining())
            .ok_or_else(|| self.error(format!("count {n} exceeds the remaining input")))
    }

    fn pool_object(&mut self) -> GraphResult<PoolObject> {
        let index = self.varint()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| self.pool.get(i))
            .copied()
            .ok_or_else(|| self.error(format!("pool index {index} out of range")))
    }
}

/// Rebuild a graph from its encoded form.
///
/// The encoding is checked for integrity; structural validity of the result
/// is left to [`Graph::verify`].
pub fn decode(encoded: &EncodedGraph) -> GraphResult<Graph> {
    let mut r = Reader {
        bytes: &encoded.bytes,
        pool: &encoded.pool,
        pos: 0,
    };
    for &expected in MAGIC {
        if r.byte()? != expected {
            return Err(r.error("bad magic"));
        }
    }
    let version = r.byte()?;
    if version != VERSION {
        return Err(r.error(format!("unsupported version {version}")));
    }
    let stage = match r.byte()? {
        0 => GuardsStage::FloatingGuards,
        1 => GuardsStage::FixedDeopts,
        2 => GuardsStage::AfterFsa,
        other => return Err(r.error(format!("unknown guards stage {other}"))),
    };
    let allow = match r.byte()? {
        0 => AllowAssumptions::No,
        1 => AllowAssumptions::Yes,
        other => return Err(r.error(format!("unknown assumption mode {other}"))),
    };
    let assumption_count = r.count()?;
    let mut assumptions = Vec::with_capacity(assumption_count);
    for _ in 0..assumption_count {
        match r.pool_object()? {
            PoolObject::Type(ty) => assumptions.push(Assumption::LeafType(ty)),
            other => return Err(r.error(format!("expected a type, found {other:?}"))),
        }
    }

    let count = r.count()?;
    if count == 0 {
        return Err(r.error("missing start record"));
    }
    let mut graph = Graph::with_capacity(count);
    let mut ids: Vec<NodeId> = Vec::with_capacity(count);
    let mut stamps: Vec<(NodeId, Stamp)> = Vec::with_capacity(count);
    // (node, input index, record number) of edges to later records.
    let mut forward: Vec<(NodeId, usize, usize)> = Vec::new();

    for number in 0..count {
        let tag = r.byte()?;
        let payload = match r.varint()? {
            0 => None,
            biased => {
                let index = usize::try_from(biased - 1).ok();
                let object = index
                    .and_then(|i| encoded.pool.get(i))
                    .copied()
                    .ok_or_else(|| r.error(format!("payload index {biased} out of range")))?;
                Some(object)
            }
        };
        let op = join(tag, payload)
            .ok_or_else(|| r.error(format!("tag {tag} does not match payload {payload:?}")))?;
        let stamp = match r.pool_object()? {
            PoolObject::Stamp(stamp) => stamp,
            other => return Err(r.error(format!("expected a stamp, found {other:?}"))),
        };

        let input_count = r.count()?;
        let mut targets: SmallVec<[usize; 4]> = SmallVec::with_capacity(input_count);
        for _ in 0..input_count {
            let delta = r.signed()?;
            let target = (number as i64)
                .checked_add(delta)
                .and_then(|t| usize::try_from(t).ok())
                .filter(|&t| t < count)
                .ok_or_else(|| r.error(format!("input delta {delta} out of range")))?;
            targets.push(target);
        }

        let is_start = op.is(ControlOp::Start);
        if number == 0 {
            if !is_start || !targets.is_empty() {
                return Err(r.error("first record is not the start node"));
            }
            ids.push(graph.start());
            stamps.push((graph.start(), stamp));
            continue;
        }
        if is_start {
            return Err(r.error("second start node"));
        }

        // Edges to later records point at the start node until those exist.
        let inputs: SmallVec<[NodeId; 4]> = targets
            .iter()
            .map(|&t| if t < number { ids[t] } else { graph.start() })
            .collect();
        let id = graph.add(Node::new(op, &inputs, stamp))?;
        for (index, &t) in targets.iter().enumerate() {
            if t >= number {
                forward.push((id, index, t));
            }
        }
        ids.push(id);
        stamps.push((id, stamp));
    }
    if r.remaining() != 0 {
        return Err(r.error("trailing bytes after the last record"));
    }

    for (node, index, target) in forward {
        graph.set_input(node, index, ids[target])?;
    }
    // Stamps are restored as encoded, not re-inferred.
    for (id, stamp) in stamps {
        graph.set_stamp(id, stamp);
    }
    graph.set_guards_stage(stage)?;
    for assumption in assumptions {
        graph.record_assumption(assumption);
    }
    graph.set_allow_assumptions(allow);
    Ok(graph)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, MemoryBuilder};
    use crate::ir::compare::graphs_equivalent;

    fn counting_loop() -> Graph {
        let mut b = GraphBuilder::new(1);
        let n = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let scope = b.loop_begin();
        let i = b.loop_phi(&scope, zero);
        let cond = b.int_lt(i, n);
        let branch = b.branch(cond);
        b.begin(&branch, true);
        let next = b.int_add(i, one);
        b.write(LocationIdentity::Named(3), n, next);
        b.loop_end(&scope, &[(i, next)]);
        b.begin(&branch, false);
        b.return_value(Some(i));
        b.finish().unwrap()
    }

    #[test]
    fn test_round_trip_loop() {
        let mut g = counting_loop();
        g.record_assumption(Assumption::LeafType(TypeId(4)));
        let encoded = encode(&g);
        let decoded = decode(&encoded).unwrap();
        decoded.verify().unwrap();
        assert_eq!(decoded.node_count(), g.node_count());
        assert_eq!(decoded.assumptions(), g.assumptions());
        assert_eq!(decoded.guards_stage(), g.guards_stage());
        assert!(graphs_equivalent(&g, &decoded));
    }

    #[test]
    fn test_stage_preserved() {
        let mut g = counting_loop();
        g.set_guards_stage(GuardsStage::FixedDeopts).unwrap();
        let decoded = decode(&encode(&g)).unwrap();
        assert_eq!(decoded.guards_stage(), GuardsStage::FixedDeopts);
    }

    #[test]
    fn test_pool_is_deduplicated() {
        let mut b = GraphBuilder::new(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let s = b.int_add(x, y);
        let t = b.int_add(s, y);
        b.return_value(Some(t));
        let g = b.finish().unwrap();

        let encoded = encode(&g);
        let adds = encoded
            .pool()
            .iter()
            .filter(|o| **o == PoolObject::Arith(ArithOp::Add))
            .count();
        assert_eq!(adds, 1);
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let encoded = encode(&counting_loop());
        let (mut bytes, pool) = encoded.into_parts();
        bytes.pop();
        let err = decode(&EncodedGraph::from_parts(bytes, pool)).unwrap_err();
        assert!(matches!(err, GraphError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let err = decode(&EncodedGraph::from_parts(b"XYZ\x01".to_vec(), Vec::new())).unwrap_err();
        assert!(matches!(err, GraphError::Decode { offset: 1, .. }));
    }

    #[test]
    fn test_decode_rejects_bad_pool_index() {
        let (bytes, _) = encode(&counting_loop()).into_parts();
        let err = decode(&EncodedGraph::from_parts(bytes, Vec::new())).unwrap_err();
        assert!(matches!(err, GraphError::Decode { .. }));
    }

    #[test]
    fn test_varint_extremes() {
        let mut w = Writer {
            bytes: Vec::new(),
            pool: Vec::new(),
            interned: FxHashMap::default(),
        };
        for v in [0i64, -1, 1, 63, -64, 64, i64::MIN, i64::MAX] {
            w.signed(v);
        }
        w.varint(u64::MAX);
        let mut r = Reader {
            bytes: &w.bytes,
            pool: &[],
            pos: 0,
        };
        for v in [0i64, -1, 1, 63, -64, 64, i64::MIN, i64::MAX] {
            assert_eq!(r.signed().unwrap(), v);
        }
        assert_eq!(r.varint().unwrap(), u64::MAX);
        assert_eq!(r.remaining(), 0);
    }
}
