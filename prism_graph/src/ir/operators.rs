//! Operator definitions for the sea-of-nodes IR.
//!
//! Operators are organized by category:
//! - **Values**: constants, parameters, integer arithmetic, conditional moves
//! - **Logic**: comparisons and other conditions consumed by branches
//! - **Memory**: floating reads and fixed writes keyed by location identity
//! - **Control**: start, merges, loops, branches, returns and deopts
//! - **Guards**: floating guards and the pi nodes anchored on them
//!
//! Each operator knows the type of every input position, whether it is fixed
//! in the control flow, whether it may be value numbered, and how to derive a
//! stamp from its inputs.

use std::fmt;

use super::stamp::{IntStamp, ObjectStamp, Stamp};
use crate::meta::{FieldId, TypeId};

// =============================================================================
// Operator Categories
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCategory {
    Constant = 0,
    Arithmetic = 1,
    Logic = 2,
    Memory = 3,
    Control = 4,
    Phi = 5,
    Guard = 6,
    Call = 7,
}

// =============================================================================
// Edge Types
// =============================================================================

/// The role of one input position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    /// Control predecessor. Only fixed nodes have control inputs.
    Control,
    /// A data value.
    Value,
    /// A logic node.
    Condition,
    /// A memory state.
    Memory,
    /// Phi to its merge.
    Association,
    /// Guard or pi to the fixed node it may not float above.
    Anchor,
}

/// Allowed number of inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Between `min` and `max` inclusive; the trailing inputs are optional.
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::Range(lo, hi) => lo <= n && n <= hi,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Binary integer operators. All are total (wrapping) and therefore floating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    And = 3,
    Or = 4,
    Xor = 5,
    Shl = 6,
    Shr = 7,
    UShr = 8,
}

impl ArithOp {
    pub const ALL: [ArithOp; 9] = [
        ArithOp::Add,
        ArithOp::Sub,
        ArithOp::Mul,
        ArithOp::And,
        ArithOp::Or,
        ArithOp::Xor,
        ArithOp::Shl,
        ArithOp::Shr,
        ArithOp::UShr,
    ];

    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor
        )
    }

    /// Right identity: `x op e == x`.
    pub const fn identity(self) -> Option<i64> {
        match self {
            ArithOp::Add
            | ArithOp::Sub
            | ArithOp::Or
            | ArithOp::Xor
            | ArithOp::Shl
            | ArithOp::Shr
            | ArithOp::UShr => Some(0),
            ArithOp::Mul => Some(1),
            ArithOp::And => Some(-1),
        }
    }

    /// Right absorbing element: `x op a == a`.
    pub const fn absorbing(self) -> Option<i64> {
        match self {
            ArithOp::Mul | ArithOp::And => Some(0),
            ArithOp::Or => Some(-1),
            _ => None,
        }
    }

    /// Evaluate with two's complement wrapping; shift counts use the low six bits.
    pub fn fold(self, a: i64, b: i64) -> i64 {
        let shift = (b & 63) as u32;
        match self {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::And => a & b,
            ArithOp::Or => a | b,
            ArithOp::Xor => a ^ b,
            ArithOp::Shl => a.wrapping_shl(shift),
            ArithOp::Shr => a.wrapping_shr(shift),
            ArithOp::UShr => ((a as u64) >> shift) as i64,
        }
    }

    pub fn stamp(self, a: IntStamp, b: IntStamp) -> IntStamp {
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            return IntStamp::constant(self.fold(x, y));
        }
        match self {
            ArithOp::Add => a.add(b),
            ArithOp::Sub => a.sub(b),
            ArithOp::Mul => a.mul(b),
            ArithOp::And => a.and(b),
            ArithOp::UShr if b.lo >= 1 && b.hi <= 63 => IntStamp {
                lo: 0,
                hi: i64::MAX >> (b.lo - 1),
            },
            _ => IntStamp::FULL,
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::And => "&",
            ArithOp::Or => "|",
            ArithOp::Xor => "^",
            ArithOp::Shl => "<<",
            ArithOp::Shr => ">>",
            ArithOp::UShr => ">>>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnaryOp {
    Neg = 0,
    Not = 1,
}

impl UnaryOp {
    pub fn fold(self, a: i64) -> i64 {
        match self {
            UnaryOp::Neg => a.wrapping_neg(),
            UnaryOp::Not => !a,
        }
    }

    pub fn stamp(self, a: IntStamp) -> IntStamp {
        match (self, a.as_constant()) {
            (_, Some(v)) => IntStamp::constant(self.fold(v)),
            (UnaryOp::Neg, None) => a.neg(),
            (UnaryOp::Not, None) => IntStamp {
                lo: !a.hi,
                hi: !a.lo,
            },
        }
    }
}

/// Trapping integer division. Fixed so it can never float above its zero check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DivOp {
    Div = 0,
    Rem = 1,
}

impl DivOp {
    /// `None` for division by zero; `MIN / -1` wraps.
    pub fn fold(self, a: i64, b: i64) -> Option<i64> {
        if b == 0 {
            return None;
        }
        Some(match self {
            DivOp::Div => a.wrapping_div(b),
            DivOp::Rem => a.wrapping_rem(b),
        })
    }
}

// =============================================================================
// Comparison
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmpOp {
    Eq = 0,
    Ne = 1,
    Lt = 2,
    Le = 3,
    Gt = 4,
    Ge = 5,
    /// Unsigned less than.
    Below = 6,
}

impl CmpOp {
    /// `!(a op b) == (a op.inverse() b)`.
    #[inline]
    pub const fn inverse(self) -> Option<Self> {
        match self {
            CmpOp::Eq => Some(CmpOp::Ne),
            CmpOp::Ne => Some(CmpOp::Eq),
            CmpOp::Lt => Some(CmpOp::Ge),
            CmpOp::Le => Some(CmpOp::Gt),
            CmpOp::Gt => Some(CmpOp::Le),
            CmpOp::Ge => Some(CmpOp::Lt),
            CmpOp::Below => None,
        }
    }

    /// `(a op b) == (b op.swap() a)`.
    #[inline]
    pub const fn swap(self) -> Option<Self> {
        match self {
            CmpOp::Eq => Some(CmpOp::Eq),
            CmpOp::Ne => Some(CmpOp::Ne),
            CmpOp::Lt => Some(CmpOp::Gt),
            CmpOp::Le => Some(CmpOp::Ge),
            CmpOp::Gt => Some(CmpOp::Lt),
            CmpOp::Ge => Some(CmpOp::Le),
            CmpOp::Below => None,
        }
    }

    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Ne)
    }

    pub fn fold(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Below => (a as u64) < (b as u64),
        }
    }

    /// Decide the comparison from operand ranges alone, if possible.
    pub fn fold_stamps(self, a: IntStamp, b: IntStamp) -> Option<bool> {
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            return Some(self.fold(x, y));
        }
        match self {
            CmpOp::Eq if a.disjoint(b) => Some(false),
            CmpOp::Ne if a.disjoint(b) => Some(true),
            CmpOp::Lt if a.hi < b.lo => Some(true),
            CmpOp::Lt if a.lo >= b.hi => Some(false),
            CmpOp::Le if a.hi <= b.lo => Some(true),
            CmpOp::Le if a.lo > b.hi => Some(false),
            CmpOp::Gt | CmpOp::Ge => self.swap().and_then(|s| s.fold_stamps(b, a)),
            CmpOp::Below if a.lo >= 0 && b.lo >= 0 => CmpOp::Lt.fold_stamps(a, b),
            _ => None,
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Below => "<|",
        }
    }
}

// =============================================================================
// Control
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlOp {
    /// Graph entry; also the initial memory state.
    Start = 0,
    /// Merge of forward control paths. Inputs: predecessor ends.
    Region = 1,
    /// Loop header. Input 0 is the forward entry, the rest are `LoopEnd`s.
    Loop = 2,
    /// Back edge into a `Loop`.
    LoopEnd = 3,
    /// Two-way branch. Inputs: control, condition.
    If = 4,
    IfTrue = 5,
    IfFalse = 6,
    /// Inputs: control, optional value.
    Return = 7,
    /// Leave compiled code and resume in the interpreter.
    Deopt = 8,
}

/// Why a guard or deopt leaves compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptReason {
    NullCheck = 0,
    TypeCheck = 1,
    BoundsCheck = 2,
    Unreached = 3,
    Speculation = 4,
}

// =============================================================================
// Memory
// =============================================================================

/// The memory partition an access touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocationIdentity {
    /// Every location. Calls kill `Any`.
    Any,
    /// An abstract slot, e.g. raw memory addressed by a pointer.
    Named(u32),
    /// An instance field.
    Field(FieldId),
}

impl LocationIdentity {
    #[inline]
    pub fn overlaps(self, other: LocationIdentity) -> bool {
        self == LocationIdentity::Any || other == LocationIdentity::Any || self == other
    }
}

impl fmt::Display for LocationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationIdentity::Any => write!(f, "ANY"),
            LocationIdentity::Named(n) => write!(f, "mem{n}"),
            LocationIdentity::Field(fid) => write!(f, "field{}", fid.0),
        }
    }
}

/// Opaque callee identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTarget(pub u32);

// =============================================================================
// Constants
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Null,
}

impl Constant {
    pub fn stamp(self) -> Stamp {
        match self {
            Constant::Int(v) => Stamp::int_constant(v),
            Constant::Null => Stamp::Object(ObjectStamp::NULL),
        }
    }
}

// =============================================================================
// Operator (Unified)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // Values
    Constant(Constant),
    Parameter(u16),
    Arith(ArithOp),
    Unary(UnaryOp),
    /// `cond ? a : b`. Inputs: condition, true value, false value.
    Conditional,
    /// Narrows the stamp of its value input below an anchor.
    Pi,

    // Logic
    LogicConstant(bool),
    Compare(CmpOp),
    IsNull,
    InstanceOf(TypeId),
    LogicNot,

    // SSA
    /// Inputs: merge, then one value per merge predecessor.
    Phi,
    /// Inputs: merge, then one memory state per merge predecessor.
    MemoryPhi(LocationIdentity),

    // Memory
    /// Floating read. Inputs: address, memory state.
    Read(LocationIdentity),
    /// Fixed write. Inputs: control, address, value.
    Write(LocationIdentity),
    /// Fixed allocation. Inputs: control.
    NewInstance(TypeId),

    // Fixed computation
    /// Inputs: control, dividend, divisor.
    Div(DivOp),
    /// Inputs: control, arguments.
    Call(CallTarget),

    // Control
    Control(ControlOp),

    // Guards
    /// Floating guard. Inputs: condition, anchor.
    Guard { reason: DeoptReason, negated: bool },
}

impl Operator {
    pub const fn category(&self) -> OpCategory {
        match self {
            Operator::Constant(_) | Operator::Parameter(_) => OpCategory::Constant,
            Operator::Arith(_) | Operator::Unary(_) | Operator::Conditional | Operator::Div(_) => {
                OpCategory::Arithmetic
            }
            Operator::LogicConstant(_)
            | Operator::Compare(_)
            | Operator::IsNull
            | Operator::InstanceOf(_)
            | Operator::LogicNot => OpCategory::Logic,
            Operator::Phi | Operator::MemoryPhi(_) => OpCategory::Phi,
            Operator::Read(_) | Operator::Write(_) | Operator::NewInstance(_) => {
                OpCategory::Memory
            }
            Operator::Call(_) => OpCategory::Call,
            Operator::Control(_) => OpCategory::Control,
            Operator::Guard { .. } | Operator::Pi => OpCategory::Guard,
        }
    }

    #[inline]
    pub const fn control(&self) -> Option<ControlOp> {
        match self {
            Operator::Control(c) => Some(*c),
            _ => None,
        }
    }

    #[inline]
    pub const fn is(&self, op: ControlOp) -> bool {
        matches!(self, Operator::Control(c) if *c as u8 == op as u8)
    }

    /// Fixed nodes sit in the control flow; everything else floats.
    #[inline]
    pub const fn is_fixed(&self) -> bool {
        matches!(
            self,
            Operator::Control(_)
                | Operator::Write(_)
                | Operator::NewInstance(_)
                | Operator::Div(_)
                | Operator::Call(_)
        )
    }

    /// Nodes that start a basic block.
    #[inline]
    pub const fn is_block_begin(&self) -> bool {
        matches!(
            self,
            Operator::Control(
                ControlOp::Start
                    | ControlOp::Region
                    | ControlOp::Loop
                    | ControlOp::IfTrue
                    | ControlOp::IfFalse
            )
        )
    }

    #[inline]
    pub const fn is_merge(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::Region | ControlOp::Loop))
    }

    /// `IfTrue` and `IfFalse`.
    #[inline]
    pub const fn is_projection(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::IfTrue | ControlOp::IfFalse))
    }

    /// Fixed nodes without a control successor.
    #[inline]
    pub const fn is_sink(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::Return | ControlOp::Deopt))
    }

    /// Fixed nodes that end their block: branches, sinks and back edges.
    #[inline]
    pub const fn is_block_end(&self) -> bool {
        matches!(
            self,
            Operator::Control(
                ControlOp::If | ControlOp::Return | ControlOp::Deopt | ControlOp::LoopEnd
            )
        )
    }

    #[inline]
    pub const fn is_phi(&self) -> bool {
        matches!(self, Operator::Phi | Operator::MemoryPhi(_))
    }

    #[inline]
    pub const fn is_logic(&self) -> bool {
        matches!(self.category(), OpCategory::Logic)
    }

    #[inline]
    pub const fn is_guard(&self) -> bool {
        matches!(self, Operator::Guard { .. })
    }

    /// Floating nodes that may be deleted once nothing uses them. Guards
    /// stay while their anchor does and parameters belong to the signature.
    #[inline]
    pub const fn is_removable_when_unused(&self) -> bool {
        !self.is_fixed() && !self.is_guard() && !matches!(self, Operator::Parameter(_))
    }

    /// Nodes that produce a memory state readable by floating reads.
    #[inline]
    pub const fn is_memory_state(&self) -> bool {
        matches!(
            self,
            Operator::Control(ControlOp::Start)
                | Operator::Write(_)
                | Operator::Call(_)
                | Operator::MemoryPhi(_)
        )
    }

    /// The location a fixed node overwrites, if any.
    #[inline]
    pub const fn killed_location(&self) -> Option<LocationIdentity> {
        match self {
            Operator::Write(loc) => Some(*loc),
            Operator::Call(_) => Some(LocationIdentity::Any),
            _ => None,
        }
    }

    /// Whether structurally identical nodes are interchangeable.
    ///
    /// Fixed nodes, phis and parameters have identity beyond their inputs.
    #[inline]
    pub const fn is_value_numberable(&self) -> bool {
        matches!(
            self,
            Operator::Constant(_)
                | Operator::Arith(_)
                | Operator::Unary(_)
                | Operator::Conditional
                | Operator::Pi
                | Operator::LogicConstant(_)
                | Operator::Compare(_)
                | Operator::IsNull
                | Operator::InstanceOf(_)
                | Operator::LogicNot
                | Operator::Read(_)
        )
    }

    /// Whether the first two inputs may be exchanged.
    #[inline]
    pub const fn is_commutative(&self) -> bool {
        match self {
            Operator::Arith(op) => op.is_commutative(),
            Operator::Compare(op) => op.is_commutative(),
            _ => false,
        }
    }

    /// Whether the node's stamp is part of its identity rather than derived.
    #[inline]
    pub const fn stamp_is_data(&self) -> bool {
        matches!(self, Operator::Pi)
    }

    pub const fn arity(&self) -> Arity {
        match self {
            Operator::Constant(_)
            | Operator::Parameter(_)
            | Operator::LogicConstant(_)
            | Operator::Control(ControlOp::Start) => Arity::Exact(0),
            Operator::Unary(_)
            | Operator::IsNull
            | Operator::InstanceOf(_)
            | Operator::LogicNot
            | Operator::NewInstance(_)
            | Operator::Control(
                ControlOp::LoopEnd | ControlOp::IfTrue | ControlOp::IfFalse | ControlOp::Deopt,
            ) => Arity::Exact(1),
            Operator::Arith(_)
            | Operator::Compare(_)
            | Operator::Pi
            | Operator::Read(_)
            | Operator::Guard { .. }
            | Operator::Control(ControlOp::If) => Arity::Exact(2),
            Operator::Conditional | Operator::Write(_) | Operator::Div(_) => Arity::Exact(3),
            Operator::Control(ControlOp::Return) => Arity::Range(1, 2),
            Operator::Control(ControlOp::Region | ControlOp::Loop) => Arity::AtLeast(1),
            Operator::Phi | Operator::MemoryPhi(_) => Arity::AtLeast(2),
            Operator::Call(_) => Arity::AtLeast(1),
        }
    }

    /// The role of input position `index`.
    pub const fn input_type(&self, index: usize) -> InputType {
        match self {
            Operator::Control(ControlOp::If) if index == 1 => InputType::Condition,
            Operator::Control(ControlOp::Return) if index == 1 => InputType::Value,
            Operator::Control(_) => InputType::Control,
            Operator::Write(_) | Operator::Div(_) | Operator::Call(_) | Operator::NewInstance(_) => {
                if index == 0 {
                    InputType::Control
                } else {
                    InputType::Value
                }
            }
            Operator::Phi | Operator::MemoryPhi(_) if index == 0 => InputType::Association,
            Operator::Phi => InputType::Value,
            Operator::MemoryPhi(_) => InputType::Memory,
            Operator::Read(_) if index == 1 => InputType::Memory,
            Operator::Conditional | Operator::Guard { .. } | Operator::LogicNot if index == 0 => {
                InputType::Condition
            }
            Operator::Guard { .. } | Operator::Pi if index == 1 => InputType::Anchor,
            _ => InputType::Value,
        }
    }

    /// Derive a stamp from input stamps.
    ///
    /// Returns `None` for operators whose stamp is fixed at construction
    /// (parameters, reads, calls, pi nodes).
    pub fn infer_stamp(&self, inputs: &[Stamp]) -> Option<Stamp> {
        let int = |i: usize| inputs.get(i).and_then(|s| s.as_int()).unwrap_or(IntStamp::FULL);
        match self {
            Operator::Constant(c) => Some(c.stamp()),
            Operator::Arith(op) => Some(Stamp::Int(op.stamp(int(0), int(1)))),
            Operator::Unary(op) => Some(Stamp::Int(op.stamp(int(0)))),
            Operator::Div(_) => Some(Stamp::INT),
            Operator::Conditional => match (inputs.get(1), inputs.get(2)) {
                (Some(a), Some(b)) => a.meet(*b),
                _ => None,
            },
            Operator::Phi => inputs
                .iter()
                .skip(1)
                .try_fold(Stamp::Empty, |acc, s| acc.meet(*s)),
            Operator::LogicConstant(_)
            | Operator::Compare(_)
            | Operator::IsNull
            | Operator::InstanceOf(_)
            | Operator::LogicNot => Some(Stamp::Condition),
            Operator::NewInstance(ty) => Some(Stamp::Object(ObjectStamp::exact_non_null(*ty))),
            Operator::MemoryPhi(_) | Operator::Write(_) => Some(Stamp::Memory),
            Operator::Control(ControlOp::Start) => Some(Stamp::Memory),
            Operator::Control(_) | Operator::Guard { .. } => Some(Stamp::Void),
            Operator::Parameter(_) | Operator::Read(_) | Operator::Call(_) | Operator::Pi => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Operator::Constant(_) => "Constant",
            Operator::Parameter(_) => "Parameter",
            Operator::Arith(ArithOp::Add) => "Add",
            Operator::Arith(ArithOp::Sub) => "Sub",
            Operator::Arith(ArithOp::Mul) => "Mul",
            Operator::Arith(ArithOp::And) => "And",
            Operator::Arith(ArithOp::Or) => "Or",
            Operator::Arith(ArithOp::Xor) => "Xor",
            Operator::Arith(ArithOp::Shl) => "Shl",
            Operator::Arith(ArithOp::Shr) => "Shr",
            Operator::Arith(ArithOp::UShr) => "UShr",
            Operator::Unary(UnaryOp::Neg) => "Neg",
            Operator::Unary(UnaryOp::Not) => "Not",
            Operator::Conditional => "Conditional",
            Operator::Pi => "Pi",
            Operator::LogicConstant(_) => "LogicConstant",
            Operator::Compare(_) => "Compare",
            Operator::IsNull => "IsNull",
            Operator::InstanceOf(_) => "InstanceOf",
            Operator::LogicNot => "LogicNot",
            Operator::Phi => "Phi",
            Operator::MemoryPhi(_) => "MemoryPhi",
            Operator::Read(_) => "Read",
            Operator::Write(_) => "Write",
            Operator::NewInstance(_) => "NewInstance",
            Operator::Div(DivOp::Div) => "Div",
            Operator::Div(DivOp::Rem) => "Rem",
            Operator::Call(_) => "Call",
            Operator::Control(ControlOp::Start) => "Start",
            Operator::Control(ControlOp::Region) => "Region",
            Operator::Control(ControlOp::Loop) => "Loop",
            Operator::Control(ControlOp::LoopEnd) => "LoopEnd",
            Operator::Control(ControlOp::If) => "If",
            Operator::Control(ControlOp::IfTrue) => "IfTrue",
            Operator::Control(ControlOp::IfFalse) => "IfFalse",
            Operator::Control(ControlOp::Return) => "Return",
            Operator::Control(ControlOp::Deopt) => "Deopt",
            Operator::Guard { .. } => "Guard",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Constant(Constant::Int(v)) => write!(f, "Constant({v})"),
            Operator::Constant(Constant::Null) => write!(f, "Constant(null)"),
            Operator::Parameter(i) => write!(f, "Parameter({i})"),
            Operator::LogicConstant(b) => write!(f, "LogicConstant({b})"),
            Operator::Compare(op) => write!(f, "Compare({})", op.symbol()),
            Operator::InstanceOf(ty) => write!(f, "InstanceOf({})", ty.0),
            Operator::MemoryPhi(loc) => write!(f, "MemoryPhi({loc})"),
            Operator::Read(loc) => write!(f, "Read({loc})"),
            Operator::Write(loc) => write!(f, "Write({loc})"),
            Operator::NewInstance(ty) => write!(f, "NewInstance({})", ty.0),
            Operator::Call(t) => write!(f, "Call({})", t.0),
            Operator::Guard { reason, negated } => {
                write!(f, "Guard({reason:?}{})", if *negated { ", negated" } else { "" })
            }
            other => f.write_str(other.name()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
