//! Stamps: the static value information attached to every node.
//!
//! A stamp describes the set of values a node may produce. Stamps form a
//! lattice per kind:
//!
//! ```text
//!          Int[i64::MIN, i64::MAX]        Object(any, maybe null)
//!             /          \                   /            \
//!        Int[lo, hi]    ...          Object(T, non-null)  Object(null)
//!             \          /                   \            /
//!                          Empty (no value; unreachable)
//! ```
//!
//! `meet` widens (used for phis), `join` narrows (used by pi nodes and
//! stamp inference). Canonicalization only ever replaces a stamp with a more
//! precise one, which bounds the number of stamp updates per node.

use std::fmt;

use crate::meta::TypeId;

// =============================================================================
// Integer Stamp
// =============================================================================

/// Closed signed 64-bit interval `[lo, hi]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntStamp {
    pub lo: i64,
    pub hi: i64,
}

impl IntStamp {
    pub const FULL: IntStamp = IntStamp {
        lo: i64::MIN,
        hi: i64::MAX,
    };

    #[inline]
    pub const fn constant(value: i64) -> Self {
        IntStamp {
            lo: value,
            hi: value,
        }
    }

    /// Interval from bounds; `None` if the interval is empty.
    #[inline]
    pub fn range(lo: i64, hi: i64) -> Option<Self> {
        (lo <= hi).then_some(IntStamp { lo, hi })
    }

    #[inline]
    pub fn as_constant(self) -> Option<i64> {
        (self.lo == self.hi).then_some(self.lo)
    }

    #[inline]
    pub fn is_full(self) -> bool {
        self == Self::FULL
    }

    #[inline]
    pub fn contains(self, value: i64) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// `true` if the two intervals share no value.
    #[inline]
    pub fn disjoint(self, other: IntStamp) -> bool {
        self.hi < other.lo || other.hi < self.lo
    }

    pub fn meet(self, other: IntStamp) -> IntStamp {
        IntStamp {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    pub fn join(self, other: IntStamp) -> Option<IntStamp> {
        IntStamp::range(self.lo.max(other.lo), self.hi.min(other.hi))
    }

    pub fn add(self, other: IntStamp) -> IntStamp {
        match (self.lo.checked_add(other.lo), self.hi.checked_add(other.hi)) {
            (Some(lo), Some(hi)) => IntStamp { lo, hi },
            _ => Self::FULL,
        }
    }

    pub fn sub(self, other: IntStamp) -> IntStamp {
        match (self.lo.checked_sub(other.hi), self.hi.checked_sub(other.lo)) {
            (Some(lo), Some(hi)) => IntStamp { lo, hi },
            _ => Self::FULL,
        }
    }

    pub fn mul(self, other: IntStamp) -> IntStamp {
        let corners = [
            self.lo.checked_mul(other.lo),
            self.lo.checked_mul(other.hi),
            self.hi.checked_mul(other.lo),
            self.hi.checked_mul(other.hi),
        ];
        let mut lo = i64::MAX;
        let mut hi = i64::MIN;
        for corner in corners {
            match corner {
                Some(v) => {
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
                None => return Self::FULL,
            }
        }
        IntStamp { lo, hi }
    }

    pub fn neg(self) -> IntStamp {
        if self.lo == i64::MIN {
            return Self::FULL;
        }
        IntStamp {
            lo: -self.hi,
            hi: -self.lo,
        }
    }

    /// `x & y` is bounded by the smaller non-negative operand.
    pub fn and(self, other: IntStamp) -> IntStamp {
        match (self.lo >= 0, other.lo >= 0) {
            (true, true) => IntStamp {
                lo: 0,
                hi: self.hi.min(other.hi),
            },
            (true, false) => IntStamp { lo: 0, hi: self.hi },
            (false, true) => IntStamp {
                lo: 0,
                hi: other.hi,
            },
            (false, false) => Self::FULL,
        }
    }
}

impl fmt::Debug for IntStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_constant() {
            Some(v) => write!(f, "i64[{v}]"),
            None if self.is_full() => write!(f, "i64"),
            None => write!(f, "i64[{}..{}]", self.lo, self.hi),
        }
    }
}

// =============================================================================
// Object Stamp
// =============================================================================

/// Reference stamp. `ty == None` means any object type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectStamp {
    pub ty: Option<TypeId>,
    pub exact: bool,
    pub non_null: bool,
    pub always_null: bool,
}

impl ObjectStamp {
    pub const ANY: ObjectStamp = ObjectStamp {
        ty: None,
        exact: false,
        non_null: false,
        always_null: false,
    };

    pub const NULL: ObjectStamp = ObjectStamp {
        ty: None,
        exact: false,
        non_null: false,
        always_null: true,
    };

    pub fn declared(ty: TypeId) -> Self {
        ObjectStamp {
            ty: Some(ty),
            ..Self::ANY
        }
    }

    pub fn exact_non_null(ty: TypeId) -> Self {
        ObjectStamp {
            ty: Some(ty),
            exact: true,
            non_null: true,
            always_null: false,
        }
    }

    pub fn meet(self, other: ObjectStamp) -> ObjectStamp {
        // A null constant carries no type information of its own.
        if self.always_null && !other.always_null {
            return ObjectStamp {
                non_null: false,
                ..other
            };
        }
        if other.always_null && !self.always_null {
            return ObjectStamp {
                non_null: false,
                ..self
            };
        }
        let same_ty = self.ty == other.ty;
        ObjectStamp {
            ty: if same_ty { self.ty } else { None },
            exact: same_ty && self.exact && other.exact,
            non_null: self.non_null && other.non_null,
            always_null: self.always_null && other.always_null,
        }
    }

    /// Intersection; `None` if nothing satisfies both.
    pub fn join(self, other: ObjectStamp) -> Option<ObjectStamp> {
        let non_null = self.non_null || other.non_null;
        let always_null = self.always_null || other.always_null;
        if non_null && always_null {
            return None;
        }
        let (ty, exact) = match (self.ty, other.ty) {
            (None, ty) => (ty, other.exact),
            (ty, None) => (ty, self.exact),
            (Some(a), Some(b)) if a == b => (Some(a), self.exact || other.exact),
            // Unrelated declared types need the type hierarchy to decide; keep
            // the left side which is the narrower by convention.
            (Some(a), Some(_)) => (Some(a), self.exact),
        };
        Some(ObjectStamp {
            ty,
            exact,
            non_null,
            always_null,
        })
    }
}

impl fmt::Debug for ObjectStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.always_null {
            return write!(f, "null");
        }
        write!(f, "obj")?;
        if let Some(ty) = self.ty {
            write!(f, "<{}{}>", if self.exact { "=" } else { "" }, ty.0)?;
        }
        if self.non_null {
            write!(f, "!")?;
        }
        Ok(())
    }
}

// =============================================================================
// Stamp
// =============================================================================

/// The static information attached to a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// No value: control nodes and pure side effects.
    Void,
    /// A memory state (start, writes, calls, memory phis).
    Memory,
    /// A logic value consumed only by `If`, `Conditional` and guards.
    Condition,
    Int(IntStamp),
    Object(ObjectStamp),
    /// The node cannot produce any value.
    Empty,
}

impl Stamp {
    pub const INT: Stamp = Stamp::Int(IntStamp::FULL);
    pub const OBJECT: Stamp = Stamp::Object(ObjectStamp::ANY);

    #[inline]
    pub fn int_constant(value: i64) -> Stamp {
        Stamp::Int(IntStamp::constant(value))
    }

    pub fn int_range(lo: i64, hi: i64) -> Stamp {
        IntStamp::range(lo, hi).map_or(Stamp::Empty, Stamp::Int)
    }

    /// `true` for stamps of nodes that yield a data value.
    pub fn is_value(self) -> bool {
        matches!(self, Stamp::Int(_) | Stamp::Object(_) | Stamp::Empty)
    }

    pub fn as_int(self) -> Option<IntStamp> {
        match self {
            Stamp::Int(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(self) -> Option<ObjectStamp> {
        match self {
            Stamp::Object(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int_constant(self) -> Option<i64> {
        self.as_int().and_then(IntStamp::as_constant)
    }

    /// Least upper bound; `None` when the kinds are incompatible.
    pub fn meet(self, other: Stamp) -> Option<Stamp> {
        match (self, other) {
            (Stamp::Empty, s) | (s, Stamp::Empty) => Some(s),
            (Stamp::Int(a), Stamp::Int(b)) => Some(Stamp::Int(a.meet(b))),
            (Stamp::Object(a), Stamp::Object(b)) => Some(Stamp::Object(a.meet(b))),
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }

    /// Greatest lower bound; `None` when the kinds are incompatible.
    pub fn join(self, other: Stamp) -> Option<Stamp> {
        match (self, other) {
            (Stamp::Empty, _) | (_, Stamp::Empty) => Some(Stamp::Empty),
            (Stamp::Int(a), Stamp::Int(b)) => Some(a.join(b).map_or(Stamp::Empty, Stamp::Int)),
            (Stamp::Object(a), Stamp::Object(b)) => {
                Some(a.join(b).map_or(Stamp::Empty, Stamp::Object))
            }
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }

    /// `true` if `self` is strictly more precise than `previous`.
    pub fn improves(self, previous: Stamp) -> bool {
        self != previous && self.join(previous) == Some(self)
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Void => write!(f, "void"),
            Stamp::Memory => write!(f, "mem"),
            Stamp::Condition => write!(f, "cond"),
            Stamp::Int(s) => write!(f, "{s:?}"),
            Stamp::Object(s) => write!(f, "{s:?}"),
            Stamp::Empty => write!(f, "empty"),
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Stamp::Void
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_interval_arithmetic() {
        let a = IntStamp::range(1, 5).unwrap();
        let b = IntStamp::range(-2, 3).unwrap();
        assert_eq!(a.add(b), IntStamp::range(-1, 8).unwrap());
        assert_eq!(a.sub(b), IntStamp::range(-2, 7).unwrap());
        assert_eq!(a.mul(b), IntStamp::range(-10, 15).unwrap());
        assert_eq!(a.neg(), IntStamp::range(-5, -1).unwrap());
    }

    #[test]
    fn test_int_overflow_widens() {
        let big = IntStamp::constant(i64::MAX);
        assert!(big.add(IntStamp::constant(1)).is_full());
        assert!(IntStamp::constant(i64::MIN).neg().is_full());
    }

    #[test]
    fn test_int_and_nonnegative() {
        let a = IntStamp::range(0, 255).unwrap();
        assert_eq!(a.and(IntStamp::FULL), IntStamp::range(0, 255).unwrap());
        assert!(IntStamp::FULL.and(IntStamp::FULL).is_full());
    }

    #[test]
    fn test_meet_and_join() {
        let a = Stamp::int_range(0, 10);
        let b = Stamp::int_range(5, 20);
        assert_eq!(a.meet(b), Some(Stamp::int_range(0, 20)));
        assert_eq!(a.join(b), Some(Stamp::int_range(5, 10)));
        assert_eq!(
            Stamp::int_constant(1).join(Stamp::int_constant(2)),
            Some(Stamp::Empty)
        );
        assert_eq!(Stamp::INT.meet(Stamp::OBJECT), None);
        assert_eq!(Stamp::Empty.meet(a), Some(a));
    }

    #[test]
    fn test_improves() {
        assert!(Stamp::int_range(0, 1).improves(Stamp::INT));
        assert!(!Stamp::INT.improves(Stamp::int_range(0, 1)));
        assert!(!Stamp::INT.improves(Stamp::INT));
    }

    #[test]
    fn test_object_null_meet() {
        let ty = TypeId(3);
        let obj = ObjectStamp::exact_non_null(ty);
        let merged = obj.meet(ObjectStamp::NULL);
        assert_eq!(merged.ty, Some(ty));
        assert!(!merged.non_null);
        assert!(!merged.always_null);
        assert!(ObjectStamp::NULL.join(obj).is_none());
    }
}
