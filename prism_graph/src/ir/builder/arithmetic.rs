use super::GraphBuilder;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::{ArithOp, CmpOp, Constant, DivOp, Operator, UnaryOp};
use crate::ir::stamp::Stamp;
use crate::meta::TypeId;

/// Builder trait for values and conditions.
pub trait ArithmeticBuilder {
    // Constants
    fn const_int(&mut self, value: i64) -> NodeId;
    fn const_null(&mut self) -> NodeId;
    fn logic_const(&mut self, value: bool) -> NodeId;

    // Integer arithmetic
    fn arith(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_neg(&mut self, value: NodeId) -> NodeId;
    fn int_not(&mut self, value: NodeId) -> NodeId;
    fn int_div(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_rem(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;

    // Conditions
    fn compare(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_eq(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_lt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn logic_not(&mut self, condition: NodeId) -> NodeId;
    fn is_null(&mut self, value: NodeId) -> NodeId;
    fn instance_of(&mut self, value: NodeId, ty: TypeId) -> NodeId;
    fn conditional(&mut self, condition: NodeId, if_true: NodeId, if_false: NodeId) -> NodeId;
}

impl ArithmeticBuilder for GraphBuilder {
    fn const_int(&mut self, value: i64) -> NodeId {
        self.append(Node::derived(Operator::Constant(Constant::Int(value)), &[]))
    }

    fn const_null(&mut self) -> NodeId {
        self.append(Node::derived(Operator::Constant(Constant::Null), &[]))
    }

    fn logic_const(&mut self, value: bool) -> NodeId {
        self.append(Node::derived(Operator::LogicConstant(value), &[]))
    }

    fn arith(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.append(Node::derived(Operator::Arith(op), &[lhs, rhs]))
    }

    fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arith(ArithOp::Add, lhs, rhs)
    }

    fn int_sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arith(ArithOp::Sub, lhs, rhs)
    }

    fn int_mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arith(ArithOp::Mul, lhs, rhs)
    }

    fn int_neg(&mut self, value: NodeId) -> NodeId {
        self.append(Node::derived(Operator::Unary(UnaryOp::Neg), &[value]))
    }

    fn int_not(&mut self, value: NodeId) -> NodeId {
        self.append(Node::derived(Operator::Unary(UnaryOp::Not), &[value]))
    }

    fn int_div(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.append_fixed(Operator::Div(DivOp::Div), &[lhs, rhs], Stamp::INT)
    }

    fn int_rem(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.append_fixed(Operator::Div(DivOp::Rem), &[lhs, rhs], Stamp::INT)
    }

    fn compare(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.append(Node::derived(Operator::Compare(op), &[lhs, rhs]))
    }

    fn int_eq(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(CmpOp::Eq, lhs, rhs)
    }

    fn int_lt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(CmpOp::Lt, lhs, rhs)
    }

    fn logic_not(&mut self, condition: NodeId) -> NodeId {
        self.append(Node::derived(Operator::LogicNot, &[condition]))
    }

    fn is_null(&mut self, value: NodeId) -> NodeId {
        self.append(Node::derived(Operator::IsNull, &[value]))
    }

    fn instance_of(&mut self, value: NodeId, ty: TypeId) -> NodeId {
        self.append(Node::derived(Operator::InstanceOf(ty), &[value]))
    }

    fn conditional(&mut self, condition: NodeId, if_true: NodeId, if_false: NodeId) -> NodeId {
        self.append(Node::derived(
            Operator::Conditional,
            &[condition, if_true, if_false],
        ))
    }
}
