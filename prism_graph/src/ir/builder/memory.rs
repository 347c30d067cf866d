use super::GraphBuilder;
use crate::error::CompileError;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::{CallTarget, LocationIdentity, Operator};
use crate::ir::stamp::Stamp;
use crate::meta::{FieldId, TypeId};

/// Builder trait for memory accesses, allocation and calls.
pub trait MemoryBuilder {
    /// A floating read of `location` at `address` in the current memory state.
    fn read(&mut self, location: LocationIdentity, address: NodeId, stamp: Stamp) -> NodeId;

    /// A fixed write; becomes the new memory state.
    fn write(&mut self, location: LocationIdentity, address: NodeId, value: NodeId) -> NodeId;

    /// Read a field, taking its stamp from the metadata provider.
    fn load_field(&mut self, object: NodeId, field: FieldId) -> NodeId;

    fn store_field(&mut self, object: NodeId, field: FieldId, value: NodeId) -> NodeId;

    fn new_instance(&mut self, ty: TypeId) -> NodeId;

    /// A call that may write any location.
    fn call(&mut self, target: CallTarget, args: &[NodeId], stamp: Stamp) -> NodeId;
}

impl MemoryBuilder for GraphBuilder {
    fn read(&mut self, location: LocationIdentity, address: NodeId, stamp: Stamp) -> NodeId {
        let memory = self.state.memory;
        self.append(Node::new(Operator::Read(location), &[address, memory], stamp))
    }

    fn write(&mut self, location: LocationIdentity, address: NodeId, value: NodeId) -> NodeId {
        let write = self.append_fixed(Operator::Write(location), &[address, value], Stamp::Memory);
        if write.is_valid() {
            self.state.memory = write;
        }
        write
    }

    fn load_field(&mut self, object: NodeId, field: FieldId) -> NodeId {
        let stamp = match self.meta.as_ref().map(|m| m.field_stamp(field)) {
            Some(Ok(stamp)) => stamp,
            Some(Err(e)) => {
                self.fail(CompileError::bailout(format!("cannot load field: {e}")));
                return NodeId::INVALID;
            }
            None => {
                self.fail(CompileError::bailout("field access without metadata"));
                return NodeId::INVALID;
            }
        };
        self.read(LocationIdentity::Field(field), object, stamp)
    }

    fn store_field(&mut self, object: NodeId, field: FieldId, value: NodeId) -> NodeId {
        self.write(LocationIdentity::Field(field), object, value)
    }

    fn new_instance(&mut self, ty: TypeId) -> NodeId {
        self.append_fixed(Operator::NewInstance(ty), &[], Stamp::Void)
    }

    fn call(&mut self, target: CallTarget, args: &[NodeId], stamp: Stamp) -> NodeId {
        let call = self.append_fixed(Operator::Call(target), args, stamp);
        if call.is_valid() {
            self.state.memory = call;
        }
        call
    }
}
