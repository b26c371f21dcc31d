//! Description-driven handler for fixed-layout record types.
//!
//! Application types implement [`PersistentRecord`] to expose their members
//! by index in description order; [`GenericHandler`] does the rest. The
//! record is mutated through `&self`, so implementors keep their state behind
//! a lock: instances are shared handles and may already be referenced by
//! other instances when they are initialized.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use ogp_types::{Instance, ObjectId, PersistenceError, PersistenceResult};

use crate::analyzer::derive_reference_traversers;
use crate::binary::Binary;
use crate::chunk::ChunksBuffer;
use crate::codec::ByteCodec;
use crate::handler::{
    instance_of, MemberAccess, MemberValue, ObjectResolver, PrimitiveValue, ReferenceStorer, TypeHandler,
};
use crate::member::{MemberKind, TypeDescription};
use crate::traversal::ReferenceTraverser;

/// A record whose members can be read and written by index.
pub trait PersistentRecord: Any + Send + Sync + Default {
    fn read_member(&self, index: usize) -> MemberValue;

    fn write_member(&self, index: usize, value: MemberValue) -> PersistenceResult<()>;
}

/// Handler for a [`PersistentRecord`] whose members are all primitives or
/// references.
pub struct GenericHandler<T> {
    description: TypeDescription,
    offsets: Vec<usize>,
    content_length: usize,
    traversers: Vec<ReferenceTraverser>,
    _record: PhantomData<fn() -> T>,
}

enum Slot {
    Primitive(PrimitiveValue),
    Reference(ObjectId),
}

impl<T: PersistentRecord> GenericHandler<T> {
    pub fn new(description: TypeDescription) -> PersistenceResult<Self> {
        let (Some(offsets), Some(content_length)) = (description.member_offsets(), description.fixed_content_length())
        else {
            return Err(PersistenceError::HandlerConflict {
                tid: description.type_id,
                reason: format!("{} has variable-length members", description.type_name),
            });
        };
        let traversers = derive_reference_traversers(&description);
        Ok(Self {
            description,
            offsets,
            content_length,
            traversers,
            _record: PhantomData,
        })
    }

    fn mismatch(&self, oid: ObjectId, index: usize, value: &MemberValue) -> PersistenceError {
        PersistenceError::Consistency(format!(
            "object {oid}: member {} of {} does not accept {value:?}",
            self.description.members[index].name, self.description.type_name
        ))
    }

    fn read_slots(&self, record: &T, oid: ObjectId, storer: &dyn ReferenceStorer) -> PersistenceResult<Vec<Slot>> {
        self.description
            .members
            .iter()
            .enumerate()
            .map(|(index, member)| match (&member.kind, record.read_member(index)) {
                (MemberKind::Primitive { primitive }, MemberValue::Primitive(value))
                    if value.primitive_type() == *primitive =>
                {
                    Ok(Slot::Primitive(value))
                }
                (MemberKind::Reference { .. }, MemberValue::Reference(target)) => {
                    storer.apply_optional(target.as_ref()).map(Slot::Reference)
                }
                (_, value) => Err(self.mismatch(oid, index, &value)),
            })
            .collect()
    }

    fn apply_members(
        &self,
        data: &Binary<impl ByteCodec>,
        resolver: &dyn ObjectResolver,
        mut set: impl FnMut(usize, MemberValue) -> PersistenceResult<()>,
    ) -> PersistenceResult<()> {
        data.validate_required_content_length(self.content_length)?;
        for (index, member) in self.description.members.iter().enumerate() {
            let offset = self.offsets[index];
            let value = match &member.kind {
                MemberKind::Primitive { primitive } => {
                    MemberValue::Primitive(PrimitiveValue::read(data, offset, *primitive)?)
                }
                MemberKind::Reference { .. } => MemberValue::Reference(resolver.resolve(data.get_reference(offset)?)?),
                _ => {
                    return Err(PersistenceError::Consistency(format!(
                        "member {} of {} is not fixed length",
                        member.name, self.description.type_name
                    )))
                }
            };
            set(index, value)?;
        }
        Ok(())
    }
}

impl<C: ByteCodec, T: PersistentRecord> TypeHandler<C> for GenericHandler<T> {
    fn description(&self) -> &TypeDescription {
        &self.description
    }

    fn instance_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<T>()
    }

    fn reference_traversers(&self) -> &[ReferenceTraverser] {
        &self.traversers
    }

    fn store(
        &self,
        chunk: &mut ChunksBuffer<C>,
        instance: &Instance,
        oid: ObjectId,
        storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()> {
        let record = instance_of::<T>(instance, oid)?;
        let slots = self.read_slots(record, oid, storer)?;
        let mut writer = chunk.store_entity_header(self.content_length, self.description.type_id, oid)?;
        for (slot, offset) in slots.iter().zip(&self.offsets) {
            match slot {
                Slot::Primitive(value) => value.write(&mut writer, *offset)?,
                Slot::Reference(target) => writer.put_reference(*offset, *target)?,
            };
        }
        Ok(())
    }

    fn create(&self, _data: &Binary<C>) -> PersistenceResult<Instance> {
        Ok(Arc::new(T::default()))
    }

    fn initialize(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        let record = instance_of::<T>(instance, data.object_id())?;
        self.apply_members(data, resolver, |index, value| record.write_member(index, value))
    }

    fn member_access(&self) -> Option<&dyn MemberAccess> {
        Some(self)
    }
}

impl<T: PersistentRecord> MemberAccess for GenericHandler<T> {
    fn create_blank(&self) -> Instance {
        Arc::new(T::default())
    }

    fn set_member(&self, instance: &Instance, index: usize, value: MemberValue) -> PersistenceResult<()> {
        instance_of::<T>(instance, ObjectId::NULL)?.write_member(index, value)
    }
}
