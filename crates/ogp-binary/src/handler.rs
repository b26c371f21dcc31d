//! Type handler contract and the collaborator traits handlers call back into.
//!
//! A [`TypeHandler`] owns everything type-specific about one type id: how an
//! instance is written into a chunk, how references are found in its binary
//! form, and how an instance is created and then initialized from that form.
//! Everything else (identity, batching, storage) is generic and lives in the
//! storer and loader crates.

use std::any::Any;
use std::sync::Arc;

use ogp_types::{Instance, ObjectId, PersistenceError, PersistenceResult, TypeId};

use crate::binary::Binary;
use crate::chunk::ChunksBuffer;
use crate::codec::ByteCodec;
use crate::member::{PrimitiveType, TypeDescription};
use crate::traversal::{ObjectIdAcceptor, ReferenceTraverser};
use crate::writer::EntityWriter;

/// Assigns object ids to referenced instances while a handler stores.
pub trait ReferenceStorer {
    /// Object id for `instance`, registering it for storing according to the
    /// session's policy.
    fn apply(&self, instance: &Instance) -> PersistenceResult<ObjectId>;

    /// Like [`apply`](Self::apply), but always stores the instance.
    fn apply_eager(&self, instance: &Instance) -> PersistenceResult<ObjectId>;

    /// `ObjectId::NULL` for `None`.
    fn apply_optional(&self, instance: Option<&Instance>) -> PersistenceResult<ObjectId> {
        match instance {
            Some(instance) => self.apply(instance),
            None => Ok(ObjectId::NULL),
        }
    }
}

/// Resolves object ids to instances while a handler initializes.
pub trait ObjectResolver {
    /// The instance for `oid` if it is part of the load or already known.
    fn lookup_object(&self, oid: ObjectId) -> Option<Instance>;

    /// `None` for the null id, an error for an id nothing knows about.
    fn resolve(&self, oid: ObjectId) -> PersistenceResult<Option<Instance>> {
        if oid.is_null() {
            return Ok(None);
        }
        self.lookup_object(oid)
            .map(Some)
            .ok_or(PersistenceError::UnresolvedReference { oid })
    }
}

/// A decoded primitive member value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PrimitiveValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    U16(u16),
    I32(i32),
    F32(f32),
    I64(i64),
    F64(f64),
}

impl PrimitiveValue {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Self::Bool(_) => PrimitiveType::Bool,
            Self::I8(_) => PrimitiveType::I8,
            Self::I16(_) => PrimitiveType::I16,
            Self::U16(_) => PrimitiveType::U16,
            Self::I32(_) => PrimitiveType::I32,
            Self::F32(_) => PrimitiveType::F32,
            Self::I64(_) => PrimitiveType::I64,
            Self::F64(_) => PrimitiveType::F64,
        }
    }

    /// The zero value of a primitive type.
    pub fn default_for(primitive: PrimitiveType) -> Self {
        match primitive {
            PrimitiveType::Bool => Self::Bool(false),
            PrimitiveType::I8 => Self::I8(0),
            PrimitiveType::I16 => Self::I16(0),
            PrimitiveType::U16 => Self::U16(0),
            PrimitiveType::I32 => Self::I32(0),
            PrimitiveType::F32 => Self::F32(0.0),
            PrimitiveType::I64 => Self::I64(0),
            PrimitiveType::F64 => Self::F64(0.0),
        }
    }

    /// Read a value of the given type at a content offset.
    pub fn read<C: ByteCodec>(data: &Binary<C>, offset: usize, primitive: PrimitiveType) -> PersistenceResult<Self> {
        Ok(match primitive {
            PrimitiveType::Bool => Self::Bool(data.get(offset)?),
            PrimitiveType::I8 => Self::I8(data.get(offset)?),
            PrimitiveType::I16 => Self::I16(data.get(offset)?),
            PrimitiveType::U16 => Self::U16(data.get(offset)?),
            PrimitiveType::I32 => Self::I32(data.get(offset)?),
            PrimitiveType::F32 => Self::F32(data.get(offset)?),
            PrimitiveType::I64 => Self::I64(data.get(offset)?),
            PrimitiveType::F64 => Self::F64(data.get(offset)?),
        })
    }

    /// Write the value at a content offset, returning the next offset.
    pub fn write<C: ByteCodec>(&self, writer: &mut EntityWriter<'_, C>, offset: usize) -> PersistenceResult<usize> {
        match *self {
            Self::Bool(v) => writer.put(offset, v),
            Self::I8(v) => writer.put(offset, v),
            Self::I16(v) => writer.put(offset, v),
            Self::U16(v) => writer.put(offset, v),
            Self::I32(v) => writer.put(offset, v),
            Self::F32(v) => writer.put(offset, v),
            Self::I64(v) => writer.put(offset, v),
            Self::F64(v) => writer.put(offset, v),
        }
    }
}

/// A member value as exchanged with reflective handlers.
#[derive(Clone)]
pub enum MemberValue {
    Primitive(PrimitiveValue),
    Reference(Option<Instance>),
}

impl std::fmt::Debug for MemberValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primitive(value) => write!(f, "Primitive({value:?})"),
            Self::Reference(None) => f.write_str("Reference(null)"),
            Self::Reference(Some(instance)) => {
                write!(f, "Reference({:#x})", ogp_types::identity_of(instance))
            }
        }
    }
}

/// Member-by-member access to instances of a fixed-layout type.
///
/// Handlers that offer it can be driven by the reflective legacy handler:
/// a blank instance is created and every current member is set from the
/// translated legacy value.
pub trait MemberAccess: Send + Sync {
    fn create_blank(&self) -> Instance;

    fn set_member(&self, instance: &Instance, index: usize, value: MemberValue) -> PersistenceResult<()>;
}

/// Everything type-specific about one persisted type.
pub trait TypeHandler<C: ByteCodec>: Send + Sync {
    /// The binary shape this handler reads and writes.
    fn description(&self) -> &TypeDescription;

    fn type_id(&self) -> TypeId {
        self.description().type_id
    }

    fn type_name(&self) -> &str {
        &self.description().type_name
    }

    /// Rust type of the instances this handler stores and creates.
    fn instance_type(&self) -> std::any::TypeId;

    /// Top-level traversal program of the persisted form.
    fn reference_traversers(&self) -> &[ReferenceTraverser];

    /// Append the entity for `instance` to `chunk`.
    fn store(
        &self,
        chunk: &mut ChunksBuffer<C>,
        instance: &Instance,
        oid: ObjectId,
        storer: &dyn ReferenceStorer,
    ) -> PersistenceResult<()>;

    /// Hook applied to every loaded entity before anything else. Legacy
    /// handlers reroute the bytes into the current layout here.
    fn prepare_load_data(&self, data: Binary<C>) -> PersistenceResult<Binary<C>> {
        Ok(data)
    }

    /// Report every reference slot of `data` to `acceptor`.
    fn iterate_loadable_references(
        &self,
        data: &Binary<C>,
        acceptor: &mut dyn ObjectIdAcceptor,
    ) -> PersistenceResult<()> {
        data.iterate_references(self.reference_traversers(), acceptor)
            .map(|_| ())
    }

    /// Create an instance. Must not resolve references: other instances of
    /// the same load may not exist yet.
    fn create(&self, data: &Binary<C>) -> PersistenceResult<Instance>;

    /// Fill a freshly created instance, resolving its references.
    fn initialize(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()>;

    /// Overwrite an existing instance with loaded state.
    fn update(&self, data: &Binary<C>, instance: &Instance, resolver: &dyn ObjectResolver) -> PersistenceResult<()> {
        self.initialize(data, instance, resolver)
    }

    /// Called once every instance of the load is initialized.
    fn complete(&self, _data: &Binary<C>, _instance: &Instance) -> PersistenceResult<()> {
        Ok(())
    }

    fn member_access(&self) -> Option<&dyn MemberAccess> {
        None
    }

    fn has_persisted_references(&self) -> bool {
        self.description().has_references()
    }

    fn has_variable_persisted_length(&self) -> bool {
        self.description().is_variable_length()
    }
}

/// Shared handle to a type handler.
pub type SharedTypeHandler<C> = Arc<dyn TypeHandler<C>>;

/// Borrow the concrete value of an instance a handler was given.
pub fn instance_of<T: Any + Send + Sync>(instance: &Instance, oid: ObjectId) -> PersistenceResult<&T> {
    ogp_types::downcast::<T>(instance, oid)
}
